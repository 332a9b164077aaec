//! Worker-side bootstrap agent
//!
//! Runs on each fleet node: pairs with the coordinator to obtain identity
//! and routes, persists them locally, and serves the small HTTP surface the
//! coordinator and provisioning tooling talk to.

pub mod api;
pub mod pairing;
pub mod system;

pub use api::AgentState;
pub use pairing::{AgentSettings, PairingAgent, PairingStage, PairingTarget, WorkerConfig};
