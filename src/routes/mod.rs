//! HTTP routes for the coordinator

pub mod health;
pub mod pairing;
pub mod workers;

pub use health::{health_check, version_info};
pub use pairing::handle_pairing_request;
pub use workers::{handle_watchlist_request, handle_worker_request};
