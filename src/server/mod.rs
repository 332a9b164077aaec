//! HTTP server for the coordinator API

pub mod http;

pub use http::{run, AppState};
