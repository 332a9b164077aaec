//! Database schemas for Foreman
//!
//! Defines MongoDB document structures for workers and the failure watchlist.

mod metadata;
mod watchlist;
mod worker;

pub use metadata::Metadata;
pub use watchlist::{WatchlistDoc, WATCHLIST_COLLECTION};
pub use worker::{
    DiskUsage, LoadAverage, Personality, RouteTarget, SystemInfo, WorkerDoc, WorkerRegistration,
    WorkerStatus, WORKER_COLLECTION,
};
