//! Fleet coordination core
//!
//! Worker registry, personality topology, route resolution, the failure
//! watchlist, and broadcast dispatch.

pub mod broadcast;
pub mod registry;
pub mod routing;
pub mod store;
pub mod topology;
pub mod watchlist;

pub use broadcast::{BroadcastConfig, BroadcastDispatcher, DispatchOutcome};
pub use registry::{PairingResponse, WorkerRegistry};
pub use routing::{Route, RouteResolver};
pub use store::{
    MemoryWatchlistStore, MemoryWorkerStore, MongoWatchlistStore, MongoWorkerStore,
    WatchlistStore, WorkerStore,
};
pub use watchlist::{WatchlistConfig, WatchlistMonitor};
