//! Watchlist document schema
//!
//! One entry per worker currently under failure observation. Entries are
//! created on the first failure report, bumped on each subsequent report, and
//! hard-deleted by the expiry sweep once stale.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for watchlist entries
pub const WATCHLIST_COLLECTION: &str = "watchlist";

/// Watchlist entry stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WatchlistDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Worker under observation
    pub worker_id: String,

    /// Timestamp of the most recent failure report
    pub last_changed: DateTime,

    /// Number of failure reports since the entry was created
    pub watch_count: i32,
}

impl WatchlistDoc {
    /// Create a fresh entry for a first failure report
    pub fn new(worker_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            worker_id,
            last_changed: DateTime::now(),
            watch_count: 1,
        }
    }
}

impl Default for WatchlistDoc {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl IntoIndexes for WatchlistDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // At most one entry per worker
            (
                doc! { "worker_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("worker_id_unique".to_string())
                        .build(),
                ),
            ),
            // Expiry sweep scans by last_changed
            (
                doc! { "last_changed": 1 },
                Some(
                    IndexOptions::builder()
                        .name("last_changed_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for WatchlistDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
