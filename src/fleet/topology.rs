//! Static personality topology
//!
//! Declares, for each personality, where its events flow next (downstream)
//! and the fallback hop (alternate). Route resolution reads the table
//! forwards; broadcast targeting reads it in reverse.

use crate::db::schemas::{Personality, WorkerStatus};

/// One hop in the pipeline graph
#[derive(Debug, Clone, Copy)]
pub struct PersonalityEdge {
    pub personality: Personality,
    pub downstream: Option<Personality>,
    pub alternate: Option<Personality>,
}

/// The pipeline graph. Broadcasters sit upstream of the pipeline heads so
/// route pushes reach the workers that hold routing tables.
pub const TOPOLOGY: &[PersonalityEdge] = &[
    PersonalityEdge {
        personality: Personality::Correlation,
        downstream: Some(Personality::Storage),
        alternate: Some(Personality::Normalization),
    },
    PersonalityEdge {
        personality: Personality::Normalization,
        downstream: Some(Personality::Storage),
        alternate: None,
    },
    PersonalityEdge {
        personality: Personality::Storage,
        downstream: None,
        alternate: None,
    },
    PersonalityEdge {
        personality: Personality::Broadcaster,
        downstream: Some(Personality::Correlation),
        alternate: Some(Personality::Normalization),
    },
    PersonalityEdge {
        personality: Personality::Pairing,
        downstream: None,
        alternate: None,
    },
];

/// Statuses a worker may hold and still appear in route tables
pub const VALID_ROUTE_STATUSES: &[WorkerStatus] = &[WorkerStatus::New, WorkerStatus::Online];

/// Topology edge for a personality
pub fn edge_for(personality: Personality) -> Option<&'static PersonalityEdge> {
    TOPOLOGY.iter().find(|e| e.personality == personality)
}

/// Personalities a worker of this personality routes to, downstream first
pub fn downstream_of(personality: Personality) -> Vec<Personality> {
    match edge_for(personality) {
        Some(edge) => edge.downstream.into_iter().chain(edge.alternate).collect(),
        None => Vec::new(),
    }
}

/// Personalities whose workers route to this personality. These are the
/// workers whose route tables go stale when a worker of `personality`
/// changes, so they are the targets of a broadcast.
pub fn upstream_of(personality: Personality) -> Vec<Personality> {
    TOPOLOGY
        .iter()
        .filter(|e| e.downstream == Some(personality) || e.alternate == Some(personality))
        .map(|e| e.personality)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_routes_downstream_then_alternate() {
        assert_eq!(
            downstream_of(Personality::Correlation),
            vec![Personality::Storage, Personality::Normalization]
        );
    }

    #[test]
    fn storage_is_a_sink() {
        assert!(downstream_of(Personality::Storage).is_empty());
    }

    #[test]
    fn broadcasters_are_upstream_of_correlation() {
        assert_eq!(
            upstream_of(Personality::Correlation),
            vec![Personality::Broadcaster]
        );
    }

    #[test]
    fn storage_has_both_pipeline_heads_upstream() {
        assert_eq!(
            upstream_of(Personality::Storage),
            vec![Personality::Correlation, Personality::Normalization]
        );
    }

    #[test]
    fn pairing_sits_outside_the_pipeline() {
        assert!(downstream_of(Personality::Pairing).is_empty());
        assert!(upstream_of(Personality::Pairing).is_empty());
    }
}
