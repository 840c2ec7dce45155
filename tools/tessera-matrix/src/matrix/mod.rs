//! Many-to-many cost matrix
//!
//! One forward search per source and one backward search per target run
//! interleaved, one expansion each per round. Every settled edge is probed
//! against the index of edges labelled by the opposite direction, so a
//! meeting point costs a hash lookup. Pairs keep their cheapest connection
//! until they are confirmed, and the loop stops once every source or every
//! target has nothing left to do.
//!
//! ## Components
//!
//! - `bucket_queue`: double-bucket frontier, one per search
//! - `edge_label` / `edge_status`: label arena and per-edge state
//! - `hierarchy`: per-search hierarchy pruning
//! - `connection`: edge → location reach indices (source and target side)
//! - `candidate`: best connection per pair
//! - `cost_matrix`: the driver
//! - `recost`: time-dependent correction along the found paths

pub mod bucket_queue;
pub mod candidate;
pub mod connection;
pub mod cost_matrix;
pub mod edge_label;
pub mod edge_status;
pub mod hierarchy;
pub mod location;
pub mod recost;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tessera_common::GraphId;

pub use bucket_queue::DoubleBucketQueue;
pub use candidate::{BestCandidate, BestCandidates, Candidate, Offer};
pub use connection::ReachIndex;
pub use cost_matrix::{get_cost_threshold, CostMatrix, MatrixRequest};
pub use edge_label::{EdgeLabel, INVALID_LABEL};
pub use edge_status::{EdgeSet, EdgeStatus, EdgeStatusInfo};
pub use hierarchy::HierarchyLimiter;
pub use location::{Location, LocationState, LocationStatus, PathEdge};

/// Meeting point of the forward and backward searches for one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Last edge of the forward part of the path
    pub edge_id: GraphId,
    /// Edge carrying the backward label the path continues with
    pub opp_edge_id: GraphId,
}

/// One source-target result
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatrixCell {
    pub found: bool,
    /// Cost units
    pub cost: f32,
    /// Seconds
    pub time: f32,
    /// Meters
    pub distance: f32,
    /// Arrival (depart-at) or departure (arrive-by) for time-dependent queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
}

/// Dense row-major |sources| × |targets| result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Matrix {
    pub num_sources: usize,
    pub num_targets: usize,
    pub cells: Vec<MatrixCell>,
}

impl Matrix {
    pub fn get(&self, source: usize, target: usize) -> Option<&MatrixCell> {
        if source >= self.num_sources || target >= self.num_targets {
            return None;
        }
        self.cells.get(source * self.num_targets + target)
    }

    /// Cells of one source
    pub fn row(&self, source: usize) -> &[MatrixCell] {
        let start = (source * self.num_targets).min(self.cells.len());
        let end = (start + self.num_targets).min(self.cells.len());
        &self.cells[start..end]
    }

    pub fn found_count(&self) -> usize {
        self.cells.iter().filter(|c| c.found).count()
    }
}

/// Statistics of one matrix query
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixStats {
    pub n_sources: usize,
    pub n_targets: usize,
    /// Rounds of the interleaved loop
    pub iterations: u32,
    pub forward_settled: usize,
    pub backward_settled: usize,
    /// Candidates accepted into the best-candidate table
    pub connections: usize,
    pub recosted: usize,
    pub recost_failures: usize,
    pub search_time_ms: u64,
    pub recost_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_lookup_is_bounds_checked() {
        let matrix = Matrix {
            num_sources: 2,
            num_targets: 3,
            cells: (0..6)
                .map(|i| MatrixCell {
                    found: true,
                    cost: i as f32,
                    ..Default::default()
                })
                .collect(),
        };
        assert_eq!(matrix.get(1, 2).map(|c| c.cost), Some(5.0));
        assert!(matrix.get(2, 0).is_none());
        assert!(matrix.get(0, 3).is_none());
        assert_eq!(matrix.row(1).len(), 3);
        assert_eq!(matrix.found_count(), 6);
    }

    #[test]
    fn unreachable_cells_serialize_compactly() {
        let json = serde_json::to_value(MatrixCell::default()).unwrap();
        assert_eq!(json["found"], false);
        assert!(json.get("connection").is_none());
        assert!(json.get("date_time").is_none());
    }
}
