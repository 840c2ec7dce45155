//! Costing interface
//!
//! A [`DynamicCost`] decides which edges a mode may use and what traversing
//! them costs, optionally as a function of the time of week.

pub mod speed;

use serde::{Deserialize, Serialize};
use tessera_common::{Cost, Mode};

use crate::graph::{DirectedEdge, NodeInfo};

pub use speed::{SpeedCost, SpeedWindow};

/// Per-level expansion limits
///
/// Level 0 is the most important road class. Once a search has made more
/// than `max_up_transitions` upward transitions out of a level and is further
/// than `expansion_within_dist` meters from its origin, that level is no
/// longer expanded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HierarchyLimits {
    pub max_up_transitions: u32,
    pub expansion_within_dist: f32,
}

impl HierarchyLimits {
    /// Limits that never stop expansion
    pub const UNLIMITED: HierarchyLimits = HierarchyLimits {
        max_up_transitions: u32::MAX,
        expansion_within_dist: f32::MAX,
    };

    /// Motorized defaults for levels 0 (highway), 1 (arterial), 2 (local)
    pub fn defaults() -> Vec<HierarchyLimits> {
        vec![
            HierarchyLimits::UNLIMITED,
            HierarchyLimits {
                max_up_transitions: 400,
                expansion_within_dist: 100_000.0,
            },
            HierarchyLimits {
                max_up_transitions: 100,
                expansion_within_dist: 5_000.0,
            },
        ]
    }

    pub fn unlimited() -> Vec<HierarchyLimits> {
        vec![HierarchyLimits::UNLIMITED; 3]
    }
}

/// Mode-specific costing
pub trait DynamicCost: Send + Sync {
    fn mode(&self) -> Mode;

    /// Edge may be traversed in its own direction
    fn allowed(&self, edge: &DirectedEdge) -> bool {
        edge.access & self.mode().access_mask() != 0
    }

    fn node_allowed(&self, node: &NodeInfo) -> bool {
        node.access & self.mode().access_mask() != 0
    }

    /// Cost of traversing the whole edge; `second_of_week` is `None` when
    /// the query is time-independent.
    fn edge_cost(&self, edge: &DirectedEdge, second_of_week: Option<u32>) -> Cost;

    /// Cost of passing through `node` from edge `from` onto edge `to`
    fn transition_cost(&self, _node: &NodeInfo, _from: &DirectedEdge, _to: &DirectedEdge) -> Cost {
        Cost::ZERO
    }

    fn hierarchy_limits(&self) -> Vec<HierarchyLimits> {
        HierarchyLimits::defaults()
    }
}
