use rustc_hash::FxHashMap;
use tessera_common::GraphId;

/// Traversal state of a labelled edge within one search; edges without an
/// entry are unreached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSet {
    /// Labelled and queued; cost may still decrease
    Temporary,
    /// Settled
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeStatusInfo {
    pub set: EdgeSet,
    pub label_index: u32,
}

/// Edge id → status for one location's search
#[derive(Debug, Clone, Default)]
pub struct EdgeStatus {
    entries: FxHashMap<GraphId, EdgeStatusInfo>,
}

impl EdgeStatus {
    pub fn get(&self, edge: GraphId) -> Option<EdgeStatusInfo> {
        self.entries.get(&edge).copied()
    }

    pub fn insert(&mut self, edge: GraphId, set: EdgeSet, label_index: u32) {
        self.entries.insert(edge, EdgeStatusInfo { set, label_index });
    }

    /// Change the state of an edge that already has a label
    pub fn update(&mut self, edge: GraphId, set: EdgeSet) {
        if let Some(entry) = self.entries.get_mut(&edge) {
            entry.set = set;
        }
    }

    pub fn clear(&mut self, max_reserved: usize) {
        self.entries.clear();
        self.entries.shrink_to(max_reserved);
    }
}
