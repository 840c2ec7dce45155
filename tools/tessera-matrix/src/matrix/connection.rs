use rustc_hash::FxHashMap;
use tessera_common::GraphId;

/// Edge id → indices of the locations whose search labelled that edge
///
/// Backward searches fill the target index and forward searches the source
/// index; each side probes the other's index when it settles an edge.
/// Entries are only appended during a query.
#[derive(Debug, Clone, Default)]
pub struct ReachIndex {
    entries: FxHashMap<GraphId, Vec<u32>>,
}

impl ReachIndex {
    pub fn register(&mut self, edge: GraphId, location: u32) {
        let locations = self.entries.entry(edge).or_default();
        if locations.last() != Some(&location) {
            locations.push(location);
        }
    }

    pub fn reached_by(&self, edge: GraphId) -> &[u32] {
        self.entries.get(&edge).map_or(&[], Vec::as_slice)
    }

    pub fn clear(&mut self, max_reserved: usize) {
        self.entries.clear();
        self.entries.shrink_to(max_reserved);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
