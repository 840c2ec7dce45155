use tessera_common::{Cost, GraphId};

/// Predecessor index of seed labels
pub const INVALID_LABEL: u32 = u32::MAX;

/// Search label of one directed edge
///
/// For backward searches the label on edge `x` stands for the forward
/// traversal of `opp_edge_id`, and `end_node` is the node the backward search
/// expands next (the start node of that forward traversal).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeLabel {
    pub predecessor: u32,
    pub edge_id: GraphId,
    pub opp_edge_id: GraphId,
    pub end_node: GraphId,
    /// Accumulated cost including this edge
    pub cost: Cost,
    pub sort_cost: f32,
    /// Accumulated distance in meters including this edge
    pub distance: f32,
    /// Turn cost paid when entering this edge
    pub transition_cost: Cost,
    /// Cost of traversing the whole edge
    pub edge_cost: Cost,
    /// Length of the whole edge in meters
    pub edge_length: f32,
    pub level: u32,
}

impl EdgeLabel {
    /// Label of a search origin (no predecessor)
    pub fn seed(
        edge_id: GraphId,
        opp_edge_id: GraphId,
        end_node: GraphId,
        cost: Cost,
        distance: f32,
        edge_cost: Cost,
        edge_length: f32,
    ) -> Self {
        Self {
            predecessor: INVALID_LABEL,
            edge_id,
            opp_edge_id,
            end_node,
            cost,
            sort_cost: cost.cost,
            distance,
            transition_cost: Cost::ZERO,
            edge_cost,
            edge_length,
            level: edge_id.level(),
        }
    }

    #[inline]
    pub fn is_seed(&self) -> bool {
        self.predecessor == INVALID_LABEL
    }

    /// Lower the accumulated values after a cheaper path was found
    pub fn update(&mut self, predecessor: u32, cost: Cost, distance: f32, transition_cost: Cost) {
        self.predecessor = predecessor;
        self.cost = cost;
        self.sort_cost = cost.cost;
        self.distance = distance;
        self.transition_cost = transition_cost;
    }
}
