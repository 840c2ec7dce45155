use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tessera_common::{Error, GraphId, Result};
use tracing::debug;

use crate::graph::GraphReader;

/// A location correlated to one directed edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathEdge {
    pub edge_id: GraphId,
    /// Position along the edge, 0.0 = start node, 1.0 = end node
    pub percent_along: f32,
}

impl PathEdge {
    pub fn new(edge_id: GraphId, percent_along: f32) -> Self {
        Self {
            edge_id,
            percent_along,
        }
    }
}

/// Source or target of a matrix request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub edges: Vec<PathEdge>,
    /// Local date-time, used by time-dependent queries
    #[serde(default)]
    pub date_time: Option<NaiveDateTime>,
}

impl Location {
    pub fn new(edges: Vec<PathEdge>) -> Self {
        Self {
            edges,
            date_time: None,
        }
    }

    pub fn with_date_time(mut self, date_time: NaiveDateTime) -> Self {
        self.date_time = Some(date_time);
        self
    }

    /// Correlate a location sitting exactly on `node`: every outgoing edge at
    /// its start and every incoming edge at its end
    pub fn from_node(reader: &dyn GraphReader, node: GraphId) -> Result<Self> {
        let mut edges = Vec::new();
        for edge_id in reader.outgoing_edges(node)? {
            edges.push(PathEdge::new(edge_id, 0.0));
            match reader.opposing_edge(edge_id) {
                Ok(opp) => edges.push(PathEdge::new(opp, 1.0)),
                Err(e) => debug!("No opposing edge for {edge_id}: {e}"),
            }
        }
        Ok(Self::new(edges))
    }

    /// Position along `edge`, if the location is correlated to it
    pub fn percent_along(&self, edge: GraphId) -> Option<f32> {
        self.edges
            .iter()
            .find(|e| e.edge_id == edge)
            .map(|e| e.percent_along)
    }

    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            if !edge.edge_id.is_valid() {
                return Err(Error::InvalidInput("location edge id is invalid".into()));
            }
            if !(0.0..=1.0).contains(&edge.percent_along) {
                return Err(Error::InvalidInput(format!(
                    "percent_along {} on edge {} is outside 0..=1",
                    edge.percent_along, edge.edge_id
                )));
            }
        }
        Ok(())
    }
}

/// Lifecycle of a location's search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationState {
    /// No usable edges; never expanded
    #[default]
    Inactive,
    Active,
    /// Done expanding
    Exhausted,
}

/// Per-location search bookkeeping
#[derive(Debug, Clone, Default)]
pub struct LocationStatus {
    /// Expansions left before the location is exhausted
    pub threshold: u32,
    /// Opposite locations not yet connected to this one
    pub remaining_locations: BTreeSet<u32>,
    pub state: LocationState,
}

impl LocationStatus {
    pub fn new(threshold: u32, opposite_count: u32) -> Self {
        Self {
            threshold,
            remaining_locations: (0..opposite_count).collect(),
            state: LocationState::Inactive,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == LocationState::Active
    }
}
