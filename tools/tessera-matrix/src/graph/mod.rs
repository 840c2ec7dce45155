//! Tiled graph access
//!
//! The routing graph is split into tiles per hierarchy level. Nodes own a
//! contiguous run of outgoing directed edges inside their tile, and every
//! directed edge knows the position of its opposing edge among the outgoing
//! edges of its end node. Storage and paging live behind [`GraphReader`].

pub mod memory;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_common::{Error, GraphId, Result};

pub use memory::{GraphBuilder, GraphSpec, MemoryGraph, NodeSpec, Road, RoadSpec};

/// Directed edge attributes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectedEdge {
    /// Node this edge leads to
    pub end_node: GraphId,
    /// Index of the opposing edge among the end node's outgoing edges
    pub opp_index: u32,
    /// Length in meters
    pub length: u32,
    /// Speed in km/h
    pub speed: u32,
    /// Mode access bits for traversal in this direction
    pub access: u8,
}

/// Node attributes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Index of the first outgoing edge within the tile
    pub edge_index: u32,
    /// Number of outgoing edges
    pub edge_count: u32,
    /// Mode access bits
    pub access: u8,
    /// Node has a traffic signal
    pub traffic_signal: bool,
}

impl NodeInfo {
    /// Ids of the outgoing edges of `node`, which must be the id of this node
    pub fn edge_ids(&self, node: GraphId) -> impl Iterator<Item = GraphId> {
        let start = self.edge_index;
        (start..start + self.edge_count).map(move |i| node.with_id(i))
    }
}

/// One tile of the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphTile {
    /// Tile id (id within tile = 0)
    pub id: GraphId,
    pub nodes: Vec<NodeInfo>,
    pub edges: Vec<DirectedEdge>,
}

impl GraphTile {
    pub fn node(&self, id: GraphId) -> Result<&NodeInfo> {
        self.nodes
            .get(id.id() as usize)
            .ok_or(Error::NodeNotFound(id))
    }

    pub fn directed_edge(&self, id: GraphId) -> Result<&DirectedEdge> {
        self.edges
            .get(id.id() as usize)
            .ok_or(Error::EdgeNotFound(id))
    }
}

/// Read access to graph tiles
///
/// Implementations may page tiles from disk; any failure must surface as an
/// error so searches can treat the affected edge as unreachable.
pub trait GraphReader: Send + Sync {
    /// Tile containing `id`
    fn graph_tile(&self, id: GraphId) -> Result<Arc<GraphTile>>;

    fn node_info(&self, node: GraphId) -> Result<NodeInfo> {
        self.graph_tile(node)?.node(node).copied()
    }

    fn directed_edge(&self, edge: GraphId) -> Result<DirectedEdge> {
        self.graph_tile(edge)?.directed_edge(edge).copied()
    }

    /// Id of the edge traversing `edge` in the opposite direction
    fn opposing_edge(&self, edge: GraphId) -> Result<GraphId> {
        let directed = self.directed_edge(edge)?;
        let end = self.node_info(directed.end_node)?;
        if directed.opp_index >= end.edge_count {
            return Err(Error::EdgeNotFound(edge));
        }
        Ok(directed.end_node.with_id(end.edge_index + directed.opp_index))
    }

    /// Outgoing edges of `node`
    fn outgoing_edges(&self, node: GraphId) -> Result<Vec<GraphId>> {
        Ok(self.node_info(node)?.edge_ids(node).collect())
    }
}
