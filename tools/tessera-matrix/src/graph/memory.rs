//! In-memory tiled graph
//!
//! Roads are added as undirected pairs and split into two directed edges, one
//! per travel direction, so every directed edge has an opposing edge even on
//! one-way roads (the closed direction simply carries no access bits).
//!
//! Tiles are laid out CSR-style: per-node edge counts, prefix sums for the
//! edge index, then a fill pass.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tessera_common::{access, Error, GraphId, Mode, Result};

use super::{DirectedEdge, GraphReader, GraphTile, NodeInfo};

/// Attributes of a road added to a [`GraphBuilder`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Road {
    /// Length in meters
    pub length: u32,
    /// Speed in km/h
    pub speed: u32,
    /// Access bits in the from → to direction
    pub forward_access: u8,
    /// Access bits in the to → from direction
    pub reverse_access: u8,
}

impl Road {
    /// Two-way road open to every mode
    pub fn new(length: u32, speed: u32) -> Self {
        Self {
            length,
            speed,
            forward_access: access::ALL,
            reverse_access: access::ALL,
        }
    }

    /// Close the to → from direction
    pub fn oneway(mut self) -> Self {
        self.reverse_access = 0;
        self
    }

    /// Restrict both directions to `mask`
    pub fn with_access(mut self, mask: u8) -> Self {
        self.forward_access &= mask;
        self.reverse_access &= mask;
        self
    }
}

struct BuilderNode {
    id: GraphId,
    access: u8,
    traffic_signal: bool,
}

struct BuilderEdge {
    from: usize,
    to: usize,
    length: u32,
    speed: u32,
    access: u8,
}

/// Assembles a [`MemoryGraph`]
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<BuilderNode>,
    node_index: FxHashMap<GraphId, usize>,
    tile_sizes: FxHashMap<GraphId, u32>,
    /// Directed edges; the opposing edge of `2k` is `2k + 1`
    edges: Vec<BuilderEdge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to tile `tile` of hierarchy level `level`
    pub fn add_node(&mut self, level: u32, tile: u32) -> Result<GraphId> {
        self.add_node_with(level, tile, access::ALL, false)
    }

    pub fn add_node_with(
        &mut self,
        level: u32,
        tile: u32,
        access: u8,
        traffic_signal: bool,
    ) -> Result<GraphId> {
        let tile_base = GraphId::new(level, tile, 0)?;
        let next = self.tile_sizes.entry(tile_base).or_insert(0);
        let id = GraphId::new(level, tile, *next)?;
        *next += 1;

        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(BuilderNode {
            id,
            access,
            traffic_signal,
        });
        Ok(id)
    }

    /// Add a road between two nodes (one directed edge per direction)
    pub fn add_road(&mut self, from: GraphId, to: GraphId, road: Road) -> Result<()> {
        let from_idx = self.lookup(from)?;
        let to_idx = self.lookup(to)?;
        self.edges.push(BuilderEdge {
            from: from_idx,
            to: to_idx,
            length: road.length,
            speed: road.speed,
            access: road.forward_access,
        });
        self.edges.push(BuilderEdge {
            from: to_idx,
            to: from_idx,
            length: road.length,
            speed: road.speed,
            access: road.reverse_access,
        });
        Ok(())
    }

    fn lookup(&self, node: GraphId) -> Result<usize> {
        self.node_index
            .get(&node)
            .copied()
            .ok_or(Error::NodeNotFound(node))
    }

    /// Lay out the tiles
    pub fn build(self) -> Result<MemoryGraph> {
        let n_nodes = self.nodes.len();

        // First pass: count outgoing edges per node
        let mut counts = vec![0u32; n_nodes];
        for edge in &self.edges {
            counts[edge.from] += 1;
        }

        // Prefix sums per tile, walking nodes in id order within each tile
        let mut by_tile: FxHashMap<GraphId, Vec<usize>> = FxHashMap::default();
        for (idx, node) in self.nodes.iter().enumerate() {
            by_tile.entry(node.id.tile_base()).or_default().push(idx);
        }
        let mut edge_index = vec![0u32; n_nodes];
        let mut tile_edge_counts: FxHashMap<GraphId, u32> = FxHashMap::default();
        for (tile, members) in &mut by_tile {
            members.sort_by_key(|&idx| self.nodes[idx].id.id());
            let mut offset = 0u32;
            for &idx in members.iter() {
                edge_index[idx] = offset;
                offset += counts[idx];
            }
            if offset as u64 >= (1 << 21) - 1 {
                return Err(Error::InvalidInput(format!(
                    "tile {tile} holds too many edges ({offset})"
                )));
            }
            tile_edge_counts.insert(*tile, offset);
        }

        // Second pass: tile-local position of every directed edge
        counts.fill(0);
        let mut positions = vec![0u32; self.edges.len()];
        for (e, edge) in self.edges.iter().enumerate() {
            positions[e] = edge_index[edge.from] + counts[edge.from];
            counts[edge.from] += 1;
        }

        let mut tiles: FxHashMap<GraphId, GraphTile> = FxHashMap::default();
        for (tile, members) in &by_tile {
            let nodes = members
                .iter()
                .map(|&idx| NodeInfo {
                    edge_index: edge_index[idx],
                    edge_count: counts[idx],
                    access: self.nodes[idx].access,
                    traffic_signal: self.nodes[idx].traffic_signal,
                })
                .collect();
            let placeholder = DirectedEdge {
                end_node: GraphId::invalid(),
                opp_index: 0,
                length: 0,
                speed: 0,
                access: 0,
            };
            tiles.insert(
                *tile,
                GraphTile {
                    id: *tile,
                    nodes,
                    edges: vec![placeholder; tile_edge_counts[tile] as usize],
                },
            );
        }

        for (e, edge) in self.edges.iter().enumerate() {
            let opp = e ^ 1;
            let start = self.nodes[edge.from].id;
            let end = self.nodes[edge.to].id;
            let directed = DirectedEdge {
                end_node: end,
                opp_index: positions[opp] - edge_index[edge.to],
                length: edge.length,
                speed: edge.speed,
                access: edge.access,
            };
            if let Some(tile) = tiles.get_mut(&start.tile_base()) {
                tile.edges[positions[e] as usize] = directed;
            }
        }

        Ok(MemoryGraph {
            tiles: tiles
                .into_iter()
                .map(|(id, tile)| (id, Arc::new(tile)))
                .collect(),
        })
    }
}

/// Graph held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    tiles: FxHashMap<GraphId, Arc<GraphTile>>,
}

impl MemoryGraph {
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn node_count(&self) -> usize {
        self.tiles.values().map(|t| t.nodes.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.tiles.values().map(|t| t.edges.len()).sum()
    }

    /// Drop a tile, simulating a tile that cannot be loaded
    pub fn remove_tile(&mut self, tile: GraphId) -> Option<Arc<GraphTile>> {
        self.tiles.remove(&tile.tile_base())
    }

    /// Directed edge from `from` to `to`, if any
    pub fn edge_between(&self, from: GraphId, to: GraphId) -> Option<GraphId> {
        let info = self.node_info(from).ok()?;
        info.edge_ids(from)
            .find(|&e| matches!(self.directed_edge(e), Ok(d) if d.end_node == to))
    }
}

impl GraphReader for MemoryGraph {
    fn graph_tile(&self, id: GraphId) -> Result<Arc<GraphTile>> {
        let base = id.tile_base();
        self.tiles
            .get(&base)
            .cloned()
            .ok_or(Error::TileNotFound(base))
    }
}

// =============================================================================
// JSON GRAPH DESCRIPTION
// =============================================================================

fn default_modes() -> Vec<Mode> {
    Mode::all().to_vec()
}

fn modes_mask(modes: &[Mode]) -> u8 {
    modes.iter().fold(0, |mask, m| mask | m.access_mask())
}

/// Node entry of a [`GraphSpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub level: u32,
    pub tile: u32,
    #[serde(default)]
    pub traffic_signal: bool,
}

/// Road entry of a [`GraphSpec`]; `from`/`to` index into `nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadSpec {
    pub from: usize,
    pub to: usize,
    pub length: u32,
    pub speed: u32,
    #[serde(default)]
    pub oneway: bool,
    #[serde(default = "default_modes")]
    pub modes: Vec<Mode>,
}

/// Graph description as read from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    pub nodes: Vec<NodeSpec>,
    pub roads: Vec<RoadSpec>,
}

impl GraphSpec {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Build the graph; also returns the id assigned to each node entry
    pub fn build(&self) -> Result<(MemoryGraph, Vec<GraphId>)> {
        let mut builder = GraphBuilder::new();
        let ids = self
            .nodes
            .iter()
            .map(|n| builder.add_node_with(n.level, n.tile, access::ALL, n.traffic_signal))
            .collect::<Result<Vec<_>>>()?;

        for (i, road) in self.roads.iter().enumerate() {
            let (Some(&from), Some(&to)) = (ids.get(road.from), ids.get(road.to)) else {
                return Err(Error::InvalidInput(format!(
                    "road {i} references missing node ({} -> {})",
                    road.from, road.to
                )));
            };
            let mut attrs = Road::new(road.length, road.speed).with_access(modes_mask(&road.modes));
            if road.oneway {
                attrs = attrs.oneway();
            }
            builder.add_road(from, to, attrs)?;
        }

        Ok((builder.build()?, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_graph() -> (MemoryGraph, Vec<GraphId>) {
        let mut b = GraphBuilder::new();
        let a = b.add_node(2, 0).unwrap();
        let m = b.add_node(2, 1).unwrap();
        let c = b.add_node(2, 0).unwrap();
        b.add_road(a, m, Road::new(100, 36)).unwrap();
        b.add_road(m, c, Road::new(200, 36).oneway()).unwrap();
        (b.build().unwrap(), vec![a, m, c])
    }

    #[test]
    fn opposing_edges_point_back() {
        let (graph, nodes) = line_graph();
        for &node in &nodes {
            for edge in graph.outgoing_edges(node).unwrap() {
                let opp = graph.opposing_edge(edge).unwrap();
                assert_eq!(graph.opposing_edge(opp).unwrap(), edge);
                let end = graph.directed_edge(edge).unwrap().end_node;
                assert_eq!(opp.tile_base(), end.tile_base());
                assert_eq!(graph.directed_edge(opp).unwrap().end_node, node);
            }
        }
    }

    #[test]
    fn node_ids_are_per_tile() {
        let (graph, nodes) = line_graph();
        assert_eq!(nodes[0], GraphId::new(2, 0, 0).unwrap());
        assert_eq!(nodes[1], GraphId::new(2, 1, 0).unwrap());
        assert_eq!(nodes[2], GraphId::new(2, 0, 1).unwrap());
        assert_eq!(graph.tile_count(), 2);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn oneway_keeps_closed_opposing_edge() {
        let (graph, nodes) = line_graph();
        let open = graph.edge_between(nodes[1], nodes[2]).unwrap();
        let closed = graph.edge_between(nodes[2], nodes[1]).unwrap();
        assert_eq!(graph.directed_edge(open).unwrap().access, access::ALL);
        assert_eq!(graph.directed_edge(closed).unwrap().access, 0);
        assert_eq!(graph.opposing_edge(open).unwrap(), closed);
    }

    #[test]
    fn missing_tile_is_an_error() {
        let (mut graph, nodes) = line_graph();
        graph.remove_tile(nodes[1]);
        let err = graph.node_info(nodes[1]).unwrap_err();
        assert!(err.is_missing_data());
        // Edge a -> m still readable, its opposing edge is not
        let edge = graph.edge_between(nodes[0], nodes[1]).unwrap();
        assert!(graph.opposing_edge(edge).is_err());
    }

    #[test]
    fn spec_from_json() {
        let spec = GraphSpec::from_json_str(
            r#"{
                "nodes": [{"level": 2, "tile": 0}, {"level": 2, "tile": 0, "traffic_signal": true}],
                "roads": [{"from": 0, "to": 1, "length": 50, "speed": 30, "modes": ["foot"]}]
            }"#,
        )
        .unwrap();
        let (graph, ids) = spec.build().unwrap();
        let edge = graph.edge_between(ids[0], ids[1]).unwrap();
        assert_eq!(graph.directed_edge(edge).unwrap().access, access::FOOT);
        assert!(graph.node_info(ids[1]).unwrap().traffic_signal);
    }

    #[test]
    fn spec_rejects_dangling_road() {
        let spec = GraphSpec::from_json_str(
            r#"{"nodes": [{"level": 2, "tile": 0}], "roads": [{"from": 0, "to": 3, "length": 1, "speed": 1}]}"#,
        )
        .unwrap();
        assert!(spec.build().is_err());
    }
}
