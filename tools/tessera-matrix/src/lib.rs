//! tessera-matrix: many-to-many time/distance/cost matrices
//!
//! Bidirectional searches from every source and every target run
//! interleaved over a tiled, hierarchical road graph. Graph access and
//! costing sit behind the [`graph::GraphReader`] and
//! [`costing::DynamicCost`] traits; in-memory reference implementations of
//! both ship with the crate.

pub mod cli;
pub mod config;
pub mod costing;
pub mod graph;
pub mod matrix;

pub use config::{ConnectionPolicy, CostMatrixConfig};
pub use costing::{DynamicCost, HierarchyLimits, SpeedCost, SpeedWindow};
pub use graph::{GraphBuilder, GraphReader, GraphSpec, MemoryGraph, Road};
pub use matrix::{
    CostMatrix, Location, Matrix, MatrixCell, MatrixRequest, MatrixStats, PathEdge,
};
