//! CLI commands for tessera-matrix

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tessera_common::time_info::parse_local;
use tessera_common::{GraphId, Mode};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::CostMatrixConfig;
use crate::costing::{SpeedCost, SpeedWindow};
use crate::graph::{GraphSpec, MemoryGraph};
use crate::matrix::{CostMatrix, Location, Matrix, MatrixRequest, MatrixStats, PathEdge};

#[derive(Parser)]
#[command(name = "tessera-matrix")]
#[command(about = "Many-to-many cost matrices on a tiled road graph", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log output format (filter with RUST_LOG)
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute a cost matrix and print it as JSON
    Matrix {
        /// Graph description (JSON)
        #[arg(long)]
        graph: PathBuf,

        /// Matrix request (JSON)
        #[arg(long)]
        request: PathBuf,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Print tile, node and edge counts of a graph description
    Graph {
        /// Graph description (JSON)
        #[arg(long)]
        graph: PathBuf,
    },
}

/// Location entry of a request file
///
/// `node` indexes the graph file's node list and correlates the location to
/// every edge at that node; `edges` lists explicit correlations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationInput {
    #[serde(default)]
    pub node: Option<usize>,
    #[serde(default)]
    pub edges: Vec<PathEdge>,
    /// Local time, `YYYY-MM-DDTHH:MM[:SS]`
    #[serde(default)]
    pub date_time: Option<String>,
}

fn default_mode() -> Mode {
    Mode::Car
}

fn default_max_matrix_distance() -> f32 {
    400_000.0
}

/// Request file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInput {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    pub sources: Vec<LocationInput>,
    pub targets: Vec<LocationInput>,
    #[serde(default = "default_max_matrix_distance")]
    pub max_matrix_distance: f32,
    #[serde(default)]
    pub has_time: bool,
    #[serde(default)]
    pub invariant: bool,
    /// Apply the built-in weekday rush hours
    #[serde(default)]
    pub rush_hours: bool,
    #[serde(default)]
    pub speed_windows: Vec<SpeedWindow>,
}

#[derive(Debug, Serialize)]
struct MatrixOutput<'a> {
    mode: Mode,
    matrix: &'a Matrix,
    stats: &'a MatrixStats,
}

#[derive(Debug, Serialize)]
struct GraphSummary {
    tiles: usize,
    nodes: usize,
    edges: usize,
}

impl Cli {
    /// Install the tracing subscriber; logs go to stderr
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr);
        match self.log_format {
            LogFormat::Text => builder.init(),
            LogFormat::Json => builder.json().init(),
        }
    }

    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Matrix {
                graph,
                request,
                config,
                pretty,
            } => run_matrix(&graph, &request, config.as_deref(), pretty),
            Commands::Graph { graph } => {
                let (graph, _) = load_graph(&graph)?;
                let summary = GraphSummary {
                    tiles: graph.tile_count(),
                    nodes: graph.node_count(),
                    edges: graph.edge_count(),
                };
                write_json(&summary, true)
            }
        }
    }
}

fn load_graph(path: &Path) -> Result<(MemoryGraph, Vec<GraphId>)> {
    let spec = GraphSpec::load(path)
        .with_context(|| format!("Failed to read graph {}", path.display()))?;
    spec.build()
        .with_context(|| format!("Failed to build graph {}", path.display()))
}

fn run_matrix(graph: &Path, request: &Path, config: Option<&Path>, pretty: bool) -> Result<()> {
    let config = match config {
        Some(path) => CostMatrixConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CostMatrixConfig::default(),
    };

    let (graph_data, node_ids) = load_graph(graph)?;
    info!(
        tiles = graph_data.tile_count(),
        nodes = graph_data.node_count(),
        edges = graph_data.edge_count(),
        "Graph loaded"
    );

    let text = std::fs::read_to_string(request)
        .with_context(|| format!("Failed to read request {}", request.display()))?;
    let input: RequestInput = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse request {}", request.display()))?;

    let matrix_request = build_request(&input, &graph_data, &node_ids)?;
    let mut windows = input.speed_windows.clone();
    if input.rush_hours {
        windows.extend(SpeedWindow::rush_hours());
    }
    let costing = SpeedCost::new(input.mode).with_speed_windows(windows);

    let mut engine = CostMatrix::new(config);
    let matrix = engine
        .source_to_target(&matrix_request, &graph_data, &costing)
        .context("Matrix computation failed")?;

    let output = MatrixOutput {
        mode: input.mode,
        matrix: &matrix,
        stats: engine.stats(),
    };
    write_json(&output, pretty)
}

/// Resolve request file locations against the loaded graph
pub fn build_request(
    input: &RequestInput,
    graph: &MemoryGraph,
    node_ids: &[GraphId],
) -> Result<MatrixRequest> {
    let resolve = |list: &[LocationInput], kind: &str| -> Result<Vec<Location>> {
        list.iter()
            .enumerate()
            .map(|(i, entry)| {
                resolve_location(entry, graph, node_ids).with_context(|| format!("{kind} {i}"))
            })
            .collect()
    };

    Ok(MatrixRequest {
        sources: resolve(&input.sources, "source")?,
        targets: resolve(&input.targets, "target")?,
        max_matrix_distance: input.max_matrix_distance,
        has_time: input.has_time,
        invariant: input.invariant,
    })
}

fn resolve_location(
    entry: &LocationInput,
    graph: &MemoryGraph,
    node_ids: &[GraphId],
) -> Result<Location> {
    let mut location = match entry.node {
        Some(index) => {
            let Some(&node) = node_ids.get(index) else {
                bail!("node {index} is not in the graph ({} nodes)", node_ids.len());
            };
            Location::from_node(graph, node)?
        }
        None => Location::default(),
    };
    location.edges.extend(entry.edges.iter().copied());
    if location.edges.is_empty() {
        bail!("location needs a node or at least one edge");
    }
    if let Some(text) = &entry.date_time {
        location.date_time = Some(parse_local(text)?);
    }
    Ok(location)
}

fn write_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if pretty {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> (MemoryGraph, Vec<GraphId>) {
        GraphSpec::from_json_str(
            r#"{"nodes": [{"level": 2, "tile": 0}, {"level": 2, "tile": 0}],
                "roads": [{"from": 0, "to": 1, "length": 100, "speed": 36}]}"#,
        )
        .unwrap()
        .build()
        .unwrap()
    }

    #[test]
    fn resolves_nodes_and_times() {
        let (graph, ids) = graph();
        let input: RequestInput = serde_json::from_str(
            r#"{"sources": [{"node": 0, "date_time": "2024-05-06T08:00"}],
                "targets": [{"node": 1}], "has_time": true}"#,
        )
        .unwrap();
        let request = build_request(&input, &graph, &ids).unwrap();
        assert_eq!(input.mode, Mode::Car);
        assert_eq!(request.sources[0].edges.len(), 2);
        assert_eq!(
            request.sources[0].date_time,
            chrono::NaiveDate::from_ymd_opt(2024, 5, 6).and_then(|d| d.and_hms_opt(8, 0, 0))
        );
        assert!(request.targets[0].date_time.is_none());
        assert!(request.has_time);
    }

    #[test]
    fn rejects_unknown_nodes_and_empty_locations() {
        let (graph, ids) = graph();
        let input: RequestInput =
            serde_json::from_str(r#"{"sources": [{"node": 7}], "targets": [{"node": 1}]}"#)
                .unwrap();
        assert!(build_request(&input, &graph, &ids).is_err());

        let input: RequestInput =
            serde_json::from_str(r#"{"sources": [{}], "targets": [{"node": 1}]}"#).unwrap();
        assert!(build_request(&input, &graph, &ids).is_err());
    }

    #[test]
    fn rejects_bad_date_time() {
        let (graph, ids) = graph();
        let input: RequestInput = serde_json::from_str(
            r#"{"sources": [{"node": 0, "date_time": "yesterday"}], "targets": [{"node": 1}]}"#,
        )
        .unwrap();
        assert!(build_request(&input, &graph, &ids).is_err());
    }
}
