//! Error types for the tessera toolkit
//!
//! Library code returns [`Error`]; binaries wrap it with `anyhow` context at the
//! application boundary.

use crate::graph_id::GraphId;

/// Main error type for tessera operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid request or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Packed id components out of range
    #[error("Invalid graph id: level {level}, tile {tile}, id {id}")]
    InvalidGraphId { level: u32, tile: u32, id: u32 },

    /// Tile is not loaded or could not be read
    #[error("Tile {0} not found")]
    TileNotFound(GraphId),

    /// Node id points past the end of its tile
    #[error("Node {0} not found")]
    NodeNotFound(GraphId),

    /// Directed edge id points past the end of its tile
    #[error("Directed edge {0} not found")]
    EdgeNotFound(GraphId),

    /// Predecessor chain could not be walked back to a seed
    #[error("Broken path between source {source_index} and target {target_index}: {reason}")]
    BrokenPath {
        source_index: u32,
        target_index: u32,
        reason: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the failure means a piece of graph data is unavailable.
    ///
    /// Searches treat these as non-traversable edges instead of aborting.
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            Error::TileNotFound(_) | Error::NodeNotFound(_) | Error::EdgeNotFound(_)
        )
    }
}

/// Result type alias for tessera operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_data_classification() {
        let tile = GraphId::new(2, 7, 0).unwrap();
        assert!(Error::TileNotFound(tile).is_missing_data());
        assert!(Error::EdgeNotFound(tile).is_missing_data());
        assert!(!Error::InvalidInput("empty".into()).is_missing_data());
    }

    #[test]
    fn display_includes_id() {
        let edge = GraphId::new(1, 42, 3).unwrap();
        assert_eq!(
            Error::EdgeNotFound(edge).to_string(),
            "Directed edge 1/42/3 not found"
        );
    }
}
