//! Packed identifiers for nodes and directed edges in the tiled graph
//!
//! Layout (low to high bits):
//! - bits 0-2: hierarchy level (0 = highway ... 2 = local)
//! - bits 3-24: tile index within the level
//! - bits 25-45: id within the tile

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const LEVEL_BITS: u32 = 3;
const TILE_BITS: u32 = 22;
const ID_BITS: u32 = 21;

const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;
const TILE_MASK: u64 = (1 << TILE_BITS) - 1;
const ID_MASK: u64 = (1 << ID_BITS) - 1;

const TILE_SHIFT: u32 = LEVEL_BITS;
const ID_SHIFT: u32 = LEVEL_BITS + TILE_BITS;

/// All 46 bits set
const INVALID_VALUE: u64 = (1 << (LEVEL_BITS + TILE_BITS + ID_BITS)) - 1;

/// Highest hierarchy level that fits in the id
pub const MAX_LEVEL: u32 = LEVEL_MASK as u32;

/// Identifier of a node or a directed edge
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GraphId(u64);

impl GraphId {
    /// Build an id from its components, rejecting out-of-range values
    pub fn new(level: u32, tile: u32, id: u32) -> Result<Self> {
        if u64::from(level) > LEVEL_MASK || u64::from(tile) > TILE_MASK || u64::from(id) >= ID_MASK {
            return Err(Error::InvalidGraphId { level, tile, id });
        }
        Ok(Self::pack(level, tile, id))
    }

    #[inline]
    const fn pack(level: u32, tile: u32, id: u32) -> Self {
        Self((level as u64) | ((tile as u64) << TILE_SHIFT) | ((id as u64) << ID_SHIFT))
    }

    /// The invalid id (all bits set)
    #[inline]
    pub const fn invalid() -> Self {
        Self(INVALID_VALUE)
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != INVALID_VALUE
    }

    #[inline]
    pub const fn level(&self) -> u32 {
        (self.0 & LEVEL_MASK) as u32
    }

    #[inline]
    pub const fn tile_id(&self) -> u32 {
        ((self.0 >> TILE_SHIFT) & TILE_MASK) as u32
    }

    #[inline]
    pub const fn id(&self) -> u32 {
        ((self.0 >> ID_SHIFT) & ID_MASK) as u32
    }

    /// Id of the tile containing this node/edge (id within tile = 0)
    #[inline]
    pub const fn tile_base(&self) -> Self {
        Self(self.0 & (LEVEL_MASK | (TILE_MASK << TILE_SHIFT)))
    }

    /// Same tile and level, different id within the tile
    #[inline]
    pub const fn with_id(&self, id: u32) -> Self {
        Self::pack(self.level(), self.tile_id(), id)
    }

    /// Raw packed value
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}/{}/{}", self.level(), self.tile_id(), self.id())
        } else {
            write!(f, "invalid")
        }
    }
}

impl fmt::Debug for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphId({self})")
    }
}

impl FromStr for GraphId {
    type Err = Error;

    /// Parse the `level/tile/id` text form
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidInput(format!(
                "graph id must be in format 'level/tile/id', got '{s}'"
            )));
        }
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|e| Error::InvalidInput(format!("graph id component '{part}': {e}")))
        };
        Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?)
    }
}

impl TryFrom<String> for GraphId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GraphId> for String {
    fn from(id: GraphId) -> Self {
        id.to_string()
    }
}
