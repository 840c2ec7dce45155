//! Travel modes and access bits

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Access bit masks stored on nodes and directed edges
pub mod access {
    pub const CAR: u8 = 1 << 0;
    pub const BIKE: u8 = 1 << 1;
    pub const FOOT: u8 = 1 << 2;
    pub const ALL: u8 = CAR | BIKE | FOOT;
}

/// Mode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Car = 0,
    Bike = 1,
    Foot = 2,
}

impl Mode {
    pub fn all() -> &'static [Mode] {
        &[Mode::Car, Mode::Bike, Mode::Foot]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Car => "car",
            Mode::Bike => "bike",
            Mode::Foot => "foot",
        }
    }

    pub fn from_u8(v: u8) -> Option<Mode> {
        match v {
            0 => Some(Mode::Car),
            1 => Some(Mode::Bike),
            2 => Some(Mode::Foot),
            _ => None,
        }
    }

    /// Access bit for this mode
    pub fn access_mask(&self) -> u8 {
        match self {
            Mode::Car => access::CAR,
            Mode::Bike => access::BIKE,
            Mode::Foot => access::FOOT,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "car" | "auto" => Ok(Mode::Car),
            "bike" | "bicycle" => Ok(Mode::Bike),
            "foot" | "pedestrian" => Ok(Mode::Foot),
            other => Err(Error::InvalidInput(format!("unknown mode '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_are_distinct() {
        let combined = Mode::all().iter().fold(0u8, |acc, m| {
            assert_eq!(acc & m.access_mask(), 0);
            acc | m.access_mask()
        });
        assert_eq!(combined, access::ALL);
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("pedestrian".parse::<Mode>().unwrap(), Mode::Foot);
        assert_eq!("Car".parse::<Mode>().unwrap(), Mode::Car);
        assert!("boat".parse::<Mode>().is_err());
        assert_eq!(Mode::from_u8(1), Some(Mode::Bike));
    }
}
