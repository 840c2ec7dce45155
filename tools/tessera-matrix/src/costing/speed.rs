//! Speed-based costing
//!
//! Car uses the posted edge speed, bike is capped at a cruising speed and foot
//! walks at a constant pace. Optional speed windows slow every edge down at
//! given times of day (rush hours).

use serde::{Deserialize, Serialize};
use tessera_common::time_info::{day_of_week, second_of_day};
use tessera_common::{Cost, Mode};

use super::{DynamicCost, HierarchyLimits};
use crate::graph::{DirectedEdge, NodeInfo};

pub const BIKE_SPEED_KPH: f32 = 18.0;
pub const FOOT_SPEED_KPH: f32 = 5.1;

/// Delay for passing a traffic signal (car, bike)
const SIGNAL_DELAY_SECS: f32 = 2.0;

/// Slowest speed used for edges without a usable speed
const MIN_SPEED_KPH: f32 = 1.0;

/// Time-of-day window during which speeds are scaled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedWindow {
    /// Only applies Monday to Friday
    #[serde(default)]
    pub weekdays_only: bool,
    /// Start, seconds from midnight
    pub start: u32,
    /// End (exclusive), seconds from midnight; may wrap past midnight
    pub end: u32,
    /// Multiplier on speed, in (0, 1] for slowdowns
    pub speed_factor: f32,
}

impl SpeedWindow {
    pub fn contains(&self, second_of_week: u32) -> bool {
        if self.weekdays_only && !(1..=5).contains(&day_of_week(second_of_week)) {
            return false;
        }
        let second = second_of_day(second_of_week);
        if self.start <= self.end {
            second >= self.start && second < self.end
        } else {
            second >= self.start || second < self.end
        }
    }

    /// Weekday morning and evening peaks at half speed
    pub fn rush_hours() -> Vec<SpeedWindow> {
        vec![
            SpeedWindow {
                weekdays_only: true,
                start: 7 * 3600,
                end: 9 * 3600,
                speed_factor: 0.5,
            },
            SpeedWindow {
                weekdays_only: true,
                start: 16 * 3600,
                end: 19 * 3600,
                speed_factor: 0.5,
            },
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SpeedCost {
    mode: Mode,
    windows: Vec<SpeedWindow>,
}

impl SpeedCost {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            windows: Vec::new(),
        }
    }

    pub fn with_speed_windows(mut self, windows: Vec<SpeedWindow>) -> Self {
        self.windows = windows
            .into_iter()
            .filter(|w| w.speed_factor > 0.0)
            .collect();
        self
    }

    fn speed_kph(&self, edge: &DirectedEdge) -> f32 {
        let speed = match self.mode {
            Mode::Car => edge.speed as f32,
            Mode::Bike => (edge.speed as f32).min(BIKE_SPEED_KPH),
            Mode::Foot => FOOT_SPEED_KPH,
        };
        speed.max(MIN_SPEED_KPH)
    }

    fn speed_factor(&self, second_of_week: Option<u32>) -> f32 {
        second_of_week
            .and_then(|s| self.windows.iter().find(|w| w.contains(s)))
            .map_or(1.0, |w| w.speed_factor)
    }
}

impl DynamicCost for SpeedCost {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn edge_cost(&self, edge: &DirectedEdge, second_of_week: Option<u32>) -> Cost {
        let mps = self.speed_kph(edge) * self.speed_factor(second_of_week) / 3.6;
        let secs = edge.length as f32 / mps;
        Cost::new(secs, secs)
    }

    fn transition_cost(&self, node: &NodeInfo, _from: &DirectedEdge, _to: &DirectedEdge) -> Cost {
        if node.traffic_signal && self.mode != Mode::Foot {
            Cost::new(SIGNAL_DELAY_SECS, SIGNAL_DELAY_SECS)
        } else {
            Cost::ZERO
        }
    }

    fn hierarchy_limits(&self) -> Vec<HierarchyLimits> {
        match self.mode {
            Mode::Car => HierarchyLimits::defaults(),
            Mode::Bike | Mode::Foot => HierarchyLimits::unlimited(),
        }
    }
}
