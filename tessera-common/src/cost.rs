//! Cost arithmetic
//!
//! A [`Cost`] carries the generalized cost used to order searches and the
//! elapsed seconds separately; the two only coincide for pure-time costing.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Cost {
    /// Generalized cost units
    pub cost: f32,
    /// Elapsed time in seconds
    pub secs: f32,
}

impl Cost {
    pub const ZERO: Cost = Cost { cost: 0.0, secs: 0.0 };

    #[inline]
    pub const fn new(cost: f32, secs: f32) -> Self {
        Self { cost, secs }
    }
}

impl Add for Cost {
    type Output = Cost;

    #[inline]
    fn add(self, rhs: Cost) -> Cost {
        Cost::new(self.cost + rhs.cost, self.secs + rhs.secs)
    }
}

impl AddAssign for Cost {
    #[inline]
    fn add_assign(&mut self, rhs: Cost) {
        self.cost += rhs.cost;
        self.secs += rhs.secs;
    }
}

impl Sub for Cost {
    type Output = Cost;

    #[inline]
    fn sub(self, rhs: Cost) -> Cost {
        Cost::new(self.cost - rhs.cost, self.secs - rhs.secs)
    }
}

impl Mul<f32> for Cost {
    type Output = Cost;

    #[inline]
    fn mul(self, factor: f32) -> Cost {
        Cost::new(self.cost * factor, self.secs * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_edge_arithmetic() {
        // 100s edge, destination at 25% => 100 - 100 * 0.75 = 25
        let edge = Cost::new(100.0, 100.0);
        let partial = edge - edge * 0.75;
        assert!((partial.cost - 25.0).abs() < 1e-4);
        assert!((partial.secs - 25.0).abs() < 1e-4);
    }

    #[test]
    fn components_stay_separate() {
        let mut total = Cost::ZERO;
        total += Cost::new(3.0, 2.0);
        total = total + Cost::new(1.0, 4.0);
        assert_eq!(total, Cost::new(4.0, 6.0));
    }
}
