//! Per-search hierarchy pruning
//!
//! Each search carries its own copy of the per-level limits and counts the
//! upward transitions it makes out of each level. Once a level has seen more
//! than `max_up_transitions` of them and the search is further than
//! `expansion_within_dist` from its origin, edges on that level are no longer
//! expanded.

use crate::costing::HierarchyLimits;

#[derive(Debug, Clone, Copy, PartialEq)]
struct LevelState {
    limits: HierarchyLimits,
    up_transition_count: u32,
}

impl LevelState {
    fn stop_expanding(&self, distance: f32) -> bool {
        self.up_transition_count > self.limits.max_up_transitions
            && distance > self.limits.expansion_within_dist
    }
}

#[derive(Debug, Clone, Default)]
pub struct HierarchyLimiter {
    levels: Vec<LevelState>,
}

impl HierarchyLimiter {
    pub fn new(limits: &[HierarchyLimits]) -> Self {
        Self {
            levels: limits
                .iter()
                .map(|&limits| LevelState {
                    limits,
                    up_transition_count: 0,
                })
                .collect(),
        }
    }

    /// Whether a search at `distance` meters from its origin may step from an
    /// edge on `from_level` onto an edge on `to_level`
    ///
    /// Upward moves are always allowed and counted against the level left.
    /// Levels without configured limits are never pruned.
    pub fn permits(&mut self, from_level: u32, to_level: u32, distance: f32) -> bool {
        if to_level < from_level {
            if let Some(level) = self.levels.get_mut(from_level as usize) {
                level.up_transition_count = level.up_transition_count.saturating_add(1);
            }
            return true;
        }
        self.levels
            .get(to_level as usize)
            .map_or(true, |level| !level.stop_expanding(distance))
    }

    /// Re-arm with fresh counters
    pub fn reset(&mut self, limits: &[HierarchyLimits]) {
        self.levels.clear();
        self.levels.extend(limits.iter().map(|&limits| LevelState {
            limits,
            up_transition_count: 0,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight() -> Vec<HierarchyLimits> {
        vec![
            HierarchyLimits::UNLIMITED,
            HierarchyLimits::UNLIMITED,
            HierarchyLimits {
                max_up_transitions: 1,
                expansion_within_dist: 1_000.0,
            },
        ]
    }

    #[test]
    fn local_level_stops_after_transitions_and_distance() {
        let mut limiter = HierarchyLimiter::new(&tight());
        assert!(limiter.permits(2, 2, 5_000.0));

        // Two upward moves out of level 2
        assert!(limiter.permits(2, 1, 100.0));
        assert!(limiter.permits(2, 1, 200.0));

        // Close to the origin the local level is still open
        assert!(limiter.permits(1, 2, 900.0));
        // Far away it is closed
        assert!(!limiter.permits(1, 2, 1_500.0));
        assert!(!limiter.permits(2, 2, 1_500.0));
        // Important levels stay open
        assert!(limiter.permits(1, 1, 1e9));
    }

    #[test]
    fn missing_levels_are_never_pruned() {
        let mut limiter = HierarchyLimiter::new(&[]);
        assert!(limiter.permits(5, 5, f32::MAX));
        assert!(limiter.permits(5, 4, 0.0));
    }

    #[test]
    fn one_transition_is_not_enough() {
        let mut limiter = HierarchyLimiter::new(&tight());
        limiter.permits(2, 1, 0.0);
        assert!(limiter.permits(1, 2, 1e6));
    }

    #[test]
    fn reset_clears_counters() {
        let mut limiter = HierarchyLimiter::new(&tight());
        limiter.permits(2, 1, 0.0);
        limiter.permits(2, 1, 0.0);
        assert!(!limiter.permits(2, 2, 1e6));
        limiter.reset(&tight());
        assert!(limiter.permits(2, 2, 1e6));
    }
}
