//! Interleaved bidirectional many-to-many search
//!
//! Each source runs a forward search and each target a backward search over
//! directed edges. A backward label on edge `x` stands for the forward
//! traversal of `opp(x)`, so a forward label on `e` meets a backward label on
//! `opp(e)`. Every search owns its label arena, frontier, edge status and
//! hierarchy counters; the two reach indices are the only shared state.
//!
//! Round `n` expands one label of every active source, then one label of
//! every active target. A location stops once its frontier is empty, its
//! cheapest label passes the cost threshold, its iteration budget is spent,
//! or every opposite location is connected to it.

use chrono::NaiveDateTime;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tessera_common::{Cost, Error, GraphId, Mode, Result, TimeInfo};
use tracing::{debug, info, trace, warn};

use super::bucket_queue::DoubleBucketQueue;
use super::candidate::{BestCandidates, Candidate, Offer};
use super::connection::ReachIndex;
use super::edge_label::EdgeLabel;
use super::edge_status::{EdgeSet, EdgeStatus, EdgeStatusInfo};
use super::hierarchy::HierarchyLimiter;
use super::location::{Location, LocationState, LocationStatus};
use super::recost::{form_path, recost_forward, recost_reverse, Recosted, TimeAnchor};
use super::{Connection, Matrix, MatrixCell, MatrixStats};
use crate::config::CostMatrixConfig;
use crate::costing::{DynamicCost, HierarchyLimits};
use crate::graph::{GraphReader, NodeInfo};

/// Meters per cost unit used to turn a distance limit into a cost threshold
const COST_THRESHOLD_CAR_DIVISOR: f32 = 56.0;
const COST_THRESHOLD_BIKE_DIVISOR: f32 = 56.0;
const COST_THRESHOLD_FOOT_DIVISOR: f32 = 28.0;

/// Tolerance for a destination lying behind its source on a shared edge
const DESTINATION_EPSILON: f32 = 1e-3;

/// Cost threshold for a maximum matrix distance in meters
pub fn get_cost_threshold(mode: Mode, max_matrix_distance: f32) -> Result<f32> {
    if !(max_matrix_distance.is_finite() && max_matrix_distance > 0.0) {
        return Err(Error::InvalidInput(format!(
            "max_matrix_distance must be positive, got {max_matrix_distance}"
        )));
    }
    let divisor = match mode {
        Mode::Car => COST_THRESHOLD_CAR_DIVISOR,
        Mode::Bike => COST_THRESHOLD_BIKE_DIVISOR,
        Mode::Foot => COST_THRESHOLD_FOOT_DIVISOR,
    };
    Ok(max_matrix_distance / divisor)
}

fn default_max_matrix_distance() -> f32 {
    400_000.0
}

/// A many-to-many query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRequest {
    pub sources: Vec<Location>,
    pub targets: Vec<Location>,
    /// Meters; bounds the search cost
    #[serde(default = "default_max_matrix_distance")]
    pub max_matrix_distance: f32,
    /// Use location date-times for time-dependent costs
    #[serde(default)]
    pub has_time: bool,
    /// Evaluate every edge at the anchor time
    #[serde(default)]
    pub invariant: bool,
}

impl MatrixRequest {
    pub fn new(sources: Vec<Location>, targets: Vec<Location>) -> Self {
        Self {
            sources,
            targets,
            max_matrix_distance: default_max_matrix_distance(),
            has_time: false,
            invariant: false,
        }
    }

    pub fn with_max_distance(mut self, meters: f32) -> Self {
        self.max_matrix_distance = meters;
        self
    }

    pub fn with_time(mut self, invariant: bool) -> Self {
        self.has_time = true;
        self.invariant = invariant;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.sources.is_empty() || self.targets.is_empty() {
            return Err(Error::InvalidInput(
                "matrix request needs at least one source and one target".into(),
            ));
        }
        for location in self.sources.iter().chain(&self.targets) {
            location.validate()?;
        }
        Ok(())
    }

    /// Which side carries the clock, if any
    fn time_anchor(&self) -> Option<TimeAnchor> {
        if !self.has_time {
            return None;
        }
        if self.sources.iter().any(|l| l.date_time.is_some()) {
            Some(TimeAnchor::DepartAt)
        } else if self.targets.iter().any(|l| l.date_time.is_some()) {
            Some(TimeAnchor::ArriveBy)
        } else {
            warn!("has_time is set but no location carries a date-time; skipping recost");
            None
        }
    }

    fn anchor_time(&self, anchor: TimeAnchor, source: u32, target: u32) -> Option<NaiveDateTime> {
        match anchor {
            TimeAnchor::DepartAt => self.sources[source as usize].date_time,
            TimeAnchor::ArriveBy => self.targets[target as usize].date_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

impl Side {
    fn opposite(self) -> Side {
        match self {
            Side::Source => Side::Target,
            Side::Target => Side::Source,
        }
    }

    /// (source, target) for a location on this side and one on the other
    fn pair(self, index: u32, other: u32) -> (u32, u32) {
        match self {
            Side::Source => (index, other),
            Side::Target => (other, index),
        }
    }
}

/// State of one location's search
#[derive(Debug, Clone)]
struct LocationSearch {
    labels: Vec<EdgeLabel>,
    queue: DoubleBucketQueue,
    status: EdgeStatus,
    hierarchy: HierarchyLimiter,
    /// Clock of a time-dependent forward search
    time: Option<TimeInfo>,
}

impl LocationSearch {
    fn new(range: f32, bucket_size: f32, limits: &[HierarchyLimits]) -> Self {
        Self {
            labels: Vec::new(),
            queue: DoubleBucketQueue::new(range, bucket_size),
            status: EdgeStatus::default(),
            hierarchy: HierarchyLimiter::new(limits),
            time: None,
        }
    }

    fn arm(&mut self, range: f32, bucket_size: f32, limits: &[HierarchyLimits]) {
        self.labels.clear();
        self.queue.reuse(0.0, range, bucket_size);
        self.hierarchy.reset(limits);
        self.time = None;
    }

    fn clear(&mut self, max_reserved: usize) {
        self.labels.clear();
        self.labels.shrink_to(max_reserved);
        self.queue.clear();
        self.queue.shrink_to(max_reserved);
        self.status.clear(max_reserved);
        self.time = None;
    }

    fn add_label(&mut self, label: EdgeLabel) -> u32 {
        let index = self.labels.len() as u32;
        self.status.insert(label.edge_id, EdgeSet::Temporary, index);
        self.queue.add(index, label.sort_cost);
        self.labels.push(label);
        index
    }

    fn label_on(&self, edge: GraphId) -> Option<&EdgeLabel> {
        self.status
            .get(edge)
            .and_then(|info| self.labels.get(info.label_index as usize))
    }

    fn predecessor_of(&self, label: &EdgeLabel) -> Option<&EdgeLabel> {
        if label.is_seed() {
            None
        } else {
            self.labels.get(label.predecessor as usize)
        }
    }
}

/// Many-to-many cost matrix engine
///
/// Reusable across queries; per-query state is reset at the start of every
/// [`CostMatrix::source_to_target`] call and trimmed by [`CostMatrix::clear`].
#[derive(Debug, Clone)]
pub struct CostMatrix {
    config: CostMatrixConfig,
    cost_threshold: f32,
    /// Rounds a pair may keep improving; `None` confirms immediately
    grace: Option<u32>,
    invariant: bool,

    forward: Vec<LocationSearch>,
    backward: Vec<LocationSearch>,
    source_status: Vec<LocationStatus>,
    target_status: Vec<LocationStatus>,
    remaining_sources: usize,
    remaining_targets: usize,

    best: BestCandidates,
    source_map: ReachIndex,
    target_map: ReachIndex,
    /// Per source: target-correlated edge → (target, percent along) not yet resolved
    pending_destinations: Vec<FxHashMap<GraphId, Vec<(u32, f32)>>>,
    /// Connected pairs waiting for their deadline, in deadline order
    pending_confirmations: VecDeque<(u32, u32)>,
    /// Scratch buffer for candidates found while probing the reach indices
    offers: Vec<(u32, Candidate)>,

    stats: MatrixStats,
}

impl Default for CostMatrix {
    fn default() -> Self {
        Self::new(CostMatrixConfig::default())
    }
}

impl CostMatrix {
    pub fn new(config: CostMatrixConfig) -> Self {
        Self {
            config,
            cost_threshold: 0.0,
            grace: None,
            invariant: false,
            forward: Vec::new(),
            backward: Vec::new(),
            source_status: Vec::new(),
            target_status: Vec::new(),
            remaining_sources: 0,
            remaining_targets: 0,
            best: BestCandidates::default(),
            source_map: ReachIndex::default(),
            target_map: ReachIndex::default(),
            pending_destinations: Vec::new(),
            pending_confirmations: VecDeque::new(),
            offers: Vec::new(),
            stats: MatrixStats::default(),
        }
    }

    pub fn config(&self) -> &CostMatrixConfig {
        &self.config
    }

    /// Statistics of the last query
    pub fn stats(&self) -> &MatrixStats {
        &self.stats
    }

    /// Compute the matrix between every source and every target
    pub fn source_to_target(
        &mut self,
        request: &MatrixRequest,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
    ) -> Result<Matrix> {
        self.config.validate()?;
        request.validate()?;
        let mode = costing.mode();
        let cost_threshold = get_cost_threshold(mode, request.max_matrix_distance)?;

        self.clear();
        let start = Instant::now();
        let num_sources = request.sources.len();
        let num_targets = request.targets.len();
        let anchor = request.time_anchor();

        self.cost_threshold = cost_threshold;
        self.grace = self
            .config
            .grace_iterations(mode, num_sources + num_targets);
        self.invariant = request.invariant;
        self.stats.n_sources = num_sources;
        self.stats.n_targets = num_targets;

        self.initialize(num_sources, num_targets, costing);
        self.set_sources(request, reader, costing, anchor);
        self.set_targets(request, reader, costing);
        self.set_pending_destinations();
        self.deactivate_unreachable();

        let iterations = self.run(reader, costing);
        self.stats.iterations = iterations;
        self.stats.search_time_ms = start.elapsed().as_millis() as u64;

        let date_times = match anchor {
            Some(anchor) => self.recost_paths(request, reader, costing, anchor),
            None => vec![None; num_sources * num_targets],
        };

        let matrix = self.form_matrix(num_sources, num_targets, &date_times);
        info!(
            sources = num_sources,
            targets = num_targets,
            found = matrix.found_count(),
            iterations,
            forward_settled = self.stats.forward_settled,
            backward_settled = self.stats.backward_settled,
            search_ms = self.stats.search_time_ms,
            recost_ms = self.stats.recost_time_ms,
            "Cost matrix computed"
        );
        Ok(matrix)
    }

    /// Drop all per-query state, keeping at most `max_reserved_labels_count`
    /// capacity per search
    pub fn clear(&mut self) {
        let max_reserved = self.config.max_reserved_labels_count;
        for search in self.forward.iter_mut().chain(self.backward.iter_mut()) {
            search.clear(max_reserved);
        }
        self.source_status.clear();
        self.target_status.clear();
        self.remaining_sources = 0;
        self.remaining_targets = 0;
        self.best.clear();
        self.source_map.clear(max_reserved);
        self.target_map.clear(max_reserved);
        self.pending_destinations.clear();
        self.pending_confirmations.clear();
        self.offers.clear();
        self.stats = MatrixStats::default();
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn initialize(&mut self, num_sources: usize, num_targets: usize, costing: &dyn DynamicCost) {
        let threshold = self.config.max_iterations.unwrap_or(u32::MAX);
        let limits = self
            .config
            .hierarchy_limits
            .clone()
            .unwrap_or_else(|| costing.hierarchy_limits());
        let range = self.cost_threshold;
        let bucket_size = self.config.bucket_size;

        for (searches, count) in [
            (&mut self.forward, num_sources),
            (&mut self.backward, num_targets),
        ] {
            searches.truncate(count);
            searches.resize_with(count, || LocationSearch::new(range, bucket_size, &limits));
            for search in searches.iter_mut() {
                search.arm(range, bucket_size, &limits);
            }
        }

        self.source_status = (0..num_sources)
            .map(|_| LocationStatus::new(threshold, num_targets as u32))
            .collect();
        self.target_status = (0..num_targets)
            .map(|_| LocationStatus::new(threshold, num_sources as u32))
            .collect();
        self.best = BestCandidates::new(num_sources, num_targets);
    }

    /// Seed the forward searches at every correlated source edge
    fn set_sources(
        &mut self,
        request: &MatrixRequest,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
        anchor: Option<TimeAnchor>,
    ) {
        for (index, location) in request.sources.iter().enumerate() {
            let source = index as u32;
            let time = match anchor {
                Some(TimeAnchor::DepartAt) => location.date_time.map(TimeInfo::from_local),
                _ => None,
            };
            let second_of_week = time.map(|t| t.second_of_week);
            self.forward[index].time = time;

            for path_edge in &location.edges {
                let edge_id = path_edge.edge_id;
                if self.forward[index].status.get(edge_id).is_some() {
                    continue;
                }
                let edge = match reader.directed_edge(edge_id) {
                    Ok(edge) => edge,
                    Err(e) => {
                        log_unavailable(Side::Source, source, edge_id, "Skipping source edge", &e);
                        continue;
                    }
                };
                if !costing.allowed(&edge) {
                    continue;
                }
                let opp_edge_id = match reader.opposing_edge(edge_id) {
                    Ok(id) => id,
                    Err(e) => {
                        log_unavailable(Side::Source, source, edge_id, "Skipping source edge", &e);
                        continue;
                    }
                };

                // Only the part of the edge after the source is traversed
                let edge_cost = costing.edge_cost(&edge, second_of_week);
                let length = edge.length as f32;
                let remainder = 1.0 - path_edge.percent_along;
                let label = EdgeLabel::seed(
                    edge_id,
                    opp_edge_id,
                    edge.end_node,
                    edge_cost * remainder,
                    length * remainder,
                    edge_cost,
                    length,
                );
                self.forward[index].add_label(label);
                self.source_map.register(edge_id, source);
            }

            if !self.forward[index].labels.is_empty() {
                self.source_status[index].state = LocationState::Active;
                self.remaining_sources += 1;
            }
        }
    }

    /// Seed the backward searches on the opposing edge of every correlated
    /// target edge
    fn set_targets(
        &mut self,
        request: &MatrixRequest,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
    ) {
        for (index, location) in request.targets.iter().enumerate() {
            let target = index as u32;
            for path_edge in &location.edges {
                let edge_id = path_edge.edge_id;
                let seeded = reader.directed_edge(edge_id).and_then(|edge| {
                    let opp_edge_id = reader.opposing_edge(edge_id)?;
                    let opp_edge = reader.directed_edge(opp_edge_id)?;
                    Ok((edge, opp_edge_id, opp_edge))
                });
                let (edge, opp_edge_id, opp_edge) = match seeded {
                    Ok(seeded) => seeded,
                    Err(e) => {
                        log_unavailable(Side::Target, target, edge_id, "Skipping target edge", &e);
                        continue;
                    }
                };
                if !costing.allowed(&edge) || self.backward[index].status.get(opp_edge_id).is_some()
                {
                    continue;
                }

                // Only the part of the edge before the target is traversed
                let edge_cost = costing.edge_cost(&edge, None);
                let length = edge.length as f32;
                let share = path_edge.percent_along;
                let label = EdgeLabel::seed(
                    opp_edge_id,
                    edge_id,
                    opp_edge.end_node,
                    edge_cost * share,
                    length * share,
                    edge_cost,
                    length,
                );
                self.backward[index].add_label(label);
                self.target_map.register(opp_edge_id, target);
            }

            if !self.backward[index].labels.is_empty() {
                self.target_status[index].state = LocationState::Active;
                self.remaining_targets += 1;
            }
        }
    }

    /// Every source starts with every seeded target edge pending
    fn set_pending_destinations(&mut self) {
        let mut destinations: FxHashMap<GraphId, Vec<(u32, f32)>> = FxHashMap::default();
        for (target, search) in self.backward.iter().enumerate() {
            for label in search.labels.iter().filter(|l| l.is_seed()) {
                let share = if label.edge_length > 0.0 {
                    label.distance / label.edge_length
                } else if label.edge_cost.cost > 0.0 {
                    label.cost.cost / label.edge_cost.cost
                } else {
                    0.0
                };
                destinations
                    .entry(label.opp_edge_id)
                    .or_default()
                    .push((target as u32, share.clamp(0.0, 1.0)));
            }
        }
        self.pending_destinations = self
            .source_status
            .iter()
            .map(|status| {
                if status.is_active() {
                    destinations.clone()
                } else {
                    FxHashMap::default()
                }
            })
            .collect();
    }

    /// Locations without a usable edge can never connect: drop them from the
    /// opposite side and exhaust whatever is left with nothing to do
    fn deactivate_unreachable(&mut self) {
        for side in [Side::Source, Side::Target] {
            let inactive: Vec<u32> = self
                .statuses(side)
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state == LocationState::Inactive)
                .map(|(i, _)| i as u32)
                .collect();
            for index in inactive {
                debug!(?side, index, "Location has no usable edges");
                let remaining = std::mem::take(&mut self.status_mut(side, index).remaining_locations);
                for other in remaining {
                    self.status_mut(side.opposite(), other)
                        .remaining_locations
                        .remove(&index);
                }
            }
        }
        for side in [Side::Source, Side::Target] {
            let idle: Vec<u32> = self
                .statuses(side)
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_active() && s.remaining_locations.is_empty())
                .map(|(i, _)| i as u32)
                .collect();
            for index in idle {
                self.exhaust(side, index);
            }
        }
    }

    // =========================================================================
    // MAIN LOOP
    // =========================================================================

    /// Run rounds until every source or every target is done; returns the
    /// number of rounds
    fn run(&mut self, reader: &dyn GraphReader, costing: &dyn DynamicCost) -> u32 {
        let mut sources: VecDeque<u32> = active_indices(&self.source_status);
        let mut targets: VecDeque<u32> = active_indices(&self.target_status);
        let mut n = 0u32;

        while self.remaining_sources > 0 && self.remaining_targets > 0 {
            for _ in 0..sources.len() {
                let Some(source) = sources.pop_front() else {
                    break;
                };
                if !self.source_status[source as usize].is_active() {
                    continue;
                }
                self.forward_search(source, n, reader, costing);
                if self.source_status[source as usize].is_active() {
                    sources.push_back(source);
                }
            }

            for _ in 0..targets.len() {
                let Some(target) = targets.pop_front() else {
                    break;
                };
                if !self.target_status[target as usize].is_active() {
                    continue;
                }
                self.backward_search(target, n, reader, costing);
                if self.target_status[target as usize].is_active() {
                    targets.push_back(target);
                }
            }

            self.confirm_expired(n);
            n += 1;
        }
        n
    }

    /// Pop the next label of `side`/`index`, or exhaust the location
    fn next_label(&mut self, side: Side, index: u32) -> Option<(u32, EdgeLabel)> {
        let status = self.status_mut(side, index);
        if status.threshold == 0 {
            debug!(?side, index, "Iteration budget spent");
            self.exhaust(side, index);
            return None;
        }
        status.threshold -= 1;

        let cost_threshold = self.cost_threshold;
        let search = match side {
            Side::Source => &mut self.forward[index as usize],
            Side::Target => &mut self.backward[index as usize],
        };
        let Some(label_index) = search.queue.pop() else {
            debug!(?side, index, "Frontier empty");
            self.exhaust(side, index);
            return None;
        };
        let label = search.labels[label_index as usize];
        if label.cost.cost > cost_threshold {
            debug!(?side, index, cost = label.cost.cost, "Cost threshold reached");
            self.exhaust(side, index);
            return None;
        }
        search.status.update(label.edge_id, EdgeSet::Permanent);
        Some((label_index, label))
    }

    // =========================================================================
    // FORWARD SEARCH
    // =========================================================================

    fn forward_search(
        &mut self,
        source: u32,
        n: u32,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
    ) {
        let Some((pred_index, pred)) = self.next_label(Side::Source, source) else {
            return;
        };
        self.stats.forward_settled += 1;

        if self.update_destinations(source, &pred, n) {
            self.pending_destinations[source as usize].remove(&pred.edge_id);
        }
        self.check_forward_connections(source, &pred, n);

        if self.source_status[source as usize].is_active() {
            self.expand_forward(source, pred_index, &pred, reader, costing);
        }
    }

    fn expand_forward(
        &mut self,
        source: u32,
        pred_index: u32,
        pred: &EdgeLabel,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
    ) {
        let index = source as usize;
        let node_id = pred.end_node;
        let node = match reader.node_info(node_id) {
            Ok(node) => node,
            Err(e) => {
                log_unavailable(Side::Source, source, node_id, "Node unavailable", &e);
                return;
            }
        };
        if !costing.node_allowed(&node) {
            return;
        }
        let pred_edge = match reader.directed_edge(pred.edge_id) {
            Ok(edge) => edge,
            Err(e) => {
                log_unavailable(Side::Source, source, pred.edge_id, "Edge unavailable", &e);
                return;
            }
        };
        let clock = self.forward[index].time.map(|t| {
            if self.invariant {
                t
            } else {
                t.forward(pred.cost.secs)
            }
        });
        let second_of_week = clock.map(|t| t.second_of_week);

        // No u-turns except where nothing else is usable in this mode
        let dead_end = forward_dead_end(reader, costing, node_id, &node, pred.opp_edge_id);
        for edge_id in node.edge_ids(node_id) {
            if edge_id == pred.opp_edge_id && !dead_end {
                continue;
            }
            let existing = self.forward[index].status.get(edge_id);
            if matches!(existing, Some(EdgeStatusInfo { set: EdgeSet::Permanent, .. })) {
                continue;
            }
            let edge = match reader.directed_edge(edge_id) {
                Ok(edge) => edge,
                Err(e) => {
                    log_unavailable(Side::Source, source, edge_id, "Edge unavailable", &e);
                    continue;
                }
            };
            if !costing.allowed(&edge) {
                continue;
            }
            if !self.forward[index]
                .hierarchy
                .permits(pred.level, edge_id.level(), pred.distance)
            {
                continue;
            }
            let opp_edge_id = match reader.opposing_edge(edge_id) {
                Ok(id) => id,
                Err(e) => {
                    log_unavailable(Side::Source, source, edge_id, "Opposing edge unavailable", &e);
                    continue;
                }
            };

            let transition = costing.transition_cost(&node, &pred_edge, &edge);
            let edge_cost = costing.edge_cost(&edge, second_of_week);
            let cost = pred.cost + edge_cost + transition;
            let distance = pred.distance + edge.length as f32;

            let search = &mut self.forward[index];
            match existing {
                Some(info) => {
                    let label = &mut search.labels[info.label_index as usize];
                    if cost.cost < label.cost.cost {
                        label.update(pred_index, cost, distance, transition);
                        search.queue.decrease(info.label_index, cost.cost);
                    }
                }
                None => {
                    search.add_label(EdgeLabel {
                        predecessor: pred_index,
                        edge_id,
                        opp_edge_id,
                        end_node: edge.end_node,
                        cost,
                        sort_cost: cost.cost,
                        distance,
                        transition_cost: transition,
                        edge_cost,
                        edge_length: edge.length as f32,
                        level: edge_id.level(),
                    });
                    self.source_map.register(edge_id, source);
                }
            }
        }
    }

    /// Resolve targets correlated to the edge `pred` just settled
    ///
    /// Returns true when no target on that edge is left pending.
    fn update_destinations(&mut self, source: u32, pred: &EdgeLabel, n: u32) -> bool {
        let Some(pending) = self.pending_destinations[source as usize].get_mut(&pred.edge_id)
        else {
            return false;
        };

        let mut offers = std::mem::take(&mut self.offers);
        offers.clear();
        pending.retain(|&(target, percent_along)| {
            let remainder = 1.0 - percent_along;
            let cost = pred.cost - pred.edge_cost * remainder;
            if cost.cost < -DESTINATION_EPSILON {
                // Target lies behind the source on this edge
                return true;
            }
            let distance = pred.distance - pred.edge_length * remainder;
            offers.push((
                target,
                Candidate {
                    edge_id: pred.edge_id,
                    opp_edge_id: pred.opp_edge_id,
                    cost: Cost::new(cost.cost.max(0.0), cost.secs.max(0.0)),
                    distance: distance.max(0.0),
                },
            ));
            false
        });
        let done = pending.is_empty();

        for &(target, candidate) in &offers {
            self.update_status(source, target, candidate, n);
        }
        self.offers = offers;
        done
    }

    fn check_forward_connections(&mut self, source: u32, pred: &EdgeLabel, n: u32) {
        let mut offers = std::mem::take(&mut self.offers);
        offers.clear();
        for &target in self.target_map.reached_by(pred.opp_edge_id) {
            let search = &self.backward[target as usize];
            let Some(opp) = search.label_on(pred.opp_edge_id) else {
                continue;
            };
            // Seeds are resolved when the edge itself settles
            let Some(opp_pred) = search.predecessor_of(opp) else {
                continue;
            };
            offers.push((
                target,
                Candidate {
                    edge_id: pred.edge_id,
                    opp_edge_id: pred.opp_edge_id,
                    cost: pred.cost + opp_pred.cost + opp.transition_cost,
                    distance: pred.distance + opp_pred.distance,
                },
            ));
        }

        for &(target, candidate) in &offers {
            self.update_status(source, target, candidate, n);
        }
        self.offers = offers;
    }

    // =========================================================================
    // BACKWARD SEARCH
    // =========================================================================

    fn backward_search(
        &mut self,
        target: u32,
        n: u32,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
    ) {
        let Some((pred_index, pred)) = self.next_label(Side::Target, target) else {
            return;
        };
        self.stats.backward_settled += 1;

        self.check_backward_connections(target, &pred, n);

        if self.target_status[target as usize].is_active() {
            self.expand_backward(target, pred_index, &pred, reader, costing);
        }
    }

    fn expand_backward(
        &mut self,
        target: u32,
        pred_index: u32,
        pred: &EdgeLabel,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
    ) {
        let index = target as usize;
        let node_id = pred.end_node;
        let node = match reader.node_info(node_id) {
            Ok(node) => node,
            Err(e) => {
                log_unavailable(Side::Target, target, node_id, "Node unavailable", &e);
                return;
            }
        };
        if !costing.node_allowed(&node) {
            return;
        }
        // Forward edge the predecessor stands for; it leaves `node`
        let next_edge = match reader.directed_edge(pred.opp_edge_id) {
            Ok(edge) => edge,
            Err(e) => {
                log_unavailable(Side::Target, target, pred.opp_edge_id, "Edge unavailable", &e);
                return;
            }
        };

        let dead_end = backward_dead_end(reader, costing, node_id, &node, pred.opp_edge_id);
        for edge_id in node.edge_ids(node_id) {
            if edge_id == pred.opp_edge_id && !dead_end {
                continue;
            }
            let existing = self.backward[index].status.get(edge_id);
            if matches!(existing, Some(EdgeStatusInfo { set: EdgeSet::Permanent, .. })) {
                continue;
            }
            let lookup = reader.directed_edge(edge_id).and_then(|edge| {
                let opp_edge_id = reader.opposing_edge(edge_id)?;
                let opp_edge = reader.directed_edge(opp_edge_id)?;
                Ok((edge, opp_edge_id, opp_edge))
            });
            let (edge, opp_edge_id, opp_edge) = match lookup {
                Ok(found) => found,
                Err(e) => {
                    log_unavailable(Side::Target, target, edge_id, "Edge unavailable", &e);
                    continue;
                }
            };
            // The forward traversal is along the opposing edge
            if !costing.allowed(&opp_edge) {
                continue;
            }
            if !self.backward[index]
                .hierarchy
                .permits(pred.level, edge_id.level(), pred.distance)
            {
                continue;
            }

            let transition = costing.transition_cost(&node, &opp_edge, &next_edge);
            let edge_cost = costing.edge_cost(&opp_edge, None);
            let cost = pred.cost + edge_cost + transition;
            let distance = pred.distance + opp_edge.length as f32;

            let search = &mut self.backward[index];
            match existing {
                Some(info) => {
                    let label = &mut search.labels[info.label_index as usize];
                    if cost.cost < label.cost.cost {
                        label.update(pred_index, cost, distance, transition);
                        search.queue.decrease(info.label_index, cost.cost);
                    }
                }
                None => {
                    search.add_label(EdgeLabel {
                        predecessor: pred_index,
                        edge_id,
                        opp_edge_id,
                        end_node: edge.end_node,
                        cost,
                        sort_cost: cost.cost,
                        distance,
                        transition_cost: transition,
                        edge_cost,
                        edge_length: opp_edge.length as f32,
                        level: edge_id.level(),
                    });
                    self.target_map.register(edge_id, target);
                }
            }
        }
    }

    fn check_backward_connections(&mut self, target: u32, pred: &EdgeLabel, n: u32) {
        let mut offers = std::mem::take(&mut self.offers);
        offers.clear();
        for &source in self.source_map.reached_by(pred.opp_edge_id) {
            let search = &self.forward[source as usize];
            let Some(fwd) = search.label_on(pred.opp_edge_id) else {
                continue;
            };
            let (cost, distance) = match search.predecessor_of(fwd) {
                Some(fwd_pred) => (
                    pred.cost + fwd_pred.cost + fwd.transition_cost,
                    pred.distance + fwd_pred.distance,
                ),
                // Both seeds: resolved when the forward search settles the edge
                None if pred.is_seed() => continue,
                // Drop the part of the edge behind the source
                None => (
                    pred.cost - (fwd.edge_cost - fwd.cost),
                    pred.distance - (fwd.edge_length - fwd.distance),
                ),
            };
            if cost.cost < -DESTINATION_EPSILON {
                continue;
            }
            offers.push((
                source,
                Candidate {
                    edge_id: pred.opp_edge_id,
                    opp_edge_id: pred.edge_id,
                    cost: Cost::new(cost.cost.max(0.0), cost.secs.max(0.0)),
                    distance: distance.max(0.0),
                },
            ));
        }

        for &(source, candidate) in &offers {
            self.update_status(source, target, candidate, n);
        }
        self.offers = offers;
    }

    // =========================================================================
    // CONNECTION BOOKKEEPING
    // =========================================================================

    fn update_status(&mut self, source: u32, target: u32, candidate: Candidate, n: u32) {
        match self.best.offer(source, target, candidate) {
            Offer::Rejected => {}
            Offer::Improved => {
                self.stats.connections += 1;
                trace!(source, target, cost = candidate.cost.cost, "Cheaper connection");
            }
            Offer::First => {
                self.stats.connections += 1;
                trace!(source, target, cost = candidate.cost.cost, "First connection");
                match self.grace {
                    None => self.confirm(source, target),
                    Some(grace) => {
                        let cell = self.best.get_mut(source, target);
                        if !cell.found {
                            cell.deadline = Some(n.saturating_add(grace));
                            self.pending_confirmations.push_back((source, target));
                        }
                    }
                }
            }
        }
    }

    /// Confirm every pair whose deadline passed before round `n` ended
    fn confirm_expired(&mut self, n: u32) {
        while let Some(&(source, target)) = self.pending_confirmations.front() {
            let cell = self.best.get(source, target);
            if !cell.found {
                match cell.deadline {
                    Some(deadline) if deadline < n => {}
                    _ => break,
                }
                self.confirm(source, target);
            }
            self.pending_confirmations.pop_front();
        }
    }

    fn confirm(&mut self, source: u32, target: u32) {
        self.best.confirm(source, target);
        let source_done = release(&mut self.source_status[source as usize], target);
        let target_done = release(&mut self.target_status[target as usize], source);
        if source_done {
            self.exhaust(Side::Source, source);
        }
        if target_done {
            self.exhaust(Side::Target, target);
        }
    }

    /// Stop a location and cascade to opposite locations left with nothing
    /// to wait for
    fn exhaust(&mut self, side: Side, index: u32) {
        let mut work = vec![(side, index)];
        while let Some((side, index)) = work.pop() {
            let status = self.status_mut(side, index);
            if !status.is_active() {
                continue;
            }
            status.state = LocationState::Exhausted;
            let remaining = std::mem::take(&mut status.remaining_locations);
            match side {
                Side::Source => self.remaining_sources = self.remaining_sources.saturating_sub(1),
                Side::Target => self.remaining_targets = self.remaining_targets.saturating_sub(1),
            }
            debug!(?side, index, unconnected = remaining.len(), "Location exhausted");

            for other in remaining {
                let (source, target) = side.pair(index, other);
                if self.best.get(source, target).connected {
                    self.best.confirm(source, target);
                }
                let opposite = self.status_mut(side.opposite(), other);
                if release(opposite, index) && opposite.is_active() {
                    work.push((side.opposite(), other));
                }
            }
        }
    }

    fn statuses(&self, side: Side) -> &[LocationStatus] {
        match side {
            Side::Source => &self.source_status,
            Side::Target => &self.target_status,
        }
    }

    fn status_mut(&mut self, side: Side, index: u32) -> &mut LocationStatus {
        match side {
            Side::Source => &mut self.source_status[index as usize],
            Side::Target => &mut self.target_status[index as usize],
        }
    }

    // =========================================================================
    // RECOST AND OUTPUT
    // =========================================================================

    /// Replay the connected paths with time-dependent costs
    ///
    /// Failures keep the search's approximate values. Returns the arrival
    /// (depart-at) or departure (arrive-by) time per cell.
    fn recost_paths(
        &mut self,
        request: &MatrixRequest,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
        anchor: TimeAnchor,
    ) -> Vec<Option<NaiveDateTime>> {
        let start = Instant::now();
        let num_targets = request.targets.len();
        let mut date_times = vec![None; request.sources.len() * num_targets];

        let jobs: Vec<(u32, u32)> = self
            .best
            .iter()
            .filter(|&(s, t, cell)| cell.connected && request.anchor_time(anchor, s, t).is_some())
            .map(|(s, t, _)| (s, t))
            .collect();

        let this = &*self;
        let results: Vec<(u32, u32, Result<Recosted>)> = jobs
            .par_iter()
            .map(|&(s, t)| (s, t, this.recost_pair(request, reader, costing, anchor, s, t)))
            .collect();

        for (source, target, result) in results {
            match result {
                Ok(recosted) => {
                    let cell = self.best.get_mut(source, target);
                    cell.cost = recosted.cost;
                    cell.distance = recosted.distance;
                    date_times[source as usize * num_targets + target as usize] =
                        recosted.time.date_time();
                    self.stats.recosted += 1;
                }
                Err(e) => {
                    warn!(source, target, "Recost failed, keeping approximate cost: {e}");
                    self.stats.recost_failures += 1;
                }
            }
        }

        self.stats.recost_time_ms = start.elapsed().as_millis() as u64;
        date_times
    }

    fn recost_pair(
        &self,
        request: &MatrixRequest,
        reader: &dyn GraphReader,
        costing: &dyn DynamicCost,
        anchor: TimeAnchor,
        source: u32,
        target: u32,
    ) -> Result<Recosted> {
        let broken = |reason: String| Error::BrokenPath {
            source_index: source,
            target_index: target,
            reason,
        };
        let cell = self.best.get(source, target);
        let forward = &self.forward[source as usize];
        let backward = &self.backward[target as usize];

        let forward_index = forward
            .status
            .get(cell.edge_id)
            .ok_or_else(|| broken(format!("no forward label on {}", cell.edge_id)))?
            .label_index;
        let backward_index = backward
            .status
            .get(cell.opp_edge_id)
            .ok_or_else(|| broken(format!("no backward label on {}", cell.opp_edge_id)))?
            .label_index;
        let path = form_path(&forward.labels, forward_index, &backward.labels, backward_index)
            .map_err(broken)?;

        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(broken("empty path".into()));
        };
        let source_location = &request.sources[source as usize];
        let target_location = &request.targets[target as usize];
        let source_pct = source_location
            .percent_along(first)
            .ok_or_else(|| broken(format!("path starts on uncorrelated edge {first}")))?;
        let target_pct = target_location
            .percent_along(last)
            .ok_or_else(|| broken(format!("path ends on uncorrelated edge {last}")))?;

        let time = request
            .anchor_time(anchor, source, target)
            .map(TimeInfo::from_local)
            .ok_or_else(|| broken("anchor location has no date-time".into()))?;
        match anchor {
            TimeAnchor::DepartAt => recost_forward(
                reader,
                costing,
                &path,
                source_pct,
                target_pct,
                time,
                request.invariant,
            ),
            TimeAnchor::ArriveBy => recost_reverse(
                reader,
                costing,
                &path,
                source_pct,
                target_pct,
                time,
                request.invariant,
            ),
        }
    }

    fn form_matrix(
        &self,
        num_sources: usize,
        num_targets: usize,
        date_times: &[Option<NaiveDateTime>],
    ) -> Matrix {
        let cells = self
            .best
            .iter()
            .zip(date_times)
            .map(|((_, _, cell), &date_time)| {
                if !cell.connected {
                    return MatrixCell::default();
                }
                MatrixCell {
                    found: true,
                    cost: cell.cost.cost,
                    time: cell.cost.secs,
                    distance: cell.distance,
                    date_time,
                    connection: Some(Connection {
                        edge_id: cell.edge_id,
                        opp_edge_id: cell.opp_edge_id,
                    }),
                }
            })
            .collect();
        Matrix {
            num_sources,
            num_targets,
            cells,
        }
    }
}

/// True when no edge leaving `node` other than `u_turn` can be driven forward
fn forward_dead_end(
    reader: &dyn GraphReader,
    costing: &dyn DynamicCost,
    node_id: GraphId,
    node: &NodeInfo,
    u_turn: GraphId,
) -> bool {
    node.edge_ids(node_id)
        .filter(|&edge_id| edge_id != u_turn)
        .all(|edge_id| {
            reader
                .directed_edge(edge_id)
                .map_or(true, |edge| !costing.allowed(&edge))
        })
}

/// True when no edge other than `u_turn` can be driven forward into `node`
///
/// The backward search at `node` expands edges leaving it, each standing for
/// the forward traversal of its opposing edge.
fn backward_dead_end(
    reader: &dyn GraphReader,
    costing: &dyn DynamicCost,
    node_id: GraphId,
    node: &NodeInfo,
    u_turn: GraphId,
) -> bool {
    node.edge_ids(node_id)
        .filter(|&edge_id| edge_id != u_turn)
        .all(|edge_id| {
            reader
                .opposing_edge(edge_id)
                .and_then(|opp_edge_id| reader.directed_edge(opp_edge_id))
                .map_or(true, |opp_edge| !costing.allowed(&opp_edge))
        })
}

/// Missing graph data only makes an element non-traversable; any other
/// failure points at a malformed graph
fn log_unavailable(side: Side, index: u32, id: GraphId, what: &str, err: &Error) {
    if err.is_missing_data() {
        debug!(?side, index, %id, "{what}: {err}");
    } else {
        warn!(?side, index, %id, "{what}: {err}");
    }
}

/// Remove `other` from the remaining set; true if that emptied it
fn release(status: &mut LocationStatus, other: u32) -> bool {
    status.remaining_locations.remove(&other) && status.remaining_locations.is_empty()
}

fn active_indices(statuses: &[LocationStatus]) -> VecDeque<u32> {
    statuses
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_active())
        .map(|(i, _)| i as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionPolicy;
    use crate::costing::SpeedCost;
    use crate::graph::{GraphBuilder, MemoryGraph, Road};
    use crate::matrix::PathEdge;

    fn two_node_graph() -> (MemoryGraph, GraphId, GraphId, GraphId) {
        let mut b = GraphBuilder::new();
        let a = b.add_node(2, 0).unwrap();
        let c = b.add_node(2, 0).unwrap();
        b.add_road(a, c, Road::new(1000, 36)).unwrap();
        let graph = b.build().unwrap();
        let edge = graph.edge_between(a, c).unwrap();
        (graph, a, c, edge)
    }

    #[test]
    fn cost_threshold_per_mode() {
        assert_eq!(get_cost_threshold(Mode::Car, 400_000.0).unwrap(), 400_000.0 / 56.0);
        assert_eq!(get_cost_threshold(Mode::Foot, 2_800.0).unwrap(), 100.0);
        assert!(get_cost_threshold(Mode::Bike, 0.0).is_err());
        assert!(get_cost_threshold(Mode::Car, f32::NAN).is_err());
    }

    #[test]
    fn rejects_empty_and_invalid_requests() {
        let (graph, a, _, _) = two_node_graph();
        let costing = SpeedCost::new(Mode::Car);
        let mut matrix = CostMatrix::default();
        let here = Location::from_node(&graph, a).unwrap();

        let empty = MatrixRequest::new(vec![], vec![here.clone()]);
        assert!(matrix.source_to_target(&empty, &graph, &costing).is_err());

        let far = MatrixRequest::new(vec![here.clone()], vec![here]).with_max_distance(-1.0);
        assert!(matrix.source_to_target(&far, &graph, &costing).is_err());
    }

    #[test]
    fn target_ahead_on_same_edge() {
        let (graph, _, _, edge) = two_node_graph();
        let costing = SpeedCost::new(Mode::Car);
        let request = MatrixRequest::new(
            vec![Location::new(vec![PathEdge::new(edge, 0.25)])],
            vec![Location::new(vec![PathEdge::new(edge, 0.75)])],
        );
        let mut matrix = CostMatrix::default();
        let result = matrix.source_to_target(&request, &graph, &costing).unwrap();
        let cell = result.get(0, 0).unwrap();
        assert!(cell.found);
        assert!((cell.time - 50.0).abs() < 1e-3);
        assert!((cell.distance - 500.0).abs() < 1e-2);
    }

    #[test]
    fn target_behind_source_on_oneway_is_unreachable() {
        let mut b = GraphBuilder::new();
        let a = b.add_node(2, 0).unwrap();
        let c = b.add_node(2, 0).unwrap();
        b.add_road(a, c, Road::new(1000, 36).oneway()).unwrap();
        let graph = b.build().unwrap();
        let edge = graph.edge_between(a, c).unwrap();

        let request = MatrixRequest::new(
            vec![Location::new(vec![PathEdge::new(edge, 0.75)])],
            vec![Location::new(vec![PathEdge::new(edge, 0.25)])],
        );
        let mut matrix = CostMatrix::default();
        let result = matrix
            .source_to_target(&request, &graph, &SpeedCost::new(Mode::Car))
            .unwrap();
        assert!(!result.get(0, 0).unwrap().found);
        assert_eq!(result.get(0, 0).unwrap().cost, 0.0);
    }

    #[test]
    fn location_without_usable_edges_stays_unconnected() {
        let (graph, a, c, _) = two_node_graph();
        let costing = SpeedCost::new(Mode::Car);
        let request = MatrixRequest::new(
            vec![
                Location::from_node(&graph, a).unwrap(),
                Location::new(vec![PathEdge::new(GraphId::new(0, 9, 0).unwrap(), 0.0)]),
            ],
            vec![Location::from_node(&graph, c).unwrap()],
        );
        let mut matrix = CostMatrix::default();
        let result = matrix.source_to_target(&request, &graph, &costing).unwrap();
        assert!(result.get(0, 0).unwrap().found);
        assert!(!result.get(1, 0).unwrap().found);
    }

    #[test]
    fn first_connection_policy_stops_early() {
        let (graph, a, c, _) = two_node_graph();
        let costing = SpeedCost::new(Mode::Car);
        let request = MatrixRequest::new(
            vec![Location::from_node(&graph, a).unwrap()],
            vec![Location::from_node(&graph, c).unwrap()],
        );
        let mut matrix = CostMatrix::new(CostMatrixConfig {
            connection_policy: ConnectionPolicy::FirstConnection,
            ..Default::default()
        });
        let result = matrix.source_to_target(&request, &graph, &costing).unwrap();
        assert!((result.get(0, 0).unwrap().time - 100.0).abs() < 1e-3);
        assert!(matrix.stats().iterations <= 3);
        assert!(matrix.stats().connections >= 1);
    }

    #[test]
    fn iteration_budget_limits_expansion() {
        let mut b = GraphBuilder::new();
        let nodes: Vec<_> = (0..20).map(|_| b.add_node(2, 0).unwrap()).collect();
        for w in nodes.windows(2) {
            b.add_road(w[0], w[1], Road::new(100, 36)).unwrap();
        }
        let graph = b.build().unwrap();
        let request = MatrixRequest::new(
            vec![Location::from_node(&graph, nodes[0]).unwrap()],
            vec![Location::from_node(&graph, nodes[19]).unwrap()],
        );
        let mut matrix = CostMatrix::new(CostMatrixConfig {
            max_iterations: Some(2),
            ..Default::default()
        });
        let result = matrix
            .source_to_target(&request, &graph, &SpeedCost::new(Mode::Car))
            .unwrap();
        assert!(!result.get(0, 0).unwrap().found);
        assert!(matrix.stats().forward_settled <= 2);
    }

    #[test]
    fn clear_trims_state() {
        let (graph, a, c, _) = two_node_graph();
        let request = MatrixRequest::new(
            vec![Location::from_node(&graph, a).unwrap()],
            vec![Location::from_node(&graph, c).unwrap()],
        );
        let mut matrix = CostMatrix::default();
        matrix
            .source_to_target(&request, &graph, &SpeedCost::new(Mode::Car))
            .unwrap();
        assert!(!matrix.source_map.is_empty());
        matrix.clear();
        assert!(matrix.source_map.is_empty());
        assert!(matrix.target_map.is_empty());
        assert!(matrix.forward.iter().all(|s| s.labels.is_empty()));
        assert_eq!(matrix.stats(), &MatrixStats::default());
    }
}
