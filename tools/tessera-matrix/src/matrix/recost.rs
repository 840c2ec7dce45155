//! Time-dependent recosting
//!
//! The searches only approximate time-dependent costs: backward searches have
//! no clock at all. Once a pair is connected its path is rebuilt from the two
//! label chains and the cost model is replayed edge by edge, starting from the
//! departure time (depart-at) or walking back from the arrival time
//! (arrive-by). The first and last edges are only partially traversed.

use tessera_common::{Cost, Error, GraphId, Result, TimeInfo};

use super::edge_label::{EdgeLabel, INVALID_LABEL};
use crate::costing::DynamicCost;
use crate::graph::{DirectedEdge, GraphReader};

/// Which end of the query carries the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAnchor {
    DepartAt,
    ArriveBy,
}

/// Replayed cost of one path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recosted {
    pub cost: Cost,
    pub distance: f32,
    /// Arrival time (depart-at) or departure time (arrive-by)
    pub time: TimeInfo,
}

/// Edge ids from the source's seed edge to the target's correlated edge
///
/// The forward chain runs from `forward_index` back to its seed. The backward
/// chain starts at the predecessor of `backward_index`, whose own edge is the
/// opposing edge of the forward chain's last edge; each backward label
/// contributes its opposing edge.
pub fn form_path(
    forward: &[EdgeLabel],
    forward_index: u32,
    backward: &[EdgeLabel],
    backward_index: u32,
) -> std::result::Result<Vec<GraphId>, String> {
    let mut path = Vec::new();

    let mut idx = forward_index;
    while idx != INVALID_LABEL {
        let label = forward
            .get(idx as usize)
            .ok_or_else(|| format!("forward label {idx} out of range"))?;
        path.push(label.edge_id);
        if path.len() > forward.len() {
            return Err("forward predecessor chain does not end".into());
        }
        idx = label.predecessor;
    }
    path.reverse();

    let meeting = backward
        .get(backward_index as usize)
        .ok_or_else(|| format!("backward label {backward_index} out of range"))?;
    let mut idx = meeting.predecessor;
    let mut steps = 0usize;
    while idx != INVALID_LABEL {
        let label = backward
            .get(idx as usize)
            .ok_or_else(|| format!("backward label {idx} out of range"))?;
        path.push(label.opp_edge_id);
        steps += 1;
        if steps > backward.len() {
            return Err("backward predecessor chain does not end".into());
        }
        idx = label.predecessor;
    }

    Ok(path)
}

/// Share of edge `i` of an `n`-edge path that is traversed
fn edge_fraction(i: usize, n: usize, source_pct: f32, target_pct: f32) -> Result<f32> {
    let fraction = match (i == 0, i + 1 == n) {
        (true, true) => target_pct - source_pct,
        (true, false) => 1.0 - source_pct,
        (false, true) => target_pct,
        (false, false) => 1.0,
    };
    if !(0.0..=1.0).contains(&fraction) {
        return Err(Error::InvalidInput(format!(
            "inconsistent edge fractions (source {source_pct}, target {target_pct})"
        )));
    }
    Ok(fraction)
}

fn directed_edges(reader: &dyn GraphReader, path: &[GraphId]) -> Result<Vec<DirectedEdge>> {
    if path.is_empty() {
        return Err(Error::InvalidInput("empty path".into()));
    }
    path.iter().map(|&e| reader.directed_edge(e)).collect()
}

fn turn_cost(
    reader: &dyn GraphReader,
    costing: &dyn DynamicCost,
    from: &DirectedEdge,
    to: &DirectedEdge,
) -> Result<Cost> {
    let node = reader.node_info(from.end_node)?;
    Ok(costing.transition_cost(&node, from, to))
}

/// Replay `path` forward from `depart`
pub fn recost_forward(
    reader: &dyn GraphReader,
    costing: &dyn DynamicCost,
    path: &[GraphId],
    source_pct: f32,
    target_pct: f32,
    depart: TimeInfo,
    invariant: bool,
) -> Result<Recosted> {
    let edges = directed_edges(reader, path)?;
    let n = edges.len();
    let mut cost = Cost::ZERO;
    let mut distance = 0.0f32;

    for (i, edge) in edges.iter().enumerate() {
        let fraction = edge_fraction(i, n, source_pct, target_pct)?;
        let clock = if invariant {
            depart
        } else {
            depart.forward(cost.secs)
        };
        let edge_cost = costing.edge_cost(edge, Some(clock.second_of_week)) * fraction;
        let transition = match i {
            0 => Cost::ZERO,
            _ => turn_cost(reader, costing, &edges[i - 1], edge)?,
        };
        cost = cost + edge_cost + transition;
        distance += edge.length as f32 * fraction;
    }

    Ok(Recosted {
        cost,
        distance,
        time: depart.forward(cost.secs),
    })
}

/// Replay `path` backward from `arrive`
pub fn recost_reverse(
    reader: &dyn GraphReader,
    costing: &dyn DynamicCost,
    path: &[GraphId],
    source_pct: f32,
    target_pct: f32,
    arrive: TimeInfo,
    invariant: bool,
) -> Result<Recosted> {
    let edges = directed_edges(reader, path)?;
    let n = edges.len();
    let mut cost = Cost::ZERO;
    let mut distance = 0.0f32;

    for i in (0..n).rev() {
        let edge = &edges[i];
        let fraction = edge_fraction(i, n, source_pct, target_pct)?;
        let clock = if invariant {
            arrive
        } else {
            arrive.reverse(cost.secs)
        };
        cost += costing.edge_cost(edge, Some(clock.second_of_week)) * fraction;
        if i > 0 {
            cost += turn_cost(reader, costing, &edges[i - 1], edge)?;
        }
        distance += edge.length as f32 * fraction;
    }

    Ok(Recosted {
        cost,
        distance,
        time: arrive.reverse(cost.secs),
    })
}
