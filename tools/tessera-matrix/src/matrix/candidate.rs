use tessera_common::{Cost, GraphId};

/// A source-target connection found by the searches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Last edge covered by the forward search
    pub edge_id: GraphId,
    /// Edge holding the backward label that continues the path
    pub opp_edge_id: GraphId,
    pub cost: Cost,
    pub distance: f32,
}

/// Best connection known for one pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestCandidate {
    /// No further search is needed for this pair
    pub found: bool,
    /// At least one connection was offered
    pub connected: bool,
    pub edge_id: GraphId,
    pub opp_edge_id: GraphId,
    pub cost: Cost,
    pub distance: f32,
    /// Round after which the pair is confirmed
    pub deadline: Option<u32>,
}

impl Default for BestCandidate {
    fn default() -> Self {
        Self {
            found: false,
            connected: false,
            edge_id: GraphId::invalid(),
            opp_edge_id: GraphId::invalid(),
            cost: Cost::ZERO,
            distance: 0.0,
            deadline: None,
        }
    }
}

/// Result of offering a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Not cheaper than the current best
    Rejected,
    /// First connection for the pair
    First,
    /// Strictly cheaper than the previous best
    Improved,
}

/// |sources| × |targets| table of best connections
#[derive(Debug, Clone, Default)]
pub struct BestCandidates {
    num_targets: usize,
    cells: Vec<BestCandidate>,
}

impl BestCandidates {
    pub fn new(num_sources: usize, num_targets: usize) -> Self {
        Self {
            num_targets,
            cells: vec![BestCandidate::default(); num_sources * num_targets],
        }
    }

    #[inline]
    fn index(&self, source: u32, target: u32) -> usize {
        source as usize * self.num_targets + target as usize
    }

    pub fn get(&self, source: u32, target: u32) -> &BestCandidate {
        &self.cells[self.index(source, target)]
    }

    pub fn get_mut(&mut self, source: u32, target: u32) -> &mut BestCandidate {
        let idx = self.index(source, target);
        &mut self.cells[idx]
    }

    /// Keep `candidate` if it is the pair's first or strictly cheapest
    pub fn offer(&mut self, source: u32, target: u32, candidate: Candidate) -> Offer {
        let cell = self.get_mut(source, target);
        let outcome = if !cell.connected {
            Offer::First
        } else if candidate.cost.cost < cell.cost.cost {
            Offer::Improved
        } else {
            return Offer::Rejected;
        };
        cell.connected = true;
        cell.edge_id = candidate.edge_id;
        cell.opp_edge_id = candidate.opp_edge_id;
        cell.cost = candidate.cost;
        cell.distance = candidate.distance;
        outcome
    }

    /// Mark the pair found; true if it was not already
    pub fn confirm(&mut self, source: u32, target: u32) -> bool {
        let cell = self.get_mut(source, target);
        !std::mem::replace(&mut cell.found, true)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, &BestCandidate)> + '_ {
        let num_targets = self.num_targets.max(1);
        self.cells.iter().enumerate().map(move |(i, cell)| {
            ((i / num_targets) as u32, (i % num_targets) as u32, cell)
        })
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.num_targets = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(cost: f32) -> Candidate {
        Candidate {
            edge_id: GraphId::new(2, 0, 1).unwrap(),
            opp_edge_id: GraphId::new(2, 0, 2).unwrap(),
            cost: Cost::new(cost, cost),
            distance: cost * 10.0,
        }
    }

    #[test]
    fn costs_only_decrease() {
        let mut table = BestCandidates::new(2, 3);
        assert_eq!(table.offer(1, 2, candidate(10.0)), Offer::First);
        assert_eq!(table.offer(1, 2, candidate(12.0)), Offer::Rejected);
        assert_eq!(table.offer(1, 2, candidate(10.0)), Offer::Rejected);
        assert_eq!(table.offer(1, 2, candidate(7.5)), Offer::Improved);
        assert_eq!(table.get(1, 2).cost.cost, 7.5);
        assert_eq!(table.get(1, 2).distance, 75.0);
        assert!(!table.get(0, 2).connected);
    }

    #[test]
    fn confirm_is_idempotent() {
        let mut table = BestCandidates::new(1, 1);
        table.offer(0, 0, candidate(1.0));
        assert!(table.confirm(0, 0));
        assert!(!table.confirm(0, 0));
        // Confirmed pairs still accept cheaper connections
        assert_eq!(table.offer(0, 0, candidate(0.5)), Offer::Improved);
        assert!(table.get(0, 0).found);
    }

    #[test]
    fn iter_walks_row_major() {
        let table = BestCandidates::new(2, 2);
        let pairs: Vec<_> = table.iter().map(|(s, t, _)| (s, t)).collect();
        assert_eq!(pairs, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }
}
