//! Double-bucket priority queue
//!
//! Labels are binned by `floor((sort_cost - min_cost) / bucket_size)` into a
//! fixed range of buckets; anything beyond the range waits in an overflow
//! bucket that is redistributed once the low buckets run dry. Ordering inside
//! a bucket is arbitrary, so the queue is approximate to within one bucket.
//!
//! Labels are identified by their index in the owning label store, which keeps
//! the per-label bookkeeping in flat vectors.

/// Upper bound on the number of low-level buckets
const MAX_BUCKETS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Absent,
    Bucket(u32),
    Overflow,
}

#[derive(Debug, Clone)]
pub struct DoubleBucketQueue {
    bucket_size: f32,
    inv_bucket_size: f32,
    /// Cost covered by the low-level buckets
    range: f32,
    /// Lower bound of bucket 0
    min_cost: f32,
    /// Bucket currently being drained
    current: usize,
    buckets: Vec<Vec<u32>>,
    overflow: Vec<u32>,
    /// Sort cost per label index
    sort_costs: Vec<f32>,
    /// Where each label currently sits
    slots: Vec<Slot>,
    len: usize,
}

impl DoubleBucketQueue {
    pub fn new(range: f32, bucket_size: f32) -> Self {
        let mut queue = Self {
            bucket_size: 1.0,
            inv_bucket_size: 1.0,
            range: 0.0,
            min_cost: 0.0,
            current: 0,
            buckets: Vec::new(),
            overflow: Vec::new(),
            sort_costs: Vec::new(),
            slots: Vec::new(),
            len: 0,
        };
        queue.reuse(0.0, range, bucket_size);
        queue
    }

    /// Clear and reconfigure for a new search
    pub fn reuse(&mut self, min_cost: f32, range: f32, bucket_size: f32) {
        let bucket_size = if bucket_size > 0.0 { bucket_size } else { 1.0 };
        let count = if range.is_finite() && range > 0.0 {
            ((range / bucket_size).ceil() as usize).clamp(1, MAX_BUCKETS)
        } else {
            1
        };
        self.clear();
        self.bucket_size = bucket_size;
        self.inv_bucket_size = 1.0 / bucket_size;
        self.range = count as f32 * bucket_size;
        self.min_cost = min_cost;
        self.buckets.resize_with(count, Vec::new);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.overflow.clear();
        self.sort_costs.clear();
        self.slots.clear();
        self.current = 0;
        self.len = 0;
    }

    /// Release bookkeeping capacity beyond `max_labels` entries
    pub fn shrink_to(&mut self, max_labels: usize) {
        self.sort_costs.shrink_to(max_labels);
        self.slots.shrink_to(max_labels);
        self.overflow.shrink_to(max_labels);
    }

    /// Insert a label that is not currently queued
    pub fn add(&mut self, label: u32, sort_cost: f32) {
        let idx = label as usize;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, Slot::Absent);
            self.sort_costs.resize(idx + 1, 0.0);
        }
        debug_assert_eq!(self.slots[idx], Slot::Absent, "label {label} queued twice");
        self.sort_costs[idx] = sort_cost;
        self.place(label, sort_cost);
        self.len += 1;
    }

    /// Move a queued label to a lower sort cost
    pub fn decrease(&mut self, label: u32, sort_cost: f32) {
        let idx = label as usize;
        match self.slots.get(idx).copied().unwrap_or(Slot::Absent) {
            Slot::Absent => return,
            Slot::Bucket(b) => remove_from(&mut self.buckets[b as usize], label),
            Slot::Overflow => remove_from(&mut self.overflow, label),
        }
        self.sort_costs[idx] = sort_cost;
        self.place(label, sort_cost);
    }

    /// Remove and return a label from the lowest non-empty bucket
    pub fn pop(&mut self) -> Option<u32> {
        loop {
            while self.current < self.buckets.len() {
                if let Some(label) = self.buckets[self.current].pop() {
                    self.slots[label as usize] = Slot::Absent;
                    self.len -= 1;
                    return Some(label);
                }
                self.current += 1;
            }
            if self.overflow.is_empty() {
                return None;
            }
            self.empty_overflow();
        }
    }

    /// Rebase the bucket range on the cheapest overflow label
    fn empty_overflow(&mut self) {
        let min = self
            .overflow
            .iter()
            .map(|&l| self.sort_costs[l as usize])
            .fold(f32::INFINITY, f32::min);
        self.min_cost = (min * self.inv_bucket_size).floor() * self.bucket_size;
        self.current = 0;

        let pending = std::mem::take(&mut self.overflow);
        for &label in &pending {
            self.place(label, self.sort_costs[label as usize]);
        }
        // Reuse the allocation for whatever is still beyond the new range
        let mut spare = pending;
        spare.clear();
        spare.append(&mut self.overflow);
        self.overflow = spare;
    }

    fn place(&mut self, label: u32, sort_cost: f32) {
        match self.bucket_for(sort_cost) {
            Some(b) => {
                self.buckets[b].push(label);
                self.slots[label as usize] = Slot::Bucket(b as u32);
            }
            None => {
                self.overflow.push(label);
                self.slots[label as usize] = Slot::Overflow;
            }
        }
    }

    fn bucket_for(&self, sort_cost: f32) -> Option<usize> {
        if sort_cost >= self.min_cost + self.range {
            return None;
        }
        let raw = ((sort_cost - self.min_cost) * self.inv_bucket_size).floor();
        let idx = if raw > 0.0 { raw as usize } else { 0 };
        Some(idx.clamp(self.current, self.buckets.len() - 1))
    }
}

fn remove_from(items: &mut Vec<u32>, label: u32) {
    if let Some(pos) = items.iter().position(|&l| l == label) {
        items.swap_remove(pos);
    }
}
