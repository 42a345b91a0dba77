//! Replica ledger — how capacity moves from the old workload to the new.
//!
//! Pure bookkeeping. The state machine scales the old workload down to
//! [`ReplicaLedger::old_remaining`] and the new workload up to
//! [`ReplicaLedger::new_allocated`] at the end of every unit, so the
//! cluster mirrors the ledger at each unit boundary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaLedger {
    original_total: u32,
    target: u32,
    old_remaining: u32,
    new_allocated: u32,
}

impl ReplicaLedger {
    /// Fresh ledger: every replica still belongs to the old workload.
    pub fn new(original_total: u32, target: u32) -> Self {
        Self {
            original_total,
            target,
            old_remaining: original_total,
            new_allocated: 0,
        }
    }

    /// Ledger for a rollout picked up midway, from the replica counts the
    /// two workloads currently declare.
    pub fn resume(old_replicas: u32, new_replicas: u32, target: u32) -> Self {
        let new_allocated = new_replicas.min(target);
        Self {
            original_total: old_replicas + new_allocated,
            target,
            old_remaining: old_replicas,
            new_allocated,
        }
    }

    /// Move up to `n` replicas from old to new. Returns how many moved.
    ///
    /// Never grants past the target and never takes more than the old
    /// workload still holds.
    pub fn allocate(&mut self, n: u32) -> u32 {
        let delta = n
            .min(self.target - self.new_allocated)
            .min(self.old_remaining);
        self.new_allocated += delta;
        self.old_remaining -= delta;
        delta
    }

    /// Replicas the new workload still lacks once every unit is processed.
    pub fn final_correction(&self) -> u32 {
        self.target.saturating_sub(self.new_allocated)
    }

    /// Grant the final correction outright, outside the old/new exchange.
    pub fn apply_correction(&mut self) -> u32 {
        let correction = self.final_correction();
        self.new_allocated += correction;
        correction
    }

    /// `old_remaining + new_allocated == original_total` and `new_allocated <= target`.
    pub fn is_balanced(&self) -> bool {
        self.old_remaining + self.new_allocated == self.original_total
            && self.new_allocated <= self.target
    }

    pub fn original_total(&self) -> u32 {
        self.original_total
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn old_remaining(&self) -> u32 {
        self.old_remaining
    }

    pub fn new_allocated(&self) -> u32 {
        self.new_allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uneven_units_need_no_correction() {
        let mut ledger = ReplicaLedger::new(10, 10);
        for n in [4, 3, 3] {
            let granted = ledger.allocate(n);
            assert_eq!(granted, n);
            assert!(ledger.is_balanced());
        }
        assert_eq!(ledger.old_remaining(), 0);
        assert_eq!(ledger.new_allocated(), 10);
        assert_eq!(ledger.final_correction(), 0);
    }

    #[test]
    fn larger_target_is_topped_up_at_the_end() {
        let mut ledger = ReplicaLedger::new(10, 12);
        for n in [4, 3, 3] {
            ledger.allocate(n);
            assert!(ledger.is_balanced());
        }
        assert_eq!(ledger.final_correction(), 2);
        assert_eq!(ledger.apply_correction(), 2);
        assert_eq!(ledger.new_allocated(), 12);
        assert_eq!(ledger.final_correction(), 0);
    }

    #[test]
    fn smaller_target_caps_allocation() {
        let mut ledger = ReplicaLedger::new(10, 8);
        assert_eq!(ledger.allocate(4), 4);
        assert_eq!(ledger.allocate(3), 3);
        assert_eq!(ledger.allocate(3), 1);
        assert_eq!(ledger.new_allocated(), 8);
        assert_eq!(ledger.old_remaining(), 2);
        assert!(ledger.is_balanced());
        assert_eq!(ledger.allocate(5), 0);
    }

    #[test]
    fn allocation_never_exceeds_old_capacity() {
        let mut ledger = ReplicaLedger::new(3, 10);
        assert_eq!(ledger.allocate(5), 3);
        assert_eq!(ledger.old_remaining(), 0);
        assert!(ledger.is_balanced());
        assert_eq!(ledger.final_correction(), 7);
    }

    #[test]
    fn resume_picks_up_existing_allocation() {
        let mut ledger = ReplicaLedger::resume(2, 2, 4);
        assert_eq!(ledger.original_total(), 4);
        assert!(ledger.is_balanced());
        assert_eq!(ledger.allocate(2), 2);
        assert_eq!(ledger.final_correction(), 0);
    }

    #[test]
    fn zero_allocation_is_a_no_op() {
        let mut ledger = ReplicaLedger::new(4, 4);
        assert_eq!(ledger.allocate(0), 0);
        assert_eq!(ledger, ReplicaLedger::new(4, 4));
    }
}
