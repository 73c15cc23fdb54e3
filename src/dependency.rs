//! Checkpoint-based transfer dependency tracking.
//!
//! A checkpoint is a reference-counted gate with an optional cycle delay:
//! it is done once all of its dependencies have completed and the delay has
//! elapsed past the latest completion cycle. The engine uses checkpoints to
//! serialize transfers contending for one NIU and to chain multichip fabric
//! segments.

use crate::coord::Cycle;

pub type CheckpointId = usize;

#[derive(Debug, Clone)]
struct Checkpoint {
    dep_completed: u32,
    dep_total: u32,
    end_cycle: Cycle,
    delay: Cycle,
}

impl Checkpoint {
    fn all_deps_complete(&self) -> bool {
        self.dep_completed == self.dep_total
    }

    fn done(&self, cycle: Cycle) -> bool {
        self.all_deps_complete() && cycle >= self.end_cycle + self.delay
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    checkpoints: Vec<Checkpoint>,
}

impl DependencyTracker {
    pub fn create_checkpoint(&mut self, dep_total: u32, delay: Cycle) -> CheckpointId {
        self.checkpoints.push(Checkpoint {
            dep_completed: 0,
            dep_total,
            end_cycle: 0,
            delay,
        });
        self.checkpoints.len() - 1
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Records one dependency completion at `end_cycle`.
    pub fn update(&mut self, id: CheckpointId, end_cycle: Cycle) {
        let cp = &mut self.checkpoints[id];
        cp.dep_completed += 1;
        cp.end_cycle = cp.end_cycle.max(end_cycle);
    }

    pub fn end_cycle(&self, id: CheckpointId) -> Cycle {
        self.checkpoints[id].end_cycle
    }

    pub fn end_cycle_plus_delay(&self, id: CheckpointId) -> Cycle {
        let cp = &self.checkpoints[id];
        cp.end_cycle + cp.delay
    }

    /// An undefined gate (`None`) is always done.
    pub fn done(&self, id: Option<CheckpointId>, curr_cycle: Cycle) -> bool {
        match id {
            None => true,
            Some(id) => self.checkpoints[id].done(curr_cycle),
        }
    }

    /// No checkpoint has over-completed.
    pub fn sanity_check(&self) -> bool {
        self.checkpoints.iter().all(|c| c.dep_completed <= c.dep_total)
    }

    pub fn all_complete(&self) -> bool {
        self.checkpoints.iter().all(Checkpoint::all_deps_complete)
    }

    /// Rewinds every checkpoint's completion count to zero.
    pub fn reset(&mut self) {
        for cp in &mut self.checkpoints {
            cp.dep_completed = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_checkpoint_is_always_done() {
        let tracker = DependencyTracker::default();
        assert!(tracker.done(None, 0));
        assert!(tracker.done(None, 1_000_000));
    }

    #[test]
    fn checkpoint_completes_after_deps_and_delay() {
        let mut tracker = DependencyTracker::default();
        let cp = tracker.create_checkpoint(2, 100);

        assert!(!tracker.done(Some(cp), 10_000));
        tracker.update(cp, 500);
        assert!(!tracker.done(Some(cp), 10_000));
        tracker.update(cp, 700);

        // both deps in, but the delay has not elapsed past end_cycle
        assert_eq!(tracker.end_cycle(cp), 700);
        assert_eq!(tracker.end_cycle_plus_delay(cp), 800);
        assert!(!tracker.done(Some(cp), 799));
        assert!(tracker.done(Some(cp), 800));
    }

    #[test]
    fn end_cycle_keeps_the_maximum() {
        let mut tracker = DependencyTracker::default();
        let cp = tracker.create_checkpoint(2, 0);
        tracker.update(cp, 900);
        tracker.update(cp, 300);
        assert_eq!(tracker.end_cycle(cp), 900);
    }

    #[test]
    fn sanity_check_catches_over_completion() {
        let mut tracker = DependencyTracker::default();
        let cp = tracker.create_checkpoint(1, 0);
        tracker.update(cp, 1);
        assert!(tracker.sanity_check());
        assert!(tracker.all_complete());
        tracker.update(cp, 2);
        assert!(!tracker.sanity_check());
    }

    #[test]
    fn reset_rewinds_completion_counts() {
        let mut tracker = DependencyTracker::default();
        let cp = tracker.create_checkpoint(1, 0);
        tracker.update(cp, 42);
        assert!(tracker.all_complete());
        tracker.reset();
        assert!(!tracker.all_complete());
        // completion cycle survives reset; only the dep count rewinds
        assert_eq!(tracker.end_cycle(cp), 42);
    }
}
