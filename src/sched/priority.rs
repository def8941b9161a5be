/*!
 * Priority Epochs
 * Effective-priority buckets with active/inactive queue swap, and the
 * pluggable penalty feedback policy
 */

use crate::core::types::{EffectivePriority, Pid, Tid, PRIORITY_LEVELS, PRIORITY_SLOPE};
use crate::process::Thread;
use std::collections::VecDeque;
use std::sync::Arc;

/// Feedback function for `priority_penalty`
///
/// The contract: CPU-hog threads trend toward lower effective priority,
/// I/O-bound threads trend toward higher, both bounded so the effective
/// value stays inside `[0, PRIORITY_MAX]`. The exact step sizes are a tuning
/// knob, which is why this is a trait and not a pair of constants.
pub trait PenaltyPolicy: Send + Sync {
    /// New penalty after the thread burned its whole timeslice
    fn on_quantum_exhausted(&self, penalty: u16) -> u16;

    /// New penalty after the thread yielded with slice time left
    fn on_early_yield(&self, penalty: u16) -> u16;
}

/// Default feedback: fixed step up on exhaustion, larger step down on yield
///
/// The penalty is capped at one slope unit, so feedback can demote a thread
/// by at most one effective level below its base priority.
#[derive(Debug, Clone, Copy)]
pub struct StepPenalty {
    pub exhaust_step: u16,
    pub yield_step: u16,
}

impl Default for StepPenalty {
    fn default() -> Self {
        Self {
            exhaust_step: 0x40,
            yield_step: 0x80,
        }
    }
}

impl PenaltyPolicy for StepPenalty {
    fn on_quantum_exhausted(&self, penalty: u16) -> u16 {
        (penalty.saturating_add(self.exhaust_step)).min(PRIORITY_SLOPE)
    }

    fn on_early_yield(&self, penalty: u16) -> u16 {
        penalty.saturating_sub(self.yield_step)
    }
}

/// Bucket index for an effective priority value
#[inline]
fn bucket_of(effective: EffectivePriority) -> usize {
    ((effective / PRIORITY_SLOPE) as usize).min(PRIORITY_LEVELS - 1)
}

type Bucket = VecDeque<Arc<Thread>>;

fn empty_side() -> [Bucket; PRIORITY_LEVELS] {
    Default::default()
}

/// Two priority-indexed queue arrays: active (being drained) and inactive
/// (filling up for the next epoch)
///
/// Threads that exhaust their epoch timeslice move from active to inactive
/// at their current effective-priority bucket; when the active side drains,
/// the sides swap in O(1) and a new epoch begins. Picking is strict
/// priority-then-FIFO over the active side.
pub struct PriorityQueueSet {
    sides: [[Bucket; PRIORITY_LEVELS]; 2],
    active: usize,
    len: usize,
    epoch: u64,
}

impl PriorityQueueSet {
    pub fn new() -> Self {
        Self {
            sides: [empty_side(), empty_side()],
            active: 0,
            len: 0,
            epoch: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Completed epochs so far
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Admit a thread mid-epoch; it waits on the inactive side until the
    /// next epoch starts (or the active side drains, whichever is first)
    pub fn insert(&mut self, thread: Arc<Thread>) {
        let bucket = bucket_of(thread.effective_priority());
        self.sides[1 - self.active][bucket].push_back(thread);
        self.len += 1;
    }

    /// Put a thread with remaining slice entitlement back on the active side
    pub fn enqueue_active(&mut self, thread: Arc<Thread>) {
        let bucket = bucket_of(thread.effective_priority());
        self.sides[self.active][bucket].push_back(thread);
        self.len += 1;
    }

    /// Retire a thread whose epoch timeslice is spent: its slice counter
    /// resets and it waits on the inactive side at its current bucket
    pub fn expire(&mut self, thread: Arc<Thread>) {
        thread.reset_slice();
        let bucket = bucket_of(thread.effective_priority());
        self.sides[1 - self.active][bucket].push_back(thread);
        self.len += 1;
    }

    /// Pop the FIFO head of the highest non-empty active bucket
    ///
    /// Swaps the sides (starting a new epoch) when the active side is empty.
    pub fn pick(&mut self) -> Option<Arc<Thread>> {
        if self.len == 0 {
            return None;
        }

        if Self::side_is_empty(&self.sides[self.active]) {
            self.active = 1 - self.active;
            self.epoch += 1;
        }

        let side = &mut self.sides[self.active];
        for bucket in side.iter_mut().rev() {
            if let Some(thread) = bucket.pop_front() {
                self.len -= 1;
                return Some(thread);
            }
        }
        None
    }

    /// Scan-and-unlink by identity from both sides; false when absent
    pub fn remove(&mut self, tid: Tid) -> bool {
        for side in self.sides.iter_mut() {
            for bucket in side.iter_mut() {
                if let Some(pos) = bucket.iter().position(|t| t.tid() == tid) {
                    bucket.remove(pos);
                    self.len -= 1;
                    return true;
                }
            }
        }
        false
    }

    /// Unlink every queued thread of one process; returns how many went
    pub fn remove_process(&mut self, pid: Pid) -> usize {
        let mut removed = 0;
        for side in self.sides.iter_mut() {
            for bucket in side.iter_mut() {
                bucket.retain(|t| {
                    let belongs = t.process().is_some_and(|p| p.pid() == pid);
                    if belongs {
                        removed += 1;
                    }
                    !belongs
                });
            }
        }
        self.len -= removed;
        removed
    }

    /// Re-place every queued thread at its current effective-priority bucket
    ///
    /// Order within a side is preserved highest-bucket-first. Used after an
    /// external priority change touched threads that sit queued.
    pub fn rebucket(&mut self) {
        for side in self.sides.iter_mut() {
            let mut drained = Vec::new();
            for bucket in side.iter_mut().rev() {
                drained.extend(bucket.drain(..));
            }
            for thread in drained {
                let bucket = bucket_of(thread.effective_priority());
                side[bucket].push_back(thread);
            }
        }
    }

    /// Queued threads, highest active bucket first
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        let mut out = Vec::with_capacity(self.len);
        for side in [self.active, 1 - self.active] {
            for bucket in self.sides[side].iter().rev() {
                out.extend(bucket.iter().cloned());
            }
        }
        out
    }

    fn side_is_empty(side: &[Bucket; PRIORITY_LEVELS]) -> bool {
        side.iter().all(|bucket| bucket.is_empty())
    }
}

impl Default for PriorityQueueSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BasePriority, PENALTY_WEIGHT, PRIORITY_MAX};
    use crate::process::{ProcFlags, Process, ThreadState};

    fn thread_with_priority(proc: &Arc<Process>, level: u8) -> Arc<Thread> {
        let t = proc.spawn_thread(format!("prio{level}"), BasePriority::from_level(level));
        t.set_state(ThreadState::Runnable);
        t
    }

    #[test]
    fn test_bucket_mapping() {
        assert_eq!(bucket_of(0), 0);
        assert_eq!(bucket_of(PRIORITY_SLOPE - 1), 0);
        assert_eq!(bucket_of(PRIORITY_SLOPE), 1);
        assert_eq!(bucket_of(PRIORITY_MAX), PRIORITY_LEVELS - 1);
    }

    #[test]
    fn test_strict_priority_then_fifo() {
        let proc = Process::new(1, "p", ProcFlags::empty());
        let high = thread_with_priority(&proc, 7);
        let mid_a = thread_with_priority(&proc, 3);
        let mid_b = thread_with_priority(&proc, 3);
        let low = thread_with_priority(&proc, 0);

        let mut set = PriorityQueueSet::new();
        for t in [&low, &mid_a, &high, &mid_b] {
            set.insert(Arc::clone(t));
        }

        assert_eq!(set.pick().unwrap().tid(), high.tid());
        assert_eq!(set.pick().unwrap().tid(), mid_a.tid());
        assert_eq!(set.pick().unwrap().tid(), mid_b.tid());
        assert_eq!(set.pick().unwrap().tid(), low.tid());
        assert!(set.pick().is_none());
    }

    #[test]
    fn test_epoch_swap_when_active_drains() {
        let proc = Process::new(2, "p", ProcFlags::empty());
        let a = thread_with_priority(&proc, 4);
        let b = thread_with_priority(&proc, 4);

        let mut set = PriorityQueueSet::new();
        set.insert(Arc::clone(&a));
        set.insert(Arc::clone(&b));

        // First pick swaps onto the freshly filled side
        assert_eq!(set.epoch(), 0);
        let first = set.pick().unwrap();
        assert_eq!(set.epoch(), 1);

        // Expired threads wait out the rest of the epoch on the inactive side
        set.expire(first);
        let second = set.pick().unwrap();
        assert_ne!(second.tid(), set.pick().map(|t| t.tid()).unwrap_or(0));
    }

    #[test]
    fn test_expire_resets_slice() {
        let proc = Process::new(3, "p", ProcFlags::empty());
        let t = thread_with_priority(&proc, 4);
        t.set_ticks_max(1);
        t.tick();
        assert!(t.ticks_elapsed() > 0);

        let mut set = PriorityQueueSet::new();
        set.expire(Arc::clone(&t));
        assert_eq!(t.ticks_elapsed(), 0);
    }

    #[test]
    fn test_remove_by_identity() {
        let proc = Process::new(4, "p", ProcFlags::empty());
        let a = thread_with_priority(&proc, 5);
        let b = thread_with_priority(&proc, 5);

        let mut set = PriorityQueueSet::new();
        set.insert(Arc::clone(&a));
        set.expire(Arc::clone(&b));

        assert!(set.remove(a.tid()));
        assert!(set.remove(b.tid()));
        assert!(!set.remove(a.tid()));
        assert!(set.is_empty());
    }

    #[test]
    fn test_rebucket_follows_priority_change() {
        let proc = Process::new(6, "p", ProcFlags::empty());
        let low = thread_with_priority(&proc, 0);
        let mid = thread_with_priority(&proc, 3);

        let mut set = PriorityQueueSet::new();
        set.insert(Arc::clone(&low));
        set.insert(Arc::clone(&mid));

        // A promotion while queued only takes effect after re-bucketing
        low.set_base_priority(BasePriority::Highest);
        low.recompute_effective_priority();
        set.rebucket();

        assert_eq!(set.pick().unwrap().tid(), low.tid());
        assert_eq!(set.pick().unwrap().tid(), mid.tid());
    }

    #[test]
    fn test_penalty_lowers_bucket() {
        let proc = Process::new(5, "p", ProcFlags::empty());
        let t = thread_with_priority(&proc, 7);
        let before = bucket_of(t.effective_priority());

        // Enough exhaustion feedback to drop one full level
        t.set_priority_penalty(PRIORITY_SLOPE / PENALTY_WEIGHT + 1);
        t.recompute_effective_priority();
        assert!(bucket_of(t.effective_priority()) < before);
    }

    #[test]
    fn test_step_penalty_bounds() {
        let policy = StepPenalty::default();
        let mut penalty = 0u16;
        for _ in 0..10_000 {
            penalty = policy.on_quantum_exhausted(penalty);
        }
        assert_eq!(penalty, PRIORITY_SLOPE);

        penalty = policy.on_early_yield(penalty);
        assert!(penalty < PRIORITY_SLOPE);
        for _ in 0..10_000 {
            penalty = policy.on_early_yield(penalty);
        }
        assert_eq!(penalty, 0);
    }
}
