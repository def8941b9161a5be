/*!
 * Thread Model
 * The thread lifecycle state machine as observed by the scheduler
 */

use crate::core::types::{
    BasePriority, EffectivePriority, Ticks, Tid, DEFAULT_THREAD_TICKS, PENALTY_WEIGHT,
    PRIORITY_MAX, PRIORITY_SLOPE,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use super::Process;

/// Thread lifecycle states
///
/// The scheduler core performs only the `Runnable -> Running` and
/// `Dying -> Dead` transitions itself; every other transition belongs to
/// lifecycle code running under the pause gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadState {
    Invalid = 0,
    NoContext = 1,
    Runnable = 2,
    Running = 3,
    Sleeping = 4,
    Blocked = 5,
    Stopped = 6,
    Dying = 7,
    Dead = 8,
}

impl ThreadState {
    #[inline]
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::NoContext,
            2 => Self::Runnable,
            3 => Self::Running,
            4 => Self::Sleeping,
            5 => Self::Blocked,
            6 => Self::Stopped,
            7 => Self::Dying,
            8 => Self::Dead,
            _ => Self::Invalid,
        }
    }
}

/// A thread as the scheduler sees it
///
/// Owned by its process; the scheduler only ever holds references and never
/// reclaims the backing memory itself. All scheduler-visible fields are
/// atomics so the tick handler can account without taking locks.
pub struct Thread {
    tid: Tid,
    name: String,
    state: AtomicU8,

    // Sub-quantum accounting inside one process visit
    ticks_elapsed: AtomicU32,
    ticks_max: AtomicU32,

    // Priority model (recomputed on switch-away, never mid-quantum)
    base_priority: AtomicU8,
    priority_penalty: AtomicU16,
    actual_priority: AtomicU16,

    // Weak: the scheduler never keeps a dead process alive
    process: Weak<Process>,
}

impl Thread {
    pub(crate) fn new(
        tid: Tid,
        name: impl Into<String>,
        base_priority: BasePriority,
        process: Weak<Process>,
    ) -> Self {
        let thread = Self {
            tid,
            name: name.into(),
            state: AtomicU8::new(ThreadState::NoContext as u8),
            ticks_elapsed: AtomicU32::new(0),
            ticks_max: AtomicU32::new(DEFAULT_THREAD_TICKS),
            base_priority: AtomicU8::new(base_priority.level()),
            priority_penalty: AtomicU16::new(0),
            actual_priority: AtomicU16::new(0),
            process,
        };
        thread.recompute_effective_priority();
        thread
    }

    /// Stable identity for the thread's lifetime
    #[inline(always)]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning process, if it is still alive
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    #[inline(always)]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the picker may hand this thread to the CPU
    #[inline]
    pub fn is_schedulable(&self) -> bool {
        matches!(self.state(), ThreadState::Runnable | ThreadState::Sleeping)
    }

    pub fn base_priority(&self) -> BasePriority {
        BasePriority::from_level(self.base_priority.load(Ordering::Relaxed))
    }

    /// Change the static priority; callers must hold the pause gate
    pub fn set_base_priority(&self, priority: BasePriority) {
        self.base_priority
            .store(priority.level(), Ordering::Relaxed);
    }

    #[inline]
    pub fn priority_penalty(&self) -> u16 {
        self.priority_penalty.load(Ordering::Relaxed)
    }

    pub(crate) fn set_priority_penalty(&self, penalty: u16) {
        self.priority_penalty.store(penalty, Ordering::Relaxed);
    }

    /// Effective priority as of the last switch-away
    #[inline]
    pub fn effective_priority(&self) -> EffectivePriority {
        self.actual_priority.load(Ordering::Relaxed)
    }

    /// Recompute `actual_priority` from base priority and penalty
    ///
    /// effective = PRIORITY_SLOPE * (base + 1) - PENALTY_WEIGHT * penalty,
    /// clamped into [0, PRIORITY_MAX]. Only called on switch-away so a running
    /// thread never observes its own priority drop mid-quantum.
    pub(crate) fn recompute_effective_priority(&self) -> EffectivePriority {
        let base = self.base_priority.load(Ordering::Relaxed) as i32;
        let penalty = self.priority_penalty.load(Ordering::Relaxed) as i32;
        let raw = PRIORITY_SLOPE as i32 * (base + 1) - PENALTY_WEIGHT as i32 * penalty;
        let clamped = raw.clamp(0, PRIORITY_MAX as i32) as u16;
        self.actual_priority.store(clamped, Ordering::Relaxed);
        clamped
    }

    #[inline(always)]
    pub fn ticks_elapsed(&self) -> Ticks {
        self.ticks_elapsed.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn ticks_max(&self) -> Ticks {
        self.ticks_max.load(Ordering::Relaxed)
    }

    pub fn set_ticks_max(&self, ticks: Ticks) {
        self.ticks_max.store(ticks, Ordering::Relaxed);
    }

    /// Account one tick against the sub-quantum; true when it is spent
    ///
    /// Hot path - called from the tick handler on every timer interrupt.
    #[inline(always)]
    pub(crate) fn tick(&self) -> bool {
        let elapsed = self.ticks_elapsed.fetch_add(1, Ordering::Relaxed) + 1;
        elapsed >= self.ticks_max.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_slice(&self) {
        self.ticks_elapsed.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("base_priority", &self.base_priority())
            .field("effective_priority", &self.effective_priority())
            .finish()
    }
}
