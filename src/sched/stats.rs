/*!
 * Lock-Free Scheduler Statistics
 * Atomic counters for zero-contention tracking in the tick hot path
 */

use super::Discipline;
use crate::core::types::Ticks;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of scheduler activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedStats {
    /// Timer ticks delivered to the tick handler
    pub ticks: u64,
    /// Times the reschedule-request flag was raised
    pub reschedule_requests: u64,
    /// Epoch quantum expiries that forced the next process or epoch in
    pub preemptions: u64,
    /// Completed hand-offs to the context-switch primitive
    pub context_switches: u64,
    /// Processes currently admitted
    pub active_processes: usize,
    pub discipline: Discipline,
    pub epoch_ticks: Ticks,
}

/// Atomic scheduler statistics for lock-free updates
///
/// # Performance
/// - Cache-line aligned to prevent false sharing with the flag word
/// - All counter updates use relaxed ordering
#[repr(C, align(64))]
pub(super) struct AtomicSchedStats {
    ticks: AtomicU64,
    reschedule_requests: AtomicU64,
    preemptions: AtomicU64,
    context_switches: AtomicU64,
    active_processes: AtomicUsize,
    discipline: Discipline,
    epoch_ticks: parking_lot::RwLock<Ticks>,
}

impl AtomicSchedStats {
    pub fn new(discipline: Discipline, epoch_ticks: Ticks) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            reschedule_requests: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            active_processes: AtomicUsize::new(0),
            discipline,
            epoch_ticks: parking_lot::RwLock::new(epoch_ticks),
        }
    }

    /// Hot path - called on every timer interrupt
    #[inline(always)]
    pub fn inc_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_reschedule_requests(&self) {
        self.reschedule_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_preemptions(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_context_switches(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_active(&self) {
        self.active_processes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn dec_active(&self) {
        self.active_processes.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_epoch_ticks(&self, ticks: Ticks) {
        *self.epoch_ticks.write() = ticks;
    }

    /// Counters may be mutually inconsistent under concurrent updates;
    /// each individual value is accurate, which is enough for monitoring.
    pub fn snapshot(&self) -> SchedStats {
        SchedStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            reschedule_requests: self.reschedule_requests.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            active_processes: self.active_processes.load(Ordering::Relaxed),
            discipline: self.discipline,
            epoch_ticks: *self.epoch_ticks.read(),
        }
    }
}
