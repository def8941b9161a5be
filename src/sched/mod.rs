/*!
 * Scheduler Core
 * Per-CPU preemptive scheduling: frame rotation, thread picking, pause gate
 */

use crate::core::types::{CpuId, Ticks, DEFAULT_EPOCH_TICKS};
use crate::cpu::CpuContext;
use crate::process::{Process, Thread};
use arc_swap::ArcSwapOption;
use bitflags::bitflags;
use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

mod frame;
mod operations;
mod pause;
mod picker;
mod priority;
mod stats;
mod switch;

pub use frame::{FrameId, FrameQueue, ProcessFrame, UsageLevel};
pub use priority::{PenaltyPolicy, PriorityQueueSet, StepPenalty};
pub use stats::SchedStats;
pub use switch::{ContextSwitch, NoopSwitch};

use pause::PauseGate;
use stats::AtomicSchedStats;

bitflags! {
    /// Scheduler state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SchedFlags: u32 {
        /// Set once by `start()`, never cleared
        const RUNNING = 1 << 0;
        /// Mirrors the pause gate for the tick handler's lock-free check
        const PAUSED = 1 << 1;
        /// A scheduling decision is pending a safe point
        const RESCHEDULE = 1 << 2;
        /// The queue order no longer matches effective priorities
        const NEED_REORDER = 1 << 3;
    }
}

/// Which queue structure drives scheduling decisions
///
/// Exactly one discipline is live per scheduler instance, chosen at CPU
/// bring-up. Round-robin over process frames is the default; the priority
/// epoch model schedules threads directly from priority buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discipline {
    RoundRobin,
    PriorityEpoch,
}

pub(crate) struct SchedCore {
    pub(crate) frames: FrameQueue,
    pub(crate) priorities: PriorityQueueSet,
    pub(crate) epoch_ticks: Ticks,
}

/// Per-CPU scheduler
///
/// Owns the queue structure for its discipline, the reentrant pause gate,
/// and the cached current/previous thread pointers. Never shared between
/// CPUs; admission and teardown for a process happen on one scheduler only.
///
/// # Performance
/// - Flags and stats are atomics so the tick handler stays lock-free on its
///   early-out paths
/// - Current/previous pointers swap RCU-style; readers never block the tick
pub struct Scheduler {
    cpu: CpuId,
    discipline: Discipline,
    flags: AtomicU32,
    gate: PauseGate,
    core: Mutex<SchedCore>,
    current: ArcSwapOption<Thread>,
    previous: ArcSwapOption<Thread>,
    kernel_proc: ArcSwapOption<Process>,
    stats: AtomicSchedStats,
    switcher: Arc<dyn ContextSwitch>,
    penalty: Box<dyn PenaltyPolicy>,
    cpu_ctx: Arc<CpuContext>,
}

impl Scheduler {
    /// Create a scheduler for one CPU with the default penalty feedback
    pub fn new(cpu: CpuId, discipline: Discipline, switcher: Arc<dyn ContextSwitch>) -> Self {
        Self::with_penalty_policy(cpu, discipline, switcher, Box::new(StepPenalty::default()))
    }

    /// Create a scheduler with a custom penalty feedback policy
    pub fn with_penalty_policy(
        cpu: CpuId,
        discipline: Discipline,
        switcher: Arc<dyn ContextSwitch>,
        penalty: Box<dyn PenaltyPolicy>,
    ) -> Self {
        Self {
            cpu,
            discipline,
            flags: AtomicU32::new(SchedFlags::empty().bits()),
            gate: PauseGate::new(),
            core: Mutex::new(SchedCore {
                frames: FrameQueue::new(),
                priorities: PriorityQueueSet::new(),
                epoch_ticks: DEFAULT_EPOCH_TICKS,
            }),
            current: ArcSwapOption::const_empty(),
            previous: ArcSwapOption::const_empty(),
            kernel_proc: ArcSwapOption::const_empty(),
            stats: AtomicSchedStats::new(discipline, DEFAULT_EPOCH_TICKS),
            switcher,
            penalty,
            cpu_ctx: CpuContext::new(),
        }
    }

    #[inline(always)]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Execution context of this scheduler's CPU
    pub fn cpu_context(&self) -> &Arc<CpuContext> {
        &self.cpu_ctx
    }

    /// Mark the scheduler as running; set once, never cleared
    pub fn start(&self) {
        if !self.has_flag(SchedFlags::RUNNING) {
            self.set_flag(SchedFlags::RUNNING);
            info!("Scheduler started on CPU {}", self.cpu);
        }
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.has_flag(SchedFlags::RUNNING)
    }

    #[inline(always)]
    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Pause the scheduler; resumed when the guard drops
    ///
    /// Reentrant: nested guards stack, and the tick handler stays inert
    /// until the outermost guard is gone.
    pub fn pause(&self) -> PauseGuard<'_> {
        self.pause_raw();
        PauseGuard { scheduler: self }
    }

    /// Manual pause for callers that cannot hold a guard across their scope
    pub fn pause_raw(&self) {
        if self.gate.pause() {
            self.set_flag(SchedFlags::PAUSED);
        }
    }

    /// Manual resume; over-resuming past the zero point is a reported no-op
    pub fn resume_raw(&self) -> crate::core::types::SchedResult<()> {
        if self.gate.resume()? {
            self.clear_flag(SchedFlags::PAUSED);
        }
        Ok(())
    }

    /// Track the bootstrap kernel process so removal can refuse it
    pub fn set_kernel_proc(&self, proc: Arc<Process>) {
        self.kernel_proc.store(Some(proc));
    }

    pub fn kernel_proc(&self) -> Option<Arc<Process>> {
        self.kernel_proc.load_full()
    }

    /// Thread currently scheduled (or about to run) on this CPU
    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.current.load_full()
    }

    /// Thread scheduled before the last decision
    pub fn previous_thread(&self) -> Option<Arc<Thread>> {
        self.previous.load_full()
    }

    /// Owning process of the current thread
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.current.load_full().and_then(|t| t.process())
    }

    pub fn stats(&self) -> SchedStats {
        self.stats.snapshot()
    }

    /// Epoch quantum handed to frames admitted from now on
    pub fn set_epoch_ticks(&self, ticks: Ticks) {
        let _pause = self.pause();
        self.core.lock().epoch_ticks = ticks;
        self.stats.set_epoch_ticks(ticks);
    }

    pub fn flags(&self) -> SchedFlags {
        SchedFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub(crate) fn has_flag(&self, flag: SchedFlags) -> bool {
        self.flags.load(Ordering::Acquire) & flag.bits() != 0
    }

    #[inline(always)]
    pub(crate) fn set_flag(&self, flag: SchedFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    #[inline(always)]
    pub(crate) fn clear_flag(&self, flag: SchedFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cpu", &self.cpu)
            .field("discipline", &self.discipline)
            .field("flags", &self.flags())
            .field("pause_depth", &self.gate.depth())
            .finish()
    }
}

/// RAII handle for a paused scheduler
///
/// Construction pauses, drop resumes. Nested guards each carry their own
/// resume obligation, giving reentrancy without manual depth bookkeeping.
pub struct PauseGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        // Resume past zero cannot happen through a guard
        let _ = self.scheduler.resume_raw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(0, Discipline::RoundRobin, Arc::new(NoopSwitch))
    }

    #[test]
    fn test_start_is_sticky() {
        let sched = scheduler();
        assert!(!sched.is_running());
        sched.start();
        sched.start();
        assert!(sched.is_running());
    }

    #[test]
    fn test_pause_guard_reentrancy() {
        let sched = scheduler();

        {
            let _outer = sched.pause();
            assert!(sched.has_flag(SchedFlags::PAUSED));
            {
                let _inner = sched.pause();
                assert!(sched.is_paused());
            }
            // Inner guard gone, still paused
            assert!(sched.is_paused());
            assert!(sched.has_flag(SchedFlags::PAUSED));
        }

        assert!(!sched.is_paused());
        assert!(!sched.has_flag(SchedFlags::PAUSED));
    }

    #[test]
    fn test_manual_over_resume_is_reported() {
        let sched = scheduler();
        sched.pause_raw();
        sched.resume_raw().unwrap();
        assert!(sched.resume_raw().is_err());
        assert!(!sched.has_flag(SchedFlags::PAUSED));
    }

    #[test]
    fn test_no_current_thread_before_admission() {
        let sched = scheduler();
        sched.start();
        assert!(sched.current_thread().is_none());
        assert!(sched.current_process().is_none());
    }
}
