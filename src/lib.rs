/*!
 * Per-CPU Preemptive Scheduler
 *
 * Round-robin process frames with intra-process thread picking, a priority
 * epoch discipline, a reentrant pause gate, and an interrupt-safe tick
 * handler. The context-switch primitive and the timer source are seams the
 * embedder plugs in.
 */

pub mod core;
pub mod cpu;
pub mod process;
pub mod sched;
pub mod timer;

pub use crate::core::errors::SchedulerError;
pub use crate::core::types::{BasePriority, CpuId, Pid, SchedResult, Ticks, Tid};
pub use crate::cpu::{CpuContext, CpuTable};
pub use crate::process::{ProcFlags, Process, Thread, ThreadState};
pub use crate::sched::{
    ContextSwitch, Discipline, FrameId, NoopSwitch, PenaltyPolicy, SchedFlags, SchedStats,
    Scheduler, StepPenalty, UsageLevel,
};
pub use crate::timer::TickDriver;
