/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheduler-related errors with serialization support
///
/// Every variant is a *local* failure: it is returned to the immediate caller
/// and never logged or escalated by the core itself. Conditions that indicate
/// a bug in calling code (yield into a paused scheduler, context switch from
/// interrupt context) are asserted, not represented here.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SchedulerError {
    #[error("Process {0} not found in scheduler")]
    #[diagnostic(
        code(sched::process_not_found),
        help("The process was never admitted or has already been removed. Treat as already-removed during teardown races.")
    )]
    ProcessNotFound(u32),

    #[error("Frame not present in queue")]
    #[diagnostic(
        code(sched::frame_not_found),
        help("The target frame was removed by another path. Callers must tolerate this.")
    )]
    FrameNotFound,

    #[error("Scheduler has not been started")]
    #[diagnostic(
        code(sched::not_started),
        help("Admission requires a started scheduler. Call start() first.")
    )]
    NotStarted,

    #[error("Scheduler is not paused")]
    #[diagnostic(
        code(sched::not_paused),
        help("resume() past the zero point is a no-op, not an error in the caller's control flow.")
    )]
    NotPaused,

    #[error("Cannot remove the kernel bootstrap process")]
    #[diagnostic(
        code(sched::bootstrap_process),
        help("The bootstrap kernel process stays admitted for the lifetime of its CPU.")
    )]
    BootstrapProcess,

    #[error("Inside a critical section, context switch deferred")]
    #[diagnostic(
        code(sched::in_critical_section),
        help("Retry at the next safe point; the reschedule request stays pending.")
    )]
    InCriticalSection,

    #[error("Process {0} has no schedulable thread")]
    #[diagnostic(
        code(sched::process_exhausted),
        help("Every runnable and fallback thread of the process is blocked, stopped or dead.")
    )]
    ProcessExhausted(u32),

    #[error("Scheduler already initialized for CPU {0}")]
    #[diagnostic(
        code(sched::cpu_already_initialized),
        help("init is tied to CPU bring-up; tear the CPU down before re-initializing.")
    )]
    CpuAlreadyInitialized(u32),

    #[error("No scheduler initialized for CPU {0}")]
    #[diagnostic(
        code(sched::cpu_not_initialized),
        help("Look up schedulers only for CPUs that completed bring-up.")
    )]
    CpuNotInitialized(u32),

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(sched::invalid_argument))]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::ProcessNotFound(7);
        assert_eq!(err.to_string(), "Process 7 not found in scheduler");
    }
}
