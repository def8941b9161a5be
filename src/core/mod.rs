/*!
 * Core Module
 * Shared types and the error taxonomy
 */

pub mod errors;
pub mod types;

pub use errors::SchedulerError;
pub use types::{
    BasePriority, CpuId, EffectivePriority, Pid, SchedResult, Ticks, Tid, DEFAULT_EPOCH_TICKS,
    DEFAULT_THREAD_TICKS, PENALTY_WEIGHT, PICKER_EXTRA_LAPS, PRIORITY_LEVELS, PRIORITY_MAX,
    PRIORITY_SLOPE,
};
