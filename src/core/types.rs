/*!
 * Core Types
 * Common types and tuning constants used across the scheduler core
 */

/// Process ID type
pub type Pid = u32;

/// Thread ID type
pub type Tid = u64;

/// CPU identity type
pub type CpuId = u32;

/// Tick count type (one tick = one timer interrupt)
pub type Ticks = u32;

/// Effective priority value used for queue placement
pub type EffectivePriority = u16;

/// Common result type for scheduler operations
pub type SchedResult<T> = Result<T, super::errors::SchedulerError>;

/// Number of base priority levels (`Lowest..=Highest`)
pub const PRIORITY_LEVELS: usize = 8;

/// Slope of the effective-priority line: one base level is worth this much
pub const PRIORITY_SLOPE: u16 = 0x1000;

/// Upper clamp for effective priority
pub const PRIORITY_MAX: u16 = 0x8000;

/// Weight of the accumulated penalty in the effective-priority formula
pub const PENALTY_WEIGHT: u16 = 4;

/// Epoch quantum granted to a freshly admitted process frame
pub const DEFAULT_EPOCH_TICKS: Ticks = 4;

/// Sub-quantum granted to a thread inside one process visit
pub const DEFAULT_THREAD_TICKS: Ticks = 2;

/// Extra full laps the thread picker tolerates before reporting exhaustion
pub const PICKER_EXTRA_LAPS: usize = 3;

/// Base (static) thread priority, eight quantized levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum BasePriority {
    Lowest = 0,
    Low = 1,
    NonEssential = 2,
    Mid = 3,
    High = 4,
    Important = 5,
    SuperImportant = 6,
    Highest = 7,
}

impl BasePriority {
    /// Numeric level in `0..=7`
    #[inline(always)]
    pub const fn level(self) -> u8 {
        self as u8
    }

    /// Build from a numeric level, clamping anything above `Highest`
    #[inline]
    pub const fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Lowest,
            1 => Self::Low,
            2 => Self::NonEssential,
            3 => Self::Mid,
            4 => Self::High,
            5 => Self::Important,
            6 => Self::SuperImportant,
            _ => Self::Highest,
        }
    }
}

impl Default for BasePriority {
    fn default() -> Self {
        Self::Mid
    }
}
