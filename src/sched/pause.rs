/*!
 * Pause Gate
 * Reentrant pause/resume gate guarding scheduler queue mutation
 */

use crate::core::errors::SchedulerError;
use crate::core::types::SchedResult;
use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{RawMutex, RawThreadId};
use std::sync::atomic::{AtomicU32, Ordering};

/// The reentrant gate behind `Scheduler::pause`
///
/// A thread-id-aware reentrant mutex plus a depth counter. The mutex is
/// reentrant only for the thread that owns it; a pause from another thread
/// blocks until the owner has resumed all the way out. The depth counter
/// tracks nesting so every pause carries exactly one matching resume
/// obligation, and `is_paused` stays a lock-free query for the tick path.
pub(super) struct PauseGate {
    raw: RawReentrantMutex<RawMutex, RawThreadId>,
    depth: AtomicU32,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            raw: RawReentrantMutex::INIT,
            depth: AtomicU32::new(0),
        }
    }

    /// Enter the gate; true when this call is the outermost pause
    ///
    /// Reentrant on the owning thread, blocking for everyone else.
    pub fn pause(&self) -> bool {
        self.raw.lock();
        self.depth.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Leave the gate; `Ok(true)` when the outermost pause was released
    ///
    /// Resuming past the zero point is a reported no-op, never a
    /// double-unlock.
    pub fn resume(&self) -> SchedResult<bool> {
        if self.depth.load(Ordering::Acquire) == 0 {
            return Err(SchedulerError::NotPaused);
        }
        let released = self.depth.fetch_sub(1, Ordering::AcqRel) == 1;
        // Paired with the lock taken by the matching pause() on this thread
        unsafe { self.raw.unlock() };
        Ok(released)
    }

    #[inline(always)]
    pub fn is_paused(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    #[inline(always)]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reentrant_pause_resume() {
        let gate = PauseGate::new();

        assert!(gate.pause());
        assert!(!gate.pause());
        assert!(!gate.pause());
        assert_eq!(gate.depth(), 3);

        assert_eq!(gate.resume(), Ok(false));
        assert_eq!(gate.resume(), Ok(false));
        assert_eq!(gate.resume(), Ok(true));
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_over_resume_is_reported_noop() {
        let gate = PauseGate::new();
        assert_eq!(gate.resume(), Err(SchedulerError::NotPaused));

        gate.pause();
        assert_eq!(gate.resume(), Ok(true));
        // Past the zero point again
        assert_eq!(gate.resume(), Err(SchedulerError::NotPaused));
    }

    #[test]
    fn test_gate_can_be_retaken_after_full_resume() {
        let gate = PauseGate::new();
        for _ in 0..4 {
            assert!(gate.pause());
            assert_eq!(gate.resume(), Ok(true));
        }
    }

    #[test]
    fn test_pause_from_other_thread_blocks_until_resume() {
        let gate = Arc::new(PauseGate::new());
        assert!(gate.pause());

        let entered = Arc::new(AtomicBool::new(false));
        let handle = {
            let gate = Arc::clone(&gate);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                gate.pause();
                entered.store(true, Ordering::SeqCst);
                gate.resume().unwrap();
            })
        };

        // The other thread must not slip in through a depth fast path
        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        assert_eq!(gate.resume(), Ok(true));
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert!(!gate.is_paused());
    }
}
