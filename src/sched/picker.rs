/*!
 * Thread Picker
 * Intra-process thread selection with lazy dead-thread reclamation
 */

use super::frame::ProcessFrame;
use crate::core::types::PICKER_EXTRA_LAPS;
use crate::process::{ProcFlags, Thread, ThreadState};
use std::sync::Arc;

/// Select the next thread of a frame's process, or report exhaustion (`None`)
///
/// Order of business:
/// 1. A never-run process executes its init thread first, unconditionally.
/// 2. A single-thread process short-circuits: `Running` is demoted back to
///    `Runnable` and picked again.
/// 3. Otherwise a circular scan from `last_thread_index + 1`. `Dead` threads
///    are unlinked (restarting the scan, since indices shift), `Dying`
///    threads become `Dead` in place and are reaped on a later encounter.
/// 4. A bounded number of extra laps smooths transient all-blocked windows;
///    after that the idle thread is the last resort.
pub(super) fn pick_next(frame: &mut ProcessFrame) -> Option<Arc<Thread>> {
    let proc = Arc::clone(frame.process());

    if proc.flags().contains(ProcFlags::NEVER_RUN) {
        proc.remove_flags(ProcFlags::NEVER_RUN);
        frame.last_thread_index = 0;
        // Guarantees every process runs its entry thread exactly once first
        if let Some(init) = proc.init_thread() {
            return Some(init);
        }
    }

    // Outer loop restarts after a dead thread is unlinked
    loop {
        let count = proc.thread_count();
        if count == 0 {
            break;
        }

        if count == 1 {
            let thread = match proc.thread_at(0) {
                Some(t) => t,
                None => break,
            };
            match thread.state() {
                ThreadState::Runnable => {
                    frame.last_thread_index = 0;
                    return Some(thread);
                }
                ThreadState::Running => {
                    // It was this CPU's thread last quantum; run it again
                    thread.set_state(ThreadState::Runnable);
                    frame.last_thread_index = 0;
                    return Some(thread);
                }
                ThreadState::Dying => {
                    thread.set_state(ThreadState::Dead);
                    continue;
                }
                ThreadState::Dead => {
                    proc.remove_thread(thread.tid());
                    continue;
                }
                _ => break,
            }
        }

        let mut index = (frame.last_thread_index + 1) % count;
        let limit = count * (1 + PICKER_EXTRA_LAPS);
        let mut restart = false;

        for _ in 0..limit {
            match proc.thread_at(index) {
                Some(thread) => match thread.state() {
                    ThreadState::Runnable | ThreadState::Sleeping => {
                        frame.last_thread_index = index;
                        return Some(thread);
                    }
                    ThreadState::Dead => {
                        proc.remove_thread(thread.tid());
                        restart = true;
                        break;
                    }
                    ThreadState::Dying => {
                        thread.set_state(ThreadState::Dead);
                    }
                    // Running belongs to this CPU and is re-picked elsewhere;
                    // the rest are simply not schedulable right now
                    _ => {}
                },
                // List shrank underneath the cursor
                None => {
                    restart = true;
                    break;
                }
            }
            index = (index + 1) % count;
        }

        if restart {
            continue;
        }
        break;
    }

    // Bounded laps found nothing; fall back to the idle thread if it can run
    match proc.idle_thread() {
        Some(idle) if matches!(idle.state(), ThreadState::Runnable | ThreadState::Running) => {
            Some(idle)
        }
        _ => None,
    }
}
