/*!
 * Process Model
 * The process as an external collaborator: thread list, flags, designated threads
 */

mod thread;

pub use thread::{Thread, ThreadState};

use crate::core::types::{BasePriority, Pid, Tid};
use bitflags::bitflags;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

bitflags! {
    /// Scheduler-visible process flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u32 {
        /// Runs directly in the kernel; removal from the scheduler is refused
        const KERNEL = 1 << 0;
        /// Falls back to its idle thread when nothing else is runnable
        const IDLE = 1 << 1;
        /// Has never been scheduled; the first pick returns the init thread
        const NEVER_RUN = 1 << 2;
        /// Marked for death; the tick handler stops scheduling it
        const FINISHED = 1 << 3;
        /// Temporarily withheld from scheduling by external code
        const STALLED = 1 << 4;
    }
}

/// A process as the scheduler sees it
///
/// The scheduler holds shared references to admitted processes but never
/// reaches past the fields below. Thread list mutation from lifecycle code
/// must happen under the owning scheduler's pause gate.
pub struct Process {
    pid: Pid,
    name: String,
    flags: RwLock<ProcFlags>,
    threads: RwLock<Vec<Arc<Thread>>>,
    init_thread: RwLock<Option<Arc<Thread>>>,
    idle_thread: RwLock<Option<Arc<Thread>>>,
    ticks_used: AtomicU64,
    next_tid: AtomicU64,
}

impl Process {
    /// Create a process; `NEVER_RUN` is set until its first scheduling decision
    pub fn new(pid: Pid, name: impl Into<String>, flags: ProcFlags) -> Arc<Self> {
        Arc::new(Self {
            pid,
            name: name.into(),
            flags: RwLock::new(flags | ProcFlags::NEVER_RUN),
            threads: RwLock::new(Vec::new()),
            init_thread: RwLock::new(None),
            idle_thread: RwLock::new(None),
            ticks_used: AtomicU64::new(0),
            next_tid: AtomicU64::new(1),
        })
    }

    #[inline(always)]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> ProcFlags {
        *self.flags.read()
    }

    pub fn insert_flags(&self, flags: ProcFlags) {
        self.flags.write().insert(flags);
    }

    pub fn remove_flags(&self, flags: ProcFlags) {
        self.flags.write().remove(flags);
    }

    /// Whether the scheduler may still hand CPU time to this process
    #[inline]
    pub fn is_schedulable(&self) -> bool {
        !self
            .flags()
            .intersects(ProcFlags::FINISHED | ProcFlags::STALLED)
    }

    /// Spawn a thread into this process's thread list
    ///
    /// The first spawned thread becomes the designated init thread. Threads
    /// start in `NoContext`; whoever prepares the execution context marks
    /// them `Runnable`.
    pub fn spawn_thread(self: &Arc<Self>, name: impl Into<String>, priority: BasePriority) -> Arc<Thread> {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(Thread::new(
            (self.pid as Tid) << 32 | tid,
            name,
            priority,
            Arc::downgrade(self),
        ));

        self.threads.write().push(Arc::clone(&thread));

        let mut init = self.init_thread.write();
        if init.is_none() {
            *init = Some(Arc::clone(&thread));
        }

        thread
    }

    /// Spawn the idle fallback thread (does not join the regular thread list)
    pub fn spawn_idle_thread(self: &Arc<Self>, name: impl Into<String>) -> Arc<Thread> {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(Thread::new(
            (self.pid as Tid) << 32 | tid,
            name,
            BasePriority::Lowest,
            Arc::downgrade(self),
        ));
        *self.idle_thread.write() = Some(Arc::clone(&thread));
        thread
    }

    pub fn init_thread(&self) -> Option<Arc<Thread>> {
        self.init_thread.read().clone()
    }

    pub fn idle_thread(&self) -> Option<Arc<Thread>> {
        self.idle_thread.read().clone()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }

    /// Thread at a list position; positions shift when dead threads are reaped
    pub fn thread_at(&self, index: usize) -> Option<Arc<Thread>> {
        self.threads.read().get(index).cloned()
    }

    /// Unlink a thread from the thread list; false when it was already gone
    pub fn remove_thread(&self, tid: Tid) -> bool {
        let mut threads = self.threads.write();
        match threads.iter().position(|t| t.tid() == tid) {
            Some(pos) => {
                threads.remove(pos);
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    pub fn ticks_used(&self) -> u64 {
        self.ticks_used.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn add_tick(&self) {
        self.ticks_used.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("flags", &self.flags())
            .field("threads", &self.thread_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_thread_becomes_init() {
        let proc = Process::new(1, "init", ProcFlags::empty());
        let a = proc.spawn_thread("a", BasePriority::Mid);
        let _b = proc.spawn_thread("b", BasePriority::Mid);

        assert_eq!(proc.init_thread().unwrap().tid(), a.tid());
        assert_eq!(proc.thread_count(), 2);
    }

    #[test]
    fn test_idle_thread_outside_list() {
        let proc = Process::new(2, "idle", ProcFlags::IDLE);
        let idle = proc.spawn_idle_thread("cpu-idle");

        assert_eq!(proc.thread_count(), 0);
        assert_eq!(proc.idle_thread().unwrap().tid(), idle.tid());
        assert_eq!(idle.base_priority(), BasePriority::Lowest);
    }

    #[test]
    fn test_remove_thread() {
        let proc = Process::new(3, "p", ProcFlags::empty());
        let t = proc.spawn_thread("t", BasePriority::Mid);

        assert!(proc.remove_thread(t.tid()));
        assert!(!proc.remove_thread(t.tid()));
        assert_eq!(proc.thread_count(), 0);
    }

    #[test]
    fn test_never_run_set_at_creation() {
        let proc = Process::new(4, "p", ProcFlags::KERNEL);
        assert!(proc.flags().contains(ProcFlags::NEVER_RUN));
        proc.remove_flags(ProcFlags::NEVER_RUN);
        assert!(!proc.flags().contains(ProcFlags::NEVER_RUN));
    }

    #[test]
    fn test_schedulability_follows_flags() {
        let proc = Process::new(5, "p", ProcFlags::empty());
        assert!(proc.is_schedulable());
        proc.insert_flags(ProcFlags::FINISHED);
        assert!(!proc.is_schedulable());
    }
}
