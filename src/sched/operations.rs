/*!
 * Scheduler Operations
 * Admission, removal, the tick handler, and safe-point context switching
 */

use super::{picker, Discipline, ProcessFrame, SchedCore, SchedFlags, Scheduler};
use crate::core::errors::SchedulerError;
use crate::core::types::{BasePriority, Pid, SchedResult, Ticks};
use crate::process::{ProcFlags, Process, Thread, ThreadState};
use log::{info, trace};
use std::sync::Arc;

impl Scheduler {
    /// Admit a process for scheduling on this CPU
    ///
    /// Round-robin admission appends a fresh frame at the back of the queue;
    /// priority-epoch admission enqueues the process's schedulable threads on
    /// the inactive side, so they wait out the current epoch. If nothing was
    /// scheduled yet the new arrival is picked immediately.
    pub fn add_process(&self, proc: Arc<Process>) -> SchedResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotStarted);
        }
        if !proc.is_schedulable() {
            return Err(SchedulerError::ProcessExhausted(proc.pid()));
        }

        let _pause = self.pause();
        let mut core = self.core.lock();

        match self.discipline {
            Discipline::RoundRobin => {
                let epoch = core.epoch_ticks;
                core.frames
                    .push_back(ProcessFrame::new(Arc::clone(&proc), epoch));
            }
            Discipline::PriorityEpoch => {
                for index in 0..proc.thread_count() {
                    if let Some(thread) = proc.thread_at(index) {
                        if thread.is_schedulable() {
                            core.priorities.insert(thread);
                        }
                    }
                }
            }
        }

        self.stats.inc_active();
        info!(
            "Process {} ({}) admitted on CPU {}",
            proc.pid(),
            proc.name(),
            self.cpu()
        );

        if self.current_thread().is_none() {
            if let Some(next) = self.pick(&mut core) {
                self.dispatch(next);
                self.raise_reschedule();
            }
        }
        Ok(())
    }

    /// Admit a process directly behind the one currently at the front
    ///
    /// With `reschedule` the front frame's remaining quantum is zeroed and a
    /// scheduler yield runs once the pause gate is released, so the new
    /// process takes over at the very next decision. Callers must not hold
    /// their own pause when asking for the reschedule.
    pub fn add_priority_process(&self, proc: Arc<Process>, reschedule: bool) -> SchedResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotStarted);
        }
        if !proc.is_schedulable() {
            return Err(SchedulerError::ProcessExhausted(proc.pid()));
        }

        {
            let _pause = self.pause();
            let mut core = self.core.lock();

            match self.discipline {
                Discipline::RoundRobin => {
                    let epoch = core.epoch_ticks;
                    let frame = ProcessFrame::new(Arc::clone(&proc), epoch);
                    match core.frames.front_id() {
                        Some(front) => {
                            core.frames.insert_behind(front, frame)?;
                        }
                        None => {
                            core.frames.push_back(frame);
                        }
                    }
                    if reschedule {
                        if let Some(front) = core.frames.front_mut() {
                            front.ticks_left = 0;
                        }
                    }
                }
                Discipline::PriorityEpoch => {
                    // Jump the epoch: straight onto the active side
                    for index in 0..proc.thread_count() {
                        if let Some(thread) = proc.thread_at(index) {
                            if thread.is_schedulable() {
                                core.priorities.enqueue_active(thread);
                            }
                        }
                    }
                }
            }

            self.stats.inc_active();
            info!(
                "Process {} ({}) admitted with priority on CPU {}",
                proc.pid(),
                proc.name(),
                self.cpu()
            );

            if self.current_thread().is_none() {
                if let Some(next) = self.pick(&mut core) {
                    self.dispatch(next);
                }
            }
            if reschedule {
                self.raise_reschedule();
            }
        }

        if reschedule {
            self.yield_now();
        }
        Ok(())
    }

    /// Withdraw a process from scheduling
    pub fn remove_process(&self, proc: &Arc<Process>) -> SchedResult<()> {
        self.remove_process_by_id(proc.pid())
    }

    /// Withdraw a process by pid
    ///
    /// The bootstrap kernel process is refused. An unknown pid is a reported
    /// failure and the queue is left exactly as it was. Removing the process
    /// that owns the current thread forces an immediate re-pick.
    pub fn remove_process_by_id(&self, pid: Pid) -> SchedResult<()> {
        if let Some(kernel) = self.kernel_proc() {
            if kernel.pid() == pid {
                return Err(SchedulerError::BootstrapProcess);
            }
        }

        let _pause = self.pause();
        let mut core = self.core.lock();

        let current_is_victim = self
            .current_thread()
            .and_then(|t| t.process())
            .is_some_and(|p| p.pid() == pid);

        match self.discipline {
            Discipline::RoundRobin => {
                let id = core
                    .frames
                    .find(|f| f.process().pid() == pid)
                    .ok_or(SchedulerError::ProcessNotFound(pid))?;
                if core
                    .frames
                    .get(id)
                    .is_some_and(|f| f.process().flags().contains(ProcFlags::KERNEL))
                {
                    return Err(SchedulerError::BootstrapProcess);
                }
                core.frames.remove(id)?;
            }
            Discipline::PriorityEpoch => {
                let removed = core.priorities.remove_process(pid);
                if removed == 0 && !current_is_victim {
                    return Err(SchedulerError::ProcessNotFound(pid));
                }
            }
        }

        self.stats.dec_active();
        info!("Process {} removed from CPU {}", pid, self.cpu());

        if current_is_victim {
            match self.pick(&mut core) {
                Some(next) => {
                    self.dispatch(next);
                    self.raise_reschedule();
                }
                None => {
                    self.current.store(None);
                }
            }
        }
        Ok(())
    }

    /// Timer tick entry point; runs in interrupt context and never blocks
    ///
    /// Every early-out is a plain load: not started, paused, nothing
    /// scheduled, or the queue lock is held by thread-context code. A missed
    /// tick costs one quantum of accounting, never correctness.
    pub fn tick(&self) {
        self.stats.inc_ticks();

        if !self.has_flag(SchedFlags::RUNNING) || self.has_flag(SchedFlags::PAUSED) {
            return;
        }
        let current = match self.current_thread() {
            Some(current) => current,
            None => return,
        };
        let mut core = match self.core.try_lock() {
            Some(guard) => guard,
            None => return,
        };

        match self.discipline {
            Discipline::RoundRobin => self.tick_round_robin(&mut core, current),
            Discipline::PriorityEpoch => self.tick_priority_epoch(&mut core, current),
        }
    }

    fn tick_round_robin(&self, core: &mut SchedCore, current: Arc<Thread>) {
        // A blocked or dying current thread cannot wait for a safe point
        if !matches!(current.state(), ThreadState::Running | ThreadState::Runnable) {
            if let Some(next) = Self::pick_from_frames(core) {
                self.dispatch(next);
                self.raise_reschedule();
            }
            return;
        }

        let front_runnable = match core.frames.front() {
            Some(front) => front.process().is_schedulable(),
            None => return,
        };
        if !front_runnable {
            core.frames.rotate();
            if let Some(next) = Self::pick_from_frames(core) {
                self.dispatch(next);
                self.raise_reschedule();
            }
            return;
        }

        if let Some(proc) = current.process() {
            proc.add_tick();
        }

        let quantum_spent = {
            // Front frame exists: the runnability check above resolved it
            let front = match core.frames.front_mut() {
                Some(front) => front,
                None => return,
            };
            front.ticks_left = front.ticks_left.saturating_sub(1);
            front.ticks_left == 0
        };

        if quantum_spent {
            // Epoch quantum burned to the end: feedback, heat, move on
            let penalty = self.penalty.on_quantum_exhausted(current.priority_penalty());
            current.set_priority_penalty(penalty);
            current.recompute_effective_priority();
            current.reset_slice();

            if let Some(id) = core.frames.front_id() {
                if let Some(front) = core.frames.front_mut() {
                    front.usage = front.usage.hotter();
                    front.ticks_left = front.ticks_max;
                }
                // Round-robin: the frame that spent its quantum goes last
                let _ = core.frames.requeue(id);
            }

            match Self::pick_from_frames(core) {
                Some(next) => {
                    self.stats.inc_preemptions();
                    self.dispatch(next);
                    self.raise_reschedule();
                }
                None => panic!("no runnable thread left on CPU {}", self.cpu()),
            }
        } else if current.tick() {
            // Sub-quantum spent: next thread of the same process
            current.reset_slice();
            let next = core.frames.front_mut().and_then(picker::pick_next);
            if let Some(next) = next {
                self.dispatch(next);
                self.raise_reschedule();
            }
        }
    }

    fn tick_priority_epoch(&self, core: &mut SchedCore, current: Arc<Thread>) {
        if self.has_flag(SchedFlags::NEED_REORDER) {
            core.priorities.rebucket();
            self.clear_flag(SchedFlags::NEED_REORDER);
        }

        if !matches!(current.state(), ThreadState::Running | ThreadState::Runnable) {
            if let Some(next) = core.priorities.pick() {
                self.dispatch(next);
                self.raise_reschedule();
            }
            return;
        }

        if let Some(proc) = current.process() {
            proc.add_tick();
        }

        if current.tick() {
            let penalty = self.penalty.on_quantum_exhausted(current.priority_penalty());
            current.set_priority_penalty(penalty);
            current.recompute_effective_priority();

            core.priorities.expire(Arc::clone(&current));
            match core.priorities.pick() {
                Some(next) => {
                    self.stats.inc_preemptions();
                    self.dispatch(next);
                    self.raise_reschedule();
                }
                None => panic!("no runnable thread left on CPU {}", self.cpu()),
            }
        }
    }

    /// Voluntary yield at a safe point
    ///
    /// The yielding thread is rewarded with a penalty reduction, a fresh
    /// scheduling decision is made, and if this CPU is outside interrupt and
    /// critical-section context the switch happens before returning.
    ///
    /// # Panics
    /// Yielding on a scheduler that was never started, or while it is
    /// paused, is a caller bug.
    pub fn yield_now(&self) {
        assert!(
            self.is_running(),
            "yield on CPU {} before scheduler start",
            self.cpu()
        );
        assert!(
            !self.is_paused(),
            "yield on CPU {} while the scheduler is paused",
            self.cpu()
        );

        if let Some(current) = self.current_thread() {
            let penalty = self.penalty.on_early_yield(current.priority_penalty());
            current.set_priority_penalty(penalty);
            current.recompute_effective_priority();
            current.reset_slice();
        }

        {
            let mut core = self.core.lock();
            match self.discipline {
                Discipline::RoundRobin => {
                    if let Some(front) = core.frames.front_mut() {
                        if front.ticks_left == 0 {
                            // Quantum already revoked; the refill waits until
                            // this frame reaches the front again
                            core.frames.rotate();
                        } else {
                            front.usage = front.usage.cooler();
                        }
                    }
                    if let Some(next) = Self::pick_from_frames(&mut core) {
                        self.dispatch(next);
                        self.raise_reschedule();
                    }
                }
                Discipline::PriorityEpoch => {
                    if let Some(current) = self.current_thread() {
                        core.priorities.enqueue_active(current);
                    }
                    if let Some(next) = core.priorities.pick() {
                        self.dispatch(next);
                        self.raise_reschedule();
                    }
                }
            }
        }

        let ctx = self.cpu_context();
        if !ctx.in_interrupt() && !ctx.in_critical_section() {
            let _ = self.try_execute();
        }
    }

    /// Execute the pending scheduling decision, if any
    ///
    /// Demotes the outgoing thread back to `Runnable`, promotes the incoming
    /// one to `Running`, and hands off to the context-switch seam. Inside a
    /// critical section the switch is refused and stays pending.
    ///
    /// # Panics
    /// Calling this from interrupt context is a caller bug; interrupt
    /// handlers raise the reschedule flag and leave.
    pub fn try_execute(&self) -> SchedResult<()> {
        let ctx = self.cpu_context();
        assert!(
            !ctx.in_interrupt(),
            "context switch attempted from interrupt context on CPU {}",
            self.cpu()
        );
        if ctx.in_critical_section() {
            return Err(SchedulerError::InCriticalSection);
        }

        self.clear_flag(SchedFlags::RESCHEDULE);

        let next = match self.current_thread() {
            Some(next) => next,
            None => return Ok(()),
        };
        // The outgoing thread was already demoted when it was swapped out
        let previous = self.previous_thread();
        next.set_state(ThreadState::Running);

        self.switcher.switch(previous.as_deref(), &next);
        self.stats.inc_context_switches();
        trace!("CPU {} switched to thread {}", self.cpu(), next.tid());
        Ok(())
    }

    /// Change a thread's static priority under the pause gate
    ///
    /// The effective priority is recomputed immediately; under the priority
    /// epoch discipline queue placement catches up at the next tick.
    pub fn set_thread_priority(&self, thread: &Thread, priority: BasePriority) {
        let _pause = self.pause();
        thread.set_base_priority(priority);
        thread.recompute_effective_priority();
        if self.discipline == Discipline::PriorityEpoch {
            self.set_flag(SchedFlags::NEED_REORDER);
        }
    }

    /// Remaining epoch quantum of a queued process's frame
    pub fn frame_ticks_left(&self, pid: Pid) -> Option<Ticks> {
        let core = self.core.lock();
        let ticks = core
            .frames
            .iter()
            .find(|f| f.process().pid() == pid)
            .map(|f| f.ticks_left());
        ticks
    }

    /// Pids currently queued, in dequeue order for round-robin
    pub fn queued_pids(&self) -> Vec<Pid> {
        let core = self.core.lock();
        match self.discipline {
            Discipline::RoundRobin => core.frames.iter().map(|f| f.process().pid()).collect(),
            Discipline::PriorityEpoch => {
                let mut pids: Vec<Pid> = core
                    .priorities
                    .threads()
                    .iter()
                    .filter_map(|t| t.process().map(|p| p.pid()))
                    .collect();
                pids.dedup();
                pids
            }
        }
    }

    fn pick(&self, core: &mut SchedCore) -> Option<Arc<Thread>> {
        match self.discipline {
            Discipline::RoundRobin => Self::pick_from_frames(core),
            Discipline::PriorityEpoch => core.priorities.pick(),
        }
    }

    /// Frame-queue scheduling decision
    ///
    /// Two passes over the queue: the first skips idle-designated processes
    /// so real work always wins, the second accepts them as the fallback.
    /// A front frame whose quantum was revoked earlier gets its refill here,
    /// on arrival at the front.
    fn pick_from_frames(core: &mut SchedCore) -> Option<Arc<Thread>> {
        let len = core.frames.len();
        if len == 0 {
            return None;
        }

        for pass in 0..2 {
            for _ in 0..len {
                let skip = {
                    let front = core.frames.front()?;
                    let proc = front.process();
                    !proc.is_schedulable()
                        || (pass == 0 && proc.flags().contains(ProcFlags::IDLE))
                };
                if skip {
                    core.frames.rotate();
                    continue;
                }

                let front = core.frames.front_mut()?;
                if front.ticks_left == 0 {
                    // Quantum was revoked on the way out; restore it now
                    front.ticks_left = front.ticks_max;
                }
                if let Some(thread) = picker::pick_next(front) {
                    return Some(thread);
                }
                core.frames.rotate();
            }
        }
        None
    }

    /// Install the next thread and retire the outgoing one
    ///
    /// The outgoing thread is demoted at swap-out time, not at the safe
    /// point: decisions can stack up between safe points, and `previous`
    /// only remembers the last of them. Deferring the demotion would leave
    /// an earlier swapped-out thread `Running` forever, invisible to the
    /// picker's scan.
    fn dispatch(&self, next: Arc<Thread>) {
        let previous = self.current.swap(Some(Arc::clone(&next)));
        if let Some(prev) = previous {
            if prev.tid() != next.tid() {
                if prev.state() == ThreadState::Running {
                    prev.set_state(ThreadState::Runnable);
                }
                self.previous.store(Some(prev));
            }
        }
    }

    fn raise_reschedule(&self) {
        self.set_flag(SchedFlags::RESCHEDULE);
        self.stats.inc_reschedule_requests();
    }
}
