/*!
 * Per-CPU Context
 * Interrupt/critical-section nesting and the CPU-identity-keyed scheduler table
 */

use crate::core::errors::SchedulerError;
use crate::core::types::{CpuId, SchedResult};
use crate::sched::{ContextSwitch, Discipline, Scheduler};
use dashmap::DashMap;
use log::info;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Execution context of one CPU, tracked by nesting counters
///
/// The scheduler consults this to decide whether a context switch may happen
/// right now (a safe point) or must be deferred. Nesting is expressed through
/// RAII guards instead of manual depth bookkeeping at every call site.
#[derive(Debug, Default)]
pub struct CpuContext {
    interrupt_depth: AtomicU32,
    critical_depth: AtomicU32,
}

impl CpuContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True while any interrupt handler is on the stack
    #[inline(always)]
    pub fn in_interrupt(&self) -> bool {
        self.interrupt_depth.load(Ordering::Relaxed) > 0
    }

    /// True while any critical section is held
    #[inline(always)]
    pub fn in_critical_section(&self) -> bool {
        self.critical_depth.load(Ordering::Relaxed) > 0
    }

    /// Mark entry into interrupt context; exit happens on guard drop
    pub fn enter_interrupt(&self) -> InterruptGuard<'_> {
        self.interrupt_depth.fetch_add(1, Ordering::Relaxed);
        InterruptGuard { ctx: self }
    }

    /// Open a critical section; closes on guard drop
    pub fn critical_section(&self) -> CriticalGuard<'_> {
        self.critical_depth.fetch_add(1, Ordering::Relaxed);
        CriticalGuard { ctx: self }
    }
}

/// RAII marker for interrupt context
pub struct InterruptGuard<'a> {
    ctx: &'a CpuContext,
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.ctx.interrupt_depth.fetch_sub(1, Ordering::Relaxed);
    }
}

/// RAII marker for a critical section
pub struct CriticalGuard<'a> {
    ctx: &'a CpuContext,
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        self.ctx.critical_depth.fetch_sub(1, Ordering::Relaxed);
    }
}

/// CPU-identity-keyed table of scheduler instances
///
/// One scheduler per CPU, created at bring-up and dropped at bring-down.
/// There is deliberately no global singleton; the embedder owns the table.
pub struct CpuTable {
    schedulers: DashMap<CpuId, Arc<Scheduler>>,
}

impl CpuTable {
    pub fn new() -> Self {
        Self {
            schedulers: DashMap::new(),
        }
    }

    /// Bring up a CPU's scheduler
    pub fn init_cpu(
        &self,
        cpu: CpuId,
        discipline: Discipline,
        switcher: Arc<dyn ContextSwitch>,
    ) -> SchedResult<Arc<Scheduler>> {
        if self.schedulers.contains_key(&cpu) {
            return Err(SchedulerError::CpuAlreadyInitialized(cpu));
        }

        let scheduler = Arc::new(Scheduler::new(cpu, discipline, switcher));
        self.schedulers.insert(cpu, Arc::clone(&scheduler));
        info!("Scheduler initialized for CPU {} ({:?})", cpu, discipline);
        Ok(scheduler)
    }

    /// Scheduler for a CPU that completed bring-up
    pub fn get(&self, cpu: CpuId) -> SchedResult<Arc<Scheduler>> {
        self.schedulers
            .get(&cpu)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SchedulerError::CpuNotInitialized(cpu))
    }

    /// Tear down a CPU's scheduler at bring-down
    pub fn teardown_cpu(&self, cpu: CpuId) -> SchedResult<()> {
        match self.schedulers.remove(&cpu) {
            Some(_) => {
                info!("Scheduler torn down for CPU {}", cpu);
                Ok(())
            }
            None => Err(SchedulerError::CpuNotInitialized(cpu)),
        }
    }

    pub fn cpu_count(&self) -> usize {
        self.schedulers.len()
    }
}

impl Default for CpuTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::NoopSwitch;

    #[test]
    fn test_nesting_guards() {
        let ctx = CpuContext::new();
        assert!(!ctx.in_interrupt());

        {
            let _outer = ctx.enter_interrupt();
            let _inner = ctx.enter_interrupt();
            assert!(ctx.in_interrupt());
        }
        assert!(!ctx.in_interrupt());

        {
            let _cs = ctx.critical_section();
            assert!(ctx.in_critical_section());
        }
        assert!(!ctx.in_critical_section());
    }

    #[test]
    fn test_cpu_table_lifecycle() {
        let table = CpuTable::new();
        let switcher = Arc::new(NoopSwitch);

        table
            .init_cpu(0, Discipline::RoundRobin, switcher.clone())
            .unwrap();
        assert_eq!(table.cpu_count(), 1);

        // Double bring-up is refused
        assert!(matches!(
            table.init_cpu(0, Discipline::RoundRobin, switcher),
            Err(SchedulerError::CpuAlreadyInitialized(0))
        ));

        assert!(table.get(0).is_ok());
        assert!(matches!(
            table.get(1),
            Err(SchedulerError::CpuNotInitialized(1))
        ));

        table.teardown_cpu(0).unwrap();
        assert_eq!(
            table.teardown_cpu(0).unwrap_err(),
            SchedulerError::CpuNotInitialized(0)
        );
    }
}
