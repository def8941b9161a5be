/*!
 * Tick Driver
 * Background task standing in for the timer interrupt source
 */

use crate::core::errors::SchedulerError;
use crate::core::types::SchedResult;
use crate::sched::Scheduler;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Control messages for the tick driver
#[derive(Debug, Clone)]
pub enum TickCommand {
    /// Change the tick period (microseconds)
    UpdatePeriod(u64),
    /// Stop delivering ticks
    Pause,
    /// Resume delivering ticks
    Resume,
    /// Deliver one tick immediately
    Trigger,
    /// Shut the driver down
    Shutdown,
}

/// Handle to the background tick source of one scheduler
///
/// Each tick runs the scheduler's tick handler inside an interrupt-context
/// marker, the same way a hardware timer interrupt would arrive.
pub struct TickDriver {
    command_tx: mpsc::UnboundedSender<TickCommand>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TickDriver {
    /// Spawn a driver ticking the scheduler at the given period
    pub fn spawn(scheduler: Arc<Scheduler>, period_micros: u64) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let cpu = scheduler.cpu();
        let handle = tokio::spawn(async move {
            run_tick_loop(scheduler, period_micros, command_rx).await;
        });

        info!("Tick driver spawned for CPU {} ({}us period)", cpu, period_micros);

        Self {
            command_tx,
            handle: Some(handle),
        }
    }

    /// Change the tick period; takes effect at the next tick
    pub fn update_period(&self, period_micros: u64) -> SchedResult<()> {
        if period_micros == 0 {
            return Err(SchedulerError::InvalidArgument(
                "tick period must be non-zero".into(),
            ));
        }
        let _ = self.command_tx.send(TickCommand::UpdatePeriod(period_micros));
        Ok(())
    }

    /// Stop delivering ticks; the scheduler itself stays untouched
    pub fn pause(&self) {
        let _ = self.command_tx.send(TickCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.command_tx.send(TickCommand::Resume);
    }

    /// Deliver one tick out of band
    pub fn trigger(&self) {
        let _ = self.command_tx.send(TickCommand::Trigger);
    }

    /// Shut down gracefully, waiting for the loop to exit
    pub async fn shutdown(mut self) {
        let _ = self.command_tx.send(TickCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Tick driver shutdown error: {}", e);
            } else {
                info!("Tick driver shutdown complete");
            }
        }
    }
}

async fn run_tick_loop(
    scheduler: Arc<Scheduler>,
    period_micros: u64,
    mut command_rx: mpsc::UnboundedReceiver<TickCommand>,
) {
    let mut active = true;
    let mut interval = tokio::time::interval(Duration::from_micros(period_micros));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        "Tick loop started for CPU {} with {}us period",
        scheduler.cpu(),
        period_micros
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if active {
                    deliver_tick(&scheduler);
                }
            }

            Some(cmd) = command_rx.recv() => {
                match cmd {
                    TickCommand::UpdatePeriod(micros) => {
                        info!("Tick period updated: {}us", micros);
                        interval = tokio::time::interval(Duration::from_micros(micros));
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    }

                    TickCommand::Pause => {
                        info!("Tick driver paused");
                        active = false;
                    }

                    TickCommand::Resume => {
                        info!("Tick driver resumed");
                        active = true;
                    }

                    TickCommand::Trigger => {
                        deliver_tick(&scheduler);
                        log::trace!("Manual tick trigger");
                    }

                    TickCommand::Shutdown => {
                        info!("Tick driver shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn deliver_tick(scheduler: &Arc<Scheduler>) {
    // Ticks arrive in interrupt context; switches wait for a safe point
    let _irq = scheduler.cpu_context().enter_interrupt();
    scheduler.tick();
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        // Attempt graceful shutdown if handle still exists
        if self.handle.is_some() {
            let _ = self.command_tx.send(TickCommand::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{Discipline, NoopSwitch};

    fn scheduler() -> Arc<Scheduler> {
        let sched = Arc::new(Scheduler::new(0, Discipline::RoundRobin, Arc::new(NoopSwitch)));
        sched.start();
        sched
    }

    #[tokio::test]
    async fn test_driver_lifecycle() {
        let sched = scheduler();
        let driver = TickDriver::spawn(Arc::clone(&sched), 1_000);

        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.shutdown().await;

        assert!(sched.stats().ticks > 0);
    }

    #[tokio::test]
    async fn test_pause_stops_tick_delivery() {
        let sched = scheduler();
        let driver = TickDriver::spawn(Arc::clone(&sched), 1_000);

        driver.pause();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let paused_at = sched.stats().ticks;

        tokio::time::sleep(Duration::from_millis(10)).await;
        // A stray tick may have raced the pause command, nothing more
        assert!(sched.stats().ticks <= paused_at + 1);

        driver.resume();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sched.stats().ticks > paused_at);

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let sched = scheduler();
        let driver = TickDriver::spawn(Arc::clone(&sched), 1_000_000);

        driver.trigger();
        driver.trigger();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // The long interval fires once at spawn; the rest are ours
        assert!(sched.stats().ticks >= 2);

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let sched = scheduler();
        let driver = TickDriver::spawn(Arc::clone(&sched), 1_000);

        assert!(driver.update_period(0).is_err());
        assert!(driver.update_period(500).is_ok());

        driver.shutdown().await;
    }
}
