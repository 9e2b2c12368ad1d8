use crate::clock::Clock;
use crate::controller::CompressorController;
use crate::hal::CompressorIo;
use crate::watchdog::HardwareWatchdog;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone, Default, Debug)]
pub struct LoopStats {
    pub ticks_executed: u64,
    /// Ticks that took longer than the poll interval.
    pub overruns: u64,
    pub max_tick_us: u64,
    pub pressure_change_faults: u64,
}

impl LoopStats {
    fn record(&mut self, tick: Duration, poll: Duration) {
        self.ticks_executed += 1;
        if tick > poll {
            self.overruns += 1;
        }
        self.max_tick_us = self.max_tick_us.max(tick.as_micros() as u64);
    }
}

/// Run the tick on a dedicated thread, feeding `watchdog` at the start of
/// every iteration. Outputs are released when `stop` is raised.
pub fn spawn_preemptive<IO, C, W>(
    controller: Arc<CompressorController<IO, C>>,
    mut watchdog: W,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<LoopStats>>
where
    IO: CompressorIo + 'static,
    C: Clock + 'static,
    W: HardwareWatchdog + 'static,
{
    thread::Builder::new()
        .name("compressor-tick".into())
        .spawn(move || {
            let mut stats = LoopStats::default();
            if let Err(err) = watchdog.arm() {
                log::error!("cannot arm watchdog: {}", err);
            }
            while !stop.load(Ordering::Relaxed) {
                if let Err(err) = watchdog.feed() {
                    log::error!("watchdog feed failed: {}", err);
                }
                let poll = controller.config().read().poll_interval();
                let started = Instant::now();
                let outcome = controller.update();
                if outcome.pressure_change_fault {
                    stats.pressure_change_faults += 1;
                }
                let elapsed = started.elapsed();
                stats.record(elapsed, poll);
                if let Some(remaining) = poll.checked_sub(elapsed) {
                    thread::sleep(remaining);
                }
            }
            let _ = watchdog.disarm();
            controller.release_outputs();
            log::warn!("tick thread finished after {} ticks", stats.ticks_executed);
            stats
        })
}

/// Run the tick as a task on the current thread. There is no watchdog in this
/// mode: a task that never yields starves the tick.
pub async fn run_cooperative<IO, C>(
    controller: Arc<CompressorController<IO, C>>,
    stop: Arc<AtomicBool>,
) -> LoopStats
where
    IO: CompressorIo,
    C: Clock,
{
    log::warn!("no watchdog in cooperative mode; a blocked task can stall the compressor tick");
    let mut stats = LoopStats::default();
    while !stop.load(Ordering::Relaxed) {
        let poll = controller.config().read().poll_interval();
        let started = Instant::now();
        let outcome = controller.update();
        if outcome.pressure_change_fault {
            stats.pressure_change_faults += 1;
        }
        stats.record(started.elapsed(), poll);
        tokio::time::sleep(poll).await;
    }
    controller.release_outputs();
    log::warn!("cooperative tick finished after {} ticks", stats.ticks_executed);
    stats
}

/// Drive scheduled purges to completion. Sleeps between phases without
/// holding the controller lock.
pub async fn run_purge_driver<IO, C>(controller: Arc<CompressorController<IO, C>>, stop: Arc<AtomicBool>)
where
    IO: CompressorIo,
    C: Clock,
{
    let signal = Arc::clone(controller.purge_signal());
    while !stop.load(Ordering::Relaxed) {
        let poll = controller.config().read().poll_interval();
        if tokio::time::timeout(poll, signal.notified()).await.is_err() {
            continue;
        }
        while let Some(wait) = controller.advance_purge() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(wait.max(Duration::from_millis(100))).await;
        }
    }
    log::debug!("purge driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{ControllerConfig, SharedConfig};
    use crate::controller::{MotorState, SchedulingMode};
    use crate::hal_sim::ScriptedIo;
    use crate::watchdog::SoftwareWatchdog;

    fn fast_config() -> SharedConfig {
        SharedConfig::new(ControllerConfig {
            poll_interval_ms: 10,
            watchdog_timeout_ms: 500,
            ..ControllerConfig::default()
        })
    }

    #[test]
    fn preemptive_loop_ticks_and_releases_outputs() {
        let controller = Arc::new(CompressorController::new(
            ScriptedIo::default(),
            fast_config(),
            SystemClock::new(),
            SchedulingMode::Preemptive,
        ));
        controller.with_io(|io| io.set_tank_pressure(50.0));
        controller.enable(None);

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let watchdog = SoftwareWatchdog::with_reset_action(
            Duration::from_millis(500),
            Arc::new(move || flag.store(true, Ordering::SeqCst)),
        )
        .unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_preemptive(Arc::clone(&controller), watchdog, Arc::clone(&stop)).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(controller.state().motor_state, MotorState::Running);
        stop.store(true, Ordering::Relaxed);
        let stats = handle.join().unwrap();

        assert!(stats.ticks_executed > 0);
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!controller.with_io(|io| io.outputs().motor));
        assert_eq!(controller.state().motor_state, MotorState::Off);
    }

    #[tokio::test]
    async fn cooperative_loop_runs_until_stopped() {
        let controller = Arc::new(CompressorController::new(
            ScriptedIo::default(),
            fast_config(),
            SystemClock::new(),
            SchedulingMode::Cooperative,
        ));
        controller.with_io(|io| io.set_tank_pressure(50.0));
        controller.enable(None);

        let stop = Arc::new(AtomicBool::new(false));
        let stopper = {
            let stop = Arc::clone(&stop);
            async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                stop.store(true, Ordering::Relaxed);
            }
        };
        let (stats, ()) = tokio::join!(run_cooperative(Arc::clone(&controller), Arc::clone(&stop)), stopper);
        assert!(stats.ticks_executed >= 2);
        assert!(!controller.with_io(|io| io.outputs().motor));
    }

    #[tokio::test]
    async fn purge_driver_opens_and_closes_drain() {
        let controller = Arc::new(CompressorController::new(
            ScriptedIo::default(),
            fast_config(),
            SystemClock::new(),
            SchedulingMode::Cooperative,
        ));
        let stop = Arc::new(AtomicBool::new(false));
        controller
            .purge(Some(Duration::from_secs(1)), Some(Duration::ZERO))
            .unwrap();

        let driver = run_purge_driver(Arc::clone(&controller), Arc::clone(&stop));
        let observer = {
            let controller = Arc::clone(&controller);
            let stop = Arc::clone(&stop);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let opened = controller.with_io(|io| io.outputs().drain_valve);
                tokio::time::sleep(Duration::from_millis(2_500)).await;
                let closed = !controller.with_io(|io| io.outputs().drain_valve);
                stop.store(true, Ordering::Relaxed);
                (opened, closed)
            }
        };
        let ((), (opened, closed)) = tokio::join!(driver, observer);
        assert!(opened);
        assert!(closed);
        assert!(!controller.state().purge.is_active());
    }
}
