//! Watchdog that resets the device when the control loop stops feeding it.

use crate::error::WatchdogError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A watchdog that must be fed more often than its timeout once armed.
pub trait HardwareWatchdog: Send {
    fn arm(&mut self) -> Result<(), WatchdogError>;

    fn feed(&mut self) -> Result<(), WatchdogError>;

    fn disarm(&mut self) -> Result<(), WatchdogError>;

    fn timeout(&self) -> Duration;

    fn is_armed(&self) -> bool;
}

/// Called once when the watchdog expires. Never returns on a real device.
pub type ResetAction = Arc<dyn Fn() + Send + Sync>;

fn abort_process() {
    std::process::abort()
}

struct Shared {
    timeout: Duration,
    epoch: Instant,
    last_feed_us: AtomicU64,
    armed: AtomicBool,
    expired: AtomicBool,
    reset: ResetAction,
}

impl Shared {
    fn elapsed_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn since_feed(&self) -> Duration {
        let last = self.last_feed_us.load(Ordering::Acquire);
        Duration::from_micros(self.elapsed_us().saturating_sub(last))
    }
}

/// Host stand-in for a hardware watchdog. A monitor thread checks the last
/// feed time and runs the reset action once the timeout is exceeded.
pub struct SoftwareWatchdog {
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
}

impl SoftwareWatchdog {
    /// Watchdog whose expiry aborts the process.
    pub fn new(timeout: Duration) -> Result<Self, WatchdogError> {
        Self::with_reset_action(timeout, Arc::new(abort_process))
    }

    pub fn with_reset_action(timeout: Duration, reset: ResetAction) -> Result<Self, WatchdogError> {
        if timeout.is_zero() {
            return Err(WatchdogError::InvalidTimeout("timeout must be non-zero".into()));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                timeout,
                epoch: Instant::now(),
                last_feed_us: AtomicU64::new(0),
                armed: AtomicBool::new(false),
                expired: AtomicBool::new(false),
                reset,
            }),
            monitor: None,
        })
    }

    pub fn has_expired(&self) -> bool {
        self.shared.expired.load(Ordering::Acquire)
    }

    fn spawn_monitor(shared: Arc<Shared>) -> Result<JoinHandle<()>, WatchdogError> {
        let check_every = (shared.timeout / 4).max(Duration::from_millis(1));
        thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                while shared.armed.load(Ordering::Acquire) {
                    if shared.since_feed() > shared.timeout {
                        shared.expired.store(true, Ordering::Release);
                        shared.armed.store(false, Ordering::Release);
                        log::error!(
                            "watchdog expired: no feed for {:?} (timeout {:?}); resetting",
                            shared.since_feed(),
                            shared.timeout
                        );
                        (shared.reset)();
                        return;
                    }
                    thread::sleep(check_every);
                }
            })
            .map_err(|err| WatchdogError::InvalidTimeout(format!("cannot start monitor: {err}")))
    }
}

impl HardwareWatchdog for SoftwareWatchdog {
    fn arm(&mut self) -> Result<(), WatchdogError> {
        if self.shared.armed.load(Ordering::Acquire) {
            return Err(WatchdogError::AlreadyArmed);
        }
        if let Some(previous) = self.monitor.take() {
            let _ = previous.join();
        }
        self.shared.expired.store(false, Ordering::Release);
        self.shared
            .last_feed_us
            .store(self.shared.elapsed_us(), Ordering::Release);
        self.shared.armed.store(true, Ordering::Release);
        self.monitor = Some(Self::spawn_monitor(Arc::clone(&self.shared))?);
        log::info!("watchdog armed ({:?})", self.shared.timeout);
        Ok(())
    }

    fn feed(&mut self) -> Result<(), WatchdogError> {
        if self.shared.expired.load(Ordering::Acquire) {
            return Err(WatchdogError::Expired);
        }
        if !self.shared.armed.load(Ordering::Acquire) {
            return Err(WatchdogError::NotArmed);
        }
        self.shared
            .last_feed_us
            .store(self.shared.elapsed_us(), Ordering::Release);
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), WatchdogError> {
        if !self.shared.armed.swap(false, Ordering::AcqRel) {
            return Err(WatchdogError::NotArmed);
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
        log::info!("watchdog disarmed");
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }
}

impl Drop for SoftwareWatchdog {
    fn drop(&mut self) {
        self.shared.armed.store(false, Ordering::Release);
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}
