//! Confirms that tank pressure actually rises after the motor starts.

use crate::clock::Timestamp;
use crate::logs::StateLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    /// Not enough evidence yet; keep polling.
    Pending,
    /// Pressure is rising at least as fast as required.
    Satisfied,
    /// The deadline passed without the required rise.
    Fault,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PressureChangeMonitor {
    start_time: Timestamp,
    deadline: Timestamp,
    baseline_slope: f64,
    target_slope: f64,
    last_slope: Option<f64>,
}

impl PressureChangeMonitor {
    /// Arm a monitor at `now`. The baseline is the pressure trend over the
    /// `duration` seconds before `now`; a degenerate baseline counts as flat.
    pub fn arm(state_log: &StateLog, now: Timestamp, duration: u64, threshold: f64) -> Self {
        let baseline_slope = state_log
            .pressure_fit(now.saturating_sub(duration))
            .map(|fit| fit.slope)
            .unwrap_or(0.0);
        let target_slope = baseline_slope + threshold;
        log::debug!(
            "pressure monitor armed: baseline {:.4}/s target {:.4}/s for {}s",
            baseline_slope,
            target_slope,
            duration
        );
        Self {
            start_time: now,
            deadline: now.saturating_add(duration),
            baseline_slope,
            target_slope,
            last_slope: None,
        }
    }

    /// Refit over the samples logged since arming and classify.
    pub fn poll(&mut self, state_log: &StateLog, now: Timestamp) -> MonitorStatus {
        if let Ok(fit) = state_log.pressure_fit(self.start_time) {
            self.last_slope = Some(fit.slope);
            if fit.slope >= self.target_slope {
                log::debug!(
                    "pressure monitor satisfied: slope {:.4}/s >= {:.4}/s",
                    fit.slope,
                    self.target_slope
                );
                return MonitorStatus::Satisfied;
            }
        }
        if now >= self.deadline {
            log::error!(
                "pressure change fault: slope {} below target {:.4}/s after {}s",
                self.last_slope
                    .map(|slope| format!("{slope:.4}/s"))
                    .unwrap_or_else(|| "unknown".to_string()),
                self.target_slope,
                now - self.start_time
            );
            return MonitorStatus::Fault;
        }
        MonitorStatus::Pending
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn baseline_slope(&self) -> f64 {
        self.baseline_slope
    }

    pub fn target_slope(&self) -> f64 {
        self.target_slope
    }

    /// Slope of the most recent successful refit.
    pub fn last_slope(&self) -> Option<f64> {
        self.last_slope
    }
}
