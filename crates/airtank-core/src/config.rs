use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

/// Minimum ratio of the watchdog timeout to the poll interval.
pub const WATCHDOG_POLL_FACTOR: u64 = 3;

/// Linear map from a raw sensor range onto a physical range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueScale {
    pub value_min: f64,
    pub value_max: f64,
    pub sensor_min: f64,
    pub sensor_max: f64,
}

impl ValueScale {
    /// Physical value for `raw`, or `None` when `raw` is outside the sensor
    /// range.
    pub fn map(&self, raw: f64) -> Option<f64> {
        if !(self.sensor_min..=self.sensor_max).contains(&raw) {
            return None;
        }
        let scaled = (raw - self.sensor_min) / (self.sensor_max - self.sensor_min);
        Some(scaled * (self.value_max - self.value_min) + self.value_min)
    }

    /// Raw reading that maps to `value`, clamped to the sensor range.
    pub fn unmap(&self, value: f64) -> f64 {
        let scaled = (value - self.value_min) / (self.value_max - self.value_min);
        (scaled * (self.sensor_max - self.sensor_min) + self.sensor_min)
            .clamp(self.sensor_min, self.sensor_max)
    }
}

impl Default for ValueScale {
    fn default() -> Self {
        Self {
            value_min: 0.0,
            value_max: 150.0,
            sensor_min: 0.0,
            sensor_max: 65535.0,
        }
    }
}

/// Controller tunables. Pressures are in the sensors' physical units, times in
/// seconds unless the field name says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub start_pressure: f64,
    pub stop_pressure: f64,
    pub min_line_pressure: f64,
    /// 1.0 disables duty limiting.
    pub max_duty: f64,
    pub duty_duration_secs: u64,
    pub recovery_time_secs: u64,
    pub drain_duration_secs: u64,
    pub drain_delay_secs: u64,
    pub unload_duration_secs: u64,
    pub auto_stop_time_secs: u64,
    pub compressor_on_power_up: bool,
    pub log_interval_secs: u64,
    /// Zero disables pressure-change detection.
    pub pressure_change_duration_secs: u64,
    pub detect_pressure_change_threshold: f64,
    pub poll_interval_ms: u64,
    pub watchdog_timeout_ms: u64,
    pub tank_sensor: ValueScale,
    pub line_sensor: ValueScale,
    pub event_log_capacity: usize,
    pub command_log_capacity: usize,
    pub state_log_capacity: usize,
    pub snapshot_duty_windows_secs: Vec<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            start_pressure: 90.0,
            stop_pressure: 125.0,
            min_line_pressure: 89.0,
            max_duty: 0.6,
            duty_duration_secs: 600,
            recovery_time_secs: 180,
            drain_duration_secs: 10,
            drain_delay_secs: 5,
            unload_duration_secs: 5,
            auto_stop_time_secs: 6 * 60 * 60,
            compressor_on_power_up: true,
            log_interval_secs: 10,
            pressure_change_duration_secs: 60,
            detect_pressure_change_threshold: 0.1,
            poll_interval_ms: 1000,
            watchdog_timeout_ms: 5000,
            tank_sensor: ValueScale::default(),
            line_sensor: ValueScale::default(),
            event_log_capacity: 40,
            command_log_capacity: 10,
            state_log_capacity: 200,
            snapshot_duty_windows_secs: vec![60, 600, 3600],
        }
    }
}

impl ControllerConfig {
    /// Defaults overlaid with the delta document at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let delta: Value = serde_json::from_str(&text)?;
        let mut config = Self::default();
        config.apply_delta(&delta)?;
        Ok(config)
    }

    /// Merge `delta` into this config. Nested objects merge into nested
    /// groups; any other value replaces the field. On error `self` is left
    /// unchanged.
    pub fn apply_delta(&mut self, delta: &Value) -> Result<(), ConfigError> {
        let mut merged = serde_json::to_value(&*self)?;
        merge_value(&mut merged, delta, "")?;
        let candidate: Self = serde_json::from_value(merged)?;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.stop_pressure <= self.start_pressure {
            return invalid(format!(
                "stop_pressure ({}) must exceed start_pressure ({})",
                self.stop_pressure, self.start_pressure
            ));
        }
        if self.max_duty.is_nan() || self.max_duty <= 0.0 || self.max_duty > 1.0 {
            return invalid(format!("max_duty must be in (0, 1], got {}", self.max_duty));
        }
        if self.duty_limited() && self.duty_duration_secs == 0 {
            return invalid("duty_duration_secs must be non-zero when max_duty < 1".into());
        }
        for (name, scale) in [("tank_sensor", &self.tank_sensor), ("line_sensor", &self.line_sensor)] {
            if scale.sensor_max <= scale.sensor_min || scale.value_max == scale.value_min {
                return invalid(format!("{name} has a degenerate range"));
            }
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be non-zero".into());
        }
        // A single late tick must not trip the watchdog.
        let min_watchdog = self.poll_interval_ms.saturating_mul(WATCHDOG_POLL_FACTOR);
        if self.watchdog_timeout_ms < min_watchdog {
            return invalid(format!(
                "watchdog_timeout_ms ({}) must be at least {WATCHDOG_POLL_FACTOR}x poll_interval_ms ({})",
                self.watchdog_timeout_ms, self.poll_interval_ms
            ));
        }
        if self.event_log_capacity == 0 || self.command_log_capacity == 0 || self.state_log_capacity == 0 {
            return invalid("log capacities must be non-zero".into());
        }
        Ok(())
    }

    pub fn duty_limited(&self) -> bool {
        self.max_duty < 1.0
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

fn merge_value(target: &mut Value, delta: &Value, path: &str) -> Result<(), ConfigError> {
    let (Value::Object(fields), Value::Object(updates)) = (&mut *target, delta) else {
        *target = delta.clone();
        return Ok(());
    };
    for (key, update) in updates {
        let field_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        let field = fields
            .get_mut(key)
            .ok_or_else(|| ConfigError::UnknownKey(field_path.clone()))?;
        merge_value(field, update, &field_path)?;
    }
    Ok(())
}

/// Handle through which the settings owner publishes configuration and the
/// controller reads it at the point of use.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<ControllerConfig>>,
}

impl SharedConfig {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ControllerConfig> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a copy and publish it only if the result validates.
    pub fn update<F>(&self, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut ControllerConfig),
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = guard.clone();
        f(&mut candidate);
        candidate.validate()?;
        *guard = candidate;
        Ok(())
    }

    pub fn apply_delta(&self, delta: &Value) -> Result<(), ConfigError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.apply_delta(delta)
    }

    pub fn snapshot(&self) -> ControllerConfig {
        self.read().clone()
    }
}
