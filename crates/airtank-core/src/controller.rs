//! Compressor state machine.
//!
//! Every public method takes the controller lock for its whole duration, so a
//! method observes and leaves a consistent [`ControllerState`]. The lock is
//! reentrant: composite commands such as [`CompressorController::toggle_enabled`]
//! call other public methods while holding it. Internal `*_locked` helpers
//! take the already-borrowed state instead.
//!
//! The three logs have their own locks, so telemetry can export them without
//! going through the controller.

use crate::clock::{Clock, Timestamp};
use crate::config::SharedConfig;
use crate::error::{ConfigError, ControlError};
use crate::hal::CompressorIo;
use crate::lock::{LockMode, ReentrantLock};
use crate::logs::{CommandKind, CommandLog, EventKind, EventLog, StateLog, StateLogEntry, StateTag};
use crate::pressure_monitor::{MonitorStatus, PressureChangeMonitor};
use crate::purge::{PurgePhase, PurgeStep};
use crate::ringlog::ExportPolicy;
use serde::Serialize;
use std::cell::RefCell;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Why the motor is or is not running. Exactly one value at a time.
///
/// Serialized with the names status clients already consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum MotorState {
    #[serde(rename = "run")]
    Running,
    #[default]
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "sensor_error")]
    SensorError,
    #[serde(rename = "pause")]
    Paused,
    #[serde(rename = "overpressure")]
    Overpressure,
    #[serde(rename = "pressure_change_error")]
    PressureChangeError,
    #[serde(rename = "duty")]
    DutyLimited,
    #[serde(rename = "purge")]
    Purging,
}

impl MotorState {
    /// Single-character code used in state-log tags.
    pub fn tag(self) -> u8 {
        match self {
            Self::Running => b'R',
            Self::Off => b'f',
            Self::SensorError => b's',
            Self::PressureChangeError => b'^',
            Self::Paused => b'|',
            Self::Overpressure => b'p',
            Self::DutyLimited => b'd',
            Self::Purging => b'*',
        }
    }

    /// Stable numeric code for metrics.
    pub fn code(self) -> i64 {
        match self {
            Self::Running => 0,
            Self::Off => 1,
            Self::SensorError => 2,
            Self::Paused => 3,
            Self::Overpressure => 4,
            Self::PressureChangeError => 5,
            Self::DutyLimited => 6,
            Self::Purging => 7,
        }
    }
}

/// How the controller is hosted. Fixed for the lifetime of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Tick, purge and collaborators share one thread.
    #[default]
    Cooperative,
    /// Tick on a dedicated watchdog-fed thread.
    Preemptive,
}

impl SchedulingMode {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Self::Cooperative => LockMode::Disabled,
            Self::Preemptive => LockMode::Threaded,
        }
    }

    /// Log exports yield between records only when the tick runs on its own
    /// thread; on a shared thread a yielding export would just buffer.
    pub fn export_policy(self) -> ExportPolicy {
        match self {
            Self::Cooperative => ExportPolicy::Blocking,
            Self::Preemptive => ExportPolicy::Yielding,
        }
    }
}

impl FromStr for SchedulingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cooperative" => Ok(Self::Cooperative),
            "preemptive" => Ok(Self::Preemptive),
            other => Err(ConfigError::Invalid(format!(
                "unknown scheduling mode '{other}' (expected cooperative or preemptive)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub compressor_enabled: bool,
    pub run_requested: bool,
    pub motor_state: MotorState,
    pub purge: PurgePhase,
    pub unload_open: bool,
    pub shutdown_at: Option<Timestamp>,
    pub unload_close_at: Option<Timestamp>,
    pub duty_recovery_until: Option<Timestamp>,
    pub tank_pressure: Option<f64>,
    pub line_pressure: Option<f64>,
    pub tank_sensor_fault: bool,
    pub line_sensor_fault: bool,
    /// Sticky until the compressor is disabled and enabled again.
    pub pressure_change_fault: bool,
    pub pressure_monitor: Option<PressureChangeMonitor>,
}

impl ControllerState {
    pub fn purge_open(&self) -> bool {
        self.purge.is_open()
    }

    pub fn purge_pending(&self) -> bool {
        self.purge.is_pending()
    }

    pub fn tag(&self) -> StateTag {
        StateTag([
            if self.compressor_enabled { b'O' } else { b'_' },
            self.motor_state.tag(),
            if self.purge_open() { b'P' } else { b'_' },
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DutyWindow {
    pub window_secs: u64,
    pub duty: f64,
}

/// Read-only projection of the controller, taken under one lock acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateView {
    pub system_time: Timestamp,
    pub tank_pressure: Option<f64>,
    pub line_pressure: Option<f64>,
    pub tank_underpressure: bool,
    pub line_underpressure: bool,
    pub tank_sensor_fault: bool,
    pub line_sensor_fault: bool,
    pub pressure_change_fault: bool,
    pub pressure_change_trend: Option<f64>,
    pub compressor_enabled: bool,
    pub motor_state: MotorState,
    pub run_requested: bool,
    pub purge_open: bool,
    pub purge_pending: bool,
    pub unload_open: bool,
    pub shutdown_at: Option<Timestamp>,
    pub shutdown_in_secs: Option<u64>,
    pub duty_recovery_until: Option<Timestamp>,
    pub duty_recovery_in_secs: Option<u64>,
    pub duty: f64,
    pub duty_windows: Vec<DutyWindow>,
    pub runtime_secs: u64,
    pub log_start_time: Option<Timestamp>,
    pub tick_count: u64,
    pub pressure_change_faults: u64,
    pub state_tag: StateTag,
}

/// Result of one [`CompressorController::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub motor_state: MotorState,
    /// A pressure-change fault was raised during this tick.
    pub pressure_change_fault: bool,
}

struct Plant<IO> {
    io: IO,
    state: ControllerState,
    last_step: Option<Timestamp>,
    tick_count: u64,
    pressure_change_faults: u64,
}

pub struct CompressorController<IO: CompressorIo, C: Clock> {
    plant: ReentrantLock<RefCell<Plant<IO>>>,
    config: SharedConfig,
    clock: C,
    mode: SchedulingMode,
    event_log: Arc<EventLog>,
    command_log: Arc<CommandLog>,
    state_log: Arc<StateLog>,
    purge_signal: Arc<Notify>,
}

impl<IO: CompressorIo, C: Clock> CompressorController<IO, C> {
    /// Build a controller, drive every output to its safe level and start an
    /// unload cycle in case power was lost mid-run.
    ///
    /// In [`SchedulingMode::Cooperative`] every later call must come from the
    /// thread that constructed the controller.
    pub fn new(mut io: IO, config: SharedConfig, clock: C, mode: SchedulingMode) -> Self {
        let lock_mode = mode.lock_mode();
        let (events, commands, states) = {
            let cfg = config.read();
            (
                cfg.event_log_capacity,
                cfg.command_log_capacity,
                cfg.state_log_capacity,
            )
        };
        io.set_motor(false);
        io.set_drain_valve(false);
        let controller = Self {
            plant: ReentrantLock::new(
                lock_mode,
                RefCell::new(Plant {
                    io,
                    state: ControllerState::default(),
                    last_step: None,
                    tick_count: 0,
                    pressure_change_faults: 0,
                }),
            ),
            config,
            clock,
            mode,
            event_log: Arc::new(EventLog::new(events, lock_mode)),
            command_log: Arc::new(CommandLog::new(commands, lock_mode)),
            state_log: Arc::new(StateLog::new(states, lock_mode)),
            purge_signal: Arc::new(Notify::new()),
        };
        {
            let now = controller.clock.now();
            let guard = controller.plant.acquire();
            let mut plant = guard.borrow_mut();
            controller.unload_locked(&mut plant, now);
        }
        log::info!("compressor controller created ({:?} scheduling)", mode);
        controller
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    pub fn command_log(&self) -> &Arc<CommandLog> {
        &self.command_log
    }

    pub fn state_log(&self) -> &Arc<StateLog> {
        &self.state_log
    }

    /// Signalled whenever a purge is scheduled.
    pub fn purge_signal(&self) -> &Arc<Notify> {
        &self.purge_signal
    }

    pub fn state(&self) -> ControllerState {
        self.plant.acquire().borrow().state.clone()
    }

    /// Run `f` against the I/O under the controller lock.
    pub fn with_io<R>(&self, f: impl FnOnce(&mut IO) -> R) -> R {
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        f(&mut plant.io)
    }

    // ------------------------------------------------------------------
    // Command surface
    // ------------------------------------------------------------------

    /// Honoured on the next tick.
    pub fn request_run(&self) {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        guard.borrow_mut().state.run_requested = true;
        self.command_log.log_command(CommandKind::Run, now);
    }

    /// Enable the compressor. `None` schedules the configured auto-stop; a
    /// zero duration disables auto-stop. No-op while already enabled.
    pub fn enable(&self, shutdown_after: Option<Duration>) {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        self.enable_locked(&mut plant, shutdown_after, now);
    }

    pub fn disable(&self) {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        self.disable_locked(&mut plant, now);
    }

    pub fn pause(&self) {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        self.command_log.log_command(CommandKind::Pause, now);
        self.pause_locked(&mut plant, MotorState::Paused, now);
    }

    /// Schedule a drain purge. `None` uses the configured duration and delay.
    /// Rejected without logging while another purge is pending or open.
    pub fn purge(&self, duration: Option<Duration>, delay: Option<Duration>) -> Result<(), ControlError> {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        self.purge_locked(&mut plant, duration, delay, now)
    }

    pub fn toggle_enabled(&self) {
        let guard = self.plant.acquire();
        let enabled = guard.borrow().state.compressor_enabled;
        if enabled {
            self.disable();
        } else {
            self.enable(None);
        }
    }

    pub fn toggle_run_pause(&self) {
        let guard = self.plant.acquire();
        let (run_requested, running) = {
            let plant = guard.borrow();
            (
                plant.state.run_requested,
                plant.state.motor_state == MotorState::Running,
            )
        };
        if run_requested {
            guard.borrow_mut().state.run_requested = false;
        } else if running {
            self.pause();
        } else {
            self.request_run();
        }
    }

    /// Enable if configured to start on power-up.
    pub fn power_up(&self) {
        if self.config.read().compressor_on_power_up {
            self.enable(None);
        }
    }

    /// Drive the motor low and close the drain before monitoring stops.
    pub fn release_outputs(&self) {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        plant.io.set_motor(false);
        plant.io.set_drain_valve(false);
        if plant.state.motor_state == MotorState::Running {
            self.event_log.close_if(EventKind::Run, now);
            plant.state.pressure_monitor = None;
            plant.state.motor_state = MotorState::Off;
        }
        log::warn!("compressor outputs released; monitoring has stopped");
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    /// Refresh the sensors and project the current state.
    pub fn snapshot(&self) -> StateView {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        self.read_sensors_locked(&mut plant);

        let cfg = self.config.read();
        let state = &plant.state;
        let below = |pressure: Option<f64>, limit: f64| pressure.is_some_and(|p| p < limit);
        let line_underpressure = if state.line_sensor_fault {
            below(state.tank_pressure, cfg.min_line_pressure)
        } else {
            below(state.line_pressure, cfg.min_line_pressure)
        };
        let (runtime_secs, log_start_time) = self.event_log.runtime(now);
        let duty_windows = cfg
            .snapshot_duty_windows_secs
            .iter()
            .map(|&window_secs| DutyWindow {
                window_secs,
                duty: self.event_log.duty(now, window_secs),
            })
            .collect();

        StateView {
            system_time: now,
            tank_pressure: state.tank_pressure,
            line_pressure: state.line_pressure,
            tank_underpressure: below(state.tank_pressure, cfg.start_pressure),
            line_underpressure,
            tank_sensor_fault: state.tank_sensor_fault,
            line_sensor_fault: state.line_sensor_fault,
            pressure_change_fault: state.pressure_change_fault,
            pressure_change_trend: state
                .pressure_monitor
                .as_ref()
                .and_then(PressureChangeMonitor::last_slope),
            compressor_enabled: state.compressor_enabled,
            motor_state: state.motor_state,
            run_requested: state.run_requested,
            purge_open: state.purge_open(),
            purge_pending: state.purge_pending(),
            unload_open: state.unload_open,
            shutdown_at: state.shutdown_at,
            shutdown_in_secs: state.shutdown_at.map(|t| t.saturating_sub(now)),
            duty_recovery_until: state.duty_recovery_until,
            duty_recovery_in_secs: state
                .duty_recovery_until
                .filter(|&t| t > now)
                .map(|t| t - now),
            duty: self.event_log.duty(now, cfg.duty_duration_secs),
            duty_windows,
            runtime_secs,
            log_start_time,
            tick_count: plant.tick_count,
            pressure_change_faults: plant.pressure_change_faults,
            state_tag: state.tag(),
        }
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    /// One control tick.
    ///
    /// Deadlines (`unload_close_at`, `shutdown_at`, duty recovery and the
    /// pressure-change monitor) are due once `now >= deadline`, so a deadline
    /// fires on the tick that reaches it rather than one poll later.
    pub fn update(&self) -> TickOutcome {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        plant.tick_count += 1;

        let dt = plant.last_step.map_or(0, |last| now.saturating_sub(last));
        plant.last_step = Some(now);
        plant.io.step(dt as f64);
        self.read_sensors_locked(&mut plant);

        let duty = {
            let cfg = self.config.read();
            if cfg.duty_limited() {
                self.event_log.duty(now, cfg.duty_duration_secs)
            } else {
                0.0
            }
        };

        let log_interval = self.config.read().log_interval_secs;
        self.state_log.log_state(
            StateLogEntry {
                time: now,
                tank_pressure: plant.state.tank_pressure.map(|p| p as f32),
                line_pressure: plant.state.line_pressure.map(|p| p as f32),
                duty: duty as f32,
                state: plant.state.tag(),
            },
            log_interval,
        );

        if plant.state.unload_open && plant.state.unload_close_at.is_some_and(|t| now >= t) {
            self.close_unload_locked(&mut plant);
        }

        if plant.state.compressor_enabled && plant.state.shutdown_at.is_some_and(|t| now >= t) {
            log::info!("auto-stop time reached; shutting down compressor");
            self.disable_locked(&mut plant, now);
        }

        let stop_pressure = self.config.read().stop_pressure;
        let over_stop = plant.state.tank_pressure.is_some_and(|p| p > stop_pressure);
        if over_stop {
            plant.state.run_requested = false;
        }

        let mut fault_raised = false;
        if let Some(reason) = self.pause_reason_locked(&mut plant, now, duty, &mut fault_raised) {
            self.pause_locked(&mut plant, reason, now);
        } else if over_stop {
            self.pause_locked(&mut plant, MotorState::Overpressure, now);
        } else {
            let start_pressure = self.config.read().start_pressure;
            let under_start = plant.state.tank_pressure.is_some_and(|p| p < start_pressure);
            if under_start || plant.state.run_requested {
                plant.state.run_requested = false;
                self.run_motor_locked(&mut plant, now);
            }
        }

        TickOutcome {
            motor_state: plant.state.motor_state,
            pressure_change_fault: fault_raised,
        }
    }

    /// Step the purge sequence against the clock. Returns how long until the
    /// next transition is due, or `None` once no purge is active.
    pub fn advance_purge(&self) -> Option<Duration> {
        let now = self.clock.now();
        let guard = self.plant.acquire();
        let mut plant = guard.borrow_mut();
        match plant.state.purge.step(now) {
            PurgeStep::Idle => None,
            PurgeStep::Waiting { until } => Some(Duration::from_secs(until.saturating_sub(now))),
            PurgeStep::OpenDrain { close_at } => {
                self.pause_locked(&mut plant, MotorState::Purging, now);
                plant.io.set_drain_valve(true);
                self.event_log.open(EventKind::Purge, now);
                log::info!("purge: drain valve open until {}", close_at);
                Some(Duration::from_secs(close_at.saturating_sub(now)))
            }
            PurgeStep::CloseDrain => {
                plant.io.set_drain_valve(false);
                self.event_log.close_if(EventKind::Purge, now);
                log::info!("purge: drain valve closed");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Locked helpers
    // ------------------------------------------------------------------

    fn read_sensors_locked(&self, plant: &mut Plant<IO>) {
        let (tank_scale, line_scale) = {
            let cfg = self.config.read();
            (cfg.tank_sensor, cfg.line_sensor)
        };
        let tank = tank_scale.map(plant.io.read_tank_raw());
        let state = &mut plant.state;
        state.tank_pressure = tank;
        state.tank_sensor_fault = tank.is_none();
        match plant.io.read_line_raw() {
            Some(raw) => {
                let line = line_scale.map(raw);
                state.line_pressure = line;
                state.line_sensor_fault = line.is_none();
            }
            None => {
                state.line_pressure = state.tank_pressure;
                state.line_sensor_fault = state.tank_sensor_fault;
            }
        }
    }

    fn enable_locked(&self, plant: &mut Plant<IO>, shutdown_after: Option<Duration>, now: Timestamp) {
        if plant.state.compressor_enabled {
            return;
        }
        self.command_log.log_command(CommandKind::On, now);
        let state = &mut plant.state;
        state.compressor_enabled = true;
        state.pressure_change_fault = false;
        state.duty_recovery_until = None;
        // Partial seconds round up: only a zero duration disables auto-stop.
        let shutdown_secs = match shutdown_after {
            Some(after) => after.as_secs() + u64::from(after.subsec_nanos() > 0),
            None => self.config.read().auto_stop_time_secs,
        };
        state.shutdown_at = (shutdown_secs > 0).then(|| now.saturating_add(shutdown_secs));
    }

    fn disable_locked(&self, plant: &mut Plant<IO>, now: Timestamp) {
        self.pause_locked(plant, MotorState::Off, now);
        if !plant.state.compressor_enabled {
            return;
        }
        self.command_log.log_command(CommandKind::Off, now);
        plant.state.compressor_enabled = false;
        plant.state.shutdown_at = None;
        if let Err(err) = self.purge_locked(plant, None, None, now) {
            log::debug!("skipping shutdown purge: {}", err);
        }
    }

    fn purge_locked(
        &self,
        plant: &mut Plant<IO>,
        duration: Option<Duration>,
        delay: Option<Duration>,
        now: Timestamp,
    ) -> Result<(), ControlError> {
        if plant.state.purge.is_active() {
            log::warn!("purge requested while another purge is in progress");
            return Err(ControlError::PurgeInProgress);
        }
        self.command_log.log_command(CommandKind::Purge, now);
        let (duration, delay) = {
            let cfg = self.config.read();
            (
                duration.map_or(cfg.drain_duration_secs, |d| d.as_secs()),
                delay.map_or(cfg.drain_delay_secs, |d| d.as_secs()),
            )
        };
        if duration == 0 || !plant.io.has_drain_valve() {
            log::debug!("purge is a no-op (duration {}s)", duration);
            return Ok(());
        }
        plant.state.purge.begin(now, delay, duration)?;
        log::info!("purge: scheduled in {}s for {}s", delay, duration);
        self.purge_signal.notify_one();
        Ok(())
    }

    /// First matching reason the motor must not run, applying its side
    /// effects.
    fn pause_reason_locked(
        &self,
        plant: &mut Plant<IO>,
        now: Timestamp,
        duty: f64,
        fault_raised: &mut bool,
    ) -> Option<MotorState> {
        let state = &mut plant.state;
        if !state.compressor_enabled {
            state.run_requested = false;
            return Some(MotorState::Off);
        }
        if state.purge.is_active() {
            return Some(MotorState::Purging);
        }
        if let Some(monitor) = state.pressure_monitor.as_mut() {
            match monitor.poll(&self.state_log, now) {
                MonitorStatus::Pending => {}
                MonitorStatus::Satisfied => state.pressure_monitor = None,
                MonitorStatus::Fault => {
                    state.pressure_monitor = None;
                    state.pressure_change_fault = true;
                    plant.pressure_change_faults += 1;
                    *fault_raised = true;
                }
            }
        }
        if state.pressure_change_fault {
            return Some(MotorState::PressureChangeError);
        }
        if state.tank_sensor_fault {
            return Some(MotorState::SensorError);
        }
        if state.duty_recovery_until.is_some_and(|t| now < t) {
            return Some(MotorState::DutyLimited);
        }
        let cfg = self.config.read();
        if cfg.duty_limited() && duty > cfg.max_duty {
            state.run_requested |= state.motor_state == MotorState::Running;
            state.duty_recovery_until = Some(now.saturating_add(cfg.recovery_time_secs));
            log::warn!(
                "duty {:.2} exceeds {:.2}; resting for {}s",
                duty,
                cfg.max_duty,
                cfg.recovery_time_secs
            );
            return Some(MotorState::DutyLimited);
        }
        None
    }

    fn pause_locked(&self, plant: &mut Plant<IO>, reason: MotorState, now: Timestamp) {
        plant.io.set_motor(false);
        self.event_log.close_if(EventKind::Run, now);
        plant.state.pressure_monitor = None;
        if plant.state.motor_state == MotorState::Running {
            self.unload_locked(plant, now);
        }
        if plant.state.motor_state != reason {
            log::debug!("motor: {:?} -> {:?}", plant.state.motor_state, reason);
        }
        plant.state.motor_state = reason;
    }

    fn run_motor_locked(&self, plant: &mut Plant<IO>, now: Timestamp) {
        plant.io.set_drain_valve(false);
        plant.io.set_motor(true);
        if plant.state.motor_state == MotorState::Running {
            return;
        }
        log::debug!("motor: {:?} -> Running", plant.state.motor_state);
        plant.state.motor_state = MotorState::Running;
        self.event_log.open(EventKind::Run, now);

        let (duration, threshold) = {
            let cfg = self.config.read();
            (
                cfg.pressure_change_duration_secs,
                cfg.detect_pressure_change_threshold,
            )
        };
        if duration > 0 && plant.state.pressure_monitor.is_none() {
            plant.state.pressure_monitor = Some(PressureChangeMonitor::arm(
                &self.state_log,
                now,
                duration,
                threshold,
            ));
        }
    }

    fn unload_locked(&self, plant: &mut Plant<IO>, now: Timestamp) {
        if !plant.io.has_unload_valve() {
            return;
        }
        let duration = self.config.read().unload_duration_secs;
        plant.io.set_unload_valve(true);
        plant.state.unload_open = true;
        plant.state.unload_close_at = Some(now.saturating_add(duration));
        log::info!("unload valve open for {}s", duration);
    }

    fn close_unload_locked(&self, plant: &mut Plant<IO>) {
        plant.io.set_unload_valve(false);
        plant.state.unload_open = false;
        plant.state.unload_close_at = None;
        log::info!("unload valve closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ControllerConfig;
    use crate::hal_sim::ScriptedIo;

    fn controller(config: ControllerConfig) -> (CompressorController<ScriptedIo, ManualClock>, ManualClock) {
        let clock = ManualClock::new(1_000);
        let controller = CompressorController::new(
            ScriptedIo::default(),
            SharedConfig::new(config),
            clock.clone(),
            SchedulingMode::Preemptive,
        );
        (controller, clock)
    }

    #[test]
    fn startup_unloads_and_holds_motor_off() {
        let (c, _) = controller(ControllerConfig::default());
        let state = c.state();
        assert!(state.unload_open);
        assert_eq!(state.unload_close_at, Some(1_005));
        assert_eq!(state.motor_state, MotorState::Off);
        assert!(!c.with_io(|io| io.outputs().motor));
    }

    #[test]
    fn state_tag_encodes_enabled_motor_and_purge() {
        let mut state = ControllerState::default();
        assert_eq!(state.tag().as_str(), "_f_");
        state.compressor_enabled = true;
        state.motor_state = MotorState::Purging;
        state.purge = PurgePhase::Open { close_at: 10 };
        assert_eq!(state.tag().as_str(), "O*P");
    }

    #[test]
    fn enable_is_edge_triggered() {
        let (c, _) = controller(ControllerConfig::default());
        c.enable(None);
        c.enable(Some(Duration::from_secs(10)));
        let commands = c.command_log().ring().records();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, CommandKind::On);
        assert_eq!(c.state().shutdown_at, Some(1_000 + 6 * 60 * 60));
    }

    #[test]
    fn zero_shutdown_disables_auto_stop() {
        let (c, _) = controller(ControllerConfig::default());
        c.enable(Some(Duration::ZERO));
        assert_eq!(c.state().shutdown_at, None);
    }

    #[test]
    fn sub_second_shutdown_rounds_up() {
        let (c, _) = controller(ControllerConfig::default());
        c.enable(Some(Duration::from_millis(500)));
        assert_eq!(c.state().shutdown_at, Some(1_001));

        c.disable();
        c.enable(Some(Duration::from_millis(2_001)));
        assert_eq!(c.state().shutdown_at, Some(1_003));
    }

    #[test]
    fn motor_state_serializes_with_status_names() {
        let names: Vec<_> = [
            MotorState::Running,
            MotorState::Off,
            MotorState::SensorError,
            MotorState::Paused,
            MotorState::Overpressure,
            MotorState::PressureChangeError,
            MotorState::DutyLimited,
            MotorState::Purging,
        ]
        .iter()
        .map(|state| serde_json::to_value(state).unwrap())
        .collect();
        assert_eq!(
            names,
            [
                "run",
                "off",
                "sensor_error",
                "pause",
                "overpressure",
                "pressure_change_error",
                "duty",
                "purge"
            ]
        );
    }

    #[test]
    fn toggle_run_pause_cycles_through_request_and_pause() {
        let (c, _) = controller(ControllerConfig::default());
        c.with_io(|io| io.set_tank_pressure(100.0));
        c.enable(None);

        c.toggle_run_pause();
        assert!(c.state().run_requested);
        c.toggle_run_pause();
        assert!(!c.state().run_requested);

        c.toggle_run_pause();
        c.update();
        assert_eq!(c.state().motor_state, MotorState::Running);
        c.toggle_run_pause();
        assert_eq!(c.state().motor_state, MotorState::Paused);
    }

    #[test]
    fn toggle_enabled_reenters_the_lock() {
        let (c, _) = controller(ControllerConfig::default());
        c.toggle_enabled();
        assert!(c.state().compressor_enabled);
        c.toggle_enabled();
        let state = c.state();
        assert!(!state.compressor_enabled);
        assert!(state.purge_pending());
    }

    #[test]
    fn overlapping_purge_is_rejected_without_logging() {
        let (c, _) = controller(ControllerConfig::default());
        c.purge(None, None).unwrap();
        assert_eq!(c.purge(None, None), Err(ControlError::PurgeInProgress));
        assert_eq!(c.command_log().ring().len(), 1);
    }

    #[test]
    fn purge_without_drain_valve_only_logs() {
        let clock = ManualClock::new(0);
        let c = CompressorController::new(
            ScriptedIo::default().without_drain_valve(),
            SharedConfig::default(),
            clock,
            SchedulingMode::Preemptive,
        );
        c.purge(None, None).unwrap();
        assert!(!c.state().purge.is_active());
        assert_eq!(c.command_log().ring().get(0).unwrap().command, CommandKind::Purge);
        assert_eq!(c.advance_purge(), None);
    }

    #[test]
    fn missing_line_sensor_mirrors_tank() {
        let (c, _) = controller(ControllerConfig::default());
        c.with_io(|io| io.set_tank_raw(70_000.0));
        let view = c.snapshot();
        assert_eq!(view.tank_pressure, None);
        assert_eq!(view.line_pressure, None);
        assert!(view.tank_sensor_fault);
        assert!(view.line_sensor_fault);
    }

    #[test]
    fn line_underpressure_falls_back_to_tank() {
        let (c, _) = controller(ControllerConfig::default());
        c.with_io(|io| {
            io.set_tank_pressure(80.0);
            io.set_line_raw(Some(70_000.0));
        });
        let view = c.snapshot();
        assert!(view.line_sensor_fault);
        assert!(view.line_underpressure);
        assert!(view.tank_underpressure);
    }

    #[test]
    fn release_outputs_closes_run_entry() {
        let (c, _) = controller(ControllerConfig::default());
        c.with_io(|io| io.set_tank_pressure(50.0));
        c.enable(None);
        c.update();
        assert_eq!(c.event_log().open_kind(), Some(EventKind::Run));
        c.release_outputs();
        assert_eq!(c.event_log().open_kind(), None);
        assert_eq!(c.state().motor_state, MotorState::Off);
        assert!(!c.with_io(|io| io.outputs().motor));
    }

    #[test]
    fn scheduling_mode_parses() {
        assert_eq!("preemptive".parse::<SchedulingMode>().unwrap(), SchedulingMode::Preemptive);
        assert_eq!(SchedulingMode::Cooperative.lock_mode(), LockMode::Disabled);
        assert!("threads".parse::<SchedulingMode>().is_err());
    }
}
