pub mod clock;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod error;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod lock;
pub mod logs;
pub mod pressure_monitor;
pub mod purge;
pub mod regression;
pub mod ringlog;
pub mod watchdog;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{ControllerConfig, SharedConfig, ValueScale};
pub use control_loop::{run_cooperative, run_purge_driver, spawn_preemptive, LoopStats};
pub use controller::{
    CompressorController, ControllerState, DutyWindow, MotorState, SchedulingMode, StateView,
    TickOutcome,
};
pub use error::{ConfigError, ControlError, ExportError, RegressionError, WatchdogError};
pub use hal::{CompressorIo, OutputLevels};
#[cfg(feature = "simulation")]
pub use hal_sim::{ScriptedIo, SimulatedCompressor};
pub use lock::{LockMode, ReentrantLock, ReentrantLockGuard};
pub use logs::{
    CommandKind, CommandLog, CommandLogEntry, EventKind, EventLog, EventLogEntry, StateLog,
    StateLogEntry, StateTag,
};
pub use pressure_monitor::{MonitorStatus, PressureChangeMonitor};
pub use purge::{PurgePhase, PurgeStep};
pub use regression::{fit_line, LineFit, LinearRegression};
pub use ringlog::{ExportPolicy, FixedSize, RingLog};
pub use watchdog::{HardwareWatchdog, SoftwareWatchdog};
