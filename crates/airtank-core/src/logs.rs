//! The three compressor logs built on [`RingLog`].
//!
//! - [`EventLog`]: open/close bracketed activity intervals (motor running,
//!   purging). Feeds the duty-cycle governor.
//! - [`CommandLog`]: audit trail of externally triggered commands.
//! - [`StateLog`]: rate-limited periodic state snapshots. Feeds the
//!   pressure-trend fit.

use crate::clock::Timestamp;
use crate::error::{ExportError, RegressionError};
use crate::lock::LockMode;
use crate::regression::{LineFit, LinearRegression};
use crate::ringlog::{FixedSize, RingLog};
use serde::{Serialize, Serializer};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWrite;

/// Stop time of an entry that has not been closed yet.
pub const OPEN_STOP: Timestamp = Timestamp::MAX;

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

fn read_f32(bytes: &[u8]) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    f32::from_le_bytes(raw)
}

// ============================================================================
// Event log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Run,
    Purge,
}

impl EventKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Run => b'R',
            Self::Purge => b'P',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'R' => Some(Self::Run),
            b'P' => Some(Self::Purge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventLogEntry {
    pub start: Timestamp,
    #[serde(serialize_with = "serialize_stop")]
    pub stop: Timestamp,
    pub kind: EventKind,
}

fn serialize_stop<S: Serializer>(stop: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
    if *stop == OPEN_STOP {
        serializer.serialize_none()
    } else {
        serializer.serialize_some(stop)
    }
}

impl EventLogEntry {
    pub fn is_open(&self) -> bool {
        self.stop == OPEN_STOP
    }

    /// Seconds of this entry that fall inside `[window_start, now)`.
    pub fn overlap(&self, window_start: Timestamp, now: Timestamp) -> u64 {
        let start = self.start.max(window_start);
        let stop = self.stop.min(now);
        stop.saturating_sub(start)
    }
}

impl FixedSize for EventLogEntry {
    const SIZE: usize = 17;

    fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.start.to_le_bytes());
        out[8..16].copy_from_slice(&self.stop.to_le_bytes());
        out[16] = self.kind.code();
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            start: read_u64(&bytes[0..8]),
            stop: read_u64(&bytes[8..16]),
            // Slots are only ever written by `encode`.
            kind: EventKind::from_code(bytes[16]).unwrap_or(EventKind::Run),
        }
    }
}

pub struct EventLog {
    ring: RingLog<EventLogEntry>,
}

impl EventLog {
    pub fn new(capacity: usize, mode: LockMode) -> Self {
        Self {
            ring: RingLog::new(capacity, mode),
        }
    }

    pub fn ring(&self) -> &RingLog<EventLogEntry> {
        &self.ring
    }

    /// Start a new interval. An interval that is still open is closed at
    /// `now` first, so at most one entry is ever open.
    pub fn open(&self, kind: EventKind, now: Timestamp) {
        let _hold = self.ring.hold();
        self.close(now);
        self.ring.log(EventLogEntry {
            start: now,
            stop: OPEN_STOP,
            kind,
        });
        log::debug!("event log: opened {:?} at {}", kind, now);
    }

    /// Close the open interval, if any. Returns the closed entry.
    pub fn close(&self, now: Timestamp) -> Option<EventLogEntry> {
        let _hold = self.ring.hold();
        let mut entry = self.ring.get(0).filter(EventLogEntry::is_open)?;
        entry.stop = now.max(entry.start);
        self.ring.set(0, entry);
        log::debug!(
            "event log: closed {:?} after {}s",
            entry.kind,
            entry.stop - entry.start
        );
        Some(entry)
    }

    /// Close the open interval only if it is of `kind`.
    pub fn close_if(&self, kind: EventKind, now: Timestamp) -> Option<EventLogEntry> {
        let _hold = self.ring.hold();
        if self.open_kind() == Some(kind) {
            self.close(now)
        } else {
            None
        }
    }

    pub fn open_kind(&self) -> Option<EventKind> {
        self.ring
            .get(0)
            .filter(EventLogEntry::is_open)
            .map(|entry| entry.kind)
    }

    /// Fraction of `[now - duration, now)` covered by Run entries. Entries are
    /// clamped one by one, so ordering across the wrap point does not matter.
    pub fn duty(&self, now: Timestamp, duration: u64) -> f64 {
        if duration == 0 {
            return 0.0;
        }
        let window_start = now.saturating_sub(duration);
        let mut running = 0u64;
        self.ring.scan(|entry| {
            if entry.kind == EventKind::Run {
                running += entry.overlap(window_start, now);
            }
        });
        running as f64 / duration as f64
    }

    /// Total Run seconds across the retained log and the oldest retained
    /// start time.
    pub fn runtime(&self, now: Timestamp) -> (u64, Option<Timestamp>) {
        let mut total = 0u64;
        let mut oldest: Option<Timestamp> = None;
        self.ring.scan(|entry| {
            if entry.kind == EventKind::Run {
                total += entry.overlap(0, now);
            }
            oldest = Some(oldest.map_or(entry.start, |t| t.min(entry.start)));
        });
        (total, oldest)
    }

    /// Entries that ended at or after `since`. Open entries always match.
    pub fn export<W: Write>(&self, writer: &mut W, since: Timestamp) -> Result<usize, ExportError> {
        self.ring.export(writer, since, |entry| entry.stop)
    }

    pub async fn export_yielding<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        since: Timestamp,
    ) -> Result<usize, ExportError> {
        self.ring
            .export_yielding(writer, since, |entry| entry.stop)
            .await
    }
}

// ============================================================================
// Command log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    On,
    Off,
    Run,
    Pause,
    Purge,
}

impl CommandKind {
    pub fn code(self) -> u8 {
        match self {
            Self::On => b'O',
            Self::Off => b'F',
            Self::Run => b'R',
            Self::Pause => b'|',
            Self::Purge => b'P',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'O' => Some(Self::On),
            b'F' => Some(Self::Off),
            b'R' => Some(Self::Run),
            b'|' => Some(Self::Pause),
            b'P' => Some(Self::Purge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandLogEntry {
    pub time: Timestamp,
    pub command: CommandKind,
}

impl FixedSize for CommandLogEntry {
    const SIZE: usize = 9;

    fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.time.to_le_bytes());
        out[8] = self.command.code();
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            time: read_u64(&bytes[0..8]),
            // Slots are only ever written by `encode`.
            command: CommandKind::from_code(bytes[8]).unwrap_or(CommandKind::Run),
        }
    }
}

pub struct CommandLog {
    ring: RingLog<CommandLogEntry>,
}

impl CommandLog {
    pub fn new(capacity: usize, mode: LockMode) -> Self {
        Self {
            ring: RingLog::new(capacity, mode),
        }
    }

    pub fn ring(&self) -> &RingLog<CommandLogEntry> {
        &self.ring
    }

    pub fn log_command(&self, command: CommandKind, now: Timestamp) {
        self.ring.log(CommandLogEntry { time: now, command });
        log::info!("command: {:?}", command);
    }

    pub fn export<W: Write>(&self, writer: &mut W, since: Timestamp) -> Result<usize, ExportError> {
        self.ring.export(writer, since, |entry| entry.time)
    }

    pub async fn export_yielding<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        since: Timestamp,
    ) -> Result<usize, ExportError> {
        self.ring
            .export_yielding(writer, since, |entry| entry.time)
            .await
    }
}

// ============================================================================
// State log
// ============================================================================

/// Three-character state summary: enabled flag, motor state, purge flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateTag(pub [u8; 3]);

impl StateTag {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl Serialize for StateTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateLogEntry {
    pub time: Timestamp,
    pub tank_pressure: Option<f32>,
    pub line_pressure: Option<f32>,
    pub duty: f32,
    pub state: StateTag,
}

fn encode_reading(reading: Option<f32>) -> [u8; 4] {
    reading.unwrap_or(f32::NAN).to_le_bytes()
}

fn decode_reading(bytes: &[u8]) -> Option<f32> {
    Some(read_f32(bytes)).filter(|value| !value.is_nan())
}

impl FixedSize for StateLogEntry {
    const SIZE: usize = 23;

    fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.time.to_le_bytes());
        out[8..12].copy_from_slice(&encode_reading(self.tank_pressure));
        out[12..16].copy_from_slice(&encode_reading(self.line_pressure));
        out[16..20].copy_from_slice(&self.duty.to_le_bytes());
        out[20..23].copy_from_slice(&self.state.0);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            time: read_u64(&bytes[0..8]),
            tank_pressure: decode_reading(&bytes[8..12]),
            line_pressure: decode_reading(&bytes[12..16]),
            duty: read_f32(&bytes[16..20]),
            state: StateTag([bytes[20], bytes[21], bytes[22]]),
        }
    }
}

const NEVER_LOGGED: Timestamp = Timestamp::MAX;

pub struct StateLog {
    ring: RingLog<StateLogEntry>,
    last_log_time: AtomicU64,
}

impl StateLog {
    pub fn new(capacity: usize, mode: LockMode) -> Self {
        Self {
            ring: RingLog::new(capacity, mode),
            last_log_time: AtomicU64::new(NEVER_LOGGED),
        }
    }

    pub fn ring(&self) -> &RingLog<StateLogEntry> {
        &self.ring
    }

    /// Append `entry` unless the previous append was less than `interval`
    /// seconds ago. Returns whether the entry was logged.
    pub fn log_state(&self, entry: StateLogEntry, interval: u64) -> bool {
        let _hold = self.ring.hold();
        let last = self.last_log_time.load(Ordering::Relaxed);
        if last != NEVER_LOGGED && entry.time.saturating_sub(last) < interval {
            return false;
        }
        self.last_log_time.store(entry.time, Ordering::Relaxed);
        self.ring.log(entry);
        true
    }

    /// Span of time a full log covers at the given logging interval.
    pub fn max_duration(&self, interval: u64) -> u64 {
        interval * self.ring.capacity() as u64
    }

    /// Least-squares fit of tank pressure against time over the entries at or
    /// after `since`. Entries with a faulted tank reading are skipped.
    pub fn pressure_fit(&self, since: Timestamp) -> Result<LineFit, RegressionError> {
        let mut regression = LinearRegression::new();
        self.ring.scan(|entry| {
            if entry.time < since {
                return;
            }
            if let Some(pressure) = entry.tank_pressure {
                regression.add(entry.time as f64, pressure as f64);
            }
        });
        regression.fit()
    }

    pub fn export<W: Write>(&self, writer: &mut W, since: Timestamp) -> Result<usize, ExportError> {
        self.ring.export(writer, since, |entry| entry.time)
    }

    pub async fn export_yielding<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        since: Timestamp,
    ) -> Result<usize, ExportError> {
        self.ring
            .export_yielding(writer, since, |entry| entry.time)
            .await
    }
}
