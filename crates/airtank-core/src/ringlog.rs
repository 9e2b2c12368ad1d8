//! Fixed-capacity circular log of fixed-size binary records.
//!
//! Storage is a single byte buffer allocated at construction; records are
//! encoded into their slot on append and decoded on read. Index 0 is always
//! the most recently appended record.

use crate::clock::Timestamp;
use crate::error::ExportError;
use crate::lock::{LockMode, ReentrantLock, ReentrantLockGuard};
use serde::Serialize;
use std::cell::RefCell;
use std::io::Write;
use std::marker::PhantomData;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A record with a fixed binary encoding.
pub trait FixedSize: Copy {
    /// Encoded length in bytes.
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes long.
    fn encode(&self, out: &mut [u8]);

    /// Decode from `bytes`, which is exactly `SIZE` bytes long.
    fn decode(bytes: &[u8]) -> Self;
}

/// How an export shares the log with other lock users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPolicy {
    /// Hold the log lock for the whole export.
    Blocking,
    /// Release the lock and yield to the scheduler between records.
    Yielding,
}

struct Ring {
    bytes: Box<[u8]>,
    record_size: usize,
    capacity: usize,
    end_index: usize,
    count: usize,
    /// Records ever appended; never wraps in practice.
    appended: u64,
}

impl Ring {
    fn new(capacity: usize, record_size: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity * record_size].into_boxed_slice(),
            record_size,
            capacity,
            end_index: capacity - 1,
            count: 0,
            appended: 0,
        }
    }

    fn slot(&self, index: usize) -> &[u8] {
        let physical = (self.end_index + self.capacity - index) % self.capacity;
        let start = physical * self.record_size;
        &self.bytes[start..start + self.record_size]
    }

    fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        let physical = (self.end_index + self.capacity - index) % self.capacity;
        let start = physical * self.record_size;
        &mut self.bytes[start..start + self.record_size]
    }

    fn push(&mut self) -> &mut [u8] {
        self.end_index = (self.end_index + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
        self.appended += 1;
        self.slot_mut(0)
    }
}

/// Keeps a log locked across several calls. Calls made through the log while
/// a hold is alive re-enter the same lock.
#[must_use = "the log is unlocked as soon as the hold is dropped"]
pub struct LogHold<'a> {
    _guard: ReentrantLockGuard<'a, RefCell<Ring>>,
}

pub struct RingLog<T: FixedSize> {
    ring: ReentrantLock<RefCell<Ring>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: FixedSize> RingLog<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, mode: LockMode) -> Self {
        assert!(capacity > 0, "RingLog capacity must be non-zero");
        Self {
            ring: ReentrantLock::new(mode, RefCell::new(Ring::new(capacity, T::SIZE))),
            _record: PhantomData,
        }
    }

    pub fn hold(&self) -> LogHold<'_> {
        LogHold {
            _guard: self.ring.acquire(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.acquire().borrow().capacity
    }

    pub fn len(&self) -> usize {
        self.ring.acquire().borrow().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record, overwriting the oldest one once the log is full.
    pub fn log(&self, record: T) {
        let guard = self.ring.acquire();
        let mut ring = guard.borrow_mut();
        record.encode(ring.push());
    }

    /// Record at logical index `index` (0 = newest).
    pub fn get(&self, index: usize) -> Option<T> {
        let guard = self.ring.acquire();
        let ring = guard.borrow();
        (index < ring.count).then(|| T::decode(ring.slot(index)))
    }

    /// Rewrite a populated record in place. Returns false when `index` is
    /// outside the populated range.
    pub fn set(&self, index: usize, record: T) -> bool {
        let guard = self.ring.acquire();
        let mut ring = guard.borrow_mut();
        if index >= ring.count {
            return false;
        }
        record.encode(ring.slot_mut(index));
        true
    }

    /// Visit every retained record newest-first under one lock acquisition.
    pub fn scan(&self, mut visit: impl FnMut(&T)) {
        let guard = self.ring.acquire();
        let ring = guard.borrow();
        for index in 0..ring.count {
            visit(&T::decode(ring.slot(index)));
        }
    }

    /// Retained records, newest-first.
    pub fn records(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        self.scan(|record| out.push(*record));
        out
    }
}

impl<T: FixedSize + Serialize> RingLog<T> {
    /// Stream every record whose `key` is at least `since` as comma-separated
    /// JSON values, holding the lock throughout. Returns the number written.
    pub fn export<W: Write>(
        &self,
        writer: &mut W,
        since: Timestamp,
        key: impl Fn(&T) -> Timestamp,
    ) -> Result<usize, ExportError> {
        let guard = self.ring.acquire();
        let ring = guard.borrow();
        let mut written = 0;
        for index in 0..ring.count {
            let record = T::decode(ring.slot(index));
            if key(&record) < since {
                continue;
            }
            if written > 0 {
                writer.write_all(b",")?;
            }
            serde_json::to_writer(&mut *writer, &record)?;
            written += 1;
        }
        Ok(written)
    }

    /// Like [`export`](Self::export) but takes the lock once per record and
    /// yields between records, so a long export never starves the control
    /// tick.
    ///
    /// Positions are tracked against the append count taken when the export
    /// starts: records appended mid-export are skipped and never shift an
    /// already-written record back into view. Records overwritten before the
    /// export reaches them are dropped from the output.
    pub async fn export_yielding<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        since: Timestamp,
        key: impl Fn(&T) -> Timestamp,
    ) -> Result<usize, ExportError> {
        let origin = self.ring.acquire().borrow().appended;
        let mut written = 0;
        let mut encoded = Vec::with_capacity(64);
        let mut index = 0;
        while let Some(record) = self.get_since_origin(index, origin) {
            index += 1;
            if key(&record) < since {
                continue;
            }
            encoded.clear();
            if written > 0 {
                encoded.push(b',');
            }
            serde_json::to_writer(&mut encoded, &record)?;
            writer.write_all(&encoded).await?;
            written += 1;
            tokio::task::yield_now().await;
        }
        Ok(written)
    }

    /// Record `index` places behind the newest record as of append count
    /// `origin`, or `None` once that record is no longer retained.
    fn get_since_origin(&self, index: usize, origin: u64) -> Option<T> {
        let guard = self.ring.acquire();
        let ring = guard.borrow();
        let shift = usize::try_from(ring.appended - origin).ok()?;
        let logical = index.checked_add(shift)?;
        (logical < ring.count).then(|| T::decode(ring.slot(logical)))
    }

    pub async fn export_with<W: Write + AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        since: Timestamp,
        key: impl Fn(&T) -> Timestamp,
        policy: ExportPolicy,
    ) -> Result<usize, ExportError> {
        match policy {
            ExportPolicy::Blocking => self.export(writer, since, key),
            ExportPolicy::Yielding => self.export_yielding(writer, since, key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Serialize)]
    struct Sample {
        time: u32,
        value: u16,
    }

    impl FixedSize for Sample {
        const SIZE: usize = 6;

        fn encode(&self, out: &mut [u8]) {
            out[..4].copy_from_slice(&self.time.to_le_bytes());
            out[4..].copy_from_slice(&self.value.to_le_bytes());
        }

        fn decode(bytes: &[u8]) -> Self {
            Self {
                time: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                value: u16::from_le_bytes([bytes[4], bytes[5]]),
            }
        }
    }

    fn sample(time: u32) -> Sample {
        Sample {
            time,
            value: (time * 3) as u16,
        }
    }

    #[test]
    fn newest_first_before_wrap() {
        let log = RingLog::new(4, LockMode::Threaded);
        assert!(log.is_empty());
        log.log(sample(1));
        log.log(sample(2));
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0), Some(sample(2)));
        assert_eq!(log.get(1), Some(sample(1)));
        assert_eq!(log.get(2), None);
    }

    #[test]
    fn wraps_and_keeps_capacity() {
        let log = RingLog::new(3, LockMode::Threaded);
        for t in 1..=7 {
            log.log(sample(t));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.capacity(), 3);
        assert_eq!(log.records(), vec![sample(7), sample(6), sample(5)]);
    }

    #[test]
    fn set_only_touches_populated_slots() {
        let log = RingLog::new(3, LockMode::Threaded);
        log.log(sample(1));
        assert!(log.set(0, sample(9)));
        assert!(!log.set(1, sample(10)));
        assert_eq!(log.get(0), Some(sample(9)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn export_filters_and_separates() {
        let log = RingLog::new(5, LockMode::Threaded);
        for t in [10, 20, 30] {
            log.log(sample(t));
        }
        let mut out = Vec::new();
        let written = log.export(&mut out, 20, |s| s.time as u64).unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{"time":30,"value":90},{"time":20,"value":60}"#
        );
    }

    #[test]
    fn export_of_empty_log_writes_nothing() {
        let log: RingLog<Sample> = RingLog::new(2, LockMode::Threaded);
        let mut out = Vec::new();
        assert_eq!(log.export(&mut out, 0, |s| s.time as u64).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn yielding_export_matches_blocking_export() {
        let log = RingLog::new(8, LockMode::Threaded);
        for t in 1..=12 {
            log.log(sample(t));
        }
        let mut blocking = Vec::new();
        log.export(&mut blocking, 6, |s| s.time as u64).unwrap();

        let mut yielding = Vec::new();
        let written = log
            .export_with(&mut yielding, 6, |s| s.time as u64, ExportPolicy::Yielding)
            .await
            .unwrap();
        assert_eq!(written, 7);
        assert_eq!(blocking, yielding);
    }

    /// Writer that runs `on_write` before accepting each chunk, standing in
    /// for a tick that appends while an export is in flight.
    struct AppendOnWrite<F> {
        out: Vec<u8>,
        on_write: F,
    }

    impl<F: FnMut() + Unpin> AsyncWrite for AppendOnWrite<F> {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            let this = self.get_mut();
            (this.on_write)();
            this.out.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    fn exported_times(out: &[u8]) -> Vec<u64> {
        let values: Vec<serde_json::Value> =
            serde_json::from_str(&format!("[{}]", String::from_utf8_lossy(out))).unwrap();
        values.iter().map(|v| v["time"].as_u64().unwrap()).collect()
    }

    #[tokio::test]
    async fn yielding_export_skips_records_appended_mid_export() {
        let log = RingLog::new(8, LockMode::Threaded);
        for t in [10, 20, 30] {
            log.log(sample(t));
        }
        let mut next = 40;
        let mut writer = AppendOnWrite {
            out: Vec::new(),
            on_write: || {
                log.log(sample(next));
                next += 10;
            },
        };
        let written = log
            .export_yielding(&mut writer, 0, |s| s.time as u64)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(exported_times(&writer.out), vec![30, 20, 10]);
        assert_eq!(log.len(), 6);
    }

    #[tokio::test]
    async fn yielding_export_of_full_ring_never_repeats_a_record() {
        let log = RingLog::new(3, LockMode::Threaded);
        for t in [10, 20, 30] {
            log.log(sample(t));
        }
        let mut next = 40;
        let mut writer = AppendOnWrite {
            out: Vec::new(),
            on_write: || {
                log.log(sample(next));
                next += 10;
            },
        };
        let written = log
            .export_yielding(&mut writer, 0, |s| s.time as u64)
            .await
            .unwrap();
        // 10 is overwritten by the first append and 20 by the second, after
        // it was written.
        assert_eq!(written, 2);
        assert_eq!(exported_times(&writer.out), vec![30, 20]);
        assert_eq!(log.records(), vec![sample(50), sample(40), sample(30)]);
    }

    #[test]
    fn hold_allows_nested_access() {
        let log = RingLog::new(2, LockMode::Threaded);
        let _hold = log.hold();
        log.log(sample(1));
        assert_eq!(log.get(0), Some(sample(1)));
    }
}
