//! Log Ring
//!
//! A bounded circular buffer of recent log lines, wrapped around whatever
//! logging a product already has. Its job is to carry the breadcrumbs that
//! led up to a crash: the ring can be captured into a coredump region or
//! frozen and drained to the backend as a log-collection event.

pub mod compact;

use core::fmt::Write as _;

use crate::config::MAX_LOG_LINE_LEN;
use crate::platform::CriticalSection;
use crate::util::base64;
use crate::util::circular::CircularBuffer;

/// Severity of a saved line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl LogLevel {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            _ => LogLevel::Error,
        }
    }
}

/// How the record payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    /// Ready-to-print text.
    Preformatted = 0,
    /// Binary compact-log payload; the backend owns the format string.
    Compact = 1,
}

// Record framing inside the ring: a two byte header then the payload.
// byte 0: level in bits 0-1, record type in bit 3
// byte 1: payload length
const RECORD_HDR_LEN: usize = 2;
const TYPE_BIT: u8 = 1 << 3;

/// A copy of one saved line, returned by [`LogBuffer::read`].
#[derive(Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub record_type: LogRecordType,
    len: usize,
    buf: [u8; MAX_LOG_LINE_LEN],
}

impl LogEntry {
    pub fn message(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Prefix and suffix wrapped around a base64 compact log when exporting
/// over a console.
const EXPORT_PREFIX: &[u8] = b"ML:";
const EXPORT_SUFFIX: &[u8] = b":";

/// The bounded log ring. One per system, bound to a caller-supplied buffer
/// at boot.
pub struct LogBuffer<'a, CS: CriticalSection + Clone> {
    ring: CircularBuffer<'a>,
    cs: CS,
    min_save_level: LogLevel,
    /// Bytes already handed out through `read`, measured from the oldest
    /// committed byte.
    read_offset: usize,
    /// Committed length at freeze time; `None` when not frozen.
    frozen_len: Option<usize>,
    /// Lines dropped while the ring was frozen or the line was oversized.
    dropped: u32,
}

impl<'a, CS: CriticalSection + Clone> LogBuffer<'a, CS> {
    /// Binds the ring to `buf`. More space means a longer trail of
    /// breadcrumbs at crash time.
    pub fn boot(buf: &'a mut [u8], cs: CS) -> Self {
        Self {
            ring: CircularBuffer::new(buf),
            cs,
            min_save_level: LogLevel::Info,
            read_offset: 0,
            frozen_len: None,
            dropped: 0,
        }
    }

    /// Lines below `level` are not saved. Defaults to `Info`.
    pub fn set_min_save_level(&mut self, level: LogLevel) {
        self.min_save_level = level;
    }

    /// Saves an already-formatted line, serialized against other writers
    /// by the platform critical section.
    pub fn save_preformatted(&mut self, level: LogLevel, msg: &[u8]) {
        let cs = self.cs.clone();
        cs.with_lock(|| self.save_record(level, LogRecordType::Preformatted, msg));
    }

    /// ISR variant of [`LogBuffer::save_preformatted`]: no lock is taken.
    /// Only safe where the caller already excludes all other writers.
    pub fn save_preformatted_nolock(&mut self, level: LogLevel, msg: &[u8]) {
        self.save_record(level, LogRecordType::Preformatted, msg);
    }

    /// Saves an encoded compact-log payload.
    pub fn save_compact(&mut self, level: LogLevel, payload: &[u8]) {
        let cs = self.cs.clone();
        cs.with_lock(|| self.save_record(level, LogRecordType::Compact, payload));
    }

    fn save_record(&mut self, level: LogLevel, record_type: LogRecordType, msg: &[u8]) {
        if level < self.min_save_level {
            return;
        }
        let msg = &msg[..msg.len().min(MAX_LOG_LINE_LEN)];
        let needed = RECORD_HDR_LEN + msg.len();
        if needed > self.ring.capacity() {
            self.dropped = self.dropped.saturating_add(1);
            return;
        }

        if self.frozen_len.is_some() {
            // frozen contents are spoken for until the export finishes;
            // only spare room may be used
            if self.ring.free() < needed {
                self.dropped = self.dropped.saturating_add(1);
                return;
            }
        } else {
            self.flush_dropped_notice();
            while self.ring.free() < needed {
                self.evict_oldest();
            }
        }

        let hdr = [(level as u8) | ((record_type as u8) << 3), msg.len() as u8];
        // capacity was made above, neither push can fail
        let _ = self.ring.push(&hdr);
        let _ = self.ring.push(msg);
    }

    /// Replaces an accumulated drop count with a single marker line so the
    /// gap is visible in the collected logs.
    fn flush_dropped_notice(&mut self) {
        if self.dropped == 0 {
            return;
        }
        let mut line: heapless::String<32> = heapless::String::new();
        let _ = write!(line, "... {} logs dropped!", self.dropped);
        self.dropped = 0;

        let needed = RECORD_HDR_LEN + line.len();
        while self.ring.free() < needed {
            self.evict_oldest();
        }
        let hdr = [
            (LogLevel::Warning as u8) | ((LogRecordType::Preformatted as u8) << 3),
            line.len() as u8,
        ];
        let _ = self.ring.push(&hdr);
        let _ = self.ring.push(line.as_bytes());
    }

    fn evict_oldest(&mut self) {
        let mut hdr = [0u8; RECORD_HDR_LEN];
        if self.ring.read_at(0, &mut hdr) < RECORD_HDR_LEN {
            self.ring.clear();
            self.read_offset = 0;
            return;
        }
        let record_len = RECORD_HDR_LEN + hdr[1] as usize;
        self.ring.consume(record_len);
        self.read_offset = self.read_offset.saturating_sub(record_len);
    }

    fn record_at(&self, offset: usize) -> Option<(LogEntry, usize)> {
        let mut hdr = [0u8; RECORD_HDR_LEN];
        if self.ring.read_at(offset, &mut hdr) < RECORD_HDR_LEN {
            return None;
        }
        let len = hdr[1] as usize;
        let mut entry = LogEntry {
            level: LogLevel::from_bits(hdr[0]),
            record_type: if hdr[0] & TYPE_BIT != 0 {
                LogRecordType::Compact
            } else {
                LogRecordType::Preformatted
            },
            len,
            buf: [0; MAX_LOG_LINE_LEN],
        };
        if self.ring.read_at(offset + RECORD_HDR_LEN, &mut entry.buf[..len]) < len {
            return None;
        }
        Some((entry, RECORD_HDR_LEN + len))
    }

    /// Returns the oldest line not yet read. Entries stay in the ring
    /// (they may still be wanted by a crash capture); the read cursor just
    /// advances past them.
    pub fn read(&mut self) -> Option<LogEntry> {
        let (entry, consumed) = self.record_at(self.read_offset)?;
        self.read_offset += consumed;
        Some(entry)
    }

    /// Freezes the current contents in preparation for an upload. While
    /// frozen, eviction stops; new lines still land if spare room remains,
    /// otherwise they are counted as dropped.
    pub fn trigger_collection(&mut self) {
        if self.frozen_len.is_none() && self.ring.len() > 0 {
            self.frozen_len = Some(self.ring.len());
        }
    }

    /// Bytes pinned by [`LogBuffer::trigger_collection`], if a collection
    /// is pending.
    pub fn frozen_len(&self) -> Option<usize> {
        self.frozen_len
    }

    /// Iterates the frozen records.
    pub fn frozen_records(&self) -> FrozenRecords<'_, 'a, CS> {
        FrozenRecords { logs: self, offset: 0, end: self.frozen_len.unwrap_or(0) }
    }

    /// Releases the frozen region after a successful upload, dropping
    /// those records from the ring.
    pub fn mark_collected(&mut self) {
        if let Some(frozen) = self.frozen_len.take() {
            self.ring.consume(frozen);
            self.read_offset = self.read_offset.saturating_sub(frozen);
        }
    }

    /// Drains every unread line through `out`. Compact records are wrapped
    /// as `ML:<base64>:` so a console scraper can relay them.
    pub fn export_logs(&mut self, out: &mut dyn FnMut(LogLevel, &[u8])) {
        while let Some(entry) = self.read() {
            match entry.record_type {
                LogRecordType::Preformatted => out(entry.level, entry.message()),
                LogRecordType::Compact => {
                    let mut line = [0u8; EXPORT_PREFIX.len()
                        + base64::encoded_len(MAX_LOG_LINE_LEN)
                        + EXPORT_SUFFIX.len()];
                    let mut n = 0;
                    line[..EXPORT_PREFIX.len()].copy_from_slice(EXPORT_PREFIX);
                    n += EXPORT_PREFIX.len();
                    n += base64::encode(entry.message(), &mut line[n..]);
                    line[n..n + EXPORT_SUFFIX.len()].copy_from_slice(EXPORT_SUFFIX);
                    n += EXPORT_SUFFIX.len();
                    out(entry.level, &line[..n]);
                }
            }
        }
    }

    /// Unread bytes currently queued (diagnostic).
    pub fn unread_len(&self) -> usize {
        self.ring.len() - self.read_offset
    }
}

/// Iterator over the records pinned by a pending collection.
#[derive(Clone)]
pub struct FrozenRecords<'s, 'a, CS: CriticalSection + Clone> {
    logs: &'s LogBuffer<'a, CS>,
    offset: usize,
    end: usize,
}

impl<'s, 'a, CS: CriticalSection + Clone> Iterator for FrozenRecords<'s, 'a, CS> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        if self.offset >= self.end {
            return None;
        }
        let (entry, consumed) = self.logs.record_at(self.offset)?;
        self.offset += consumed;
        Some(entry)
    }
}
