//! Event Encoding
//!
//! Events travel as CBOR maps keyed by small integers. The encoder writes
//! through a sink closure so the same builder can size an event (counting
//! sink), stage it into event storage, or re-materialize an arbitrary
//! window of it for the transport (windowing sink) without ever holding
//! the whole encoding in RAM.

use crate::error::Result;
use crate::logs::{LogEntry, LogLevel, LogRecordType};
use crate::platform::DeviceInfo;
use crate::reboot::ResetInfo;

// Envelope keys.
const KEY_SCHEMA_VERSION: u64 = 1;
const KEY_EVENT_KIND: u64 = 2;
const KEY_DEVICE_SERIAL: u64 = 3;
const KEY_SOFTWARE_TYPE: u64 = 4;
const KEY_SOFTWARE_VERSION: u64 = 5;
const KEY_HARDWARE_VERSION: u64 = 6;
const KEY_CAPTURED_AT_MS: u64 = 7;
const KEY_PAYLOAD: u64 = 8;

const SCHEMA_VERSION: u64 = 1;

// Reboot payload keys.
const REBOOT_KEY_REASON: u64 = 1;
const REBOOT_KEY_PC: u64 = 2;
const REBOOT_KEY_LR: u64 = 3;
const REBOOT_KEY_RESET_REG: u64 = 4;

// Trace payload keys.
const TRACE_KEY_REASON: u64 = 1;
const TRACE_KEY_PC: u64 = 2;
const TRACE_KEY_LR: u64 = 3;
const TRACE_KEY_LOG: u64 = 4;

/// Kind discriminator carried in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Reboot = 1,
    Trace = 2,
    Heartbeat = 3,
    LogCollection = 4,
}

/// One heartbeat metric sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Unsigned(u64),
    Signed(i64),
}

/// Minimal CBOR writer: definite lengths only, which is all the backend
/// accepts.
pub struct CborEncoder<'a> {
    sink: &'a mut dyn FnMut(&[u8]) -> Result<()>,
}

impl<'a> CborEncoder<'a> {
    pub fn new(sink: &'a mut dyn FnMut(&[u8]) -> Result<()>) -> Self {
        Self { sink }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        (self.sink)(bytes)
    }

    fn put_type_and_len(&mut self, major: u8, value: u64) -> Result<()> {
        let major = major << 5;
        if value < 24 {
            self.put(&[major | value as u8])
        } else if value <= u8::MAX as u64 {
            self.put(&[major | 24, value as u8])
        } else if value <= u16::MAX as u64 {
            let b = (value as u16).to_be_bytes();
            self.put(&[major | 25, b[0], b[1]])
        } else if value <= u32::MAX as u64 {
            let b = (value as u32).to_be_bytes();
            self.put(&[major | 26, b[0], b[1], b[2], b[3]])
        } else {
            let b = value.to_be_bytes();
            self.put(&[major | 27, b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        }
    }

    pub fn uint(&mut self, value: u64) -> Result<()> {
        self.put_type_and_len(0, value)
    }

    pub fn int(&mut self, value: i64) -> Result<()> {
        if value >= 0 {
            self.uint(value as u64)
        } else {
            self.put_type_and_len(1, (-1 - value) as u64)
        }
    }

    pub fn bytes(&mut self, value: &[u8]) -> Result<()> {
        self.put_type_and_len(2, value.len() as u64)?;
        self.put(value)
    }

    pub fn text(&mut self, value: &str) -> Result<()> {
        self.put_type_and_len(3, value.len() as u64)?;
        self.put(value.as_bytes())
    }

    pub fn array(&mut self, len: u64) -> Result<()> {
        self.put_type_and_len(4, len)
    }

    pub fn map(&mut self, pairs: u64) -> Result<()> {
        self.put_type_and_len(5, pairs)
    }
}

/// Context shared by every envelope.
pub struct EventContext<'a> {
    pub device_info: &'a DeviceInfo,
    pub captured_at_ms: u64,
}

fn encode_envelope(
    enc: &mut CborEncoder<'_>,
    ctx: &EventContext<'_>,
    kind: EventKind,
) -> Result<()> {
    enc.map(8)?;
    enc.uint(KEY_SCHEMA_VERSION)?;
    enc.uint(SCHEMA_VERSION)?;
    enc.uint(KEY_EVENT_KIND)?;
    enc.uint(kind as u64)?;
    enc.uint(KEY_DEVICE_SERIAL)?;
    enc.text(ctx.device_info.device_serial.as_str())?;
    enc.uint(KEY_SOFTWARE_TYPE)?;
    enc.text(ctx.device_info.software_type.as_str())?;
    enc.uint(KEY_SOFTWARE_VERSION)?;
    enc.text(ctx.device_info.software_version.as_str())?;
    enc.uint(KEY_HARDWARE_VERSION)?;
    enc.text(ctx.device_info.hardware_version.as_str())?;
    enc.uint(KEY_CAPTURED_AT_MS)?;
    enc.uint(ctx.captured_at_ms)?;
    enc.uint(KEY_PAYLOAD)
    // the caller emits the payload value next
}

/// Serializes the reboot event published on the boot after a reset.
pub fn encode_reboot_event(
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ctx: &EventContext<'_>,
    reset_info: &ResetInfo,
) -> Result<()> {
    let mut enc = CborEncoder::new(sink);
    encode_envelope(&mut enc, ctx, EventKind::Reboot)?;
    enc.map(4)?;
    enc.uint(REBOOT_KEY_REASON)?;
    enc.uint(reset_info.reason.code() as u64)?;
    enc.uint(REBOOT_KEY_PC)?;
    enc.uint(reset_info.pc as u64)?;
    enc.uint(REBOOT_KEY_LR)?;
    enc.uint(reset_info.lr as u64)?;
    enc.uint(REBOOT_KEY_RESET_REG)?;
    enc.uint(reset_info.reset_reason_reg as u64)
}

/// Serializes a trace event: a single-point observation with optional log
/// text.
pub fn encode_trace_event(
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ctx: &EventContext<'_>,
    reason: u16,
    pc: u32,
    lr: u32,
    log: Option<&str>,
) -> Result<()> {
    let mut enc = CborEncoder::new(sink);
    encode_envelope(&mut enc, ctx, EventKind::Trace)?;
    let pairs = if log.is_some() { 4 } else { 3 };
    enc.map(pairs)?;
    enc.uint(TRACE_KEY_REASON)?;
    enc.uint(reason as u64)?;
    enc.uint(TRACE_KEY_PC)?;
    enc.uint(pc as u64)?;
    enc.uint(TRACE_KEY_LR)?;
    enc.uint(lr as u64)?;
    if let Some(log) = log {
        enc.uint(TRACE_KEY_LOG)?;
        enc.text(log)?;
    }
    Ok(())
}

/// Serializes a heartbeat: a fixed set of metric ids and values.
pub fn encode_heartbeat_event(
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ctx: &EventContext<'_>,
    metrics: &[(u32, MetricValue)],
) -> Result<()> {
    let mut enc = CborEncoder::new(sink);
    encode_envelope(&mut enc, ctx, EventKind::Heartbeat)?;
    enc.map(metrics.len() as u64)?;
    for &(id, value) in metrics {
        enc.uint(id as u64)?;
        match value {
            MetricValue::Unsigned(v) => enc.uint(v)?,
            MetricValue::Signed(v) => enc.int(v)?,
        }
    }
    Ok(())
}

/// Serializes the frozen log ring as a log-collection event. `logs` must
/// yield the same records on every call; the transport re-runs the
/// encoder per outgoing window.
pub fn encode_log_collection_event<I>(
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ctx: &EventContext<'_>,
    logs: I,
) -> Result<()>
where
    I: Iterator<Item = LogEntry> + Clone,
{
    let mut enc = CborEncoder::new(sink);
    encode_envelope(&mut enc, ctx, EventKind::LogCollection)?;
    let count = logs.clone().count();
    enc.array(count as u64)?;
    for entry in logs {
        enc.array(3)?;
        enc.uint(level_code(entry.level))?;
        enc.uint(match entry.record_type {
            LogRecordType::Preformatted => 0,
            LogRecordType::Compact => 1,
        })?;
        enc.bytes(entry.message())?;
    }
    Ok(())
}

fn level_code(level: LogLevel) -> u64 {
    level as u64
}

/// Sizes an encoding by running it against a counting sink, without
/// storing a byte.
pub fn encoded_size(
    mut encode: impl FnMut(&mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>,
) -> Result<usize> {
    let mut total = 0usize;
    let mut sink = |bytes: &[u8]| {
        total += bytes.len();
        Ok(())
    };
    encode(&mut sink)?;
    Ok(total)
}

/// Copies the byte window `[offset, offset + out.len())` of an encoding
/// into `out`, discarding everything else. Lets the transport read any
/// slice of an event without buffering the whole thing.
pub struct WindowSink<'b> {
    offset: usize,
    out: &'b mut [u8],
    cursor: usize,
    copied: usize,
}

impl<'b> WindowSink<'b> {
    pub fn new(offset: usize, out: &'b mut [u8]) -> Self {
        Self { offset, out, cursor: 0, copied: 0 }
    }

    pub fn copied(&self) -> usize {
        self.copied
    }

    pub fn accept(&mut self, bytes: &[u8]) -> Result<()> {
        let span_start = self.cursor;
        self.cursor += bytes.len();

        let want_from = self.offset.max(span_start);
        let want_to = (self.offset + self.out.len()).min(self.cursor);
        if want_from < want_to {
            let src = &bytes[want_from - span_start..want_to - span_start];
            let dst_from = want_from - self.offset;
            self.out[dst_from..dst_from + src.len()].copy_from_slice(src);
            self.copied += src.len();
        }
        Ok(())
    }
}
