//! Run-Length Encoder
//!
//! Compresses coredump memory payloads before they hit storage. RAM images
//! are dominated by long zero runs, so even this simple scheme routinely
//! shrinks a dump by half or more.
//!
//! Stream layout: a sequence of spans, each a zigzag varint header
//! followed by data. A negative header value -N means "repeat the next
//! byte N times"; a positive value N means "N literal bytes follow".

use crate::error::Result;
use crate::util::varint;

/// Shortest repeat worth encoding as a run. Below this, the header
/// overhead costs more than the literal bytes.
const MIN_RUN_LEN: usize = 3;

/// Literal bytes buffered before being flushed as a span.
const LITERAL_SPAN_MAX: usize = 64;

fn zigzag(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Streaming encoder. Feed it input in arbitrary pieces and call
/// [`RleEncoder::finish`] once; output is handed to the sink closure in
/// ready-to-write spans.
pub struct RleEncoder {
    run_byte: u8,
    run_len: usize,
    literal: [u8; LITERAL_SPAN_MAX],
    literal_len: usize,
}

impl RleEncoder {
    pub fn new() -> Self {
        Self { run_byte: 0, run_len: 0, literal: [0; LITERAL_SPAN_MAX], literal_len: 0 }
    }

    fn flush_literal(&mut self, sink: &mut impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        if self.literal_len == 0 {
            return Ok(());
        }
        let mut hdr = [0u8; varint::MAX_VARINT_LEN];
        let n = varint::encode_u32(zigzag(self.literal_len as i32), &mut hdr);
        sink(&hdr[..n])?;
        sink(&self.literal[..self.literal_len])?;
        self.literal_len = 0;
        Ok(())
    }

    fn emit_run(&mut self, sink: &mut impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        let mut hdr = [0u8; varint::MAX_VARINT_LEN];
        let n = varint::encode_u32(zigzag(-(self.run_len as i32)), &mut hdr);
        sink(&hdr[..n])?;
        sink(&[self.run_byte])?;
        Ok(())
    }

    /// Retires the pending run, either as a run span or by folding it into
    /// the literal buffer when it is too short to pay for itself.
    fn retire_run(&mut self, sink: &mut impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        if self.run_len >= MIN_RUN_LEN {
            self.flush_literal(sink)?;
            self.emit_run(sink)?;
        } else {
            for _ in 0..self.run_len {
                if self.literal_len == LITERAL_SPAN_MAX {
                    self.flush_literal(sink)?;
                }
                self.literal[self.literal_len] = self.run_byte;
                self.literal_len += 1;
            }
        }
        self.run_len = 0;
        Ok(())
    }

    /// Consumes input bytes, emitting completed spans through `sink`.
    pub fn feed(&mut self, bytes: &[u8], sink: &mut impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        for &b in bytes {
            if self.run_len > 0 && b == self.run_byte && self.run_len < i32::MAX as usize {
                self.run_len += 1;
                continue;
            }
            self.retire_run(sink)?;
            self.run_byte = b;
            self.run_len = 1;
        }
        Ok(())
    }

    /// Flushes whatever is pending. The encoder is reusable afterwards.
    pub fn finish(&mut self, sink: &mut impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        self.retire_run(sink)?;
        self.flush_literal(sink)
    }
}

impl Default for RleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded size of `bytes` without producing output. The coredump writer
/// uses this to frame a block before streaming it.
pub fn encoded_len(bytes: &[u8]) -> usize {
    let mut total = 0usize;
    let mut enc = RleEncoder::new();
    let mut count = |span: &[u8]| -> Result<()> {
        total += span.len();
        Ok(())
    };
    // counting sink never fails
    let _ = enc.feed(bytes, &mut count);
    let _ = enc.finish(&mut count);
    total
}
