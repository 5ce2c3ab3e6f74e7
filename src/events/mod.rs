//! Event Storage
//!
//! A bounded FIFO of opaque, variable-length records over a caller buffer.
//! Producers (trace capture, reboot reporting, heartbeats) serialize their
//! event first and stream it in through a write transaction; the transport
//! drains records in order through a single read session. The store never
//! partially commits: a record either fits whole or leaves no trace.

pub mod encoder;

use crate::error::{Error, Result};
use crate::platform::CriticalSection;
use crate::util::circular::CircularBuffer;

// Each record is framed with a little-endian u16 payload length.
const RECORD_HDR_LEN: usize = 2;

/// Snapshot of the records claimed by an in-flight read session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventReadCursor {
    /// Payload bytes readable through [`EventStorage::read`].
    pub total_size: usize,
    record_count: usize,
}

/// The bounded event FIFO.
pub struct EventStorage<'a, CS: CriticalSection + Clone> {
    ring: CircularBuffer<'a>,
    cs: CS,
    read_active: bool,
    batching: bool,
    batch_max_bytes: usize,
}

impl<'a, CS: CriticalSection + Clone> EventStorage<'a, CS> {
    /// Binds storage to `buf`. Sizing rule of thumb: the largest event the
    /// product emits plus headroom for a day of disconnected operation.
    pub fn boot(buf: &'a mut [u8], cs: CS) -> Self {
        Self {
            ring: CircularBuffer::new(buf),
            cs,
            read_active: false,
            batching: false,
            batch_max_bytes: crate::config::EVENT_BATCH_MAX_BYTES,
        }
    }

    /// Makes a read session span every queued record up to `max_bytes` of
    /// payload instead of a single record per session.
    pub fn set_read_batching(&mut self, enabled: bool, max_bytes: usize) {
        self.batching = enabled;
        self.batch_max_bytes = max_bytes;
    }

    /// Starts a streaming write. The transaction rolls back on drop unless
    /// committed, and the `&mut` borrow keeps writers exclusive; callers
    /// on multiple tasks serialize the whole begin-to-commit window with
    /// the platform critical section.
    pub fn begin_write(&mut self) -> EventWriteTransaction<'_, 'a, CS> {
        EventWriteTransaction { storage: self, staged: 0, failed: false }
    }

    /// Convenience wrapper: runs a whole write transaction under the
    /// platform lock.
    pub fn with_writer<R>(
        &mut self,
        f: impl FnOnce(&mut EventWriteTransaction<'_, 'a, CS>) -> Result<R>,
    ) -> Result<R> {
        let cs = self.cs.clone();
        cs.with_lock(|| {
            let mut txn = self.begin_write();
            match f(&mut txn) {
                Ok(value) => txn.commit().map(|_| value),
                Err(e) => {
                    txn.rollback();
                    Err(e)
                }
            }
        })
    }

    /// Claims the oldest record (or, with batching, the oldest run of
    /// records) for reading. Only one session may exist at a time.
    pub fn begin_read(&mut self) -> Result<EventReadCursor> {
        if self.read_active {
            return Err(Error::Busy);
        }
        let mut total = 0usize;
        let mut count = 0usize;
        let mut ring_offset = 0usize;
        loop {
            let payload_len = match self.record_len_at(ring_offset) {
                Some(len) => len,
                None => break,
            };
            if count > 0 && (!self.batching || total + payload_len > self.batch_max_bytes) {
                break;
            }
            total += payload_len;
            count += 1;
            ring_offset += RECORD_HDR_LEN + payload_len;
            if !self.batching {
                break;
            }
        }
        if count == 0 {
            return Err(Error::NoMoreData);
        }
        self.read_active = true;
        Ok(EventReadCursor { total_size: total, record_count: count })
    }

    fn record_len_at(&self, ring_offset: usize) -> Option<usize> {
        let mut hdr = [0u8; RECORD_HDR_LEN];
        if self.ring.read_at(ring_offset, &mut hdr) < RECORD_HDR_LEN {
            return None;
        }
        Some(u16::from_le_bytes(hdr) as usize)
    }

    /// Copies payload bytes out of the claimed records. `offset` indexes
    /// the concatenated payloads; record framing never appears in the
    /// output. Returns bytes copied.
    pub fn read(&self, cursor: &EventReadCursor, offset: usize, out: &mut [u8]) -> Result<usize> {
        if !self.read_active {
            return Err(Error::InvalidInput);
        }
        if offset >= cursor.total_size {
            return Ok(0);
        }
        let mut copied = 0usize;
        let mut logical = 0usize; // payload offset of the current record
        let mut ring_offset = 0usize;
        for _ in 0..cursor.record_count {
            let payload_len = match self.record_len_at(ring_offset) {
                Some(len) => len,
                None => break,
            };
            let payload_start = ring_offset + RECORD_HDR_LEN;

            let want_from = offset.max(logical);
            let want_to = (offset + out.len()).min(logical + payload_len);
            if want_from < want_to {
                let n = self.ring.read_at(
                    payload_start + (want_from - logical),
                    &mut out[copied..copied + (want_to - want_from)],
                );
                copied += n;
            }
            logical += payload_len;
            ring_offset = payload_start + payload_len;
            if copied == out.len() {
                break;
            }
        }
        Ok(copied)
    }

    /// Retires the claimed records after a successful upload and ends the
    /// session.
    pub fn mark_read(&mut self, cursor: &EventReadCursor) {
        if !self.read_active {
            return;
        }
        let consumed = cursor.total_size + cursor.record_count * RECORD_HDR_LEN;
        self.ring.consume(consumed);
        self.read_active = false;
    }

    /// Ends the session without retiring anything; the records will be
    /// offered again.
    pub fn abort_read(&mut self) {
        self.read_active = false;
    }

    /// Committed payload bytes queued right now (diagnostic).
    pub fn bytes_used(&self) -> usize {
        self.ring.len()
    }
}

/// In-flight streaming write. Rolls back on drop.
pub struct EventWriteTransaction<'s, 'a, CS: CriticalSection + Clone> {
    storage: &'s mut EventStorage<'a, CS>,
    staged: usize,
    failed: bool,
}

impl<CS: CriticalSection + Clone> EventWriteTransaction<'_, '_, CS> {
    /// Appends payload bytes. Once an append overflows the buffer the
    /// transaction is poisoned and only rollback remains.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.failed {
            return Err(Error::InvalidInput);
        }
        if self.staged == 0 {
            // length placeholder, patched at commit
            if self.storage.ring.stage(&[0, 0]).is_err() {
                self.failed = true;
                return Err(Error::InvalidInput);
            }
        }
        if self.staged + bytes.len() > u16::MAX as usize
            || self.storage.ring.stage(bytes).is_err()
        {
            self.failed = true;
            return Err(Error::InvalidInput);
        }
        self.staged += bytes.len();
        Ok(())
    }

    /// Commits the record, making it visible to readers.
    pub fn commit(self) -> Result<()> {
        if self.failed {
            self.storage.ring.abandon();
            return Err(Error::InvalidInput);
        }
        if self.staged == 0 {
            return Ok(()); // nothing written, nothing committed
        }
        self.storage
            .ring
            .staged_write_at(0, &(self.staged as u16).to_le_bytes())?;
        self.storage.ring.commit();
        Ok(())
    }

    /// Discards the record.
    pub fn rollback(self) {
        self.storage.ring.abandon();
    }
}

impl<CS: CriticalSection + Clone> Drop for EventWriteTransaction<'_, '_, CS> {
    fn drop(&mut self) {
        // after a commit the staging area is already empty, so this only
        // has an effect when the transaction was abandoned mid-write
        self.storage.ring.abandon();
    }
}
