//! Data Sources
//!
//! The packetizer sees every producer of outgoing data through one narrow
//! facade: does it have a message, give me bytes at an offset, and the
//! message went out. Built-in sources cover the coredump store, event
//! storage, and the log ring; products can add their own recordings behind
//! the same trait.

use crate::coredump;
use crate::coredump::storage::CoredumpStorage;
use crate::events::encoder::{self, EventContext};
use crate::events::{EventReadCursor, EventStorage};
use crate::logs::LogBuffer;
use crate::platform::{CriticalSection, DeviceInfo};

/// A producer of outgoing messages.
///
/// `read` must be deterministic while a message is in flight: the
/// packetizer reads the same bytes more than once (integrity pass, then
/// chunking) and may restart after an abort.
pub trait DataSource {
    /// Size of the pending message, if any. Sampled only between
    /// messages; the answer must stay valid until `mark_sent`.
    fn has_more(&mut self) -> Option<usize>;

    /// Copies message bytes at `offset` into `buf`, entirely filling it.
    /// False on failure, which aborts the in-flight message.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> bool;

    /// The message was fully handed to the transport; retire it.
    fn mark_sent(&mut self);
}

/// Highest priority: a stored crash, drained before anything else.
pub struct CoredumpSource<'x, S: CoredumpStorage> {
    storage: &'x mut S,
}

impl<'x, S: CoredumpStorage> CoredumpSource<'x, S> {
    pub fn new(storage: &'x mut S) -> Self {
        Self { storage }
    }
}

impl<S: CoredumpStorage> DataSource for CoredumpSource<'_, S> {
    fn has_more(&mut self) -> Option<usize> {
        coredump::stored_size(self.storage).ok().flatten()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> bool {
        coredump::read(self.storage, offset, buf).is_ok()
    }

    fn mark_sent(&mut self) {
        coredump::invalidate(self.storage);
        log::info!("coredump uploaded and invalidated");
    }
}

/// Queued events, one read session at a time. The session cursor lives
/// outside the source so it survives between drain calls.
pub struct EventSource<'x, 'a, CS: CriticalSection + Clone> {
    storage: &'x mut EventStorage<'a, CS>,
    cursor: &'x mut Option<EventReadCursor>,
}

impl<'x, 'a, CS: CriticalSection + Clone> EventSource<'x, 'a, CS> {
    pub fn new(
        storage: &'x mut EventStorage<'a, CS>,
        cursor: &'x mut Option<EventReadCursor>,
    ) -> Self {
        Self { storage, cursor }
    }
}

impl<CS: CriticalSection + Clone> DataSource for EventSource<'_, '_, CS> {
    fn has_more(&mut self) -> Option<usize> {
        if self.cursor.is_none() {
            *self.cursor = self.storage.begin_read().ok();
        }
        self.cursor.as_ref().map(|c| c.total_size)
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> bool {
        match self.cursor.as_ref() {
            Some(cursor) => {
                self.storage.read(cursor, offset, buf).map_or(false, |n| n == buf.len())
            }
            None => false,
        }
    }

    fn mark_sent(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            self.storage.mark_read(&cursor);
        }
    }
}

/// Durable sizing state for an in-flight log collection. The captured
/// timestamp is pinned here so re-encoding yields identical bytes.
#[derive(Debug, Clone, Copy)]
pub struct LogCollectionState {
    total_size: usize,
    captured_at_ms: u64,
}

/// The frozen log ring, serialized as a log-collection event on the fly.
/// Only offers data once a collection has been triggered.
pub struct LogSource<'x, 'a, CS: CriticalSection + Clone> {
    logs: &'x mut LogBuffer<'a, CS>,
    state: &'x mut Option<LogCollectionState>,
    device_info: DeviceInfo,
    now_ms: u64,
}

impl<'x, 'a, CS: CriticalSection + Clone> LogSource<'x, 'a, CS> {
    pub fn new(
        logs: &'x mut LogBuffer<'a, CS>,
        state: &'x mut Option<LogCollectionState>,
        device_info: DeviceInfo,
        now_ms: u64,
    ) -> Self {
        Self { logs, state, device_info, now_ms }
    }

    fn context(&self, state: &LogCollectionState) -> EventContext<'_> {
        EventContext { device_info: &self.device_info, captured_at_ms: state.captured_at_ms }
    }
}

impl<CS: CriticalSection + Clone> DataSource for LogSource<'_, '_, CS> {
    fn has_more(&mut self) -> Option<usize> {
        self.logs.frozen_len()?;
        if self.state.is_none() {
            let ctx = EventContext {
                device_info: &self.device_info,
                captured_at_ms: self.now_ms,
            };
            let total = encoder::encoded_size(|sink| {
                encoder::encode_log_collection_event(sink, &ctx, self.logs.frozen_records())
            })
            .ok()?;
            *self.state = Some(LogCollectionState {
                total_size: total,
                captured_at_ms: self.now_ms,
            });
        }
        self.state.as_ref().map(|s| s.total_size)
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> bool {
        let state = match self.state.as_ref() {
            Some(state) => *state,
            None => return false,
        };
        let ctx = self.context(&state);
        let mut window = encoder::WindowSink::new(offset, buf);
        let mut sink = |bytes: &[u8]| window.accept(bytes);
        if encoder::encode_log_collection_event(&mut sink, &ctx, self.logs.frozen_records())
            .is_err()
        {
            return false;
        }
        window.copied() == window_len_expected(offset, state.total_size, buf.len())
    }

    fn mark_sent(&mut self) {
        self.logs.mark_collected();
        *self.state = None;
    }
}

fn window_len_expected(offset: usize, total: usize, buf_len: usize) -> usize {
    total.saturating_sub(offset).min(buf_len)
}
