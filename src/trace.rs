//! Trace Event Capture
//!
//! Trace events record a single-point observation (an error branch, an
//! unexpected state) without rebooting. From task context they serialize
//! straight into event storage; from an interrupt, where neither the lock
//! nor the CBOR encoder is welcome, the observation is parked in a
//! lock-free single-entry slot and serialized later from task context.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// One captured observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceCapture {
    /// Product-defined trace reason code.
    pub reason: u16,
    pub pc: u32,
    pub lr: u32,
}

// Slot states.
const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;

/// Lock-free single-entry mailbox for traces captured inside interrupt
/// handlers.
///
/// Holds at most one pending capture: if a second ISR fires before the
/// task drained the first, the later capture is dropped and counted. One
/// slot is cheap enough to place per interrupt domain when that matters.
pub struct IsrTraceSlot {
    state: AtomicU8,
    reason: AtomicU32,
    pc: AtomicU32,
    lr: AtomicU32,
    dropped: AtomicU32,
}

impl IsrTraceSlot {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            reason: AtomicU32::new(0),
            pc: AtomicU32::new(0),
            lr: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Records a capture from interrupt context. Never blocks; returns
    /// false (and counts the drop) when the slot is still occupied.
    pub fn record_from_isr(&self, capture: TraceCapture) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.reason.store(capture.reason as u32, Ordering::Relaxed);
        self.pc.store(capture.pc, Ordering::Relaxed);
        self.lr.store(capture.lr, Ordering::Relaxed);
        self.state.store(READY, Ordering::Release);
        true
    }

    /// Takes the pending capture, if one is ready. Called from task
    /// context by whoever serializes traces into event storage.
    pub fn collect(&self) -> Option<TraceCapture> {
        if self
            .state
            .compare_exchange(READY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        let capture = TraceCapture {
            reason: self.reason.load(Ordering::Relaxed) as u16,
            pc: self.pc.load(Ordering::Relaxed),
            lr: self.lr.load(Ordering::Relaxed),
        };
        self.state.store(EMPTY, Ordering::Release);
        Some(capture)
    }

    /// Captures dropped because the slot was occupied, since the last
    /// call (reading resets the counter).
    pub fn take_dropped_count(&self) -> u32 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl Default for IsrTraceSlot {
    fn default() -> Self {
        Self::new()
    }
}
