//! Blackbox - Embedded Device Observability SDK
//!
//! Captures post-mortem and runtime diagnostics on microcontrollers and
//! ships them to the backend as MTU-sized chunks: coredumps persisted at
//! fault time, structured events (reboots, traces, heartbeats) queued in
//! RAM, and a ring of recent log lines that rides along with either.
//!
//! The [`Blackbox`] handle owns the steady-state machinery; the fault-time
//! path lives in [`fault`] and is wired into exception vectors separately
//! because a fault handler cannot carry a context argument.

#![cfg_attr(not(test), no_std)]

// Crate-wide error types
pub mod error;
// Compile-time tunables and runtime knobs
pub mod config;
// Platform hook traits the embedder implements
pub mod platform;
// Codecs and containers shared across subsystems
pub mod util;
// Bounded ring of recent log lines
pub mod logs;
// Reboot reason tracking across the reset barrier
pub mod reboot;
// Crash capture into persistent storage
pub mod coredump;
// Bounded FIFO of structured events
pub mod events;
// Heartbeat metric value store
pub mod metrics;
// Chunked transport toward the backend
pub mod chunks;
// Trace event capture, including the ISR-safe path
pub mod trace;
// Minimal HTTP request builder / response parser / upload client
pub mod http;
// Console fallback for chunk upload
pub mod export;
// Fault handler entry and crash context slot
pub mod fault;

pub use chunks::{PacketizerConfig, PacketizerMetadata, PacketizerStatus};
pub use config::SdkConfig;
pub use coredump::storage::CoredumpStorage;
pub use error::{Error, Result};
pub use events::encoder::MetricValue;
pub use logs::LogLevel;
pub use platform::{CriticalSection, DeviceInfo, Platform, SingleThreaded};
pub use reboot::{BootupInfo, RebootReason, RebootTrackingRegion};

use chunks::sources::{CoredumpSource, DataSource, EventSource, LogCollectionState, LogSource};
use chunks::Packetizer;
use events::encoder::{self as event_encoder, EventContext};
use events::{EventReadCursor, EventStorage};
use heapless::Vec;
use logs::LogBuffer;
use reboot::RebootTracker;

/// Caller-owned memory handed to [`Blackbox::boot`].
pub struct BootResources<'a> {
    /// The noinit record carrying reboot state across resets, or `None`
    /// on products without noinit memory (reboot APIs then report
    /// [`Error::NotBooted`]).
    pub reboot_region: Option<&'a mut RebootTrackingRegion>,
    /// This boot's hardware reset cause, as classified by the port.
    pub bootup_info: Option<BootupInfo>,
    /// Backing buffer for event storage.
    pub event_buffer: &'a mut [u8],
    /// Backing buffer for the log ring.
    pub log_buffer: &'a mut [u8],
}

/// The SDK. One per device, created by [`Blackbox::boot`] early in main.
pub struct Blackbox<'a, P, S, CS>
where
    P: Platform,
    S: CoredumpStorage,
    CS: CriticalSection + Clone,
{
    platform: P,
    coredump_storage: S,
    config: SdkConfig,
    reboot: RebootTracker<'a>,
    events: EventStorage<'a, CS>,
    logs: LogBuffer<'a, CS>,
    packetizer: Packetizer,
    event_cursor: Option<EventReadCursor>,
    log_collection: Option<LogCollectionState>,
    custom_sources: Vec<&'a mut dyn DataSource, { config::MAX_CUSTOM_DATA_SOURCES }>,
}

impl<'a, P, S, CS> Blackbox<'a, P, S, CS>
where
    P: Platform,
    S: CoredumpStorage,
    CS: CriticalSection + Clone,
{
    /// Brings the SDK up: binds the buffers, reconciles the reboot reason
    /// against the hardware register, and queues the reboot event for
    /// upload.
    pub fn boot(
        platform: P,
        coredump_storage: S,
        cs: CS,
        config: SdkConfig,
        resources: BootResources<'a>,
    ) -> Self {
        let mut events = EventStorage::boot(resources.event_buffer, cs.clone());
        if config.event_read_batching {
            events.set_read_batching(true, config::EVENT_BATCH_MAX_BYTES);
        }
        let mut logs = LogBuffer::boot(resources.log_buffer, cs);
        logs.set_min_save_level(config.min_log_save_level);

        let reboot = RebootTracker::boot(resources.reboot_region, resources.bootup_info);

        let mut sdk = Self {
            platform,
            coredump_storage,
            config,
            reboot,
            events,
            logs,
            packetizer: Packetizer::new(),
            event_cursor: None,
            log_collection: None,
            custom_sources: Vec::new(),
        };
        sdk.publish_reboot_event();
        sdk
    }

    /// Emits the queued reboot event for the reset that just happened,
    /// then clears the recorded reason so it is only reported once.
    fn publish_reboot_event(&mut self) {
        let reset_info = match self.reboot.read_reset_info() {
            Some(info) => info,
            None => return,
        };
        let device_info = self.platform.device_info();
        let ctx = EventContext {
            device_info: &device_info,
            captured_at_ms: self.platform.time_since_boot_ms(),
        };
        let result = self.events.with_writer(|txn| {
            let mut sink = |bytes: &[u8]| txn.append(bytes);
            event_encoder::encode_reboot_event(&mut sink, &ctx, &reset_info)
        });
        match result {
            Ok(()) => self.reboot.clear_reset_info(),
            // keep the recorded reason; the next boot can retry
            Err(e) => log::warn!("failed to queue reboot event: {}", e),
        }
    }

    /// Queues a trace event: a single-point observation with the capture
    /// site's pc/lr and an optional log line.
    pub fn record_trace_event(
        &mut self,
        reason: u16,
        pc: u32,
        lr: u32,
        log: Option<&str>,
    ) -> Result<()> {
        let device_info = self.platform.device_info();
        let ctx = EventContext {
            device_info: &device_info,
            captured_at_ms: self.platform.time_since_boot_ms(),
        };
        self.events.with_writer(|txn| {
            let mut sink = |bytes: &[u8]| txn.append(bytes);
            event_encoder::encode_trace_event(&mut sink, &ctx, reason, pc, lr, log)
        })
    }

    /// Ends a heartbeat interval: snapshots the registry into a heartbeat
    /// event and resets it. Called by the product's heartbeat timer.
    pub fn collect_heartbeat(&mut self, registry: &mut metrics::MetricsRegistry) -> Result<()> {
        let snapshot = registry.take_snapshot();
        self.record_heartbeat(&snapshot)
    }

    /// Queues a heartbeat event carrying the product's metric samples.
    pub fn record_heartbeat(&mut self, metrics: &[(u32, MetricValue)]) -> Result<()> {
        let device_info = self.platform.device_info();
        let ctx = EventContext {
            device_info: &device_info,
            captured_at_ms: self.platform.time_since_boot_ms(),
        };
        self.events.with_writer(|txn| {
            let mut sink = |bytes: &[u8]| txn.append(bytes);
            event_encoder::encode_heartbeat_event(&mut sink, &ctx, metrics)
        })
    }

    /// Serializes any observations parked by interrupt handlers into
    /// event storage. Call periodically from task context. Returns the
    /// number of captures drained.
    pub fn drain_isr_traces(&mut self, slot: &trace::IsrTraceSlot) -> Result<u32> {
        let mut drained = 0;
        while let Some(capture) = slot.collect() {
            self.record_trace_event(capture.reason, capture.pc, capture.lr, None)?;
            drained += 1;
        }
        let dropped = slot.take_dropped_count();
        if dropped > 0 {
            log::warn!("{} interrupt traces dropped before draining", dropped);
        }
        Ok(drained)
    }

    /// Freezes the log ring so its contents go out with the next drain.
    pub fn trigger_log_collection(&mut self) {
        self.logs.trigger_collection();
    }

    /// Registers a product-defined data source, drained after the built-in
    /// ones. Fails when the registry is full.
    pub fn register_data_source(&mut self, source: &'a mut dyn DataSource) -> Result<()> {
        self.custom_sources.push(source).map_err(|_| Error::InvalidInput)
    }

    fn with_sources<R>(
        &mut self,
        f: impl FnOnce(&mut Packetizer, &mut [&mut dyn DataSource]) -> R,
    ) -> R {
        let Self {
            platform,
            coredump_storage,
            events,
            logs,
            packetizer,
            event_cursor,
            log_collection,
            custom_sources,
            ..
        } = self;

        let device_info = platform.device_info();
        let now_ms = platform.time_since_boot_ms();
        let mut coredump_source = CoredumpSource::new(coredump_storage);
        let mut event_source = EventSource::new(events, event_cursor);
        let mut log_source = LogSource::new(logs, log_collection, device_info, now_ms);

        // priority order: crashes first, then events, then logs, then
        // product recordings
        let mut sources: Vec<&mut dyn DataSource, { 3 + config::MAX_CUSTOM_DATA_SOURCES }> =
            Vec::new();
        let _ = sources.push(&mut coredump_source);
        let _ = sources.push(&mut event_source);
        let _ = sources.push(&mut log_source);
        for source in custom_sources.iter_mut() {
            let _ = sources.push(&mut **source);
        }
        f(packetizer, &mut sources)
    }

    /// Samples whether anything is waiting to upload. See
    /// [`Packetizer::begin`].
    pub fn begin_transport(
        &mut self,
        config: PacketizerConfig,
    ) -> Result<Option<PacketizerMetadata>> {
        self.with_sources(|packetizer, sources| packetizer.begin(config, sources))
    }

    /// Fills `buf` with the next outgoing chunk.
    pub fn get_next_chunk(&mut self, buf: &mut [u8]) -> (PacketizerStatus, usize) {
        self.with_sources(|packetizer, sources| packetizer.get_next(sources, buf))
    }

    /// Drops the in-flight message; the data is offered again later.
    pub fn abort_transport(&mut self) {
        self.packetizer.abort();
    }

    /// Drains every queued message through `send`, one complete chunk per
    /// call. Stops (retaining data) as soon as `send` refuses.
    pub fn drain_chunks(
        &mut self,
        buf: &mut [u8],
        send: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize> {
        self.with_sources(|packetizer, sources| {
            chunks::packetizer::drain_chunks(packetizer, sources, buf, send)
        })
    }

    /// Drains queued messages over a raw byte transport, one POST per
    /// chunk. Stops on the first refused chunk; everything undelivered is
    /// offered again next time.
    pub fn upload_chunks(
        &mut self,
        transport: &mut dyn http::HttpTransport,
        http_config: &http::HttpClientConfig<'_>,
        buf: &mut [u8],
    ) -> Result<usize> {
        let serial = self.platform.device_info().device_serial;
        let mut delivered = 0;
        loop {
            let (status, len) = self.get_next_chunk(buf);
            if status == PacketizerStatus::NoMoreData || len == 0 {
                return Ok(delivered);
            }
            match http::client::post_chunk(transport, http_config, serial.as_str(), &buf[..len]) {
                Ok(code) if http::client::chunk_delivered(code) => delivered += 1,
                Ok(code) => {
                    log::warn!("chunk upload rejected with HTTP status {}", code);
                    self.abort_transport();
                    return Err(Error::Storage);
                }
                Err(e) => {
                    self.abort_transport();
                    return Err(e);
                }
            }
        }
    }

    /// Drains queued messages as `MC:<base64>:` console lines.
    pub fn export_chunks(&mut self, out: &mut dyn FnMut(&[u8])) -> Result<usize> {
        let mut buf = [0u8; config::DATA_EXPORT_CHUNK_MAX_LEN];
        self.with_sources(|packetizer, sources| {
            let mut send = |chunk: &[u8]| export::export_chunk(chunk, out);
            chunks::packetizer::drain_chunks(packetizer, sources, &mut buf, &mut send)
        })
    }

    /// The runtime configuration the SDK booted with.
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Capture options matching the runtime configuration, for the port
    /// to hand to [`fault::install`].
    pub fn capture_options(&self) -> coredump::CaptureOptions {
        coredump::CaptureOptions { rle_memory: self.config.coredump_rle, log_region: None }
    }

    pub fn reboot_tracker(&mut self) -> &mut RebootTracker<'a> {
        &mut self.reboot
    }

    pub fn logs(&mut self) -> &mut LogBuffer<'a, CS> {
        &mut self.logs
    }

    pub fn events(&mut self) -> &mut EventStorage<'a, CS> {
        &mut self.events
    }

    pub fn coredump_storage(&mut self) -> &mut S {
        &mut self.coredump_storage
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }
}
