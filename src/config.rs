//! SDK Configuration
//!
//! Compile-time tunables and the runtime configuration knobs. The defaults
//! match what the cloud side expects; most deployments only ever touch
//! `SdkConfig`.

/// Longest log line the log buffer will store. Longer lines are truncated.
pub const MAX_LOG_LINE_LEN: usize = 128;

/// Raw bytes per `MC:<base64>:` line emitted when exporting chunks over a
/// console instead of a socket.
pub const DATA_EXPORT_CHUNK_MAX_LEN: usize = 80;

/// Byte cap applied to a batched event read. The default places no limit;
/// a reader then drains as many whole records as are queued.
pub const EVENT_BATCH_MAX_BYTES: usize = usize::MAX;

/// Build id bytes included in the coredump device identity block. A full
/// SHA-1 style build id fits.
pub const COREDUMP_BUILD_ID_LEN: usize = 20;

/// Upper bound on regions a platform may hand back for one crash.
pub const COREDUMP_MAX_REGIONS: usize = 16;

/// Custom data-recording sources that can be registered alongside the
/// built-in coredump/event/log sources.
pub const MAX_CUSTOM_DATA_SOURCES: usize = 4;

/// Default host for the chunks ingestion endpoint.
pub const CHUNKS_API_HOST: &str = "chunks.memfault.com";

/// User-Agent reported in upload requests.
pub const SDK_USER_AGENT: &str = "MemfaultSDK/0.0.11";

/// Runtime-selectable behavior.
#[derive(Debug, Clone, Copy)]
pub struct SdkConfig {
    /// Run-length encode coredump memory regions before they hit storage.
    pub coredump_rle: bool,
    /// Batch several queued event records into one outgoing message.
    pub event_read_batching: bool,
    /// Minimum level a log line must have to be saved into the ring.
    pub min_log_save_level: crate::logs::LogLevel,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            coredump_rle: false,
            event_read_batching: false,
            min_log_save_level: crate::logs::LogLevel::Info,
        }
    }
}
