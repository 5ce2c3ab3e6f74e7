//! Packetizer
//!
//! Drives the chunk transport: samples the data sources in priority order,
//! locks onto the first one with a message, and hands out chunks until the
//! message drains. At most one message is in flight; only when idle are
//! the sources consulted again.

use crate::chunks::sources::DataSource;
use crate::chunks::transport::{ChunkTransport, MIN_CHUNK_BUF_LEN};
use crate::error::{Error, Result};

/// What a `get_next` call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketizerStatus {
    /// Nothing queued anywhere; come back later.
    NoMoreData,
    /// The buffer holds a complete chunk, ready to send.
    EndOfChunk,
    /// Multi-call mode only: the buffer filled but the current chunk
    /// continues; call again.
    MoreDataForChunk,
}

/// Per-session knobs, supplied to [`Packetizer::begin`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketizerConfig {
    /// Deliver each message as one logical chunk spread over several
    /// calls, instead of one self-contained chunk per call.
    pub enable_multi_packet_chunk: bool,
}

/// What [`Packetizer::begin`] learned about the pending message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketizerMetadata {
    /// Buffer size that would move the whole message in a single chunk.
    pub single_chunk_message_length: usize,
    /// True when a message was already mid-drain; its settings stay as
    /// they were.
    pub send_in_progress: bool,
}

struct InFlight {
    transport: ChunkTransport,
    source_idx: usize,
}

/// The chunk-transport state machine. The caller supplies the source list
/// on every call; it must be the same list, in the same priority order,
/// for the lifetime of an in-flight message.
pub struct Packetizer {
    in_flight: Option<InFlight>,
    multi_call: bool,
}

impl Packetizer {
    pub const fn new() -> Self {
        Self { in_flight: None, multi_call: false }
    }

    /// Whether a message is mid-drain.
    pub fn data_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    fn load_next_message(&mut self, sources: &mut [&mut dyn DataSource]) -> bool {
        for (idx, source) in sources.iter_mut().enumerate() {
            if let Some(total_size) = source.has_more() {
                self.in_flight = Some(InFlight {
                    transport: ChunkTransport::new(total_size, self.multi_call),
                    source_idx: idx,
                });
                return true;
            }
        }
        false
    }

    /// Samples whether any source has data and reports sizing for the
    /// pending message. Returns `Ok(None)` when there is nothing to send;
    /// no state persists in that case.
    pub fn begin(
        &mut self,
        config: PacketizerConfig,
        sources: &mut [&mut dyn DataSource],
    ) -> Result<Option<PacketizerMetadata>> {
        if let Some(in_flight) = &self.in_flight {
            return Ok(Some(PacketizerMetadata {
                single_chunk_message_length: in_flight.transport.single_chunk_message_length(),
                send_in_progress: true,
            }));
        }
        self.multi_call = config.enable_multi_packet_chunk;
        if !self.load_next_message(sources) {
            return Ok(None);
        }
        let in_flight = self.in_flight.as_ref().expect("just loaded");
        Ok(Some(PacketizerMetadata {
            single_chunk_message_length: in_flight.transport.single_chunk_message_length(),
            send_in_progress: false,
        }))
    }

    /// Fills `buf` with the next outgoing chunk. On `EndOfChunk` for a
    /// message's final chunk the active source is told its data went out.
    ///
    /// A buffer under [`MIN_CHUNK_BUF_LEN`] bytes produces `(NoMoreData,
    /// 0)` without disturbing the in-flight message.
    pub fn get_next(
        &mut self,
        sources: &mut [&mut dyn DataSource],
        buf: &mut [u8],
    ) -> (PacketizerStatus, usize) {
        if buf.len() < MIN_CHUNK_BUF_LEN {
            return (PacketizerStatus::NoMoreData, 0);
        }
        if self.in_flight.is_none() && !self.load_next_message(sources) {
            return (PacketizerStatus::NoMoreData, 0);
        }

        let in_flight = self.in_flight.as_mut().expect("message in flight");
        let source = &mut sources[in_flight.source_idx];
        let mut read_msg =
            |offset: usize, out: &mut [u8]| source.read(offset, out);

        match in_flight.transport.next_chunk(buf, &mut read_msg) {
            None => {
                // a source read failed; drop the message and let the next
                // begin re-sample
                log::error!("data source read failed; aborting in-flight message");
                self.in_flight = None;
                (PacketizerStatus::NoMoreData, 0)
            }
            Some(info) => {
                if info.more_data {
                    let status = if self.multi_call {
                        PacketizerStatus::MoreDataForChunk
                    } else {
                        PacketizerStatus::EndOfChunk
                    };
                    (status, info.bytes_written)
                } else {
                    let idx = in_flight.source_idx;
                    self.in_flight = None;
                    sources[idx].mark_sent();
                    (PacketizerStatus::EndOfChunk, info.bytes_written)
                }
            }
        }
    }

    /// Discards any in-flight message. Idempotent; the next `begin`
    /// re-samples the sources from scratch.
    pub fn abort(&mut self) {
        self.in_flight = None;
    }
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper: drains every queued message, calling `send` once
/// per complete chunk. Stops on the first send refusal so data is
/// retained for a later retry.
pub fn drain_chunks(
    packetizer: &mut Packetizer,
    sources: &mut [&mut dyn DataSource],
    buf: &mut [u8],
    send: &mut dyn FnMut(&[u8]) -> bool,
) -> Result<usize> {
    let mut sent = 0usize;
    loop {
        let (status, len) = packetizer.get_next(sources, buf);
        match status {
            PacketizerStatus::NoMoreData => return Ok(sent),
            PacketizerStatus::EndOfChunk | PacketizerStatus::MoreDataForChunk => {
                if len == 0 {
                    return Ok(sent);
                }
                if !send(&buf[..len]) {
                    packetizer.abort();
                    return Err(Error::Storage);
                }
                sent += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source with a fixed payload, for exercising the state machine.
    struct VecSource {
        data: std::vec::Vec<u8>,
        available: bool,
        sent: usize,
        fail_reads: bool,
    }

    impl VecSource {
        fn new(data: &[u8]) -> Self {
            Self { data: data.to_vec(), available: true, sent: 0, fail_reads: false }
        }
    }

    impl DataSource for VecSource {
        fn has_more(&mut self) -> Option<usize> {
            if self.available { Some(self.data.len()) } else { None }
        }
        fn read(&mut self, offset: usize, buf: &mut [u8]) -> bool {
            if self.fail_reads {
                return false;
            }
            buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
            true
        }
        fn mark_sent(&mut self) {
            self.available = false;
            self.sent += 1;
        }
    }

    #[test]
    fn test_idle_with_no_sources() {
        let mut packetizer = Packetizer::new();
        let mut buf = [0u8; 16];
        let (status, len) = packetizer.get_next(&mut [], &mut buf);
        assert_eq!(status, PacketizerStatus::NoMoreData);
        assert_eq!(len, 0);
    }

    #[test]
    fn test_priority_order() {
        let mut high = VecSource::new(b"high priority");
        let mut low = VecSource::new(b"low priority");
        let mut packetizer = Packetizer::new();
        let mut buf = [0u8; 64];

        {
            let mut sources: [&mut dyn DataSource; 2] = [&mut high, &mut low];
            let (status, len) = packetizer.get_next(&mut sources, &mut buf);
            assert_eq!(status, PacketizerStatus::EndOfChunk);
            assert_eq!(&buf[3..len], b"high priority");
        }
        assert_eq!(high.sent, 1);
        assert_eq!(low.sent, 0);

        // with the high source drained, the low one gets its turn
        {
            let mut sources: [&mut dyn DataSource; 2] = [&mut high, &mut low];
            let (status, len) = packetizer.get_next(&mut sources, &mut buf);
            assert_eq!(status, PacketizerStatus::EndOfChunk);
            assert_eq!(&buf[3..len], b"low priority");
        }
        assert_eq!(low.sent, 1);
    }

    #[test]
    fn test_begin_reports_sizing() {
        let mut source = VecSource::new(&[0u8; 61]);
        let mut packetizer = Packetizer::new();

        let mut sources: [&mut dyn DataSource; 1] = [&mut source];
        let meta = packetizer
            .begin(PacketizerConfig::default(), &mut sources)
            .unwrap()
            .expect("data available");
        assert_eq!(meta.single_chunk_message_length, 64);
        assert!(!meta.send_in_progress);

        // drain one chunk, then begin reports the in-flight message
        let mut buf = [0u8; 16];
        let (status, _) = packetizer.get_next(&mut sources, &mut buf);
        assert_eq!(status, PacketizerStatus::EndOfChunk);
        let meta = packetizer
            .begin(PacketizerConfig::default(), &mut sources)
            .unwrap()
            .expect("still in flight");
        assert!(meta.send_in_progress);
    }

    #[test]
    fn test_begin_empty_is_stateless() {
        let mut source = VecSource::new(b"");
        source.available = false;
        let mut packetizer = Packetizer::new();
        let mut sources: [&mut dyn DataSource; 1] = [&mut source];
        assert!(packetizer.begin(PacketizerConfig::default(), &mut sources).unwrap().is_none());
        assert!(!packetizer.data_in_flight());
    }

    #[test]
    fn test_mark_sent_only_after_final_chunk() {
        let mut source = VecSource::new(&[7u8; 100]);
        let mut packetizer = Packetizer::new();
        let mut buf = [0u8; 16];

        let mut chunks = 0;
        loop {
            let mut sources: [&mut dyn DataSource; 1] = [&mut source];
            let (status, len) = packetizer.get_next(&mut sources, &mut buf);
            if status == PacketizerStatus::NoMoreData {
                break;
            }
            assert!(len > 0);
            chunks += 1;
            // the source is retired exactly once, with the final chunk
            assert_eq!(source.sent, if source.available { 0 } else { 1 });
        }
        assert!(chunks > 1);
        assert_eq!(source.sent, 1);
    }

    #[test]
    fn test_abort_discards_in_flight_message() {
        let mut source = VecSource::new(&[3u8; 100]);
        let mut packetizer = Packetizer::new();
        let mut buf = [0u8; 16];

        {
            let mut sources: [&mut dyn DataSource; 1] = [&mut source];
            packetizer.get_next(&mut sources, &mut buf);
        }
        assert!(packetizer.data_in_flight());
        packetizer.abort();
        packetizer.abort(); // idempotent
        assert!(!packetizer.data_in_flight());

        // the source still has its data; a fresh drain starts over
        {
            let mut sources: [&mut dyn DataSource; 1] = [&mut source];
            let (status, len) = packetizer.get_next(&mut sources, &mut buf);
            assert_eq!(status, PacketizerStatus::EndOfChunk);
            assert!(len > 0);
            // a fresh initial chunk, not a continuation
            assert_eq!(buf[0] & 0x80, 0);
        }
    }

    #[test]
    fn test_source_read_failure_aborts_message() {
        let mut source = VecSource::new(&[1u8; 50]);
        source.fail_reads = true;
        let mut packetizer = Packetizer::new();
        let mut buf = [0u8; 16];

        let mut sources: [&mut dyn DataSource; 1] = [&mut source];
        let (status, len) = packetizer.get_next(&mut sources, &mut buf);
        assert_eq!(status, PacketizerStatus::NoMoreData);
        assert_eq!(len, 0);
        assert!(!packetizer.data_in_flight());
    }

    #[test]
    fn test_undersized_buffer() {
        let mut source = VecSource::new(&[1u8; 50]);
        let mut packetizer = Packetizer::new();
        let mut tiny = [0u8; MIN_CHUNK_BUF_LEN - 1];

        let mut sources: [&mut dyn DataSource; 1] = [&mut source];
        let (status, len) = packetizer.get_next(&mut sources, &mut tiny);
        assert_eq!(status, PacketizerStatus::NoMoreData);
        assert_eq!(len, 0);
    }

    #[test]
    fn test_multi_call_chunk_statuses() {
        let mut source = VecSource::new(&[9u8; 40]);
        let mut packetizer = Packetizer::new();
        let mut buf = [0u8; 16];

        let mut sources: [&mut dyn DataSource; 1] = [&mut source];
        packetizer
            .begin(PacketizerConfig { enable_multi_packet_chunk: true }, &mut sources)
            .unwrap()
            .expect("data available");

        let mut statuses = std::vec::Vec::new();
        loop {
            let (status, _len) = packetizer.get_next(&mut sources, &mut buf);
            if status == PacketizerStatus::NoMoreData {
                break;
            }
            statuses.push(status);
            if statuses.len() > 16 {
                panic!("runaway drain");
            }
        }
        assert!(statuses.len() > 1);
        assert!(statuses[..statuses.len() - 1]
            .iter()
            .all(|&s| s == PacketizerStatus::MoreDataForChunk));
        assert_eq!(*statuses.last().unwrap(), PacketizerStatus::EndOfChunk);
    }

    #[test]
    fn test_drain_chunks_helper() {
        let mut source = VecSource::new(&[4u8; 70]);
        let mut packetizer = Packetizer::new();
        let mut buf = [0u8; 24];
        let mut wire = std::vec::Vec::new();

        let mut sources: [&mut dyn DataSource; 1] = [&mut source];
        let mut send = |chunk: &[u8]| {
            wire.push(chunk.to_vec());
            true
        };
        let sent = drain_chunks(&mut packetizer, &mut sources, &mut buf, &mut send).unwrap();
        assert_eq!(sent, wire.len());
        assert!(sent > 1);
        assert_eq!(source.sent, 1);
    }
}
