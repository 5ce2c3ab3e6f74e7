//! Chunk Framing
//!
//! Wire layout, integrity guaranteed by the underlying transport; the CRC
//! exists to eventually detect a consumer stack that breaks that promise.
//!
//! Initial chunk:
//!   `header || (md ? varint(total_length) : "") || crc16 || data`
//! Continuation chunk:
//!   `header || varint(read_offset) || data`
//!
//! If the whole message fits one chunk, `md` is clear and the total length
//! is omitted. In multi-call chunk mode the message forms one logical
//! chunk delivered across calls: continuations carry the header byte only,
//! then payload.

use bitflags::bitflags;

use crate::util::crc16;
use crate::util::varint;

bitflags! {
    /// Framing header bits. Bits 0-2 carry the channel id (always 0 for
    /// now); bits 3-5 are reserved.
    pub struct ChunkHeader: u8 {
        /// Set on every chunk after the first of a message.
        const CONTINUATION = 1 << 7;
        /// More data follows this chunk.
        const MORE_DATA = 1 << 6;
    }
}

/// Smallest usable caller buffer: header, worst-case varint, crc, and at
/// least one payload byte.
pub const MIN_CHUNK_BUF_LEN: usize = 1 + varint::MAX_VARINT_LEN + 2 + 1;

/// Bytes of message checksummed per callback while streaming the CRC.
const CRC_WINDOW: usize = 32;

/// Framing state for one in-flight message.
pub struct ChunkTransport {
    total_size: usize,
    read_offset: usize,
    multi_call_chunk: bool,
    single_chunk_message_length: usize,
}

/// One produced chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Bytes written into the caller buffer.
    pub bytes_written: usize,
    /// Whether any of the message remains after this chunk.
    pub more_data: bool,
}

impl ChunkTransport {
    pub fn new(total_size: usize, multi_call_chunk: bool) -> Self {
        Self {
            total_size,
            read_offset: 0,
            multi_call_chunk,
            single_chunk_message_length: 1 + 2 + total_size,
        }
    }

    /// Buffer size that would fit the entire message in one chunk.
    pub fn single_chunk_message_length(&self) -> usize {
        self.single_chunk_message_length
    }

    /// Message bytes already emitted.
    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    fn compute_crc16(
        &self,
        read_msg: &mut dyn FnMut(usize, &mut [u8]) -> bool,
    ) -> Option<u16> {
        let mut window = [0u8; CRC_WINDOW];
        let mut crc = crc16::INITIAL_VALUE;
        let mut offset = 0;
        while offset < self.total_size {
            let n = CRC_WINDOW.min(self.total_size - offset);
            if !read_msg(offset, &mut window[..n]) {
                return None;
            }
            crc = crc16::update(crc, &window[..n]);
            offset += n;
        }
        Some(crc)
    }

    /// Produces the next chunk into `out`. Returns `None` when `read_msg`
    /// reports failure; the message should then be aborted.
    ///
    /// An `out` smaller than [`MIN_CHUNK_BUF_LEN`] produces zero bytes
    /// with `more_data` still set, so the caller can retry with a real
    /// buffer.
    pub fn next_chunk(
        &mut self,
        out: &mut [u8],
        read_msg: &mut dyn FnMut(usize, &mut [u8]) -> bool,
    ) -> Option<ChunkInfo> {
        if out.len() < MIN_CHUNK_BUF_LEN {
            return Some(ChunkInfo { bytes_written: 0, more_data: true });
        }

        let bytes_remaining = self.total_size - self.read_offset;
        let mut cursor;
        let more_data;
        let bytes_to_read;

        if self.read_offset == 0 {
            more_data = self.single_chunk_message_length > out.len();
            // in multi-call mode the whole message is one logical chunk,
            // so the header's md bit only ever covers the single-call case
            let mut flags = ChunkHeader::empty();
            if more_data && !self.multi_call_chunk {
                flags |= ChunkHeader::MORE_DATA;
            }
            out[0] = flags.bits();
            cursor = 1;

            if flags.contains(ChunkHeader::MORE_DATA) {
                let varint_len = varint::encode_u32(self.total_size as u32, &mut out[cursor..]);
                cursor += varint_len;
                bytes_to_read = out.len() - 1 - 2 - varint_len;
            } else if self.multi_call_chunk {
                bytes_to_read = (out.len() - 1 - 2).min(self.total_size);
            } else {
                bytes_to_read = self.total_size;
            }

            let crc = self.compute_crc16(read_msg)?;
            out[cursor..cursor + 2].copy_from_slice(&crc.to_le_bytes());
            cursor += 2;
        } else if self.multi_call_chunk {
            bytes_to_read = (out.len() - 1).min(bytes_remaining);
            more_data = bytes_to_read != bytes_remaining;
            let mut flags = ChunkHeader::CONTINUATION;
            if more_data {
                flags |= ChunkHeader::MORE_DATA;
            }
            out[0] = flags.bits();
            cursor = 1;
        } else {
            let varint_len = varint::encode_u32(self.read_offset as u32, &mut out[1..]);
            bytes_to_read = (out.len() - 1 - varint_len).min(bytes_remaining);
            more_data = bytes_to_read != bytes_remaining;
            let mut flags = ChunkHeader::CONTINUATION;
            if more_data {
                flags |= ChunkHeader::MORE_DATA;
            }
            out[0] = flags.bits();
            cursor = 1 + varint_len;
        }

        if !read_msg(self.read_offset, &mut out[cursor..cursor + bytes_to_read]) {
            return None;
        }
        self.read_offset += bytes_to_read;
        Some(ChunkInfo { bytes_written: cursor + bytes_to_read, more_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(message: &[u8]) -> impl FnMut(usize, &mut [u8]) -> bool + '_ {
        move |offset, buf: &mut [u8]| {
            buf.copy_from_slice(&message[offset..offset + buf.len()]);
            true
        }
    }

    fn drain(message: &[u8], buf_len: usize, multi_call: bool) -> std::vec::Vec<std::vec::Vec<u8>> {
        let mut transport = ChunkTransport::new(message.len(), multi_call);
        let mut read = reader(message);
        let mut chunks = std::vec::Vec::new();
        loop {
            let mut buf = std::vec![0u8; buf_len];
            let info = transport.next_chunk(&mut buf, &mut read).unwrap();
            buf.truncate(info.bytes_written);
            chunks.push(buf);
            if !info.more_data {
                break;
            }
        }
        chunks
    }

    /// Reassembles chunks produced in single-call mode and checks framing
    /// invariants along the way.
    fn reassemble(chunks: &[std::vec::Vec<u8>]) -> (std::vec::Vec<u8>, u16) {
        let mut message = std::vec::Vec::new();
        let mut crc = 0u16;
        for (i, chunk) in chunks.iter().enumerate() {
            let flags = ChunkHeader::from_bits_truncate(chunk[0]);
            let is_last = i + 1 == chunks.len();
            assert_eq!(flags.contains(ChunkHeader::CONTINUATION), i > 0);
            assert_eq!(flags.contains(ChunkHeader::MORE_DATA), !is_last);

            let mut idx = 1;
            if i == 0 {
                if flags.contains(ChunkHeader::MORE_DATA) {
                    let (_total, n) = varint::decode_u32(&chunk[idx..]).unwrap();
                    idx += n;
                }
                crc = u16::from_le_bytes([chunk[idx], chunk[idx + 1]]);
                idx += 2;
            } else {
                let (offset, n) = varint::decode_u32(&chunk[idx..]).unwrap();
                assert_eq!(offset as usize, message.len());
                idx += n;
            }
            message.extend_from_slice(&chunk[idx..]);
        }
        (message, crc)
    }

    #[test]
    fn test_single_chunk_message() {
        let payload = [0xaa, 0xbb, 0xcc];
        let chunks = drain(&payload, 16, false);
        assert_eq!(chunks.len(), 1);

        let crc = crc16::compute(&payload);
        let expected = [0x00, crc.to_le_bytes()[0], crc.to_le_bytes()[1], 0xaa, 0xbb, 0xcc];
        assert_eq!(chunks[0], expected);
    }

    #[test]
    fn test_multi_chunk_message() {
        let payload: std::vec::Vec<u8> = (0..128u8).map(|i| i ^ 0x5a).collect();
        let chunks = drain(&payload, 16, false);

        // initial: hdr 0x40, varint(128) = 80 01, crc, then 11 data bytes
        assert_eq!(chunks[0][0], 0x40);
        assert_eq!(&chunks[0][1..3], &[0x80, 0x01]);
        assert_eq!(chunks[0].len(), 16);
        assert_eq!(&chunks[0][5..], &payload[..11]);

        // first continuation starts at offset 11
        assert_eq!(chunks[1][0], 0xc0);
        assert_eq!(chunks[1][1], 11);

        let last = chunks.last().unwrap();
        assert_eq!(last[0] & 0x40, 0, "final chunk must clear md");

        let (message, crc) = reassemble(&chunks);
        assert_eq!(message, payload);
        assert_eq!(crc, crc16::compute(&payload));
    }

    #[test]
    fn test_round_trip_across_buffer_sizes() {
        for msg_len in [1usize, 8, 13, 64, 200, 1000] {
            let payload: std::vec::Vec<u8> = (0..msg_len).map(|i| (i * 31 + 7) as u8).collect();
            for buf_len in [MIN_CHUNK_BUF_LEN, 12, 16, 64, 1500] {
                let chunks = drain(&payload, buf_len, false);
                let (message, crc) = reassemble(&chunks);
                assert_eq!(message, payload, "len {} buf {}", msg_len, buf_len);
                assert_eq!(crc, crc16::compute(&payload));
            }
        }
    }

    #[test]
    fn test_single_chunk_boundary() {
        // fits exactly: total + 3 == buf_len
        let payload = [1u8; 13];
        let chunks = drain(&payload, 16, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0][0], 0x00);

        // one byte over: must split and include the length varint
        let payload = [1u8; 14];
        let chunks = drain(&payload, 16, false);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0][0], 0x40);
    }

    #[test]
    fn test_multi_call_chunk_mode() {
        let payload: std::vec::Vec<u8> = (0..100u8).collect();
        let chunks = drain(&payload, 16, true);

        // initial chunk: md clear even though more calls follow, crc but
        // no length varint
        assert_eq!(chunks[0][0], 0x00);
        let crc = u16::from_le_bytes([chunks[0][1], chunks[0][2]]);
        assert_eq!(crc, crc16::compute(&payload));
        assert_eq!(&chunks[0][3..], &payload[..13]);

        // continuations: header byte only, then payload
        let mut message: std::vec::Vec<u8> = chunks[0][3..].to_vec();
        for (i, chunk) in chunks[1..].iter().enumerate() {
            let is_last = i + 2 == chunks.len();
            assert_eq!(chunk[0] & 0x80, 0x80);
            assert_eq!(chunk[0] & 0x40 != 0, !is_last);
            message.extend_from_slice(&chunk[1..]);
        }
        assert_eq!(message, payload);
    }

    #[test]
    fn test_undersized_buffer_produces_nothing() {
        let payload = [1u8; 32];
        let mut transport = ChunkTransport::new(payload.len(), false);
        let mut read = reader(&payload);

        let mut tiny = [0u8; MIN_CHUNK_BUF_LEN - 1];
        let info = transport.next_chunk(&mut tiny, &mut read).unwrap();
        assert_eq!(info.bytes_written, 0);
        assert!(info.more_data);
        assert_eq!(transport.read_offset(), 0);

        // a proper buffer picks up where nothing was lost
        let chunks = drain(&payload, 16, false);
        let (message, _) = reassemble(&chunks);
        assert_eq!(message, payload);
    }

    #[test]
    fn test_reader_failure_propagates() {
        let mut transport = ChunkTransport::new(64, false);
        let mut failing = |_offset: usize, _buf: &mut [u8]| false;
        let mut buf = [0u8; 16];
        assert!(transport.next_chunk(&mut buf, &mut failing).is_none());
    }
}
