//! Console Chunk Export
//!
//! Fallback upload path for devices with no socket: each chunk is emitted
//! as an `MC:<base64>:` line over whatever console the product has, and a
//! log scraper on the other side relays the lines to the backend.

use crate::config::DATA_EXPORT_CHUNK_MAX_LEN;
use crate::util::base64;

const PREFIX: &[u8] = b"MC:";
const SUFFIX: &[u8] = b":";

/// Upper bound on an export line's length.
pub const EXPORT_LINE_MAX_LEN: usize =
    PREFIX.len() + base64::encoded_len(DATA_EXPORT_CHUNK_MAX_LEN) + SUFFIX.len();

/// Formats one chunk as an `MC:<base64>:` line and hands it to `out`.
/// Chunks longer than [`DATA_EXPORT_CHUNK_MAX_LEN`] are refused; the
/// caller controls the chunk size via the buffer it drains with.
pub fn export_chunk(chunk: &[u8], out: &mut dyn FnMut(&[u8])) -> bool {
    if chunk.is_empty() || chunk.len() > DATA_EXPORT_CHUNK_MAX_LEN {
        return false;
    }
    let mut line = [0u8; EXPORT_LINE_MAX_LEN];
    let mut n = 0;
    line[..PREFIX.len()].copy_from_slice(PREFIX);
    n += PREFIX.len();
    n += base64::encode(chunk, &mut line[n..]);
    line[n..n + SUFFIX.len()].copy_from_slice(SUFFIX);
    n += SUFFIX.len();
    out(&line[..n]);
    true
}
