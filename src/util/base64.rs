//! Base64 Encoder
//!
//! RFC 4648 encoding used when binary chunks or compact logs have to leave
//! the device over a text console. Only encoding is provided; the device
//! never consumes base64.

const BASE64_TABLE: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Bytes of output produced for `bin_len` bytes of input, padding included.
pub const fn encoded_len(bin_len: usize) -> usize {
    ((bin_len + 2) / 3) * 4
}

#[inline]
fn char_from_word(word: u32, offset: usize) -> u8 {
    // one output character per 6 bits
    BASE64_TABLE[((word >> (offset * 6)) & 0x3f) as usize]
}

/// Encodes `src` into `dst`. `dst` must hold at least
/// [`encoded_len`]`(src.len())` bytes; the number of bytes written is
/// returned.
pub fn encode(src: &[u8], dst: &mut [u8]) -> usize {
    let mut out_idx = 0;

    for bin_idx in (0..src.len()).step_by(3) {
        let byte0 = src[bin_idx] as u32;
        let byte1 = if bin_idx + 1 < src.len() { src[bin_idx + 1] as u32 } else { 0 };
        let byte2 = if bin_idx + 2 < src.len() { src[bin_idx + 2] as u32 } else { 0 };
        let triple = (byte0 << 16) + (byte1 << 8) + byte2;

        dst[out_idx] = char_from_word(triple, 3);
        dst[out_idx + 1] = char_from_word(triple, 2);
        dst[out_idx + 2] = if bin_idx + 1 < src.len() { char_from_word(triple, 1) } else { b'=' };
        dst[out_idx + 3] = if bin_idx + 2 < src.len() { char_from_word(triple, 0) } else { b'=' };
        out_idx += 4;
    }

    out_idx
}

/// Encodes the first `bin_len` bytes of `buf` in place. `buf` must hold at
/// least [`encoded_len`]`(bin_len)` bytes.
///
/// Works back to front so the tail of the expansion never clobbers input
/// bytes that have not been read yet.
pub fn encode_inplace(buf: &mut [u8], bin_len: usize) -> usize {
    if bin_len == 0 {
        return 0;
    }

    let remainder = bin_len % 3;
    let start_idx = if remainder == 0 { bin_len - 3 } else { bin_len - remainder };
    let total = encoded_len(bin_len);
    let mut out_idx = total;

    let mut bin_idx = start_idx as isize;
    while bin_idx >= 0 {
        let i = bin_idx as usize;
        let byte0 = buf[i] as u32;
        let byte1 = if i + 1 < bin_len { buf[i + 1] as u32 } else { 0 };
        let byte2 = if i + 2 < bin_len { buf[i + 2] as u32 } else { 0 };
        let triple = (byte0 << 16) + (byte1 << 8) + byte2;

        buf[out_idx - 1] = if i + 2 < bin_len { char_from_word(triple, 0) } else { b'=' };
        buf[out_idx - 2] = if i + 1 < bin_len { char_from_word(triple, 1) } else { b'=' };
        buf[out_idx - 3] = char_from_word(triple, 2);
        buf[out_idx - 4] = char_from_word(triple, 3);
        out_idx -= 4;
        bin_idx -= 3;
    }

    total
}
