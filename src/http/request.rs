//! Chunk POST Request Builder
//!
//! Emits the request line and headers for posting chunk data, byte for
//! byte, through a caller `write` callback (typically a send() on an open
//! socket). The builder never owns a connection; after it returns, the
//! caller streams the chunk payload itself.

use core::fmt::Write as _;

use heapless::String;

use crate::config::SDK_USER_AGENT;

// Scratch for one formatted header line.
const LINE_MAX: usize = 100;

fn write_formatted(
    write: &mut dyn FnMut(&[u8]) -> bool,
    args: core::fmt::Arguments<'_>,
) -> bool {
    let mut line: String<LINE_MAX> = String::new();
    if line.write_fmt(args).is_err() {
        // a header that does not fit would produce a corrupt request
        return false;
    }
    write(line.as_bytes())
}

/// Emits the request line and headers for `POST /api/v0/chunks/<serial>`,
/// ending with the blank line. Returns false as soon as `write` refuses.
pub fn start_chunk_post(
    write: &mut dyn FnMut(&[u8]) -> bool,
    device_serial: &str,
    project_key: &str,
    host: &str,
    content_length: usize,
) -> bool {
    if !write_formatted(write, format_args!("POST /api/v0/chunks/{} HTTP/1.1\r\n", device_serial)) {
        return false;
    }
    // every HTTP/1.1 request must carry a Host header
    if !write_formatted(write, format_args!("Host:{}\r\n", host)) {
        return false;
    }
    if !write_formatted(write, format_args!("User-Agent:{}\r\n", SDK_USER_AGENT)) {
        return false;
    }
    if !write_formatted(write, format_args!("Memfault-Project-Key:{}\r\n", project_key)) {
        return false;
    }
    if !write(b"Content-Type:application/octet-stream\r\n") {
        return false;
    }
    if !write_formatted(write, format_args!("Content-Length:{}\r\n", content_length)) {
        return false;
    }
    write(b"\r\n")
}
