//! Chunk Upload Client
//!
//! Minimal upload loop over a caller-supplied byte transport (an open
//! socket, a modem AT channel): one POST per chunk, response parsed
//! incrementally, stop on the first refusal so nothing is lost. Products
//! with a real HTTP stack post the chunks themselves and skip this.

use crate::error::{Error, Result};
use crate::http::request;
use crate::http::response::{HttpParseStatus, HttpResponseContext};
use crate::http::upload_complete;

/// The byte pipe the client drives. Both directions are synchronous from
/// the client's point of view.
pub trait HttpTransport {
    /// Pushes request bytes out. False aborts the upload.
    fn send(&mut self, data: &[u8]) -> bool;

    /// Pulls response bytes in, returning how many landed in `out`.
    /// `None` means the connection failed.
    fn recv(&mut self, out: &mut [u8]) -> Option<usize>;
}

/// Connection settings for the chunks endpoint.
#[derive(Debug, Clone, Copy)]
pub struct HttpClientConfig<'a> {
    pub project_key: &'a str,
    pub host: &'a str,
}

impl Default for HttpClientConfig<'_> {
    fn default() -> Self {
        Self { project_key: "", host: crate::config::CHUNKS_API_HOST }
    }
}

/// Posts one chunk and waits out the response. Returns the HTTP status
/// code when the exchange completed, `Error::Storage` when the transport
/// failed mid-exchange.
pub fn post_chunk(
    transport: &mut dyn HttpTransport,
    config: &HttpClientConfig<'_>,
    device_serial: &str,
    chunk: &[u8],
) -> Result<u32> {
    let mut send = |data: &[u8]| transport.send(data);
    if !request::start_chunk_post(
        &mut send,
        device_serial,
        config.project_key,
        config.host,
        chunk.len(),
    ) {
        return Err(Error::Storage);
    }
    if !transport.send(chunk) {
        return Err(Error::Storage);
    }

    let mut ctx = HttpResponseContext::new();
    let mut rx = [0u8; 64];
    loop {
        let n = match transport.recv(&mut rx) {
            Some(0) | None => return Err(Error::Storage),
            Some(n) => n,
        };
        if ctx.parse(&rx[..n]) {
            break;
        }
    }
    if ctx.parse_error() != HttpParseStatus::Ok {
        return Err(Error::Integrity);
    }
    Ok(ctx.http_status_code())
}

/// Whether the device may treat the chunk as delivered. 409 on a coredump
/// means the server already has it; locally that is the same as success.
pub fn chunk_delivered(status: u32) -> bool {
    upload_complete(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport fed from a script: records sends, replays a canned
    /// response.
    struct ScriptedTransport {
        sent: std::vec::Vec<u8>,
        response: std::vec::Vec<u8>,
        cursor: usize,
        refuse_sends: bool,
    }

    impl ScriptedTransport {
        fn replying(response: &[u8]) -> Self {
            Self {
                sent: std::vec::Vec::new(),
                response: response.to_vec(),
                cursor: 0,
                refuse_sends: false,
            }
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn send(&mut self, data: &[u8]) -> bool {
            if self.refuse_sends {
                return false;
            }
            self.sent.extend_from_slice(data);
            true
        }
        fn recv(&mut self, out: &mut [u8]) -> Option<usize> {
            if self.cursor >= self.response.len() {
                return None;
            }
            // trickle a few bytes at a time to exercise resumed parsing
            let n = 3.min(self.response.len() - self.cursor).min(out.len());
            out[..n].copy_from_slice(&self.response[self.cursor..self.cursor + n]);
            self.cursor += n;
            Some(n)
        }
    }

    fn config() -> HttpClientConfig<'static> {
        HttpClientConfig { project_key: "key", host: "chunks.memfault.com" }
    }

    #[test]
    fn test_post_chunk_accepted() {
        let mut transport =
            ScriptedTransport::replying(b"HTTP/1.1 202 Accepted\r\nContent-Length: 8\r\n\r\nAccepted");
        let status =
            post_chunk(&mut transport, &config(), "DEMOSERIAL", &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(status, 202);
        assert!(chunk_delivered(status));

        // request line, headers, then the chunk payload verbatim
        let sent = std::string::String::from_utf8_lossy(&transport.sent);
        assert!(sent.starts_with("POST /api/v0/chunks/DEMOSERIAL HTTP/1.1\r\n"));
        assert!(sent.contains("Content-Length:3\r\n"));
        assert!(transport.sent.ends_with(&[0x01, 0x02, 0x03]));
    }

    #[test]
    fn test_post_chunk_server_error_reported() {
        let mut transport = ScriptedTransport::replying(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n",
        );
        let status = post_chunk(&mut transport, &config(), "SER", &[9]).unwrap();
        assert_eq!(status, 503);
        assert!(!chunk_delivered(status));
    }

    #[test]
    fn test_transport_failures() {
        let mut transport = ScriptedTransport::replying(b"");
        transport.refuse_sends = true;
        assert_eq!(
            post_chunk(&mut transport, &config(), "SER", &[1]),
            Err(Error::Storage)
        );

        // sends work but the connection dies before a response
        let mut transport = ScriptedTransport::replying(b"HTTP/1.1 2");
        assert_eq!(
            post_chunk(&mut transport, &config(), "SER", &[1]),
            Err(Error::Storage)
        );
    }

    #[test]
    fn test_garbage_response_is_integrity_error() {
        let mut transport = ScriptedTransport::replying(b"not http at all\r\n");
        assert_eq!(
            post_chunk(&mut transport, &config(), "SER", &[1]),
            Err(Error::Integrity)
        );
    }
}
