//! Streaming HTTP Response Parser
//!
//! A minimal parser for chunk-post responses, fed however many bytes the
//! socket produces at a time. Only the status code and `Content-Length`
//! are interpreted; everything else is skipped. The body is consumed (and
//! a truncated copy retained for debugging) so responses of any size can
//! be drained through a fixed 128 byte line buffer.

/// Parser outcome, valid once parsing reports completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpParseStatus {
    Ok,
    ParseStatusLineError,
    ParseHeaderError,
    HeaderTooLongError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsePhase {
    ExpectingStatusLine,
    ExpectingHeader,
    ExpectingBody,
}

const LINE_BUF_LEN: usize = 128;

/// Incremental parser state. Zero-initialized via [`Default`] before the
/// first feed.
pub struct HttpResponseContext {
    parse_error: HttpParseStatus,
    http_status_code: u32,
    /// Bytes consumed by the most recent [`HttpResponseContext::parse`]
    /// call.
    data_bytes_processed: usize,
    phase: ParsePhase,
    content_received: usize,
    content_length: usize,
    line_len: usize,
    line_buf: [u8; LINE_BUF_LEN],
}

impl Default for HttpResponseContext {
    fn default() -> Self {
        Self {
            parse_error: HttpParseStatus::Ok,
            http_status_code: 0,
            data_bytes_processed: 0,
            phase: ParsePhase::ExpectingStatusLine,
            content_received: 0,
            content_length: 0,
            line_len: 0,
            line_buf: [0; LINE_BUF_LEN],
        }
    }
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn count_spaces(line: &[u8], mut idx: usize) -> usize {
    let start = idx;
    while idx < line.len() && line[idx] == b' ' {
        idx += 1;
    }
    idx - start
}

/// Decimal parse stopping at a space. Returns digits consumed, or `None`
/// on an unexpected character.
fn parse_decimal(buf: &[u8], value_out: &mut usize) -> Option<usize> {
    let mut result = 0usize;
    let mut idx = 0;
    while idx < buf.len() {
        let c = buf[idx];
        if c == b' ' {
            break;
        }
        if !is_digit(c) {
            return None;
        }
        result = result * 10 + (c - b'0') as usize;
        idx += 1;
    }
    *value_out = result;
    Some(idx)
}

fn parse_status_line(line: &[u8], status_out: &mut u32) -> bool {
    const HTTP_VERSION: &[u8] = b"HTTP/1.";
    if line.len() < HTTP_VERSION.len() || &line[..HTTP_VERSION.len()] != HTTP_VERSION {
        return false;
    }
    let mut idx = HTTP_VERSION.len();

    // single digit minor version
    if idx >= line.len() || !is_digit(line[idx]) {
        return false;
    }
    idx += 1;

    let spaces = count_spaces(line, idx);
    if spaces == 0 {
        return false;
    }
    idx += spaces;

    const STATUS_CODE_DIGITS: usize = 3;
    if line.len() < idx + STATUS_CODE_DIGITS {
        return false;
    }
    let mut status = 0usize;
    match parse_decimal(&line[idx..idx + STATUS_CODE_DIGITS], &mut status) {
        // the rest of the line is the reason phrase, which is not
        // interesting
        Some(digits) if digits == STATUS_CODE_DIGITS => {
            *status_out = status as u32;
            true
        }
        _ => false,
    }
}

/// The only header of interest is Content-Length; everything else passes
/// through untouched. Returns false on a malformed Content-Length.
fn parse_header(line: &[u8], content_length_out: &mut usize) -> bool {
    const CONTENT_LENGTH: &[u8] = b"content-length";
    if line.len() < CONTENT_LENGTH.len() {
        return true;
    }
    let matches = line[..CONTENT_LENGTH.len()]
        .iter()
        .zip(CONTENT_LENGTH)
        .all(|(&c, &want)| c.to_ascii_lowercase() == want);
    if !matches {
        return true;
    }

    let mut idx = CONTENT_LENGTH.len();
    idx += count_spaces(line, idx);
    if idx >= line.len() || line[idx] != b':' {
        return false;
    }
    idx += 1;
    idx += count_spaces(line, idx);

    match parse_decimal(&line[idx..], content_length_out) {
        Some(digits) => digits > 0,
        None => false,
    }
}

impl HttpResponseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The error recorded when parsing completed.
    pub fn parse_error(&self) -> HttpParseStatus {
        self.parse_error
    }

    pub fn http_status_code(&self) -> u32 {
        self.http_status_code
    }

    /// Bytes consumed by the most recent `parse` call.
    pub fn data_bytes_processed(&self) -> usize {
        self.data_bytes_processed
    }

    /// A truncated copy of the body, for debug output only.
    pub fn body(&self) -> &[u8] {
        &self.line_buf[..self.line_len.min(LINE_BUF_LEN)]
    }

    /// Consumes response bytes. Returns true when the response is fully
    /// parsed (check [`HttpResponseContext::parse_error`]), false when
    /// more data is needed.
    pub fn parse(&mut self, data: &[u8]) -> bool {
        self.data_bytes_processed = 0;

        for &c in data {
            self.data_bytes_processed += 1;

            if self.phase == ParsePhase::ExpectingBody {
                // eat the body, keeping what fits for debugging
                self.content_received += 1;
                if self.line_len < LINE_BUF_LEN {
                    self.line_buf[self.line_len] = c;
                    self.line_len += 1;
                }
                if self.content_received == self.content_length {
                    return true;
                }
                continue;
            }

            if self.line_len >= LINE_BUF_LEN {
                self.parse_error = HttpParseStatus::HeaderTooLongError;
                return true;
            }
            self.line_buf[self.line_len] = c;
            self.line_len += 1;

            if self.line_len < 2 {
                continue;
            }
            let len = self.line_len - 2;
            if &self.line_buf[len..self.line_len] != b"\r\n" {
                continue;
            }
            self.line_len = 0;

            match self.phase {
                ParsePhase::ExpectingStatusLine => {
                    let mut status = 0;
                    if !parse_status_line(&self.line_buf[..len], &mut status) {
                        self.parse_error = HttpParseStatus::ParseStatusLineError;
                        return true;
                    }
                    self.http_status_code = status;
                    self.phase = ParsePhase::ExpectingHeader;
                }
                ParsePhase::ExpectingHeader => {
                    let mut content_length = self.content_length;
                    if !parse_header(&self.line_buf[..len], &mut content_length) {
                        self.parse_error = HttpParseStatus::ParseHeaderError;
                        return true;
                    }
                    self.content_length = content_length;
                    if len != 0 {
                        continue;
                    }
                    // end of headers
                    if self.content_length == 0 {
                        return true;
                    }
                    self.phase = ParsePhase::ExpectingBody;
                }
                ParsePhase::ExpectingBody => unreachable!("handled above"),
            }
        }
        false
    }
}
