//! Minimal HTTP/1.1 wire parsing and response serialization.
//!
//! The bytes handed to [`parse_request`] arrive over the public Internet via
//! the rendezvous server, so parsing enforces hard bounds on header count,
//! individual header line length, and total header block size rather than
//! trusting whatever the framed length claims.

use thiserror::Error;

/// Header count, line length, and total header block bounds.
pub const MAX_HEADERS: usize = 128;
pub const MAX_HEADER_LINE_LEN: usize = 8 * 1024;
pub const MAX_HEADER_BLOCK_LEN: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestParseError {
    #[error("request has no request line")]
    EmptyRequest,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("too many headers (limit {MAX_HEADERS})")]
    TooManyHeaders,
    #[error("header line exceeds {MAX_HEADER_LINE_LEN} bytes")]
    HeaderLineTooLong,
    #[error("header block exceeds {MAX_HEADER_BLOCK_LEN} bytes")]
    HeaderBlockTooLarge,
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Parse the raw bytes of one HTTP/1.1 request. The version token on the
/// request line is intentionally discarded; callers re-issue with a fixed
/// HTTP version.
pub fn parse_request(raw: &[u8]) -> Result<ParsedRequest, RequestParseError> {
    let header_end = find_header_terminator(raw).unwrap_or(raw.len());
    if header_end > MAX_HEADER_BLOCK_LEN {
        return Err(RequestParseError::HeaderBlockTooLarge);
    }

    let header_block = &raw[..header_end];
    let text = String::from_utf8_lossy(header_block);
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or(RequestParseError::EmptyRequest)?;
    if request_line.is_empty() {
        return Err(RequestParseError::EmptyRequest);
    }
    let mut parts = request_line.splitn(3, ' ');
    let method = parts.next().ok_or(RequestParseError::MalformedRequestLine)?;
    let target = parts.next().ok_or(RequestParseError::MalformedRequestLine)?;
    if method.is_empty() || target.is_empty() {
        return Err(RequestParseError::MalformedRequestLine);
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.len() > MAX_HEADER_LINE_LEN {
            return Err(RequestParseError::HeaderLineTooLong);
        }
        if headers.len() >= MAX_HEADERS {
            return Err(RequestParseError::TooManyHeaders);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RequestParseError::MalformedHeader(line.to_string()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let body_start = find_body_start(raw).unwrap_or(raw.len());
    let body = raw.get(body_start..).unwrap_or_default().to_vec();

    Ok(ParsedRequest { method: method.to_string(), target: target.to_string(), headers, body })
}

fn find_header_terminator(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 2)
}

fn find_body_start(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// An HTTP response ready to be re-framed onto the wire.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Serialize a response back to raw HTTP/1.1 wire bytes: status line, each
/// header, a terminating blank line, then the full body.
pub fn serialize_response(response: &OutboundResponse) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, response.reason).into_bytes();
    for (name, value) in &response.headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&response.body);
    out
}
