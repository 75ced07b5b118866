//! HTTP/1.x boundary hints.
//!
//! The reassembler core is protocol-agnostic; these helpers are the default
//! predicates a caller wires into the parser's start/end hint slots to
//! segment HTTP-shaped traffic:
//!
//! ```rust
//! use flowtap::{http, MessageParser, ParserConfig};
//!
//! let parser = MessageParser::new(ParserConfig::default(), |_msg| {});
//! parser.set_start_hint(|p| {
//!     (
//!         http::has_request_title(&p.payload),
//!         http::has_response_title(&p.payload),
//!     )
//! });
//! parser.set_end_hint(|m| http::has_full_payload(&m.data()));
//! ```

/// Maximum number of headers examined when validating a status line.
const MAX_HINT_HEADERS: usize = 64;

/// Request methods recognized by [`has_request_title`].
const METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

/// True when the payload begins with a complete HTTP/1.x request line.
pub fn has_request_title(payload: &[u8]) -> bool {
    let Some(line_end) = find_crlf(payload) else {
        return false;
    };
    let Ok(line) = std::str::from_utf8(&payload[..line_end]) else {
        return false;
    };
    let mut parts = line.split(' ');
    let (Some(method), Some(_target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    parts.next().is_none() && METHODS.contains(&method) && version.starts_with("HTTP/1.")
}

/// True when the payload begins with a complete HTTP/1.x status line.
pub fn has_response_title(payload: &[u8]) -> bool {
    if !payload.starts_with(b"HTTP/1.") {
        return false;
    }
    let mut headers = [httparse::EMPTY_HEADER; MAX_HINT_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    match resp.parse(payload) {
        Ok(_) => resp.code.is_some(),
        // The status line was fine; only the header buffer ran out.
        Err(httparse::Error::TooManyHeaders) => true,
        Err(_) => false,
    }
}

/// First token of the request line when it is a known method.
pub fn request_method(payload: &[u8]) -> Option<&str> {
    let line_end = find_crlf(payload)?;
    let line = std::str::from_utf8(&payload[..line_end]).ok()?;
    let method = line.split(' ').next().unwrap_or("");
    METHODS.contains(&method).then_some(method)
}

/// True when `data` holds a complete HTTP/1.x message: headers terminated,
/// plus a body satisfying Content-Length or chunked transfer encoding when
/// either is present. Header-only messages complete at the empty line.
pub fn has_full_payload(data: &[u8]) -> bool {
    let Some(header_end) = find_header_end(data) else {
        return false;
    };
    let headers = &data[..header_end];
    let body = &data[header_end + 4..];

    if header_value(headers, "transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        return chunked_body_complete(body);
    }
    if let Some(len) = header_value(headers, "content-length").and_then(|v| v.parse::<usize>().ok())
    {
        return body.len() >= len;
    }
    true
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Value of the first header with this (case-insensitive) name.
fn header_value<'a>(headers: &'a [u8], name: &str) -> Option<&'a str> {
    for line in headers.split(|&b| b == b'\n') {
        let Ok(line) = std::str::from_utf8(line) else {
            continue;
        };
        if let Some((key, value)) = line.trim_end_matches('\r').split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Walk chunk headers until the terminating zero-size chunk.
fn chunked_body_complete(body: &[u8]) -> bool {
    let mut pos = 0;
    loop {
        let Some(line_end) = body[pos..].windows(2).position(|w| w == b"\r\n").map(|p| pos + p)
        else {
            return false;
        };
        let Ok(size_str) = std::str::from_utf8(&body[pos..line_end]) else {
            return false;
        };
        // Chunk extensions (anything after a semicolon) are ignored.
        let size_part = size_str.split(';').next().unwrap_or(size_str);
        let Ok(chunk_size) = usize::from_str_radix(size_part.trim(), 16) else {
            return false;
        };
        pos = line_end + 2;
        if chunk_size == 0 {
            return true;
        }
        pos += chunk_size + 2;
        if pos > body.len() {
            return false;
        }
    }
}
