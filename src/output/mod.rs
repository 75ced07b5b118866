//! Downstream sinks for emitted messages.
//!
//! The parser hands each completed message to a single callback; these sinks
//! are ready-made targets for that callback when the goal is inspecting or
//! recording traffic rather than replaying it.

mod http_file;
mod stdout;

pub use http_file::HttpFileOutput;
pub use stdout::StdoutOutput;

use std::fmt::Write as _;
use std::io;
use std::time::UNIX_EPOCH;

use crate::message::Message;

/// A downstream consumer of emitted messages.
pub trait Output: Send {
    /// Sink identifier (e.g. "stdout", "http-file").
    fn name(&self) -> &'static str;

    /// Write one message; returns the number of bytes written.
    fn write_message(&mut self, msg: &Message) -> io::Result<usize>;
}

/// Meta line shared by the text sinks: kind, identifier, and the first
/// packet's timestamp in nanoseconds since the epoch.
pub(crate) fn meta_line(msg: &Message) -> String {
    let kind = if msg.is_request { "request" } else { "response" };
    let ts = msg
        .timestamp()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{kind} {} {ts}", hex_uuid(&msg.uuid()))
}

pub(crate) fn hex_uuid(id: &[u8; 12]) -> String {
    let mut out = String::with_capacity(24);
    for b in id {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_uuid() {
        let id = [
            0x00, 0x01, 0x0a, 0xff, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80,
        ];
        assert_eq!(hex_uuid(&id), "00010aff1020304050607080");
    }

    #[test]
    fn test_meta_line_kind() {
        let req = Message::new(true);
        assert!(meta_line(&req).starts_with("request "));
        let resp = Message::new(false);
        assert!(meta_line(&resp).starts_with("response "));
    }
}
