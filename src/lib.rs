//! # flowtap
//!
//! Reassembles application-layer request/response messages from captured TCP
//! traffic.
//!
//! flowtap sits between a packet capture source and a recording or replay
//! pipeline. It ingests individually captured link-layer frames, groups them
//! into directional flows, reorders them by sequence number, stitches them
//! into whole application messages, pairs each request with its response on
//! the same connection, and hands completed messages to a callback carrying a
//! stable 12-byte identifier shared by both halves of a pair.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::mpsc;
//! use flowtap::{http, MessageParser, ParserConfig};
//!
//! let (tx, rx) = mpsc::channel();
//! let parser = MessageParser::new(ParserConfig::default(), move |msg| {
//!     let _ = tx.send(msg);
//! });
//! parser.set_start_hint(|p| {
//!     (
//!         http::has_request_title(&p.payload),
//!         http::has_response_title(&p.payload),
//!     )
//! });
//! parser.set_end_hint(|m| http::has_full_payload(&m.data()));
//!
//! // Feed decoded packets from the capture source:
//! // parser.handle_packet(pckt);
//! # drop(rx);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                             flowtap                                |
//! +--------------------------------------------------------------------+
//! |  packet/   - Packet record, raw-frame decoding (link types)        |
//! |  message/  - per-direction reassembly, sort/dedup, UUID            |
//! |  flow/     - normalized flow keys, per-flow state, pairing FIFO    |
//! |  parser/   - orchestrator: hints, size cap, timeout, emission      |
//! |  http/     - default HTTP/1.x start/end hint predicates            |
//! |  output/   - ready-made sinks for the emission callback            |
//! |  error/    - error types                                           |
//! +--------------------------------------------------------------------+
//! ```
//!
//! The parser is a single-threaded cooperative consumer: packets are fed
//! serially, and the only background activity is the expiration sweep,
//! serialized against intake by one mutex. Completion of a message is driven
//! by pluggable start/end hints (the [`http`] module ships HTTP/1.x
//! defaults), a soft size cap, and an inactivity timeout; the last two mark
//! the message `truncated` / `timed_out` instead of failing. The parser is
//! an observer, not an endpoint: it never generates ACKs and cannot recover
//! data the capture never saw.

pub mod error;
pub mod flow;
pub mod http;
pub mod message;
pub mod output;
pub mod packet;
pub mod parser;
pub mod prelude;

pub use error::{DecodeError, Error, Result};
pub use flow::{Direction, FlowKey};
pub use message::Message;
pub use output::{HttpFileOutput, Output, StdoutOutput};
pub use packet::{link_type, parse_packet, CaptureInfo, Packet, TcpFlags};
pub use parser::{MessageParser, ParserConfig, ParserStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
