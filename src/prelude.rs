//! Convenient re-exports for common usage.
//!
//! ```rust
//! use flowtap::prelude::*;
//!
//! let parser = MessageParser::new(ParserConfig::default(), |_msg| {});
//! # drop(parser);
//! ```

// Core types
pub use crate::message::Message;
pub use crate::packet::{link_type, parse_packet, CaptureInfo, Packet, TcpFlags};
pub use crate::parser::{MessageParser, ParserConfig, ParserStats};

// Flow identification
pub use crate::flow::{Direction, FlowKey};

// Sinks
pub use crate::output::{HttpFileOutput, Output, StdoutOutput};

// Error types
pub use crate::error::{DecodeError, Error, Result};
