//! Error types for flowtap.
//!
//! This module provides structured error types for flowtap operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`DecodeError`] - Errors from decoding captured frames
//!
//! All errors implement `std::error::Error`. The message parser itself never
//! surfaces errors from packet intake; decode failures are counted and
//! dropped there.

use thiserror::Error;

/// Main error type for flowtap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error decoding a captured frame
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while decoding a captured frame into a packet.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Link type the decoder does not know how to frame
    #[error("unsupported link type: {link_type}")]
    UnsupportedLinkType { link_type: u16 },

    /// Frame ends before the named layer's header does
    #[error("{layer}: frame too short (need {needed} bytes, have {have})")]
    TruncatedFrame {
        layer: &'static str,
        needed: usize,
        have: usize,
    },

    /// Ethernet frame carrying something other than IP
    #[error("not an IP frame (ethertype {ethertype:#06x})")]
    NotIp { ethertype: u16 },

    /// IP version nibble disagrees with the capture source's hint
    #[error("IP version {version} does not match capture hint {hint}")]
    IpVersionMismatch { version: u8, hint: u8 },

    /// IP packet carrying something other than TCP
    #[error("non-TCP transport (IP protocol {protocol})")]
    NonTcp { protocol: u8 },

    /// Header present but structurally invalid
    #[error("{layer}: malformed header: {reason}")]
    Malformed { layer: &'static str, reason: String },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
