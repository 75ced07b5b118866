//! Fuzz target for raw frame decoding.
//!
//! The decoder must reject arbitrary input with structured errors, never a
//! panic, under every supported link type and version hint:
//! - Link-layer framing offsets (loopback pseudo-header, Ethernet, raw IP)
//! - IP header length and total-length consistency
//! - TCP data offset and payload bounds

#![no_main]

use std::time::SystemTime;

use bytes::Bytes;
use flowtap::{link_type, parse_packet, CaptureInfo};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let info = CaptureInfo::full(data.len(), SystemTime::UNIX_EPOCH);
    let link_types = [
        link_type::NULL,
        link_type::ETHERNET,
        link_type::RAW,
        link_type::LOOP,
        link_type::IPV4,
        link_type::IPV6,
    ];
    for lt in link_types {
        for ip_version in [0u8, 4, 6] {
            let _ = parse_packet(Bytes::copy_from_slice(data), lt, ip_version, &info);
        }
    }
});
