//! Packet records and raw-frame decoding.
//!
//! [`parse_packet`] walks the link-layer framing of a captured buffer down to
//! the TCP header and produces an immutable [`Packet`]. The payload is a
//! sub-slice of the capture buffer (`bytes::Bytes`), so no payload bytes are
//! copied on ingest and packets stay cheap to clone while a message is being
//! assembled.

use std::net::{IpAddr, Ipv4Addr};
use std::time::SystemTime;

use bytes::Bytes;
use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice};

use crate::error::DecodeError;

/// IP protocol number for TCP.
pub const IP_PROTO_TCP: u8 = 6;

/// Link type constants (pcap numbering) understood by the decoder.
pub mod link_type {
    /// BSD loopback; 4-byte host-order protocol family before the IP header.
    pub const NULL: u16 = 0;
    /// Ethernet II.
    pub const ETHERNET: u16 = 1;
    /// Raw IP, version told by the header nibble.
    pub const RAW: u16 = 101;
    /// OpenBSD loopback; 4-byte big-endian protocol family.
    pub const LOOP: u16 = 108;
    /// Raw IPv4.
    pub const IPV4: u16 = 228;
    /// Raw IPv6.
    pub const IPV6: u16 = 229;
}

/// Well-known EtherType values the decoder accepts.
mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
}

/// TCP header flags carried by a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

/// Capture metadata attached to a raw frame.
#[derive(Debug, Clone, Copy)]
pub struct CaptureInfo {
    /// Original length on the wire.
    pub length: usize,
    /// Captured length (may be less than original).
    pub capture_length: usize,
    /// Capture timestamp.
    pub timestamp: SystemTime,
}

impl CaptureInfo {
    /// Metadata for a fully captured frame of `len` bytes.
    pub fn full(len: usize, timestamp: SystemTime) -> Self {
        Self {
            length: len,
            capture_length: len,
            timestamp,
        }
    }
}

/// A single captured TCP segment.
///
/// Packets are immutable once decoded and are dropped when the message that
/// owns them is released. A packet with an empty payload still participates
/// in flow membership and timestamps but contributes no bytes to reassembly.
#[derive(Debug, Clone)]
pub struct Packet {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// TCP sequence number.
    pub seq: u32,
    /// TCP acknowledgement number.
    pub ack: u32,
    pub flags: TcpFlags,
    /// Payload bytes; aliases the capture buffer.
    pub payload: Bytes,
    /// Capture timestamp.
    pub timestamp: SystemTime,
    /// Link type of the capture the packet came from.
    pub link_type: u16,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            seq: 0,
            ack: 0,
            flags: TcpFlags::default(),
            payload: Bytes::new(),
            timestamp: SystemTime::UNIX_EPOCH,
            link_type: link_type::NULL,
        }
    }
}

/// Decode a raw captured frame into a [`Packet`].
///
/// `link_type` uses pcap link-type numbering; `ip_version` is the capture
/// source's 4-or-6 hint, cross-checked against the IP version nibble (any
/// other value disables the check). Frames that are not TCP over IP under a
/// supported link type come back as a [`DecodeError`].
pub fn parse_packet(
    data: Bytes,
    link_type_tag: u16,
    ip_version: u8,
    info: &CaptureInfo,
) -> Result<Packet, DecodeError> {
    let ip_off = match link_type_tag {
        // The protocol family's byte order depends on the capturing OS, so
        // the IP version nibble is what actually decides v4 vs v6.
        link_type::NULL | link_type::LOOP => {
            if data.len() < 4 {
                return Err(DecodeError::TruncatedFrame {
                    layer: "loopback",
                    needed: 4,
                    have: data.len(),
                });
            }
            4
        }
        link_type::ETHERNET => {
            let eth = Ethernet2HeaderSlice::from_slice(&data).map_err(|e| {
                DecodeError::Malformed {
                    layer: "ethernet",
                    reason: e.to_string(),
                }
            })?;
            match eth.ether_type().0 {
                ethertype::IPV4 | ethertype::IPV6 => {}
                other => return Err(DecodeError::NotIp { ethertype: other }),
            }
            eth.slice().len()
        }
        link_type::RAW | link_type::IPV4 | link_type::IPV6 => 0,
        other => return Err(DecodeError::UnsupportedLinkType { link_type: other }),
    };

    let ip = &data[ip_off..];
    if ip.is_empty() {
        return Err(DecodeError::TruncatedFrame {
            layer: "ip",
            needed: ip_off + 1,
            have: data.len(),
        });
    }

    let version = ip[0] >> 4;
    if matches!(ip_version, 4 | 6) && version != ip_version {
        return Err(DecodeError::IpVersionMismatch {
            version,
            hint: ip_version,
        });
    }

    let (src_ip, dst_ip, tcp_off, declared_end) = match version {
        4 => {
            let ipv4 = Ipv4HeaderSlice::from_slice(ip).map_err(|e| DecodeError::Malformed {
                layer: "ipv4",
                reason: e.to_string(),
            })?;
            if ipv4.protocol().0 != IP_PROTO_TCP {
                return Err(DecodeError::NonTcp {
                    protocol: ipv4.protocol().0,
                });
            }
            (
                IpAddr::V4(ipv4.source_addr()),
                IpAddr::V4(ipv4.destination_addr()),
                ip_off + ipv4.slice().len(),
                ip_off + ipv4.total_len() as usize,
            )
        }
        6 => {
            let ipv6 = Ipv6HeaderSlice::from_slice(ip).map_err(|e| DecodeError::Malformed {
                layer: "ipv6",
                reason: e.to_string(),
            })?;
            // Extension headers are not walked; anything but TCP directly
            // after the fixed header is rejected.
            if ipv6.next_header().0 != IP_PROTO_TCP {
                return Err(DecodeError::NonTcp {
                    protocol: ipv6.next_header().0,
                });
            }
            (
                IpAddr::V6(ipv6.source_addr()),
                IpAddr::V6(ipv6.destination_addr()),
                ip_off + 40,
                ip_off + 40 + ipv6.payload_length() as usize,
            )
        }
        other => {
            return Err(DecodeError::Malformed {
                layer: "ip",
                reason: format!("bad version nibble {other}"),
            })
        }
    };

    let tcp = TcpHeaderSlice::from_slice(&data[tcp_off..]).map_err(|e| DecodeError::Malformed {
        layer: "tcp",
        reason: e.to_string(),
    })?;
    let payload_start = tcp_off + tcp.slice().len();
    if declared_end < payload_start {
        return Err(DecodeError::Malformed {
            layer: "ip",
            reason: "total length shorter than enclosed headers".to_string(),
        });
    }
    // The IP total length strips any link-layer trailer; a short capture
    // clamps the payload to what is actually present.
    let payload_end = declared_end.min(data.len());

    let flags = TcpFlags {
        fin: tcp.fin(),
        syn: tcp.syn(),
        rst: tcp.rst(),
        psh: tcp.psh(),
        ack: tcp.ack(),
        urg: tcp.urg(),
    };
    let src_port = tcp.source_port();
    let dst_port = tcp.destination_port();
    let seq = tcp.sequence_number();
    let ack = tcp.acknowledgment_number();
    let payload = data.slice(payload_start..payload_end);

    Ok(Packet {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        seq,
        ack,
        flags,
        payload,
        timestamp: info.timestamp,
        link_type: link_type_tag,
    })
}
