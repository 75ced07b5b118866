//! Reassembled application-layer messages.

use std::time::{Instant, SystemTime};

use ring::digest;
use smallvec::SmallVec;

use crate::packet::Packet;

/// One application request or response reassembled from one direction of a
/// flow.
///
/// Packets are kept sorted by sequence number with duplicates dropped, so
/// [`data`](Message::data) yields the byte stream in transmission order
/// regardless of capture order. Once the parser emits a message it takes no
/// further packets; a later packet in the same direction starts a new one.
#[derive(Debug)]
pub struct Message {
    packets: SmallVec<[Packet; 4]>,
    length: usize,
    uuid: Option<[u8; 12]>,
    /// True when the message originated from the requesting side.
    pub is_request: bool,
    /// The size cap cut this message short.
    pub truncated: bool,
    /// Emitted by the inactivity sweep rather than a completion hint.
    pub timed_out: bool,
    last_seen: Instant,
}

impl Message {
    pub fn new(is_request: bool) -> Self {
        Self {
            packets: SmallVec::new(),
            length: 0,
            uuid: None,
            is_request,
            truncated: false,
            timed_out: false,
            last_seen: Instant::now(),
        }
    }

    /// Insert a packet preserving sequence order. A packet whose sequence
    /// number is already present is dropped. Returns whether it was kept.
    pub fn append(&mut self, pckt: Packet) -> bool {
        match self.packets.binary_search_by_key(&pckt.seq, |p| p.seq) {
            Ok(_) => false,
            Err(idx) => {
                self.length += pckt.payload.len();
                self.packets.insert(idx, pckt);
                true
            }
        }
    }

    /// Re-establish the sort/dedup invariant after direct construction:
    /// stable order by sequence number, duplicates collapsed to the first
    /// seen.
    pub fn sort(&mut self) {
        self.packets.sort_by_key(|p| p.seq);
        self.packets.dedup_by_key(|p| p.seq);
        self.length = self.packets.iter().map(|p| p.payload.len()).sum();
    }

    /// Whether a packet with this sequence number is already present.
    pub fn contains_seq(&self, seq: u32) -> bool {
        self.packets.binary_search_by_key(&seq, |p| p.seq).is_ok()
    }

    /// Payload bytes concatenated in sequence order.
    pub fn data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length);
        for p in &self.packets {
            out.extend_from_slice(&p.payload);
        }
        out
    }

    /// Total payload length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The packets making up this message, in sequence order.
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Timestamp of the first packet.
    pub fn timestamp(&self) -> SystemTime {
        self.packets
            .first()
            .map(|p| p.timestamp)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Stable 12-byte identifier derived from the first packet's endpoints
    /// and sequence number. A response adopts its paired request's UUID at
    /// emission time, so UUID equality marks a request/response pair.
    pub fn uuid(&self) -> [u8; 12] {
        self.uuid.unwrap_or_else(|| self.derive_uuid())
    }

    fn derive_uuid(&self) -> [u8; 12] {
        let mut seed = [0u8; 8];
        if let Some(p) = self.packets.first() {
            seed[0..2].copy_from_slice(&p.src_port.to_be_bytes());
            seed[2..4].copy_from_slice(&p.dst_port.to_be_bytes());
            seed[4..8].copy_from_slice(&p.seq.to_be_bytes());
        }
        let digest = digest::digest(&digest::SHA256, &seed);
        let mut id = [0u8; 12];
        id.copy_from_slice(&digest.as_ref()[..12]);
        id
    }

    pub(crate) fn ensure_uuid(&mut self) -> [u8; 12] {
        match self.uuid {
            Some(id) => id,
            None => {
                let id = self.derive_uuid();
                self.uuid = Some(id);
                id
            }
        }
    }

    pub(crate) fn set_uuid(&mut self, id: [u8; 12]) {
        self.uuid = Some(id);
    }

    pub(crate) fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub(crate) fn last_seen(&self) -> Instant {
        self.last_seen
    }
}
