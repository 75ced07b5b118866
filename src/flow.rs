//! Flow identification and per-flow reassembly state.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Instant;

use crate::message::Message;
use crate::packet::Packet;

/// Direction of a packet within a flow, relative to the requesting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToServer,
    ToClient,
}

impl Direction {
    /// Return a string representation of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToServer => "to_server",
            Direction::ToClient => "to_client",
        }
    }
}

/// Normalized flow key (lower endpoint first for consistent lookup).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct FlowKey {
    ip_a: IpAddr,
    port_a: u16,
    ip_b: IpAddr,
    port_b: u16,
}

impl FlowKey {
    /// Create a normalized flow key.
    /// Ensures (ip_a, port_a) <= (ip_b, port_b) lexicographically.
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        if (src_ip, src_port) <= (dst_ip, dst_port) {
            Self {
                ip_a: src_ip,
                port_a: src_port,
                ip_b: dst_ip,
                port_b: dst_port,
            }
        } else {
            Self {
                ip_a: dst_ip,
                port_a: dst_port,
                ip_b: src_ip,
                port_b: src_port,
            }
        }
    }

    /// Key of the flow a packet belongs to.
    pub fn of(pckt: &Packet) -> Self {
        Self::new(pckt.src_ip, pckt.src_port, pckt.dst_ip, pckt.dst_port)
    }

    /// True when (src_ip, src_port) is the normalized A side.
    pub(crate) fn from_a(&self, src_ip: IpAddr, src_port: u16) -> bool {
        src_ip == self.ip_a && src_port == self.port_a
    }
}

/// Reassembly state for one flow: the two in-flight message slots, the
/// request UUIDs still waiting for their responses, and which normalized
/// side is the requesting client.
pub(crate) struct FlowState {
    client_is_a: bool,
    pub request: Option<Message>,
    pub response: Option<Message>,
    /// UUIDs of emitted requests awaiting their responses, oldest first.
    pub pending_uuids: VecDeque<[u8; 12]>,
    /// Per-direction marker: the last emission there was size-capped and the
    /// stream tail may still be arriving.
    truncated_tail: [bool; 2],
    pub last_activity: Instant,
}

impl FlowState {
    pub fn new(client_is_a: bool) -> Self {
        Self {
            client_is_a,
            request: None,
            response: None,
            pending_uuids: VecDeque::new(),
            truncated_tail: [false; 2],
            last_activity: Instant::now(),
        }
    }

    /// Direction of a packet, accounting for which endpoint is the client.
    pub fn direction(&self, key: &FlowKey, pckt: &Packet) -> Direction {
        let from_a = key.from_a(pckt.src_ip, pckt.src_port);
        if from_a == self.client_is_a {
            Direction::ToServer
        } else {
            Direction::ToClient
        }
    }

    pub fn slot(&self, dir: Direction) -> Option<&Message> {
        match dir {
            Direction::ToServer => self.request.as_ref(),
            Direction::ToClient => self.response.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, dir: Direction) -> &mut Option<Message> {
        match dir {
            Direction::ToServer => &mut self.request,
            Direction::ToClient => &mut self.response,
        }
    }

    pub fn truncated_tail(&self, dir: Direction) -> bool {
        self.truncated_tail[Self::tail_idx(dir)]
    }

    pub fn set_truncated_tail(&mut self, dir: Direction, value: bool) {
        self.truncated_tail[Self::tail_idx(dir)] = value;
    }

    fn tail_idx(dir: Direction) -> usize {
        match dir {
            Direction::ToServer => 0,
            Direction::ToClient => 1,
        }
    }

    pub fn has_open(&self) -> bool {
        self.request.is_some() || self.response.is_some()
    }
}

/// Table of live flows.
pub(crate) struct FlowTable {
    flows: HashMap<FlowKey, FlowState>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self {
            flows: HashMap::new(),
        }
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    pub fn get_mut(&mut self, key: &FlowKey) -> Option<&mut FlowState> {
        self.flows.get_mut(key)
    }

    pub fn or_create(&mut self, key: FlowKey, client_is_a: bool) -> &mut FlowState {
        self.flows
            .entry(key)
            .or_insert_with(|| FlowState::new(client_is_a))
    }

    /// Keep only flows for which the predicate holds.
    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&FlowKey, &mut FlowState) -> bool,
    {
        self.flows.retain(f);
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }
}
