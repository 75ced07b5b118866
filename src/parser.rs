//! The message parser: packet intake, hint evaluation, size-cap and timeout
//! enforcement, request/response pairing, emission.
//!
//! [`MessageParser`] is a single-threaded cooperative consumer: packets are
//! fed serially through [`handle_packet`](MessageParser::handle_packet). The
//! only background activity is the expiration sweep, which serializes against
//! packet intake on the parser mutex. The emission callback runs
//! synchronously from whichever side completed the message and owns the
//! message from that point on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::flow::{Direction, FlowKey, FlowState, FlowTable};
use crate::message::Message;
use crate::packet::{self, CaptureInfo, Packet};

/// Default soft cap on a single message's payload bytes.
const DEFAULT_MAX_SIZE: usize = 5 << 20;
/// Default inactivity timeout for in-flight messages.
const DEFAULT_MESSAGE_EXPIRE: Duration = Duration::from_millis(100);
/// Floor for the expiration sweep cadence.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Start hint: does this packet's payload begin a request / a response?
pub type StartHint = Box<dyn Fn(&Packet) -> (bool, bool) + Send>;
/// End hint: does this message hold a complete application payload?
pub type EndHint = Box<dyn Fn(&Message) -> bool + Send>;
/// Emission callback; owns the message from the moment it is invoked.
pub type EmitFn = Box<dyn FnMut(Message) + Send>;

/// Parser configuration. Zero values fall back to the defaults
/// (5 MiB, 100 ms).
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    /// Soft cap on a single message's payload bytes; reaching it emits the
    /// message, with `truncated` set when anything was cut off.
    pub max_size: usize,
    /// Inactivity timeout after which an in-flight message is force-emitted
    /// with `timed_out` set.
    pub message_expire: Duration,
}

impl ParserConfig {
    pub fn new(max_size: usize, message_expire: Duration) -> Self {
        Self {
            max_size: if max_size == 0 {
                DEFAULT_MAX_SIZE
            } else {
                max_size
            },
            message_expire: if message_expire.is_zero() {
                DEFAULT_MESSAGE_EXPIRE
            } else {
                message_expire
            },
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

/// Diagnostic counters. Snapshot via [`MessageParser::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserStats {
    /// Packets accepted into `handle_packet`.
    pub packets: u64,
    /// Frames that failed to decode in `handle_frame`.
    pub decode_errors: u64,
    /// Packets that could not open or join a message.
    pub dropped: u64,
    /// Messages handed to the emission callback.
    pub emitted: u64,
    /// Emitted messages that were cut off by the size cap.
    pub truncated: u64,
    /// Emitted messages that were flushed by the inactivity sweep.
    pub timed_out: u64,
    /// Responses emitted with no pending request to pair with.
    pub orphan_responses: u64,
}

struct Inner {
    config: ParserConfig,
    flows: FlowTable,
    start: Option<StartHint>,
    end: Option<EndHint>,
    emit: EmitFn,
    stats: ParserStats,
    closed: bool,
}

/// Reassembles request/response messages from captured TCP packets.
///
/// Packets accrete into at most one open message per flow direction.
/// Completion is driven by the optional end hint, the size cap, or the
/// inactivity timeout; completed messages go to the emission callback with
/// requests and their responses sharing a UUID.
pub struct MessageParser {
    state: Arc<Mutex<Inner>>,
    stop: mpsc::Sender<()>,
    sweeper: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MessageParser {
    pub fn new<F>(config: ParserConfig, emit: F) -> Self
    where
        F: FnMut(Message) + Send + 'static,
    {
        let config = ParserConfig::new(config.max_size, config.message_expire);
        let state = Arc::new(Mutex::new(Inner {
            config,
            flows: FlowTable::new(),
            start: None,
            end: None,
            emit: Box::new(emit),
            stats: ParserStats::default(),
            closed: false,
        }));

        let tick = (config.message_expire / 2).max(MIN_TICK);
        let (stop, stop_rx) = mpsc::channel();
        let sweeper_state = Arc::clone(&state);
        let sweeper = thread::spawn(move || Self::sweeper_loop(sweeper_state, stop_rx, tick));

        Self {
            state,
            stop,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Install the start hint: given a packet, does its payload begin a
    /// request / a response? Without one, any payload-bearing packet opens a
    /// message in a direction that has none.
    pub fn set_start_hint<F>(&self, hint: F)
    where
        F: Fn(&Packet) -> (bool, bool) + Send + 'static,
    {
        self.state.lock().start = Some(Box::new(hint));
    }

    /// Install the end hint: does this message hold a complete application
    /// payload? Without one, completion is driven only by the size cap and
    /// the timeout.
    pub fn set_end_hint<F>(&self, hint: F)
    where
        F: Fn(&Message) -> bool + Send + 'static,
    {
        self.state.lock().end = Some(Box::new(hint));
    }

    /// Snapshot of the diagnostic counters.
    pub fn stats(&self) -> ParserStats {
        self.state.lock().stats
    }

    /// Number of flows currently tracked.
    pub fn flow_count(&self) -> usize {
        self.state.lock().flows.len()
    }

    /// Decode a raw frame and feed the resulting packet; frames that fail to
    /// decode are counted and dropped.
    pub fn handle_frame(&self, data: Bytes, link_type: u16, ip_version: u8, info: &CaptureInfo) {
        match packet::parse_packet(data, link_type, ip_version, info) {
            Ok(pckt) => self.handle_packet(pckt),
            Err(err) => {
                let mut inner = self.state.lock();
                inner.stats.decode_errors += 1;
                debug!(error = %err, "dropping frame that failed to decode");
            }
        }
    }

    /// Feed one decoded packet. Never fails; all diagnostics are counters.
    pub fn handle_packet(&self, pckt: Packet) {
        let mut guard = self.state.lock();
        let inner = &mut *guard;
        if inner.closed {
            inner.stats.dropped += 1;
            return;
        }
        inner.stats.packets += 1;

        let key = FlowKey::of(&pckt);
        let now = Instant::now();
        let Inner {
            config,
            flows,
            start,
            end,
            emit,
            stats,
            ..
        } = inner;

        // A message whose stream already sat idle past the expiry is flushed
        // before this packet is considered, independent of sweep timing.
        if let Some(flow) = flows.get_mut(&key) {
            let dir = flow.direction(&key, &pckt);
            let expired = flow
                .slot(dir)
                .is_some_and(|m| now.duration_since(m.last_seen()) > config.message_expire);
            if expired {
                if let Some(mut m) = flow.slot_mut(dir).take() {
                    m.timed_out = true;
                    Self::emit_one(flow, m, emit, stats);
                }
            }
        }

        // The start hint is consulted only when this packet would need to
        // open a message.
        let hinted = match flows.get(&key) {
            Some(flow) if flow.slot(flow.direction(&key, &pckt)).is_some() => None,
            _ => start.as_ref().map(|hint| hint(&pckt)),
        };

        let from_a = key.from_a(pckt.src_ip, pckt.src_port);

        // Create flow state lazily: a packet that cannot open a message must
        // not leave one behind.
        if flows.get(&key).is_none() {
            let client_is_a = match (start.is_some(), hinted) {
                (true, Some((true, _))) => from_a,
                (true, Some((false, true))) => !from_a,
                (true, _) => {
                    stats.dropped += 1;
                    return;
                }
                (false, _) => {
                    if pckt.payload.is_empty() {
                        stats.dropped += 1;
                        return;
                    }
                    from_a
                }
            };
            flows.or_create(key.clone(), client_is_a);
        }
        let Some(flow) = flows.get_mut(&key) else {
            return;
        };
        let dir = flow.direction(&key, &pckt);
        flow.last_activity = now;

        if flow.slot(dir).is_none() {
            let opened = match (start.is_some(), hinted) {
                (true, Some((is_req, is_resp))) if is_req || is_resp => {
                    flow.set_truncated_tail(dir, false);
                    Some(Message::new(is_req))
                }
                (true, _) if flow.truncated_tail(dir) => {
                    // Tail of a size-capped stream keeps flowing; collect it
                    // under the truncated flag until a fresh start shows up.
                    let mut m = Message::new(dir == Direction::ToServer);
                    m.truncated = true;
                    Some(m)
                }
                (true, _) => None,
                (false, _) if pckt.payload.is_empty() => None,
                (false, _) => Some(Message::new(dir == Direction::ToServer)),
            };
            match opened {
                Some(m) => *flow.slot_mut(dir) = Some(m),
                None => {
                    stats.dropped += 1;
                    return;
                }
            }
        }

        let Some(msg) = flow.slot_mut(dir).as_mut() else {
            return;
        };
        if msg.contains_seq(pckt.seq) {
            // Duplicate capture of a live message; nothing to add.
            return;
        }

        let mut pckt = pckt;
        let room = config.max_size.saturating_sub(msg.len());
        if pckt.payload.len() > room {
            msg.truncated = true;
            pckt.payload.truncate(room);
        }
        msg.append(pckt);
        msg.touch();

        let complete =
            msg.len() >= config.max_size || end.as_ref().is_some_and(|hint| hint(msg));
        if complete {
            if let Some(m) = flow.slot_mut(dir).take() {
                if m.truncated {
                    flow.set_truncated_tail(dir, true);
                }
                Self::emit_one(flow, m, emit, stats);
            }
        }
    }

    /// Stop the sweeper, drain all open messages (emitted with
    /// `timed_out = true`), and reject further packets. Idempotent; also run
    /// on drop.
    pub fn close(&self) {
        {
            let mut inner = self.state.lock();
            if !inner.closed {
                inner.closed = true;
                Self::sweep(&mut inner, true);
            }
        }
        let _ = self.stop.send(());
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }

    fn sweeper_loop(state: Arc<Mutex<Inner>>, stop_rx: mpsc::Receiver<()>, tick: Duration) {
        loop {
            match stop_rx.recv_timeout(tick) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
            let mut inner = state.lock();
            if inner.closed {
                return;
            }
            Self::sweep(&mut inner, false);
        }
    }

    /// Emit every open message idle past the expiry; with `drain_all`, every
    /// open message regardless of idle time. Flows with nothing open and
    /// nothing pending (or idle past the expiry) are dropped.
    fn sweep(inner: &mut Inner, drain_all: bool) {
        let now = Instant::now();
        let expire = inner.config.message_expire;
        let Inner {
            flows, emit, stats, ..
        } = inner;

        flows.retain(|_, flow| {
            for dir in [Direction::ToServer, Direction::ToClient] {
                let expired = flow
                    .slot(dir)
                    .is_some_and(|m| drain_all || now.duration_since(m.last_seen()) > expire);
                if expired {
                    if let Some(mut m) = flow.slot_mut(dir).take() {
                        m.timed_out = true;
                        Self::emit_one(flow, m, emit, stats);
                    }
                }
            }
            if drain_all {
                return false;
            }
            flow.has_open()
                || (!flow.pending_uuids.is_empty()
                    && now.duration_since(flow.last_activity) <= expire)
        });
    }

    /// Pair, count, and hand a completed message to the callback. A panic in
    /// the callback is caught so parser state stays intact.
    fn emit_one(
        flow: &mut FlowState,
        mut msg: Message,
        emit: &mut EmitFn,
        stats: &mut ParserStats,
    ) {
        if msg.is_request {
            flow.pending_uuids.push_back(msg.ensure_uuid());
        } else {
            match flow.pending_uuids.pop_front() {
                Some(id) => msg.set_uuid(id),
                None => {
                    msg.ensure_uuid();
                    stats.orphan_responses += 1;
                    debug!("response emitted with no pending request to pair");
                }
            }
        }
        stats.emitted += 1;
        if msg.truncated {
            stats.truncated += 1;
        }
        if msg.timed_out {
            stats.timed_out += 1;
        }
        if catch_unwind(AssertUnwindSafe(|| emit(msg))).is_err() {
            warn!("emission callback panicked; message lost");
        }
    }
}

impl Drop for MessageParser {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;

    fn pckt(src_port: u16, dst_port: u16, seq: u32, payload: &[u8]) -> Packet {
        Packet {
            src_port,
            dst_port,
            seq,
            payload: Bytes::copy_from_slice(payload),
            ..Packet::default()
        }
    }

    fn channel_parser(config: ParserConfig) -> (MessageParser, Receiver<Message>) {
        let (tx, rx) = mpsc::channel();
        let parser = MessageParser::new(config, move |m| {
            let _ = tx.send(m);
        });
        (parser, rx)
    }

    fn recv(rx: &Receiver<Message>) -> Message {
        rx.recv_timeout(Duration::from_secs(2)).expect("message")
    }

    // Test 1: Without hints, the first-seen direction is the request side
    #[test]
    fn test_direction_inferred_without_hints() {
        let (parser, rx) = channel_parser(ParserConfig::new(4, Duration::from_secs(5)));

        parser.handle_packet(pckt(60000, 80, 1, b"abcd"));
        let m = recv(&rx);
        assert!(m.is_request);
        assert!(!m.truncated);

        parser.handle_packet(pckt(80, 60000, 1, b"wxyz"));
        let m = recv(&rx);
        assert!(!m.is_request);
    }

    // Test 2: Start hint veto drops the packet
    #[test]
    fn test_start_hint_veto() {
        let (parser, rx) = channel_parser(ParserConfig::new(1 << 20, Duration::from_secs(5)));
        parser.set_start_hint(|_| (false, false));

        parser.handle_packet(pckt(60000, 80, 1, b"junk"));
        parser.close();

        assert!(rx.try_recv().is_err());
        assert_eq!(parser.stats().dropped, 1);
        assert_eq!(parser.stats().emitted, 0);
    }

    // Test 3: Empty payload cannot open a message without a hint
    #[test]
    fn test_empty_payload_needs_open_message() {
        let (parser, rx) = channel_parser(ParserConfig::new(1 << 20, Duration::from_secs(5)));
        parser.handle_packet(pckt(60000, 80, 1, b""));
        parser.close();

        assert!(rx.try_recv().is_err());
        assert_eq!(parser.stats().dropped, 1);
    }

    // Test 4: Size-capped tail keeps accreting under the truncated flag
    #[test]
    fn test_truncated_tail_bookkeeping() {
        let (parser, rx) = channel_parser(ParserConfig::new(8, Duration::from_secs(5)));
        parser.set_start_hint(|p| (p.payload.starts_with(b"REQ"), false));

        // Opens a message, overruns the cap on the second packet.
        parser.handle_packet(pckt(60000, 80, 1, b"REQ111"));
        parser.handle_packet(pckt(60000, 80, 2, b"222222"));
        let m = recv(&rx);
        assert!(m.truncated);
        assert_eq!(m.len(), 8);

        // Continuation is rejected by the hint but tracked as tail.
        parser.handle_packet(pckt(60000, 80, 3, b"3333"));
        parser.close();

        let tail = recv(&rx);
        assert!(tail.truncated);
        assert_eq!(tail.data(), b"3333");

        // Capped emission plus the drained tail; only the drain timed out.
        let stats = parser.stats();
        assert_eq!(stats.truncated, 2);
        assert_eq!(stats.timed_out, 1);
    }

    // Test 5: A hinted start after a capped emission opens a clean message
    #[test]
    fn test_truncated_tail_cleared_by_start() {
        let (parser, rx) = channel_parser(ParserConfig::new(8, Duration::from_secs(5)));
        parser.set_start_hint(|p| (p.payload.starts_with(b"REQ"), false));

        parser.handle_packet(pckt(60000, 80, 1, b"REQ11111overrun"));
        let m = recv(&rx);
        assert!(m.truncated);

        parser.handle_packet(pckt(60000, 80, 2, b"REQ4"));
        parser.close();

        let fresh = recv(&rx);
        assert!(!fresh.truncated);
        assert_eq!(fresh.data(), b"REQ4");
    }

    // Test 6: Closed parser rejects packets
    #[test]
    fn test_closed_rejects_packets() {
        let (parser, rx) = channel_parser(ParserConfig::new(4, Duration::from_secs(5)));
        parser.close();
        parser.handle_packet(pckt(60000, 80, 1, b"abcd"));

        assert!(rx.try_recv().is_err());
        assert_eq!(parser.stats().dropped, 1);
        assert_eq!(parser.stats().packets, 0);
    }

    // Test 7: A panicking callback does not wedge the parser
    #[test]
    fn test_callback_panic_tolerated() {
        let (tx, rx) = mpsc::channel();
        let mut first = true;
        let parser = MessageParser::new(
            ParserConfig::new(4, Duration::from_secs(5)),
            move |m: Message| {
                if first {
                    first = false;
                    panic!("sink failure");
                }
                let _ = tx.send(m);
            },
        );

        parser.handle_packet(pckt(60000, 80, 1, b"aaaa"));
        parser.handle_packet(pckt(60000, 80, 2, b"bbbb"));

        let survivor = recv(&rx);
        assert_eq!(survivor.data(), b"bbbb");
        assert_eq!(parser.stats().emitted, 2);
    }

    // Test 8: Decode failures are counted, not raised
    #[test]
    fn test_handle_frame_counts_decode_errors() {
        let (parser, _rx) = channel_parser(ParserConfig::default());
        let info = CaptureInfo::full(3, std::time::SystemTime::UNIX_EPOCH);
        parser.handle_frame(Bytes::from_static(b"xxx"), 147, 4, &info);

        assert_eq!(parser.stats().decode_errors, 1);
        assert_eq!(parser.stats().packets, 0);
    }

    // Test 9: Flow table is garbage-collected once idle
    #[test]
    fn test_flow_gc_after_drain() {
        let (parser, rx) = channel_parser(ParserConfig::new(4, Duration::from_millis(30)));
        parser.handle_packet(pckt(60000, 80, 1, b"aaaa"));
        let _ = recv(&rx);

        // The pending request UUID keeps the flow briefly; idling past the
        // expiry lets the sweep drop it.
        thread::sleep(Duration::from_millis(120));
        assert_eq!(parser.flow_count(), 0);
    }
}
