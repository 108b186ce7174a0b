//! The reliability layer: per-peer sequencing, ACKs, timed retransmission
//! with bounded retries, and duplicate suppression over a lossy, unordered
//! datagram path.
//!
//! The layer is transport-agnostic and clock-agnostic: it queues outbound
//! datagrams instead of touching a socket, and every timed decision takes an
//! explicit `now`. The peer drains [`ReliabilityLayer::drain_outbound`] onto
//! its socket each tick and pumps [`ReliabilityLayer::poll`] for events.
//!
//! Guarantee offered upward: at-least-once, deduplicated delivery of each
//! message. Deliberately not a FIFO stream; the battle state machine imposes
//! its own ordering through phase checks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::wire::{Datagram, Message, MessageBody, MessageKind};
use crate::{ProtocolConfig, SequenceNumber};

/// Notifications drained from [`ReliabilityLayer::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReliabilityEvent<A> {
    /// A new (non-duplicate) message arrived and should be handed to the
    /// upper layer.
    Delivered {
        /// The sender's address.
        from: A,
        /// The decoded message.
        message: Message,
    },
    /// A pending message exhausted its retries. The session is considered
    /// failed for that destination.
    ConnectionFailed {
        /// Sequence number of the abandoned message.
        sequence_number: SequenceNumber,
        /// Kind of the abandoned message.
        kind: MessageKind,
        /// Where it was going.
        dest: A,
    },
}

#[derive(Debug)]
struct PendingMessage<A> {
    datagram: Datagram,
    dest: A,
    send_time: Instant,
    retries_left: u8,
    kind: MessageKind,
}

/// Bounded record of sequence numbers already delivered from one sender.
/// Oldest entries fall out first; the window only needs to cover retransmits
/// within one session.
#[derive(Debug, Default)]
struct SeenWindow {
    order: VecDeque<u32>,
}

impl SeenWindow {
    /// Records `seq`; returns `true` if it was not already present.
    fn insert(&mut self, seq: u32, cap: usize) -> bool {
        if self.order.contains(&seq) {
            return false;
        }
        if self.order.len() >= cap {
            self.order.pop_front();
        }
        self.order.push_back(seq);
        true
    }
}

/// Reliable delivery over an unreliable datagram path.
///
/// Owns the outbound sequence counter, the pending (un-ACKed) sends, and the
/// per-sender dedup windows. Sending is non-blocking: it only queues.
pub struct ReliabilityLayer<A> {
    next_seq: SequenceNumber,
    pending: BTreeMap<u32, PendingMessage<A>>,
    seen_inbound: HashMap<A, SeenWindow>,
    send_queue: VecDeque<(A, Datagram)>,
    event_queue: VecDeque<ReliabilityEvent<A>>,
    config: ProtocolConfig,
}

impl<A> ReliabilityLayer<A>
where
    A: Clone + Eq + Hash + Debug,
{
    /// Creates an empty layer with the given timing configuration.
    #[must_use]
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            next_seq: SequenceNumber::default(),
            pending: BTreeMap::new(),
            seen_inbound: HashMap::new(),
            send_queue: VecDeque::new(),
            event_queue: VecDeque::new(),
            config,
        }
    }

    /// Assigns the next sequence number to `body`, records it for
    /// retransmission, and queues its first transmission. Returns the
    /// assigned sequence number.
    pub fn send(&mut self, body: MessageBody, dest: A, now: Instant) -> SequenceNumber {
        self.next_seq = self.next_seq.next();
        let seq = self.next_seq;
        let kind = body.kind();
        let datagram = Datagram::Message(Message::new(seq, body));
        trace!(seq = seq.as_u32(), %kind, dest = ?dest, "queueing message");
        self.pending.insert(
            seq.as_u32(),
            PendingMessage {
                datagram: datagram.clone(),
                dest: dest.clone(),
                send_time: now,
                retries_left: self.config.max_retries,
                kind,
            },
        );
        self.send_queue.push_back((dest, datagram));
        seq
    }

    /// Feeds one decoded inbound datagram through ACK handling and duplicate
    /// suppression. New messages surface as
    /// [`ReliabilityEvent::Delivered`] on the next [`poll`](Self::poll).
    pub fn handle_datagram(&mut self, from: A, datagram: Datagram) {
        match datagram {
            Datagram::Ack { ack } => {
                if self.pending.remove(&ack.as_u32()).is_some() {
                    trace!(ack = ack.as_u32(), "acknowledged");
                } else {
                    // Late or duplicate ACK for something already settled.
                    trace!(ack = ack.as_u32(), "ignoring unknown ack");
                }
            },
            Datagram::Message(message) => {
                let seq = message.sequence_number;
                // Always ACK, even duplicates: the first ACK may have been
                // lost, and the sender keeps retransmitting until one lands.
                self.send_queue
                    .push_back((from.clone(), Datagram::Ack { ack: seq }));
                let window = self.seen_inbound.entry(from.clone()).or_default();
                if window.insert(seq.as_u32(), self.config.seen_window) {
                    trace!(seq = seq.as_u32(), kind = %message.body.kind(), "delivering");
                    self.event_queue
                        .push_back(ReliabilityEvent::Delivered { from, message });
                } else {
                    debug!(seq = seq.as_u32(), from = ?from, "suppressing duplicate");
                }
            },
        }
    }

    /// ACKs a sequence number without delivering anything. Used for datagrams
    /// that decoded to an unknown `type`: the sender saw a valid datagram, so
    /// it deserves an ACK, but there is nothing to hand upward.
    pub fn acknowledge_only(&mut self, from: A, seq: SequenceNumber) {
        debug!(seq = seq.as_u32(), from = ?from, "acking unknown message type");
        self.send_queue.push_back((from, Datagram::Ack { ack: seq }));
    }

    /// Runs one retransmission pass and drains accumulated events.
    ///
    /// Entries whose ACK deadline has passed are re-queued with their retry
    /// budget decremented; entries out of budget are dropped and surface as
    /// [`ReliabilityEvent::ConnectionFailed`].
    pub fn poll(&mut self, now: Instant) -> std::collections::vec_deque::Drain<'_, ReliabilityEvent<A>> {
        let timeout = self.config.retransmit_timeout;
        let mut exhausted: Vec<u32> = Vec::new();
        for (&seq, entry) in &mut self.pending {
            if now.duration_since(entry.send_time) < timeout {
                continue;
            }
            if entry.retries_left > 0 {
                entry.retries_left -= 1;
                entry.send_time = now;
                debug!(
                    seq,
                    kind = %entry.kind,
                    retries_left = entry.retries_left,
                    "retransmitting"
                );
                self.send_queue
                    .push_back((entry.dest.clone(), entry.datagram.clone()));
            } else {
                exhausted.push(seq);
            }
        }
        for seq in exhausted {
            if let Some(entry) = self.pending.remove(&seq) {
                warn!(seq, kind = %entry.kind, "giving up after retries");
                self.event_queue.push_back(ReliabilityEvent::ConnectionFailed {
                    sequence_number: SequenceNumber::new(seq),
                    kind: entry.kind,
                    dest: entry.dest,
                });
            }
        }
        self.event_queue.drain(..)
    }

    /// Drains everything queued for transmission, in order.
    pub fn drain_outbound(&mut self) -> std::collections::vec_deque::Drain<'_, (A, Datagram)> {
        self.send_queue.drain(..)
    }

    /// Number of messages still awaiting an ACK.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether any message is still awaiting an ACK.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops every pending send addressed to `dest`. Used when a spectator
    /// stops responding: the mirror entries die with it instead of failing
    /// the battle.
    pub fn forget_destination(&mut self, dest: &A) {
        self.pending.retain(|_, entry| entry.dest != *dest);
        self.send_queue.retain(|(addr, _)| addr != dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn layer() -> ReliabilityLayer<&'static str> {
        ReliabilityLayer::new(ProtocolConfig::default())
    }

    fn chat(text: &str) -> MessageBody {
        MessageBody::Chat {
            content_type: crate::wire::ChatContent::Text,
            from: "test".into(),
            payload: text.into(),
        }
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut layer = layer();
        let now = Instant::now();
        let a = layer.send(chat("one"), "peer", now);
        let b = layer.send(chat("two"), "peer", now);
        assert_eq!(b.as_u32(), a.as_u32() + 1);
        assert_eq!(layer.pending_len(), 2);
    }

    #[test]
    fn ack_settles_a_pending_message() {
        let mut layer = layer();
        let now = Instant::now();
        let seq = layer.send(chat("hello"), "peer", now);
        layer.handle_datagram("peer", Datagram::Ack { ack: seq });
        assert_eq!(layer.pending_len(), 0);
        // no retransmission after the deadline
        assert!(layer.poll(now + Duration::from_secs(5)).next().is_none());
        let sent: Vec<_> = layer.drain_outbound().collect();
        assert_eq!(sent.len(), 1, "only the original transmission");
    }

    #[test]
    fn unknown_ack_is_ignored() {
        let mut layer = layer();
        layer.handle_datagram(
            "peer",
            Datagram::Ack {
                ack: SequenceNumber::new(999),
            },
        );
        assert!(layer.poll(Instant::now()).next().is_none());
    }

    #[test]
    fn duplicate_is_acked_but_delivered_once() {
        let mut layer = layer();
        let msg = Message::new(SequenceNumber::new(3), chat("dup"));
        layer.handle_datagram("peer", Datagram::Message(msg.clone()));
        layer.handle_datagram("peer", Datagram::Message(msg));
        let delivered: Vec<_> = layer.poll(Instant::now()).collect();
        assert_eq!(delivered.len(), 1);
        let acks: Vec<_> = layer
            .drain_outbound()
            .filter(|(_, d)| matches!(d, Datagram::Ack { .. }))
            .collect();
        assert_eq!(acks.len(), 2, "every copy is acked");
    }

    #[test]
    fn same_seq_from_different_senders_is_not_a_duplicate() {
        let mut layer = layer();
        let msg = Message::new(SequenceNumber::new(3), chat("x"));
        layer.handle_datagram("alpha", Datagram::Message(msg.clone()));
        layer.handle_datagram("beta", Datagram::Message(msg));
        let delivered: Vec<_> = layer.poll(Instant::now()).collect();
        assert_eq!(delivered.len(), 2);
    }

    #[test]
    fn retransmits_at_the_deadline_then_gives_up() {
        let mut layer = layer();
        let t0 = Instant::now();
        let seq = layer.send(chat("lost"), "peer", t0);
        layer.drain_outbound().for_each(drop);

        // initial send + 3 retries at 500ms intervals
        for i in 1..=3u64 {
            let events: Vec<_> = layer.poll(t0 + Duration::from_millis(500 * i)).collect();
            assert!(events.is_empty(), "no failure during retry {}", i);
            let resent: Vec<_> = layer.drain_outbound().collect();
            assert_eq!(resent.len(), 1, "one retransmission at deadline {}", i);
        }

        let events: Vec<_> = layer.poll(t0 + Duration::from_millis(2000)).collect();
        assert_eq!(
            events,
            vec![ReliabilityEvent::ConnectionFailed {
                sequence_number: seq,
                kind: MessageKind::Chat,
                dest: "peer",
            }]
        );
        assert_eq!(layer.pending_len(), 0);
    }

    #[test]
    fn early_poll_does_not_retransmit() {
        let mut layer = layer();
        let t0 = Instant::now();
        layer.send(chat("patience"), "peer", t0);
        layer.drain_outbound().for_each(drop);
        assert!(layer.poll(t0 + Duration::from_millis(499)).next().is_none());
        assert_eq!(layer.drain_outbound().count(), 0);
    }

    #[test]
    fn seen_window_evicts_oldest() {
        let mut config = ProtocolConfig::default();
        config.seen_window = 4;
        let mut layer: ReliabilityLayer<&'static str> = ReliabilityLayer::new(config);
        for seq in 1..=5u32 {
            layer.handle_datagram(
                "peer",
                Datagram::Message(Message::new(SequenceNumber::new(seq), chat("n"))),
            );
        }
        assert_eq!(layer.poll(Instant::now()).count(), 5);
        // seq 1 has been evicted from the window, so a very late duplicate is
        // re-delivered; that is the accepted trade-off of a bounded window.
        layer.handle_datagram(
            "peer",
            Datagram::Message(Message::new(SequenceNumber::new(1), chat("n"))),
        );
        assert_eq!(layer.poll(Instant::now()).count(), 1);
        // a recent one is still suppressed
        layer.handle_datagram(
            "peer",
            Datagram::Message(Message::new(SequenceNumber::new(5), chat("n"))),
        );
        assert_eq!(layer.poll(Instant::now()).count(), 0);
    }

    #[test]
    fn forget_destination_drops_its_pending() {
        let mut layer = layer();
        let now = Instant::now();
        layer.send(chat("a"), "spectator", now);
        layer.send(chat("b"), "peer", now);
        layer.forget_destination(&"spectator");
        assert_eq!(layer.pending_len(), 1);
        let queued: Vec<_> = layer.drain_outbound().collect();
        assert!(queued.iter().all(|(addr, _)| *addr == "peer"));
    }
}
