//! # PokeProtocol
//!
//! A peer-to-peer, UDP-based turn-based battle protocol between two players,
//! with optional read-only spectators.
//!
//! Two endpoints exchange a handshake, negotiate a shared random seed, set up
//! their combatants, and then drive a deterministic turn cycle in which each
//! turn is a four-step synchronized exchange: announce, acknowledge,
//! independently compute damage, and confirm the result. UDP is lossy and
//! unordered, so every non-ACK datagram carries a sequence number, is
//! individually acknowledged, and is retransmitted on timeout.
//!
//! The crate is organized bottom-up:
//!
//! - [`catalog`] resolves combatant names to stat blocks and typing, and owns
//!   the move table and type effectiveness chart.
//! - [`wire`] encodes and decodes messages as newline-separated `key:value`
//!   pairs, one message per datagram.
//! - [`reliability`] provides per-peer sequencing, ACKs, timed retransmission
//!   with bounded retries, and duplicate suppression.
//! - [`damage`] computes damage deterministically from a shared seed, so both
//!   peers independently reach the same result.
//! - [`battle`] is the turn state machine, including tie-breaking and
//!   discrepancy resolution when the peers compute different damage.
//! - [`peer`] binds the components together, owns the socket, and dispatches
//!   inbound frames.
//!
//! # Example
//!
//! ```no_run
//! use poke_protocol::{PeerBuilder, PeerRole, UdpNonBlockingSocket};
//! use std::time::Instant;
//!
//! # fn main() -> Result<(), poke_protocol::PokeError> {
//! let socket = UdpNonBlockingSocket::bind_to_port(8888)?;
//! let mut peer = PeerBuilder::new()
//!     .with_name("Alice")
//!     .with_role(PeerRole::Host)
//!     .with_combatant("Pikachu")?
//!     .start(socket, Instant::now())?;
//!
//! loop {
//!     peer.poll(Instant::now());
//!     for event in peer.events() {
//!         println!("{:?}", event);
//!     }
//!     if peer.is_finished(Instant::now()) {
//!         break;
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

use std::time::Duration;

pub mod battle;
pub mod catalog;
pub mod damage;
pub mod error;
pub mod peer;
pub mod reliability;
pub mod rng;
pub mod wire;

/// Socket implementations: a non-blocking UDP socket for real traffic and a
/// fault-injecting wrapper for tests.
pub mod network {
    pub mod chaos_socket;
    pub mod udp_socket;
}

pub use error::{DecodeError, PokeError};
pub use network::chaos_socket::{ChaosConfig, ChaosSocket, ChaosStats};
pub use network::udp_socket::UdpNonBlockingSocket;
pub use peer::{Peer, PeerBuilder, PeerEvent};
pub use reliability::{ReliabilityEvent, ReliabilityLayer};
pub use wire::{ChatContent, Datagram, Message, MessageBody, MessageKind};

/// A specialized `Result` type for PokeProtocol operations.
///
/// Named `PokeResult` rather than `Result` so glob imports do not shadow
/// `std::result::Result`.
pub type PokeResult<T, E = PokeError> = std::result::Result<T, E>;

/// Abstraction over a non-blocking datagram transport.
///
/// The peer never blocks on sends; `receive_all` drains everything currently
/// queued and returns immediately. Implementations exist for real UDP
/// ([`UdpNonBlockingSocket`]) and for fault injection in tests
/// ([`ChaosSocket`]).
pub trait NonBlockingSocket<A> {
    /// Sends one encoded datagram to `addr`. Best-effort: failures are logged,
    /// never surfaced, since the reliability layer handles loss anyway.
    fn send_to(&mut self, payload: &[u8], addr: &A);

    /// Returns all datagrams received since the last call, without blocking.
    fn receive_all(&mut self) -> Vec<(A, Vec<u8>)>;
}

impl<A, S: NonBlockingSocket<A> + ?Sized> NonBlockingSocket<A> for Box<S> {
    fn send_to(&mut self, payload: &[u8], addr: &A) {
        (**self).send_to(payload, addr);
    }

    fn receive_all(&mut self) -> Vec<(A, Vec<u8>)> {
        (**self).receive_all()
    }
}

/// The three peer roles.
///
/// The host waits for a handshake, generates the shared seed, and attacks
/// first. The joiner initiates the handshake. A spectator receives and
/// displays battle traffic but never sends battle messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// Waits for the handshake, chooses the seed, attacks first.
    Host,
    /// Sends `HANDSHAKE_REQUEST`, mirrors the host's seed.
    Joiner,
    /// Read-only observer; sends `SPECTATOR_REQUEST` and then only ACKs.
    Spectator,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Joiner => write!(f, "joiner"),
            Self::Spectator => write!(f, "spectator"),
        }
    }
}

/// A monotonically increasing 32-bit identifier assigned by a sender to each
/// non-ACK message. Scoped per sender: duplicate suppression works on
/// `(sender, sequence_number)` pairs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    /// Wraps a raw `u32` value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the underlying `u32`.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next sequence number, wrapping on overflow. A battle never
    /// comes close to 2^32 messages; wrapping just avoids a panic branch.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SequenceNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SequenceNumber> for u32 {
    fn from(seq: SequenceNumber) -> Self {
        seq.0
    }
}

/// Default number of special-stat boost uses each side starts with.
pub const DEFAULT_BOOST_USES: u8 = 5;

/// Timing and bookkeeping knobs for the reliability layer and the peer.
///
/// The defaults implement the protocol timings: a message is retransmitted
/// every 500 ms up to 3 times, so it is abandoned roughly 2 s after the first
/// transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// How long to wait for an ACK before retransmitting.
    pub retransmit_timeout: Duration,
    /// Retransmissions attempted before declaring the connection failed.
    pub max_retries: u8,
    /// Suggested cadence for calling [`Peer::poll`]; the retransmit scan runs
    /// on every poll, so polling slower than this delays retransmissions.
    pub retry_tick: Duration,
    /// Per-sender capacity of the duplicate-suppression window. 1024 covers
    /// retransmits within any realistic battle.
    pub seen_window: usize,
    /// After `GAME_OVER`, how long to keep the socket open waiting for final
    /// ACKs before shutting down regardless.
    pub game_over_grace: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_millis(500),
            max_retries: 3,
            retry_tick: Duration::from_millis(100),
            seen_window: 1024,
            game_over_grace: Duration::from_secs(1),
        }
    }
}
