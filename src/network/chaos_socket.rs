//! A configurable socket wrapper for network fault injection.
//!
//! [`ChaosSocket`] wraps any [`NonBlockingSocket`] and simulates adverse
//! conditions: packet loss in either direction and duplication. Faults are
//! driven by a seeded [`Pcg32`], so a failing test scenario replays exactly.
//!
//! ```rust
//! use poke_protocol::{ChaosConfig, ChaosSocket};
//!
//! let config = ChaosConfig {
//!     send_loss_rate: 0.3,
//!     duplication_rate: 0.1,
//!     seed: 42,
//!     ..ChaosConfig::default()
//! };
//! // let socket = ChaosSocket::new(inner, config);
//! ```

use crate::rng::Pcg32;
use crate::NonBlockingSocket;

/// Fault rates for [`ChaosSocket`]. All rates default to 0.0 (passthrough).
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Probability of dropping an outgoing datagram.
    pub send_loss_rate: f64,
    /// Probability of dropping an incoming datagram.
    pub receive_loss_rate: f64,
    /// Probability of sending an outgoing datagram twice.
    pub duplication_rate: f64,
    /// Seed for the fault stream; same seed, same faults.
    pub seed: u64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            send_loss_rate: 0.0,
            receive_loss_rate: 0.0,
            duplication_rate: 0.0,
            seed: 1,
        }
    }
}

impl ChaosConfig {
    /// Symmetric loss in both directions.
    #[must_use]
    pub fn lossy(rate: f64, seed: u64) -> Self {
        Self {
            send_loss_rate: rate,
            receive_loss_rate: rate,
            duplication_rate: 0.0,
            seed,
        }
    }
}

/// Counters describing what the chaos layer actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// Datagrams handed to the inner socket.
    pub sent: usize,
    /// Outgoing datagrams dropped.
    pub dropped_send: usize,
    /// Outgoing datagrams sent twice.
    pub duplicated: usize,
    /// Datagrams passed through from the inner socket.
    pub received: usize,
    /// Incoming datagrams dropped.
    pub dropped_receive: usize,
}

/// A [`NonBlockingSocket`] wrapper that injects loss and duplication.
#[derive(Debug)]
pub struct ChaosSocket<S> {
    inner: S,
    config: ChaosConfig,
    rng: Pcg32,
    stats: ChaosStats,
}

impl<S> ChaosSocket<S> {
    /// Wraps `inner` with the given fault configuration.
    #[must_use]
    pub fn new(inner: S, config: ChaosConfig) -> Self {
        let rng = Pcg32::new(config.seed);
        Self {
            inner,
            config,
            rng,
            stats: ChaosStats::default(),
        }
    }

    /// What the chaos layer has done so far.
    #[must_use]
    pub fn stats(&self) -> ChaosStats {
        self.stats
    }

    /// The wrapped socket.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<A, S> NonBlockingSocket<A> for ChaosSocket<S>
where
    S: NonBlockingSocket<A>,
{
    fn send_to(&mut self, payload: &[u8], addr: &A) {
        if self.rng.chance(self.config.send_loss_rate) {
            self.stats.dropped_send += 1;
            return;
        }
        self.inner.send_to(payload, addr);
        self.stats.sent += 1;
        if self.rng.chance(self.config.duplication_rate) {
            self.inner.send_to(payload, addr);
            self.stats.duplicated += 1;
        }
    }

    fn receive_all(&mut self) -> Vec<(A, Vec<u8>)> {
        let mut kept = Vec::new();
        for datagram in self.inner.receive_all() {
            if self.rng.chance(self.config.receive_loss_rate) {
                self.stats.dropped_receive += 1;
            } else {
                self.stats.received += 1;
                kept.push(datagram);
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Loopback stand-in: everything sent is immediately receivable.
    #[derive(Default)]
    struct EchoSocket {
        queue: Vec<(u8, Vec<u8>)>,
    }

    impl NonBlockingSocket<u8> for EchoSocket {
        fn send_to(&mut self, payload: &[u8], addr: &u8) {
            self.queue.push((*addr, payload.to_vec()));
        }

        fn receive_all(&mut self) -> Vec<(u8, Vec<u8>)> {
            std::mem::take(&mut self.queue)
        }
    }

    #[test]
    fn passthrough_by_default() {
        let mut socket = ChaosSocket::new(EchoSocket::default(), ChaosConfig::default());
        for i in 0..50u8 {
            socket.send_to(&[i], &0);
        }
        assert_eq!(socket.receive_all().len(), 50);
        let stats = socket.stats();
        assert_eq!(stats.sent, 50);
        assert_eq!(stats.dropped_send, 0);
        assert_eq!(stats.dropped_receive, 0);
    }

    #[test]
    fn full_send_loss_drops_everything() {
        let config = ChaosConfig {
            send_loss_rate: 1.0,
            ..ChaosConfig::default()
        };
        let mut socket = ChaosSocket::new(EchoSocket::default(), config);
        for i in 0..20u8 {
            socket.send_to(&[i], &0);
        }
        assert!(socket.receive_all().is_empty());
        assert_eq!(socket.stats().dropped_send, 20);
    }

    #[test]
    fn same_seed_same_faults() {
        let config = ChaosConfig::lossy(0.5, 99);
        let run = |config: ChaosConfig| {
            let mut socket = ChaosSocket::new(EchoSocket::default(), config);
            for i in 0..100u8 {
                socket.send_to(&[i], &0);
            }
            let received: Vec<_> = socket.receive_all();
            (socket.stats(), received)
        };
        assert_eq!(run(config.clone()), run(config));
    }

    #[test]
    fn duplication_sends_twice() {
        let config = ChaosConfig {
            duplication_rate: 1.0,
            ..ChaosConfig::default()
        };
        let mut socket = ChaosSocket::new(EchoSocket::default(), config);
        socket.send_to(b"hi", &0);
        assert_eq!(socket.receive_all().len(), 2);
        assert_eq!(socket.stats().duplicated, 1);
    }
}
