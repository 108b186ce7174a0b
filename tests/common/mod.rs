//! Shared test transport: an in-memory datagram hub with per-address
//! queues, plus a predicate-driven filter socket for scripted loss.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use poke_protocol::NonBlockingSocket;

type Queues = Arc<Mutex<HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>>>;

/// An in-memory "network": sockets registered on the same hub can reach each
/// other by address, with perfect delivery and no reordering. Loss and
/// duplication are layered on with [`FilterSocket`] or
/// [`poke_protocol::ChaosSocket`].
#[derive(Clone, Default)]
pub struct Hub {
    queues: Queues,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` on the hub and returns its socket.
    pub fn socket(&self, addr: SocketAddr) -> MemorySocket {
        self.queues.lock().unwrap().entry(addr).or_default();
        MemorySocket {
            queues: Arc::clone(&self.queues),
            addr,
        }
    }
}

pub struct MemorySocket {
    queues: Queues,
    addr: SocketAddr,
}

impl NonBlockingSocket<SocketAddr> for MemorySocket {
    fn send_to(&mut self, payload: &[u8], addr: &SocketAddr) {
        // unregistered destinations swallow traffic, like real UDP
        if let Some(queue) = self.queues.lock().unwrap().get_mut(addr) {
            queue.push_back((self.addr, payload.to_vec()));
        }
    }

    fn receive_all(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(&self.addr)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}

/// Drops outgoing datagrams the predicate rejects. Receiving is untouched.
pub struct FilterSocket<S, F> {
    inner: S,
    allow: F,
}

impl<S, F> FilterSocket<S, F> {
    pub fn new(inner: S, allow: F) -> Self {
        Self { inner, allow }
    }
}

impl<S, F> NonBlockingSocket<SocketAddr> for FilterSocket<S, F>
where
    S: NonBlockingSocket<SocketAddr>,
    F: FnMut(&[u8], &SocketAddr) -> bool,
{
    fn send_to(&mut self, payload: &[u8], addr: &SocketAddr) {
        if (self.allow)(payload, addr) {
            self.inner.send_to(payload, addr);
        }
    }

    fn receive_all(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.inner.receive_all()
    }
}

/// A loopback address on the given port.
pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Polls both peers over `steps` simulated ticks of `step` each, returning
/// the clock after the last tick.
pub fn pump<A, B>(
    a: &mut poke_protocol::Peer<A>,
    b: &mut poke_protocol::Peer<B>,
    start: Instant,
    steps: u32,
    step: Duration,
) -> Instant
where
    A: NonBlockingSocket<SocketAddr>,
    B: NonBlockingSocket<SocketAddr>,
{
    let mut now = start;
    for _ in 0..steps {
        a.poll(now);
        b.poll(now);
        now += step;
    }
    now
}

/// True when `payload` (a text datagram) names the given wire type.
pub fn is_kind(payload: &[u8], kind: &str) -> bool {
    std::str::from_utf8(payload)
        .map(|text| text.starts_with(&format!("type:{}", kind)))
        .unwrap_or(false)
}
