//! A simple non-blocking UDP socket for peers.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::warn;

use crate::NonBlockingSocket;

const RECV_BUFFER_SIZE: usize = 4096;

/// Non-blocking UDP socket bound to `0.0.0.0` on a given port.
///
/// Carries raw datagram payloads; the peer owns encoding and decoding, so a
/// wrapper like [`ChaosSocket`](crate::ChaosSocket) can drop or duplicate
/// frames without understanding them.
#[derive(Debug)]
pub struct UdpNonBlockingSocket {
    socket: UdpSocket,
    buffer: [u8; RECV_BUFFER_SIZE],
}

impl UdpNonBlockingSocket {
    /// Binds to `0.0.0.0:port` and switches the socket to non-blocking mode.
    /// Use port 0 to let the OS pick one.
    pub fn bind_to_port(port: u16) -> Result<Self, std::io::Error> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            buffer: [0; RECV_BUFFER_SIZE],
        })
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }
}

impl NonBlockingSocket<SocketAddr> for UdpNonBlockingSocket {
    fn send_to(&mut self, payload: &[u8], addr: &SocketAddr) {
        // UDP is best-effort; the reliability layer covers dropped frames, so
        // a failed send is only worth a log line.
        if let Err(err) = self.socket.send_to(payload, addr) {
            warn!(%addr, %err, "failed to send UDP datagram");
        }
    }

    fn receive_all(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut received = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((len, src_addr)) => {
                    if len > RECV_BUFFER_SIZE {
                        warn!(len, "datagram larger than receive buffer, skipping");
                        continue;
                    }
                    received.push((src_addr, self.buffer[..len].to_vec()));
                },
                // no more queued datagrams
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return received,
                // datagram sockets can report this after a send to a dead port
                Err(ref err) if err.kind() == ErrorKind::ConnectionReset => continue,
                Err(err) => {
                    warn!(kind = ?err.kind(), %err, "unexpected socket error");
                    return received;
                },
            }
        }
    }
}
