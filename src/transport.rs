//! UDP transport for the relay.
//!
//! One socket serves both directions: outbound packets to the upstream
//! server and inbound replies consumed by the listeners. Listener
//! threads may share the socket; the kernel hands each datagram to
//! exactly one blocked receiver.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::error::RelayError;

/// Receive timeout; doubles as the idle tick on which listener loops
/// observe the shutdown flag.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct UdpTransport {
    socket: UdpSocket,
    server: SocketAddrV4,
}

impl UdpTransport {
    /// Bind the relay socket. Failure here is fatal to startup and
    /// surfaces as [`RelayError::Bind`] naming the address.
    pub fn bind(local: SocketAddrV4, server: SocketAddrV4) -> Result<Self, RelayError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let bind_failure = |source: io::Error| RelayError::Bind {
            addr: SocketAddr::V4(local),
            source,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_failure)?;

        socket.set_reuse_address(true).map_err(bind_failure)?;
        socket.set_broadcast(true).map_err(bind_failure)?;
        socket.bind(&local.into()).map_err(bind_failure)?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(bind_failure)?;

        Ok(Self {
            socket: socket.into(),
            server,
        })
    }

    /// The address actually bound (relevant when the port was 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Transmit one packet to the upstream server.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, self.server)?;
        Ok(())
    }

    /// Receive the next inbound packet, or `None` on an idle tick.
    pub fn recv_next(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
