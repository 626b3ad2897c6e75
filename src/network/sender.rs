//! Outbound datagrams

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::engine::DatagramSink;
use crate::error::NetworkError;
use crate::network::udp::create_sender;

/// Sends every datagram to one fixed peer
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpSink {
    pub fn new(destination: SocketAddr) -> Result<Self, NetworkError> {
        Ok(Self {
            socket: create_sender(destination)?,
            destination,
        })
    }

    /// Wrap an existing socket; it should already be non-blocking
    pub fn from_socket(socket: UdpSocket, destination: SocketAddr) -> Self {
        Self {
            socket,
            destination,
        }
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl DatagramSink for UdpSink {
    /// A full socket buffer surfaces as `WouldBlock`, which the engine counts
    /// as a dropped datagram.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(datagram, self.destination)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, datagram.len()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::udp::{bind_receiver, DEFAULT_RECV_BUFFER};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn test_udp_sink_delivers() {
        let receiver = bind_receiver(0, DEFAULT_RECV_BUFFER).unwrap();
        receiver.set_nonblocking(false).unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sink = UdpSink::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).unwrap();
        sink.send(&[0, 5, 31, 0xAA]).unwrap();

        let mut buf = [0u8; 8];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0, 5, 31, 0xAA]);
    }
}
