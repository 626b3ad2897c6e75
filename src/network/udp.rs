//! Socket construction
//!
//! Both sockets are built through socket2 so buffer sizes and address reuse
//! can be set before binding.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, warn};

use crate::error::NetworkError;

/// Kernel receive buffer requested for the listening socket
pub const DEFAULT_RECV_BUFFER: usize = 1 << 20;

/// Kernel send buffer requested for the sending socket
pub const DEFAULT_SEND_BUFFER: usize = 1 << 20;

/// Resolve `host:port` to the first address it names
pub fn resolve(destination: &str) -> Result<SocketAddr, NetworkError> {
    destination
        .to_socket_addrs()
        .map_err(|e| NetworkError::InvalidAddress(format!("{}: {}", destination, e)))?
        .next()
        .ok_or_else(|| NetworkError::InvalidAddress(destination.to_string()))
}

fn new_socket(domain: Domain) -> Result<Socket, NetworkError> {
    Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Bind the listening socket on every IPv4 interface
pub fn bind_receiver(port: u16, recv_buffer: usize) -> Result<UdpSocket, NetworkError> {
    let socket = new_socket(Domain::IPV4)?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
        warn!("Could not set receive buffer to {} bytes: {}", recv_buffer, e);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    debug!(%addr, recv_buffer, "Receive socket bound");
    Ok(socket.into())
}

/// Unbound-port socket for sending to `destination`.
///
/// The socket is non-blocking: the audio thread must never wait on the
/// network, a full send buffer drops the datagram instead.
pub fn create_sender(destination: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = new_socket(Domain::for_address(destination))?;
    if let Err(e) = socket.set_send_buffer_size(DEFAULT_SEND_BUFFER) {
        warn!("Could not set send buffer: {}", e);
    }

    let local: SocketAddr = if destination.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    socket
        .bind(&local.into())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket.into())
}
