//! Inbound datagrams
//!
//! A tokio task owns the listening socket and hands every datagram to
//! [`StreamState::receive_datagram`]. It never touches the audio device;
//! the jitter buffer is the only thing it shares with playback.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::engine::StreamState;
use crate::error::NetworkError;

pub struct PacketReceiver {
    socket: StdUdpSocket,
    state: Arc<StreamState>,
}

impl PacketReceiver {
    /// `socket` must be bound and non-blocking
    pub fn new(socket: StdUdpSocket, state: Arc<StreamState>) -> Self {
        Self { socket, state }
    }

    /// Receive until `shutdown` flips to `true` or its sender goes away
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), NetworkError> {
        let socket = UdpSocket::from_std(self.socket)
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
        if let Ok(addr) = socket.local_addr() {
            info!("Listening for chunks on {}", addr);
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Receiver shutting down");
                        return Ok(());
                    }
                }
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => {
                        if let Err(e) = self.state.receive_datagram(&buf[..len]) {
                            trace!(%from, len, "Dropped datagram: {}", e);
                        }
                    }
                    // ICMP port unreachable from a peer that is not up yet
                    Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                        trace!("Peer not reachable yet: {}", e);
                    }
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        return Err(NetworkError::ReceiveFailed(e.to_string()));
                    }
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<(), NetworkError>> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DatagramSink, StreamEngine, StreamParams};
    use crate::network::udp::{bind_receiver, DEFAULT_RECV_BUFFER};
    use crate::network::UdpSink;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    #[tokio::test]
    async fn test_receiver_feeds_jitter_buffer() {
        let params = StreamParams {
            skip_empty_planes: false,
            ..StreamParams::new(1, 8, 2)
        };
        let socket = bind_receiver(0, DEFAULT_RECV_BUFFER).unwrap();
        let port = socket.local_addr().unwrap().port();
        let sink = UdpSink::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).unwrap();

        let mut engine = StreamEngine::new(params, sink).unwrap();
        let state = engine.state().clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = PacketReceiver::new(socket, state.clone()).spawn(shutdown_rx);

        assert_eq!(engine.sender().record_and_send(&[100i16; 8]), 16);
        // Also a malformed one
        engine.sender().sink_mut().send(&[1, 2]).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while state.stats().datagrams_received < 16 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(state.stats().datagrams_received, 16);
        assert!(state.cursor().is_synced());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
