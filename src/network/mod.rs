//! UDP transport for bit-plane packets

pub mod receiver;
pub mod sender;
pub mod udp;

pub use receiver::PacketReceiver;
pub use sender::UdpSink;
pub use udp::{bind_receiver, create_sender, resolve};
