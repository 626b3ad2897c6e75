//! # Bit-plane Intercom
//!
//! Full-duplex, low-latency audio between two hosts over UDP. Every chunk
//! of audio is sliced into bit-planes and sent most significant first, so a
//! congested link loses resolution instead of losing audio.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── ENDPOINT ─────────────────────────────────┐
//! │                                                                           │
//! │  cpal input ──► ChunkAssembler ──► ChunkSender                            │
//! │                                    │ decorrelate (+ wavelet)              │
//! │                                    │ sign-magnitude                       │
//! │                                    │ budget (flow::FlowControl)           │
//! │                                    │ planes MSB first, skip empty         │
//! │                                    ▼                                      │
//! │                                 UdpSink ─────────────────────────► peer   │
//! │                                                                           │
//! │  peer ──► PacketReceiver (tokio) ──► StreamState::receive_datagram        │
//! │                                      │ validate header                    │
//! │                                      │ sync playback cursor               │
//! │                                      │ OR plane into JitterBuffer slot    │
//! │                                      │ count planes for flow feedback     │
//! │                                      ▼                                    │
//! │  cpal output ◄── ChunkSplitter ◄── ChunkPlayer                            │
//! │                                    read-and-clear slot, decode, inverse   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Packets: `[chunk u16 | bitplane u8 | received_count u8 (optional) | bits]`

pub mod audio;
pub mod cli;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod network;
pub mod protocol;

pub use engine::{StreamEngine, StreamParams, StreamState};
pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default UDP port, used for both listening and the peer
    pub const DEFAULT_PORT: u16 = 4444;

    /// Largest datagram the receive loop accepts
    pub const MAX_DATAGRAM_SIZE: usize = 65535;

    /// Interval between periodic stats log lines
    pub const STATS_INTERVAL_SECS: u64 = 5;
}
