//! Error types for the intercom

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Wire codec errors.
///
/// Every variant describes a datagram that is dropped on the floor; none of
/// them touch the jitter buffer or the flow controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Datagram has {actual} bytes, expected {expected}")]
    InvalidPacketLength { expected: usize, actual: usize },

    #[error("Bitplane index {index} out of range (max {max})")]
    BitplaneOutOfRange { index: u8, max: usize },

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
