//! Application configuration
//!
//! Loaded from TOML. Every section and field has a default, so a partial
//! file (or no file at all) is valid. Command-line flags are applied on top
//! by [`crate::cli`].

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::codec::wavelet::DEFAULT_LEVELS;
use crate::constants::{DEFAULT_PORT, DEFAULT_SAMPLE_RATE};
use crate::engine::StreamParams;
use crate::error::{Error, Result};
use crate::flow::{FeedbackSource, FlowMode};
use crate::network::udp::{resolve, DEFAULT_RECV_BUFFER};

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "intercom.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub codec: CodecConfig,
}

/// Chunk geometry shared by both endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub channels: usize,
    pub frames_per_chunk: usize,
    /// Playout delay in chunks
    pub chunks_to_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            frames_per_chunk: 1024,
            chunks_to_buffer: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Peer address, `host:port`
    pub destination: String,
    pub listen_port: u16,
    /// Requested kernel receive buffer in bytes
    pub recv_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            destination: format!("localhost:{}", DEFAULT_PORT),
            listen_port: DEFAULT_PORT,
            recv_buffer_size: DEFAULT_RECV_BUFFER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Device name; host default when unset
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            input_device: None,
            output_device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub flow: FlowMode,
    pub feedback: FeedbackSource,
    pub skip_empty_planes: bool,
    /// Carry the `received_count` byte in every packet
    pub received_count: bool,
    pub wavelet: bool,
    pub wavelet_levels: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            flow: FlowMode::Adaptive,
            feedback: FeedbackSource::Observed,
            skip_empty_planes: true,
            received_count: false,
            wavelet: false,
            wavelet_levels: DEFAULT_LEVELS,
        }
    }
}

impl AppConfig {
    /// Platform config file location, e.g. `~/.config/intercom/intercom.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "intercom").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load `path` if given, otherwise the default file when it exists,
    /// otherwise built-in defaults. An explicit path that cannot be read is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validated engine parameters
    pub fn stream_params(&self) -> Result<StreamParams> {
        let params = StreamParams {
            channels: self.stream.channels,
            frames_per_chunk: self.stream.frames_per_chunk,
            chunks_to_buffer: self.stream.chunks_to_buffer,
            flow: self.codec.flow,
            feedback: self.codec.feedback,
            skip_empty_planes: self.codec.skip_empty_planes,
            received_count: self.codec.received_count,
            wavelet_levels: self.codec.wavelet.then_some(self.codec.wavelet_levels),
        };
        params.validate()?;
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        Ok(params)
    }

    /// Resolve the peer address
    pub fn destination_addr(&self) -> Result<SocketAddr> {
        Ok(resolve(&self.network.destination)?)
    }
}
