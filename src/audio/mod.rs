//! Audio subsystem module

pub mod buffer;
pub mod device;
pub mod framing;
pub mod stream;

pub use buffer::{JitterBuffer, PlaybackCursor};
pub use device::{get_device, list_devices, AudioDevice, Direction};
pub use framing::{ChunkAssembler, ChunkSplitter};
pub use stream::AudioDuplex;
