//! Binaural redundancy reduction
//!
//! The two channels of a stereo signal are highly correlated, so channel 0
//! is sent as its difference from channel 1. The difference has far fewer
//! significant bits and its high planes are usually empty.

use super::SampleTransform;

/// Channel decorrelation stage, chosen once from the channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDecorrelator {
    /// Mono stream, identity
    Bypass,
    /// `ch0 := ch0 - ch1` on encode, `ch0 := ch0 + ch1` on decode
    Stereo,
}

impl ChannelDecorrelator {
    pub fn for_channels(channels: usize) -> Self {
        if channels == 2 {
            Self::Stereo
        } else {
            Self::Bypass
        }
    }
}

impl SampleTransform for ChannelDecorrelator {
    fn forward(&mut self, chunk: &mut [i16]) {
        if let Self::Stereo = self {
            for frame in chunk.chunks_exact_mut(2) {
                frame[0] = frame[0].wrapping_sub(frame[1]);
            }
        }
    }

    fn inverse(&mut self, chunk: &mut [i16]) {
        if let Self::Stereo = self {
            for frame in chunk.chunks_exact_mut(2) {
                frame[0] = frame[0].wrapping_add(frame[1]);
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Bypass => "bypass",
            Self::Stereo => "stereo-difference",
        }
    }
}
