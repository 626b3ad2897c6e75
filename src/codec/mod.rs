//! Progressive bit-plane codec
//!
//! The codec is a chain of reversible sample stages (channel decorrelation,
//! optional wavelet) followed by the sign-magnitude bit-plane slicer.
//! Stages are picked once at start-up and run per chunk without any
//! allocation.

pub mod bitplane;
pub mod stereo;
pub mod wavelet;

pub use bitplane::{BitplaneIndex, PlaneLayout, PlaneMask};
pub use stereo::ChannelDecorrelator;
pub use wavelet::HaarWavelet;

/// A reversible, per-chunk transform over interleaved `i16` samples.
///
/// Implementations run on the audio thread and must not allocate or block.
pub trait SampleTransform: Send {
    /// Applied on the send side, before sign-magnitude conversion
    fn forward(&mut self, chunk: &mut [i16]);

    /// Applied on the playback side, after sign-magnitude decoding
    fn inverse(&mut self, chunk: &mut [i16]);

    fn name(&self) -> &'static str;
}

/// Ordered set of sample stages.
///
/// `forward` runs the stages in insertion order, `inverse` in reverse.
#[derive(Default)]
pub struct TransformChain {
    stages: Vec<Box<dyn SampleTransform>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the stages for a stream: decorrelation first, then the optional
    /// wavelet with the given depth.
    pub fn for_stream(channels: usize, frames: usize, wavelet_levels: Option<u32>) -> Self {
        let mut chain = Self::new().with(ChannelDecorrelator::for_channels(channels));
        if let Some(levels) = wavelet_levels {
            chain = chain.with(HaarWavelet::new(channels, frames, levels));
        }
        chain
    }

    pub fn with(mut self, stage: impl SampleTransform + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn forward(&mut self, chunk: &mut [i16]) {
        for stage in self.stages.iter_mut() {
            stage.forward(chunk);
        }
    }

    pub fn inverse(&mut self, chunk: &mut [i16]) {
        for stage in self.stages.iter_mut().rev() {
            stage.inverse(chunk);
        }
    }

    /// Stage names in forward order, for logging
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_for_stereo_wavelet() {
        let chain = TransformChain::for_stream(2, 1024, Some(4));
        assert_eq!(chain.names(), vec!["stereo-difference", "haar"]);

        let chain = TransformChain::for_stream(1, 1024, None);
        assert_eq!(chain.names(), vec!["bypass"]);
    }

    #[test]
    fn test_chain_inverse_reverses_order() {
        let mut chain = TransformChain::for_stream(2, 8, Some(3));
        let original: Vec<i16> = (0..16).map(|i| (i * 997 - 5000) as i16).collect();
        let mut chunk = original.clone();

        chain.forward(&mut chunk);
        assert_ne!(chunk, original);
        chain.inverse(&mut chunk);
        assert_eq!(chunk, original);
    }
}
