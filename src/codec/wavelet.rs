//! Reversible Haar wavelet stage
//!
//! Integer lifting form of the db1 wavelet with periodic extension. Each
//! channel is transformed independently and coefficients are stored as
//! `[L_n | H_n | H_n-1 | ... | H_1]`, coarsest subband first, the same
//! order `coeffs_to_array` style layouts use.
//!
//! Most of a chunk's energy ends up in the few low-frequency coefficients,
//! which leaves the high planes of the detail subbands empty.
//!
//! Lifting step (all arithmetic wraps modulo 2^16, so the stage is exactly
//! invertible for any input):
//!
//! ```text
//! d = a - b          b = s - (d >> 1)
//! s = b + (d >> 1)   a = d + b
//! ```

use super::SampleTransform;

/// Default decomposition depth
pub const DEFAULT_LEVELS: u32 = 4;

/// Multi-level integer Haar transform over interleaved chunks
#[derive(Debug, Clone)]
pub struct HaarWavelet {
    channels: usize,
    levels: u32,
    /// One channel of the chunk, de-interleaved
    column: Vec<i16>,
    scratch: Vec<i16>,
}

impl HaarWavelet {
    /// Create a transform for chunks of `frames` frames.
    ///
    /// The depth is capped so every level halves an even length.
    pub fn new(channels: usize, frames: usize, levels: u32) -> Self {
        let levels = levels.min(frames.trailing_zeros());
        Self {
            channels,
            levels,
            column: vec![0; frames],
            scratch: vec![0; frames],
        }
    }

    /// Effective decomposition depth
    pub fn levels(&self) -> u32 {
        self.levels
    }

    fn gather(&mut self, chunk: &[i16], channel: usize) {
        for (value, frame) in self.column.iter_mut().zip(chunk.chunks_exact(self.channels)) {
            *value = frame[channel];
        }
    }

    fn scatter(&self, chunk: &mut [i16], channel: usize) {
        for (&value, frame) in self.column.iter().zip(chunk.chunks_exact_mut(self.channels)) {
            frame[channel] = value;
        }
    }
}

fn analyze(column: &mut [i16], scratch: &mut [i16], levels: u32) {
    let mut len = column.len();
    for _ in 0..levels {
        let half = len / 2;
        for i in 0..half {
            let a = column[2 * i];
            let b = column[2 * i + 1];
            let d = a.wrapping_sub(b);
            scratch[i] = b.wrapping_add(d >> 1);
            scratch[half + i] = d;
        }
        column[..len].copy_from_slice(&scratch[..len]);
        len = half;
    }
}

fn synthesize(column: &mut [i16], scratch: &mut [i16], levels: u32) {
    for level in (0..levels).rev() {
        let len = column.len() >> level;
        let half = len / 2;
        for i in 0..half {
            let s = column[i];
            let d = column[half + i];
            let b = s.wrapping_sub(d >> 1);
            scratch[2 * i] = d.wrapping_add(b);
            scratch[2 * i + 1] = b;
        }
        column[..len].copy_from_slice(&scratch[..len]);
    }
}

impl SampleTransform for HaarWavelet {
    fn forward(&mut self, chunk: &mut [i16]) {
        for channel in 0..self.channels {
            self.gather(chunk, channel);
            analyze(&mut self.column, &mut self.scratch, self.levels);
            self.scatter(chunk, channel);
        }
    }

    fn inverse(&mut self, chunk: &mut [i16]) {
        for channel in 0..self.channels {
            self.gather(chunk, channel);
            synthesize(&mut self.column, &mut self.scratch, self.levels);
            self.scatter(chunk, channel);
        }
    }

    fn name(&self) -> &'static str {
        "haar"
    }
}
