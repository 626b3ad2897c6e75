//! Bit-plane wire codec
//!
//! Converts chunks of two's-complement samples into sign-magnitude words and
//! slices those words into bit-planes: one bit per frame for a single
//! (channel, significance) pair, packed eight frames per byte, most
//! significant bit first.
//!
//! Bitplane indices are significance-major with channels interleaved:
//!
//! ```text
//! index = channel + significance * channels
//!
//! stereo:  31 = sig 15 / ch 1   30 = sig 15 / ch 0   29 = sig 14 / ch 1 ...
//! ```
//!
//! so sending indices from the top down always sheds the least significant
//! planes of every channel first.

use crate::error::CodecError;

/// Sign bit of a sign-magnitude word
pub const SIGN_BIT: u16 = 0x8000;

/// Magnitude bits of a sign-magnitude word
pub const MAGNITUDE_MASK: u16 = 0x7FFF;

/// Significance levels per sample (15 is the sign plane)
pub const BITS_PER_SAMPLE: usize = 16;

/// Convert a two's-complement sample to sign-magnitude.
///
/// `i16::MIN` has no positive counterpart; its wrapped magnitude is zero, so
/// it encodes as negative zero (`0x8000`), the one word no other sample uses.
#[inline]
pub fn to_sign_magnitude(sample: i16) -> u16 {
    let sign = sample as u16 & SIGN_BIT;
    sign | (sample.unsigned_abs() & MAGNITUDE_MASK)
}

/// Exact inverse of [`to_sign_magnitude`]; negative zero decodes to `i16::MIN`.
#[inline]
pub fn from_sign_magnitude(word: u16) -> i16 {
    let magnitude = word & MAGNITUDE_MASK;
    if word & SIGN_BIT == 0 {
        magnitude as i16
    } else {
        (magnitude.wrapping_neg() | SIGN_BIT) as i16
    }
}

/// Decode a word whose low-order planes may be missing.
///
/// With low planes lost a small negative sample collapses to negative zero,
/// which must play as silence rather than full-scale `i16::MIN`.
#[inline]
pub fn from_sign_magnitude_truncated(word: u16) -> i16 {
    if word == SIGN_BIT {
        0
    } else {
        from_sign_magnitude(word)
    }
}

/// Linearised (channel, significance) address of one bit-plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitplaneIndex(u8);

impl BitplaneIndex {
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}

/// Set of bit-planes applied to a chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneMask(u32);

impl PlaneMask {
    pub const EMPTY: PlaneMask = PlaneMask(0);

    pub fn insert(&mut self, index: BitplaneIndex) {
        self.0 |= 1 << index.raw();
    }

    pub fn contains(&self, index: BitplaneIndex) -> bool {
        self.0 & (1 << index.raw()) != 0
    }

    /// Number of distinct planes in the set
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Shape of a chunk as seen by the bit-plane codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    channels: usize,
    frames: usize,
}

impl PlaneLayout {
    /// Create a layout; `frames` must be a positive multiple of 8 so every
    /// plane packs into whole bytes.
    pub fn new(channels: usize, frames: usize) -> Result<Self, CodecError> {
        if frames == 0 || frames % 8 != 0 {
            return Err(CodecError::InvalidFrameSize(frames));
        }
        // PlaneMask holds at most 32 planes
        if channels == 0 || channels * BITS_PER_SAMPLE > 32 {
            return Err(CodecError::UnsupportedChannels(channels));
        }
        Ok(Self { channels, frames })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Interleaved samples per chunk
    pub fn samples(&self) -> usize {
        self.frames * self.channels
    }

    /// Packed bytes per plane
    pub fn plane_bytes(&self) -> usize {
        self.frames / 8
    }

    /// Number of bit-planes in a chunk (`16 * channels`)
    pub fn max_planes(&self) -> usize {
        BITS_PER_SAMPLE * self.channels
    }

    pub fn index(&self, channel: usize, significance: usize) -> BitplaneIndex {
        debug_assert!(channel < self.channels && significance < BITS_PER_SAMPLE);
        BitplaneIndex((channel + significance * self.channels) as u8)
    }

    pub fn contains(&self, index: BitplaneIndex) -> bool {
        (index.raw() as usize) < self.max_planes()
    }

    pub fn channel_of(&self, index: BitplaneIndex) -> usize {
        index.raw() as usize % self.channels
    }

    pub fn significance_of(&self, index: BitplaneIndex) -> usize {
        index.raw() as usize / self.channels
    }

    /// Whether the least significant plane of `channel` is in `mask`
    pub fn has_lsb(&self, mask: PlaneMask, channel: usize) -> bool {
        mask.contains(self.index(channel, 0))
    }
}

/// Convert an interleaved chunk to sign-magnitude words
pub fn encode_chunk(samples: &[i16], words: &mut [u16]) {
    for (word, &sample) in words.iter_mut().zip(samples) {
        *word = to_sign_magnitude(sample);
    }
}

/// Convert sign-magnitude words back to an interleaved chunk
pub fn decode_chunk(words: &[u16], samples: &mut [i16]) {
    for (sample, &word) in samples.iter_mut().zip(words) {
        *sample = from_sign_magnitude(word);
    }
}

/// Decode a possibly incomplete chunk.
///
/// A channel whose least significant plane is in `mask` decodes exactly;
/// any other channel decodes negative zero as silence.
pub fn decode_received(layout: &PlaneLayout, words: &[u16], mask: PlaneMask, samples: &mut [i16]) {
    let channels = layout.channels();
    for channel in 0..channels {
        let exact = layout.has_lsb(mask, channel);
        let decode: fn(u16) -> i16 = if exact {
            from_sign_magnitude
        } else {
            from_sign_magnitude_truncated
        };
        for (frame_out, frame_in) in samples
            .chunks_exact_mut(channels)
            .zip(words.chunks_exact(channels))
        {
            frame_out[channel] = decode(frame_in[channel]);
        }
    }
}

/// Pull one bit-plane out of a chunk of sign-magnitude words.
///
/// `out` must hold [`PlaneLayout::plane_bytes`] bytes; frame `8k + j` lands
/// in bit `7 - j` of byte `k`.
pub fn extract_plane(layout: &PlaneLayout, words: &[u16], index: BitplaneIndex, out: &mut [u8]) {
    let channels = layout.channels();
    let channel = layout.channel_of(index);
    let shift = layout.significance_of(index);
    debug_assert_eq!(out.len(), layout.plane_bytes());

    for (byte, frames) in out.iter_mut().zip(words.chunks_exact(channels * 8)) {
        let mut packed = 0u8;
        for frame in frames.chunks_exact(channels) {
            packed = (packed << 1) | ((frame[channel] >> shift) & 1) as u8;
        }
        *byte = packed;
    }
}

/// OR one packed bit-plane into a chunk of sign-magnitude words.
///
/// Accumulation (not assignment) lets planes of one chunk arrive in any
/// order.
pub fn apply_plane(layout: &PlaneLayout, words: &mut [u16], index: BitplaneIndex, bits: &[u8]) {
    let channels = layout.channels();
    let channel = layout.channel_of(index);
    let shift = layout.significance_of(index);

    for (&byte, frames) in bits.iter().zip(words.chunks_exact_mut(channels * 8)) {
        if byte == 0 {
            continue;
        }
        for (bit, frame) in frames.chunks_exact_mut(channels).enumerate() {
            frame[channel] |= (((byte >> (7 - bit)) & 1) as u16) << shift;
        }
    }
}

/// True when a packed plane carries no set bits
#[inline]
pub fn is_empty_plane(bits: &[u8]) -> bool {
    bits.iter().all(|&b| b == 0)
}

/// Whether `channel` holds a negative-zero word (`i16::MIN` before encoding).
///
/// Such a channel only decodes exactly when its least significant plane
/// reaches the receiver, empty or not.
pub fn has_negative_zero(layout: &PlaneLayout, words: &[u16], channel: usize) -> bool {
    words
        .chunks_exact(layout.channels())
        .any(|frame| frame[channel] == SIGN_BIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_magnitude_edges() {
        assert_eq!(to_sign_magnitude(0), 0x0000);
        assert_eq!(to_sign_magnitude(1), 0x0001);
        assert_eq!(to_sign_magnitude(-1), 0x8001);
        assert_eq!(to_sign_magnitude(i16::MAX), 0x7FFF);
        assert_eq!(to_sign_magnitude(-i16::MAX), 0xFFFF);
        assert_eq!(to_sign_magnitude(i16::MIN), 0x8000);

        assert_eq!(from_sign_magnitude(0x8000), i16::MIN);
        assert_eq!(from_sign_magnitude(0xFFFF), -32767);
        assert_eq!(from_sign_magnitude(0x8064), -100);
    }

    #[test]
    fn test_sign_magnitude_is_bijective() {
        for x in i16::MIN..=i16::MAX {
            assert_eq!(from_sign_magnitude(to_sign_magnitude(x)), x);
        }
    }

    #[test]
    fn test_truncated_negative_zero_is_silence() {
        assert_eq!(from_sign_magnitude_truncated(0x8000), 0);
        assert_eq!(from_sign_magnitude_truncated(0x8003), -3);
        assert_eq!(from_sign_magnitude_truncated(0x0003), 3);
    }

    #[test]
    fn test_layout_rejects_bad_frames() {
        assert!(PlaneLayout::new(2, 0).is_err());
        assert!(PlaneLayout::new(2, 1020).is_err());
        assert!(PlaneLayout::new(3, 1024).is_err());

        let layout = PlaneLayout::new(2, 1024).unwrap();
        assert_eq!(layout.plane_bytes(), 128);
        assert_eq!(layout.max_planes(), 32);
    }

    #[test]
    fn test_index_mapping() {
        let layout = PlaneLayout::new(2, 8).unwrap();
        let index = layout.index(1, 15);
        assert_eq!(index.raw(), 31);
        assert_eq!(layout.channel_of(index), 1);
        assert_eq!(layout.significance_of(index), 15);

        let index = layout.index(0, 3);
        assert_eq!(index.raw(), 6);
        assert!(layout.contains(index));
        assert!(!layout.contains(BitplaneIndex::from_raw(32)));
    }

    #[test]
    fn test_extract_plane_is_msb_first() {
        let layout = PlaneLayout::new(1, 8).unwrap();
        // Only frame 0 and frame 7 have bit 2 set
        let words = [4u16, 0, 0, 0, 0, 0, 0, 5];
        let mut out = [0u8; 1];

        extract_plane(&layout, &words, layout.index(0, 2), &mut out);
        assert_eq!(out[0], 0b1000_0001);

        extract_plane(&layout, &words, layout.index(0, 0), &mut out);
        assert_eq!(out[0], 0b0000_0001);
    }

    #[test]
    fn test_apply_plane_accumulates() {
        let layout = PlaneLayout::new(2, 8).unwrap();
        let mut words = [0u16; 16];

        apply_plane(&layout, &mut words, layout.index(1, 4), &[0b1000_0000]);
        apply_plane(&layout, &mut words, layout.index(1, 0), &[0b1000_0001]);

        assert_eq!(words[1], 0b1_0001);
        assert_eq!(words[15], 0b0_0001);
        // Channel 0 untouched
        assert!(words.iter().step_by(2).all(|&w| w == 0));
    }

    #[test]
    fn test_all_planes_rebuild_chunk() {
        let layout = PlaneLayout::new(2, 16).unwrap();
        let samples: Vec<i16> = (0..32).map(|i| (i as i16 - 16) * 1021).collect();
        let mut words = vec![0u16; 32];
        encode_chunk(&samples, &mut words);

        let mut rebuilt = vec![0u16; 32];
        let mut plane = vec![0u8; layout.plane_bytes()];
        for raw in 0..layout.max_planes() as u8 {
            let index = BitplaneIndex::from_raw(raw);
            extract_plane(&layout, &words, index, &mut plane);
            apply_plane(&layout, &mut rebuilt, index, &plane);
        }
        assert_eq!(rebuilt, words);

        let mut decoded = vec![0i16; 32];
        decode_chunk(&rebuilt, &mut decoded);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_decode_received_uses_mask() {
        let layout = PlaneLayout::new(2, 8).unwrap();
        let mut words = [0u16; 16];
        words[0] = SIGN_BIT;
        words[1] = SIGN_BIT;

        let mut mask = PlaneMask::EMPTY;
        mask.insert(layout.index(0, 0));

        let mut samples = [1i16; 16];
        decode_received(&layout, &words, mask, &mut samples);
        assert_eq!(samples[0], i16::MIN);
        assert_eq!(samples[1], 0);
    }

    #[test]
    fn test_has_negative_zero_per_channel() {
        let layout = PlaneLayout::new(2, 8).unwrap();
        let mut words = [0u16; 16];
        assert!(!has_negative_zero(&layout, &words, 0));

        words[5] = SIGN_BIT;
        assert!(!has_negative_zero(&layout, &words, 0));
        assert!(has_negative_zero(&layout, &words, 1));

        // -1 is not negative zero
        words[4] = 0x8001;
        assert!(!has_negative_zero(&layout, &words, 0));
    }

    #[test]
    fn test_plane_mask() {
        let mut mask = PlaneMask::default();
        assert!(mask.is_empty());
        mask.insert(BitplaneIndex::from_raw(31));
        mask.insert(BitplaneIndex::from_raw(31));
        mask.insert(BitplaneIndex::from_raw(0));
        assert_eq!(mask.count(), 2);
        assert!(mask.contains(BitplaneIndex::from_raw(31)));
        assert!(!mask.contains(BitplaneIndex::from_raw(30)));
    }
}
