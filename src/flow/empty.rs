//! Empty bit-plane suppression
//!
//! High planes of quiet audio (and most planes of the decorrelated stereo
//! channel) are all zero. Those are not sent; the number skipped in a chunk
//! is fed back into the next budget so suppression is not read as loss.

use crate::codec::bitplane::is_empty_plane;

/// Per-chunk counter of suppressed planes
#[derive(Debug, Clone, Default)]
pub struct EmptyPlaneFilter {
    skipped: u32,
}

impl EmptyPlaneFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a packed plane is worth sending; empty planes are counted
    /// and rejected.
    pub fn admit(&mut self, bits: &[u8]) -> bool {
        if is_empty_plane(bits) {
            self.skipped += 1;
            false
        } else {
            true
        }
    }

    /// Planes skipped so far in the current chunk
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Close the current chunk and return its skip count
    pub fn finish_chunk(&mut self) -> u32 {
        std::mem::take(&mut self.skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_empty_planes() {
        let mut filter = EmptyPlaneFilter::new();
        assert!(!filter.admit(&[0, 0, 0]));
        assert!(filter.admit(&[0, 1, 0]));
        assert!(!filter.admit(&[0; 128]));
        assert_eq!(filter.skipped(), 2);

        assert_eq!(filter.finish_chunk(), 2);
        assert_eq!(filter.skipped(), 0);
    }
}
