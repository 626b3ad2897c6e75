//! Jitter buffer for bit-plane accumulation
//!
//! A ring of `2 * chunks_to_buffer` chunk-shaped slots of sign-magnitude
//! words. Planes are OR-ed into the slot of their chunk as they arrive, in
//! any order; playback reads a slot once and clears it so the next chunk
//! that maps onto it starts from zero.
//!
//! Each slot has its own lock. The receive thread and the audio thread
//! normally touch slots `chunks_to_buffer` apart, so the locks are
//! uncontended and held only for a copy of one chunk.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use crate::codec::bitplane::{apply_plane, PlaneLayout};
use crate::codec::{BitplaneIndex, PlaneMask};

struct Slot {
    words: Box<[u16]>,
    planes: PlaneMask,
}

/// Sequence-indexed ring of accumulator slots
pub struct JitterBuffer {
    slots: Box<[Mutex<Slot>]>,
    layout: PlaneLayout,
    chunks_to_buffer: usize,
    /// Planes OR-ed into any slot
    planes_written: AtomicU64,
    /// Slots consumed by playback
    chunks_read: AtomicU64,
    /// Slots consumed while still empty
    silent_chunks: AtomicU64,
}

impl JitterBuffer {
    /// Create a buffer holding `2 * chunks_to_buffer` chunks.
    ///
    /// `chunks_to_buffer` must be a power of two so slot mapping stays
    /// continuous when chunk numbers wrap at 65536.
    pub fn new(layout: PlaneLayout, chunks_to_buffer: usize) -> Self {
        debug_assert!(chunks_to_buffer.is_power_of_two());
        let cells = chunks_to_buffer * 2;
        let slots = (0..cells)
            .map(|_| {
                Mutex::new(Slot {
                    words: vec![0u16; layout.samples()].into_boxed_slice(),
                    planes: PlaneMask::EMPTY,
                })
            })
            .collect();

        Self {
            slots,
            layout,
            chunks_to_buffer,
            planes_written: AtomicU64::new(0),
            chunks_read: AtomicU64::new(0),
            silent_chunks: AtomicU64::new(0),
        }
    }

    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    /// Number of physical slots (`cells_in_buffer`)
    pub fn cells(&self) -> usize {
        self.slots.len()
    }

    /// Playout delay in chunks
    pub fn chunks_to_buffer(&self) -> usize {
        self.chunks_to_buffer
    }

    fn slot(&self, chunk_number: u16) -> &Mutex<Slot> {
        &self.slots[chunk_number as usize % self.slots.len()]
    }

    /// OR one packed plane into the slot of `chunk_number`
    pub fn write(&self, chunk_number: u16, index: BitplaneIndex, bits: &[u8]) {
        let mut slot = self.slot(chunk_number).lock();
        apply_plane(&self.layout, &mut slot.words, index, bits);
        slot.planes.insert(index);
        drop(slot);

        self.planes_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the slot of `chunk_number` into `out`, then zero it.
    ///
    /// Returns the set of planes that had arrived. Never blocks beyond the
    /// slot lock and never allocates, so it is safe on the audio thread.
    pub fn read_and_clear_into(&self, chunk_number: u16, out: &mut [u16]) -> PlaneMask {
        let mut slot = self.slot(chunk_number).lock();
        out.copy_from_slice(&slot.words);
        slot.words.fill(0);
        let planes = std::mem::take(&mut slot.planes);
        drop(slot);

        self.chunks_read.fetch_add(1, Ordering::Relaxed);
        if planes.is_empty() {
            self.silent_chunks.fetch_add(1, Ordering::Relaxed);
        }
        planes
    }

    /// Allocating variant of [`read_and_clear_into`](Self::read_and_clear_into)
    pub fn read_and_clear(&self, chunk_number: u16) -> Vec<u16> {
        let mut out = vec![0u16; self.layout.samples()];
        self.read_and_clear_into(chunk_number, &mut out);
        out
    }

    /// Planes accumulated so far for `chunk_number`'s slot
    pub fn planes_in(&self, chunk_number: u16) -> PlaneMask {
        self.slot(chunk_number).lock().planes
    }

    /// Get statistics
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            capacity: self.cells(),
            planes_written: self.planes_written.load(Ordering::Relaxed),
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            silent_chunks: self.silent_chunks.load(Ordering::Relaxed),
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default)]
pub struct JitterBufferStats {
    pub capacity: usize,
    pub planes_written: u64,
    pub chunks_read: u64,
    pub silent_chunks: u64,
}

impl JitterBufferStats {
    /// Fraction of played chunks that had no plane at all
    pub fn silence_rate(&self) -> f32 {
        if self.chunks_read == 0 {
            0.0
        } else {
            self.silent_chunks as f32 / self.chunks_read as f32
        }
    }
}

/// Playback position in chunk numbers.
///
/// Unsynchronised until the first packet arrives; from then on every
/// [`advance`](Self::advance) hands out the next chunk to play.
#[derive(Debug, Default)]
pub struct PlaybackCursor {
    next: AtomicU16,
    synced: AtomicBool,
}

impl PlaybackCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playback `chunks_to_buffer` chunks behind `first_chunk_number`.
    ///
    /// Only the first call has an effect; returns whether it was this one.
    pub fn sync(&self, first_chunk_number: u16, chunks_to_buffer: usize) -> bool {
        if self.synced.load(Ordering::Acquire) {
            return false;
        }
        let start = first_chunk_number.wrapping_sub(chunks_to_buffer as u16);
        self.next.store(start, Ordering::Release);
        self.synced.store(true, Ordering::Release);
        true
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Take the chunk number to play now and move past it
    pub fn advance(&self) -> Option<u16> {
        if !self.is_synced() {
            return None;
        }
        Some(self.next.fetch_add(1, Ordering::AcqRel))
    }

    /// Chunk number the next `advance` will return
    pub fn peek(&self) -> Option<u16> {
        self.is_synced().then(|| self.next.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bitplane::SIGN_BIT;

    fn buffer() -> JitterBuffer {
        JitterBuffer::new(PlaneLayout::new(2, 16).unwrap(), 4)
    }

    #[test]
    fn test_unwritten_slot_reads_zero() {
        let jitter = buffer();
        assert_eq!(jitter.cells(), 8);

        let chunk = jitter.read_and_clear(3);
        assert_eq!(chunk.len(), 32);
        assert!(chunk.iter().all(|&w| w == 0));
        assert_eq!(jitter.stats().silent_chunks, 1);
    }

    #[test]
    fn test_write_then_read_and_clear() {
        let jitter = buffer();
        let layout = *jitter.layout();
        let sign = layout.index(1, 15);
        let low = layout.index(1, 0);

        // Out of order: low plane before sign plane
        jitter.write(5, low, &[0xFF, 0x00]);
        jitter.write(5, sign, &[0x80, 0x00]);
        assert_eq!(jitter.planes_in(5).count(), 2);

        let mut out = vec![0u16; layout.samples()];
        let planes = jitter.read_and_clear_into(5, &mut out);
        assert!(planes.contains(sign) && planes.contains(low));
        assert_eq!(out[1], SIGN_BIT | 1);
        assert_eq!(out[3], 1);
        assert_eq!(out[17], 0);

        // Cleared until written again
        assert!(jitter.read_and_clear(5).iter().all(|&w| w == 0));
        assert!(jitter.planes_in(5).is_empty());
    }

    #[test]
    fn test_chunks_share_slot_modulo_cells() {
        let jitter = buffer();
        let index = jitter.layout().index(0, 0);
        jitter.write(2, index, &[0x80, 0x00]);

        // 10 % 8 == 2
        let chunk = jitter.read_and_clear(10);
        assert_eq!(chunk[0], 1);
    }

    #[test]
    fn test_slot_mapping_continuous_across_wrap() {
        let jitter = buffer();
        let index = jitter.layout().index(0, 0);
        jitter.write(65535, index, &[0x80, 0x00]);
        jitter.write(0, index, &[0x40, 0x00]);

        assert_eq!(jitter.read_and_clear(65535)[0], 1);
        assert_eq!(jitter.read_and_clear(0)[2], 1);
    }

    #[test]
    fn test_cursor_starts_behind_first_packet() {
        let cursor = PlaybackCursor::new();
        assert_eq!(cursor.advance(), None);

        assert!(cursor.sync(40, 32));
        assert!(!cursor.sync(90, 32));
        assert_eq!(cursor.advance(), Some(8));
        assert_eq!(cursor.advance(), Some(9));
        assert_eq!(cursor.peek(), Some(10));
    }

    #[test]
    fn test_cursor_wraps() {
        let cursor = PlaybackCursor::new();
        cursor.sync(1, 2);
        assert_eq!(cursor.advance(), Some(65535));
        assert_eq!(cursor.advance(), Some(0));
    }
}
