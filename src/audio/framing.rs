//! Chunk framing for audio callbacks
//!
//! Audio back ends treat the requested buffer size as a hint and may call
//! back with any number of samples. These adapters turn arbitrary callback
//! buffers into whole chunks and back, using storage allocated once.

/// Collects captured samples into whole chunks
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    chunk: Vec<i16>,
    filled: usize,
}

impl ChunkAssembler {
    pub fn new(chunk_len: usize) -> Self {
        Self {
            chunk: vec![0; chunk_len],
            filled: 0,
        }
    }

    /// Append `data`, handing every completed chunk to `on_chunk`
    pub fn push(&mut self, mut data: &[i16], mut on_chunk: impl FnMut(&[i16])) {
        while !data.is_empty() {
            let take = (self.chunk.len() - self.filled).min(data.len());
            self.chunk[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == self.chunk.len() {
                on_chunk(&self.chunk);
                self.filled = 0;
            }
        }
    }

    /// Samples waiting for the rest of their chunk
    pub fn pending(&self) -> usize {
        self.filled
    }
}

/// Feeds whole decoded chunks out through arbitrarily sized buffers
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    chunk: Vec<i16>,
    position: usize,
}

impl ChunkSplitter {
    pub fn new(chunk_len: usize) -> Self {
        Self {
            chunk: vec![0; chunk_len],
            position: chunk_len,
        }
    }

    /// Fill `out`, asking `next_chunk` for a fresh chunk whenever the
    /// current one is used up
    pub fn fill(&mut self, mut out: &mut [i16], mut next_chunk: impl FnMut(&mut [i16])) {
        while !out.is_empty() {
            if self.position == self.chunk.len() {
                next_chunk(&mut self.chunk);
                self.position = 0;
            }

            let take = (self.chunk.len() - self.position).min(out.len());
            let (head, tail) = std::mem::take(&mut out).split_at_mut(take);
            head.copy_from_slice(&self.chunk[self.position..self.position + take]);
            self.position += take;
            out = tail;
        }
    }
}
