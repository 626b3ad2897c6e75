//! Stream engine
//!
//! Wires the codec stages, the jitter buffer and flow control around the two
//! timing boundaries of an intercom:
//!
//! * the audio callback, fixed cadence, one chunk in and one chunk out
//!   ([`ChunkSender::record_and_send`] and [`ChunkPlayer::play`], or both at
//!   once through [`StreamEngine::process`]);
//! * the receive loop, free running, one datagram at a time
//!   ([`StreamState::receive_datagram`]).
//!
//! Everything the two sides share lives in one [`StreamState`] behind an
//! `Arc`. The audio-side halves own their scratch buffers, so the callback
//! path never allocates and never waits on anything but a per-slot lock.

use bytes::BytesMut;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::audio::buffer::{JitterBuffer, JitterBufferStats, PlaybackCursor};
use crate::codec::bitplane::{decode_received, encode_chunk, extract_plane, has_negative_zero};
use crate::codec::{BitplaneIndex, PlaneLayout, PlaneMask, TransformChain};
use crate::error::{CodecError, Error, Result};
use crate::flow::{EmptyPlaneFilter, FeedbackSource, FlowControl, FlowMode, ReceiveFeedback};
use crate::protocol::{PacketHeader, PacketLayout, CHUNK_NUMBER_MODULUS, MAX_UDP_PAYLOAD};

/// Outbound datagram transport.
///
/// `send` is called from the audio thread: it must be best-effort and must
/// never block.
pub trait DatagramSink: Send {
    fn send(&mut self, datagram: &[u8]) -> std::io::Result<()>;
}

/// Collects every datagram, mostly useful in tests
impl DatagramSink for Vec<Vec<u8>> {
    fn send(&mut self, datagram: &[u8]) -> std::io::Result<()> {
        self.push(datagram.to_vec());
        Ok(())
    }
}

/// Validated, immutable stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// 1 or 2
    pub channels: usize,
    /// Multiple of 8
    pub frames_per_chunk: usize,
    /// Playout delay in chunks, a power of two
    pub chunks_to_buffer: usize,
    pub flow: FlowMode,
    pub feedback: FeedbackSource,
    pub skip_empty_planes: bool,
    /// Carry the `received_count` byte in every packet
    pub received_count: bool,
    /// Wavelet stage depth, `None` to disable the stage
    pub wavelet_levels: Option<u32>,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            channels: 2,
            frames_per_chunk: 1024,
            chunks_to_buffer: 32,
            flow: FlowMode::Adaptive,
            feedback: FeedbackSource::Observed,
            skip_empty_planes: true,
            received_count: false,
            wavelet_levels: None,
        }
    }
}

impl StreamParams {
    pub fn new(channels: usize, frames_per_chunk: usize, chunks_to_buffer: usize) -> Self {
        Self {
            channels,
            frames_per_chunk,
            chunks_to_buffer,
            ..Self::default()
        }
    }

    /// `2 * chunks_to_buffer`
    pub fn cells_in_buffer(&self) -> usize {
        self.chunks_to_buffer * 2
    }

    /// Check the parameters and derive the plane layout
    pub fn validate(&self) -> Result<PlaneLayout> {
        if !(1..=2).contains(&self.channels) {
            return Err(Error::Config(format!(
                "number_of_channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.frames_per_chunk == 0 || self.frames_per_chunk % 8 != 0 {
            return Err(Error::Config(format!(
                "frames_per_chunk must be a positive multiple of 8, got {}",
                self.frames_per_chunk
            )));
        }
        if !self.chunks_to_buffer.is_power_of_two()
            || self.cells_in_buffer() > CHUNK_NUMBER_MODULUS
        {
            return Err(Error::Config(format!(
                "chunks_to_buffer must be a power of two no larger than {}, got {}",
                CHUNK_NUMBER_MODULUS / 2,
                self.chunks_to_buffer
            )));
        }
        if self.feedback == FeedbackSource::Reported && !self.received_count {
            return Err(Error::Config(
                "reported feedback needs the received_count packet field".into(),
            ));
        }
        let layout = PlaneLayout::new(self.channels, self.frames_per_chunk)?;
        let packet_len = PacketLayout::new(&layout, self.received_count).packet_len();
        if packet_len > MAX_UDP_PAYLOAD {
            return Err(Error::Config(format!(
                "frames_per_chunk {} gives {} byte packets, over the {} byte UDP limit",
                self.frames_per_chunk, packet_len, MAX_UDP_PAYLOAD
            )));
        }
        Ok(layout)
    }
}

/// Stream-wide counters, updated lock-free from every thread
#[derive(Debug, Default)]
pub struct StreamStats {
    chunks_sent: AtomicU64,
    planes_sent: AtomicU64,
    planes_skipped: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
    datagrams_received: AtomicU64,
    malformed_datagrams: AtomicU64,
    chunks_played: AtomicU64,
    nobpts: AtomicU32,
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            planes_sent: self.planes_sent.load(Ordering::Relaxed),
            planes_skipped: self.planes_skipped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            malformed_datagrams: self.malformed_datagrams.load(Ordering::Relaxed),
            chunks_played: self.chunks_played.load(Ordering::Relaxed),
            nobpts: self.nobpts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub chunks_sent: u64,
    pub planes_sent: u64,
    pub planes_skipped: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub datagrams_received: u64,
    pub malformed_datagrams: u64,
    pub chunks_played: u64,
    pub nobpts: u32,
}

/// State shared by the audio thread and the receive loop
pub struct StreamState {
    params: StreamParams,
    layout: PlaneLayout,
    packets: PacketLayout,
    buffer: JitterBuffer,
    cursor: PlaybackCursor,
    feedback: ReceiveFeedback,
    stats: StreamStats,
}

impl StreamState {
    pub fn new(params: StreamParams) -> Result<Self> {
        let layout = params.validate()?;
        Ok(Self {
            params,
            layout,
            packets: PacketLayout::new(&layout, params.received_count),
            buffer: JitterBuffer::new(layout, params.chunks_to_buffer),
            cursor: PlaybackCursor::new(),
            feedback: ReceiveFeedback::new(params.feedback),
            stats: StreamStats {
                nobpts: AtomicU32::new(layout.max_planes() as u32),
                ..StreamStats::default()
            },
        })
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    pub fn packets(&self) -> &PacketLayout {
        &self.packets
    }

    pub fn buffer(&self) -> &JitterBuffer {
        &self.buffer
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn feedback(&self) -> &ReceiveFeedback {
        &self.feedback
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn buffer_stats(&self) -> JitterBufferStats {
        self.buffer.stats()
    }

    /// Receive path: validate one datagram and accumulate its plane.
    ///
    /// A malformed datagram is counted and rejected without touching the
    /// buffer or the flow feedback.
    pub fn receive_datagram(&self, datagram: &[u8]) -> std::result::Result<PacketHeader, CodecError> {
        let (header, plane) = match self.packets.decode(datagram) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.malformed_datagrams.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if self.cursor.sync(header.chunk_number, self.params.chunks_to_buffer) {
            debug!(
                first_chunk = header.chunk_number,
                delay = self.params.chunks_to_buffer,
                "Playback synchronized to first packet"
            );
        }

        self.buffer.write(header.chunk_number, header.bitplane, plane);

        if let Some(norb) = self.feedback.record_plane(header.chunk_number, header.received_count) {
            trace!(norb, chunk = header.chunk_number, "Incoming chunk rolled over");
        }
        self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
        Ok(header)
    }
}

/// Capture side: transforms, budgets and transmits one chunk per call
pub struct ChunkSender<S> {
    state: Arc<StreamState>,
    sink: S,
    chain: TransformChain,
    flow: FlowControl,
    filter: Option<EmptyPlaneFilter>,
    recorded_chunk_number: u16,
    samples: Vec<i16>,
    words: Vec<u16>,
    plane: Vec<u8>,
    packet: BytesMut,
}

impl<S: DatagramSink> ChunkSender<S> {
    pub fn new(state: Arc<StreamState>, sink: S) -> Self {
        let params = *state.params();
        let layout = *state.layout();
        Self {
            sink,
            chain: TransformChain::for_stream(layout.channels(), layout.frames(), params.wavelet_levels),
            flow: FlowControl::new(params.flow, layout.channels(), layout.max_planes()),
            filter: params.skip_empty_planes.then(EmptyPlaneFilter::new),
            recorded_chunk_number: 0,
            samples: vec![0; layout.samples()],
            words: vec![0; layout.samples()],
            plane: vec![0; layout.plane_bytes()],
            packet: BytesMut::with_capacity(state.packets().packet_len()),
            state,
        }
    }

    /// Chunk number the next call will send
    pub fn recorded_chunk_number(&self) -> u16 {
        self.recorded_chunk_number
    }

    /// Budget used for the last chunk sent
    pub fn nobpts(&self) -> u32 {
        self.flow.nobpts()
    }

    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Send path for one captured chunk of interleaved samples.
    ///
    /// Planes go out most significant first until the budget is spent;
    /// the remaining low planes of this chunk are never sent. A short
    /// `input` is zero padded. Returns the number of datagrams handed to
    /// the sink.
    pub fn record_and_send(&mut self, input: &[i16]) -> u32 {
        let layout = *self.state.layout();
        let n = input.len().min(self.samples.len());
        self.samples[..n].copy_from_slice(&input[..n]);
        self.samples[n..].fill(0);

        self.chain.forward(&mut self.samples);
        encode_chunk(&self.samples, &mut self.words);

        let previous_skipped = self.filter.as_mut().map_or(0, EmptyPlaneFilter::finish_chunk);
        let budget = self.flow.next_budget(self.state.feedback.norb(), previous_skipped) as usize;
        let received_count = self.state.feedback.received_count();

        let max_planes = layout.max_planes();
        let mut sent = 0u32;
        let mut bytes = 0u64;
        for raw in (max_planes - budget..max_planes).rev() {
            let index = BitplaneIndex::from_raw(raw as u8);
            extract_plane(&layout, &self.words, index, &mut self.plane);

            if let Some(filter) = self.filter.as_mut() {
                // An empty LSB still tells the receiver that negative zero
                // means i16::MIN
                let keeps_min = layout.significance_of(index) == 0
                    && has_negative_zero(&layout, &self.words, layout.channel_of(index));
                if !keeps_min && !filter.admit(&self.plane) {
                    continue;
                }
            }

            let header = PacketHeader {
                chunk_number: self.recorded_chunk_number,
                bitplane: index,
                received_count,
            };
            self.packet.clear();
            self.state.packets.encode(&header, &self.plane, &mut self.packet);

            match self.sink.send(&self.packet) {
                Ok(()) => {
                    sent += 1;
                    bytes += self.packet.len() as u64;
                }
                Err(e) => {
                    self.state.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    trace!(chunk = self.recorded_chunk_number, plane = raw, "Send dropped: {}", e);
                }
            }
        }

        let stats = &self.state.stats;
        stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
        stats.planes_sent.fetch_add(u64::from(sent), Ordering::Relaxed);
        stats.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        if let Some(filter) = &self.filter {
            stats.planes_skipped.fetch_add(u64::from(filter.skipped()), Ordering::Relaxed);
        }
        stats.nobpts.store(budget as u32, Ordering::Relaxed);

        self.recorded_chunk_number = self.recorded_chunk_number.wrapping_add(1);
        sent
    }
}

/// Playback side: pulls one chunk per call out of the jitter buffer
pub struct ChunkPlayer {
    state: Arc<StreamState>,
    chain: TransformChain,
    words: Vec<u16>,
}

impl ChunkPlayer {
    pub fn new(state: Arc<StreamState>) -> Self {
        let params = *state.params();
        let layout = *state.layout();
        Self {
            chain: TransformChain::for_stream(layout.channels(), layout.frames(), params.wavelet_levels),
            words: vec![0; layout.samples()],
            state,
        }
    }

    /// Playback path for one output chunk.
    ///
    /// Before the first packet has arrived this writes silence and
    /// consumes nothing. Returns the chunk number played.
    pub fn play(&mut self, output: &mut [i16]) -> Option<u16> {
        match self.state.cursor.advance() {
            Some(chunk_number) => {
                self.reconstruct(chunk_number, output);
                self.state.stats.chunks_played.fetch_add(1, Ordering::Relaxed);
                Some(chunk_number)
            }
            None => {
                output.fill(0);
                None
            }
        }
    }

    /// Read-and-clear the slot of `chunk_number` and decode whatever planes
    /// reached it into `output`.
    pub fn reconstruct(&mut self, chunk_number: u16, output: &mut [i16]) -> PlaneMask {
        debug_assert_eq!(output.len(), self.words.len());
        let planes = self.state.buffer.read_and_clear_into(chunk_number, &mut self.words);
        decode_received(self.state.layout(), &self.words, planes, output);
        self.chain.inverse(output);
        planes
    }
}

/// Both halves of an intercom endpoint
pub struct StreamEngine<S> {
    state: Arc<StreamState>,
    sender: ChunkSender<S>,
    player: ChunkPlayer,
}

impl<S: DatagramSink> StreamEngine<S> {
    pub fn new(params: StreamParams, sink: S) -> Result<Self> {
        let state = Arc::new(StreamState::new(params)?);
        let sender = ChunkSender::new(state.clone(), sink);
        let player = ChunkPlayer::new(state.clone());

        info!(
            channels = params.channels,
            frames_per_chunk = params.frames_per_chunk,
            chunks_to_buffer = params.chunks_to_buffer,
            flow = ?params.flow,
            feedback = ?params.feedback,
            skip_empty_planes = params.skip_empty_planes,
            stages = ?sender.chain(),
            "Stream engine ready"
        );

        Ok(Self { state, sender, player })
    }

    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    pub fn sender(&mut self) -> &mut ChunkSender<S> {
        &mut self.sender
    }

    pub fn player(&mut self) -> &mut ChunkPlayer {
        &mut self.player
    }

    /// One duplex audio callback: capture-and-send, then read-and-play.
    ///
    /// Both slices hold one chunk of interleaved samples. This runs on the
    /// real-time audio thread: it never blocks on the network, never
    /// allocates and only takes the lock of the single slot it plays.
    pub fn process(&mut self, input: &[i16], output: &mut [i16]) {
        self.sender.record_and_send(input);
        self.player.play(output);
    }

    /// Split for audio back ends with separate input and output callbacks
    pub fn into_parts(self) -> (ChunkSender<S>, ChunkPlayer, Arc<StreamState>) {
        (self.sender, self.player, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StreamParams {
        StreamParams::new(2, 16, 4)
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(StreamParams::new(3, 1024, 32).validate().is_err());
        assert!(StreamParams::new(0, 1024, 32).validate().is_err());
        assert!(StreamParams::new(2, 1020, 32).validate().is_err());
        assert!(StreamParams::new(2, 1024, 24).validate().is_err());
        assert!(StreamParams::new(2, 1024, 0).validate().is_err());
        assert!(StreamParams::new(2, 1024, 65536).validate().is_err());
        assert!(StreamParams::new(2, 1024, 32768).validate().is_ok());

        let reported = StreamParams {
            feedback: FeedbackSource::Reported,
            ..StreamParams::default()
        };
        assert!(reported.validate().is_err());

        let layout = StreamParams::default().validate().unwrap();
        assert_eq!(layout.max_planes(), 32);
    }

    #[test]
    fn test_validate_caps_packet_at_udp_payload() {
        // 3 byte header plus frames / 8 bytes of plane
        assert!(StreamParams::new(1, 8 * 65504, 4).validate().is_ok());
        assert!(StreamParams::new(1, 8 * 65505, 4).validate().is_err());

        let counted = StreamParams {
            received_count: true,
            ..StreamParams::new(1, 8 * 65504, 4)
        };
        assert!(counted.validate().is_err());
    }

    /// Send one chunk with empty planes skipped and decode it on a fresh
    /// receiver
    fn skip_and_reconstruct(params: StreamParams, input: &[i16]) -> Vec<i16> {
        let mut engine = StreamEngine::new(params, Vec::new()).unwrap();
        let receiver = Arc::new(StreamState::new(params).unwrap());
        engine.sender().record_and_send(input);
        for datagram in engine.sender().sink() {
            receiver.receive_datagram(datagram).unwrap();
        }
        let mut output = vec![0i16; input.len()];
        ChunkPlayer::new(receiver).reconstruct(0, &mut output);
        output
    }

    #[test]
    fn test_min_survives_empty_lsb() {
        let params = StreamParams::new(1, 8, 2);
        assert!(params.skip_empty_planes);
        let input = [i16::MIN, 0, 2, 0, 4, 0, 0, 100];
        assert_eq!(skip_and_reconstruct(params, &input), input);

        let params = StreamParams::new(2, 8, 2);
        let mut input = [0i16; 16];
        input[0] = i16::MIN;
        input[2] = 100;
        input[4] = -100;
        assert_eq!(skip_and_reconstruct(params, &input), input);
    }

    #[test]
    fn test_empty_lsb_kept_only_for_min() {
        let params = StreamParams::new(1, 8, 2);
        let mut engine = StreamEngine::new(params, Vec::new()).unwrap();

        engine.sender().record_and_send(&[2, 0, 0, 0, 0, 0, 0, 0]);
        let indices: Vec<u8> = engine.sender().sink().iter().map(|d| d[2]).collect();
        assert_eq!(indices, vec![1]);

        engine.sender().sink_mut().clear();
        engine.sender().record_and_send(&[i16::MIN, 2, 0, 0, 0, 0, 0, 0]);
        let indices: Vec<u8> = engine.sender().sink().iter().map(|d| d[2]).collect();
        assert_eq!(indices, vec![15, 1, 0]);
    }

    #[test]
    fn test_silence_sends_nothing() {
        let mut engine = StreamEngine::new(params(), Vec::new()).unwrap();
        let mut output = vec![1i16; 32];
        engine.process(&[0i16; 32], &mut output);

        assert!(engine.sender().sink().is_empty());
        assert_eq!(engine.sender().recorded_chunk_number(), 1);
        // Not synchronized yet
        assert!(output.iter().all(|&s| s == 0));
        assert_eq!(engine.state().stats().planes_skipped, 32);
    }

    #[test]
    fn test_keep_empty_planes_sends_full_budget() {
        let params = StreamParams {
            skip_empty_planes: false,
            ..params()
        };
        let mut engine = StreamEngine::new(params, Vec::new()).unwrap();
        assert_eq!(engine.sender().record_and_send(&[0i16; 32]), 32);

        let sink = engine.sender().sink();
        assert_eq!(sink.len(), 32);
        // Most significant first
        assert_eq!(sink[0][2], 31);
        assert_eq!(sink[31][2], 0);
        assert!(sink.iter().all(|d| d.len() == 3 + 2));
    }

    #[test]
    fn test_malformed_datagram_is_ignored() {
        let state = StreamState::new(params()).unwrap();
        assert!(state.receive_datagram(&[1, 2, 3]).is_err());
        assert!(state.receive_datagram(&[0, 1, 99, 0, 0]).is_err());

        assert!(!state.cursor().is_synced());
        assert_eq!(state.buffer_stats().planes_written, 0);
        assert_eq!(state.feedback().norb(), None);
        assert_eq!(state.stats().malformed_datagrams, 2);
    }

    #[test]
    fn test_first_datagram_synchronizes_playback() {
        let state = StreamState::new(params()).unwrap();
        state.receive_datagram(&[0, 10, 0, 0x80, 0]).unwrap();
        assert_eq!(state.cursor().peek(), Some(6));
    }

    #[test]
    fn test_budget_follows_feedback() {
        let params = StreamParams {
            skip_empty_planes: false,
            ..params()
        };
        let mut engine = StreamEngine::new(params, Vec::new()).unwrap();

        // The peer's chunk 7 delivered 10 planes before chunk 8 started
        let state = engine.state().clone();
        for raw in 0..10u8 {
            state.receive_datagram(&[0, 7, raw, 0, 0]).unwrap();
        }
        state.receive_datagram(&[0, 8, 0, 0, 0]).unwrap();

        assert_eq!(engine.sender().record_and_send(&[5i16; 32]), 27);
        assert_eq!(engine.state().stats().nobpts, 27);
    }
}
