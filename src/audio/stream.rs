//! Duplex audio I/O
//!
//! Opens one input and one output stream on a dedicated thread and drives
//! the engine from their callbacks: every captured chunk goes through
//! [`ChunkSender::record_and_send`], every output chunk comes from
//! [`ChunkPlayer::play`]. Both run on cpal's real-time threads, so nothing
//! in these callbacks allocates or blocks.
//!
//! The engine works on `i16` PCM. Devices whose default format is `f32`
//! are converted block by block through a preallocated scratch buffer.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::audio::device::{get_device, AudioDevice, Direction};
use crate::audio::framing::{ChunkAssembler, ChunkSplitter};
use crate::engine::{ChunkPlayer, ChunkSender, DatagramSink, StreamParams};
use crate::error::AudioError;

/// Choose the callback buffer size for a chunk of `frames` frames
fn buffer_size_for(supported: &SupportedBufferSize, frames: u32) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        SupportedBufferSize::Range { min, max } => {
            warn!(frames, min, max, "Chunk size outside device range, using default buffer");
            BufferSize::Default
        }
        SupportedBufferSize::Unknown => BufferSize::Default,
    }
}

/// Device sample formats the duplex can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcmFormat {
    I16,
    F32,
}

fn pcm_format(format: SampleFormat) -> Result<PcmFormat, AudioError> {
    match format {
        SampleFormat::I16 => Ok(PcmFormat::I16),
        SampleFormat::F32 => Ok(PcmFormat::F32),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

/// Device samples to engine PCM, `out` as long as `input`
fn capture_block<T>(input: &[T], out: &mut [i16])
where
    T: Sample,
    i16: FromSample<T>,
{
    for (o, &s) in out.iter_mut().zip(input) {
        *o = s.to_sample::<i16>();
    }
}

/// Engine PCM to device samples, `out` as long as `pcm`
fn render_block<T>(pcm: &[i16], out: &mut [T])
where
    T: Sample + FromSample<i16>,
{
    for (o, &s) in out.iter_mut().zip(pcm) {
        *o = s.to_sample::<T>();
    }
}

fn build_input<T, S>(
    device: &cpal::Device,
    config: &StreamConfig,
    chunk_len: usize,
    mut sender: ChunkSender<S>,
    chunks_captured: Arc<AtomicU64>,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
    S: DatagramSink + 'static,
{
    let mut assembler = ChunkAssembler::new(chunk_len);
    let mut scratch = vec![0i16; chunk_len];
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for block in data.chunks(scratch.len()) {
                let pcm = &mut scratch[..block.len()];
                capture_block(block, pcm);
                assembler.push(pcm, |chunk| {
                    sender.record_and_send(chunk);
                    chunks_captured.fetch_add(1, Ordering::Relaxed);
                });
            }
        },
        move |err| {
            let _ = errors.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    chunk_len: usize,
    mut player: ChunkPlayer,
    chunks_rendered: Arc<AtomicU64>,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut splitter = ChunkSplitter::new(chunk_len);
    let mut scratch = vec![0i16; chunk_len];
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for block in data.chunks_mut(scratch.len()) {
                let pcm = &mut scratch[..block.len()];
                splitter.fill(pcm, |chunk| {
                    player.play(chunk);
                    chunks_rendered.fetch_add(1, Ordering::Relaxed);
                });
                render_block(pcm, block);
            }
        },
        move |err| {
            let _ = errors.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )
}

/// Input + output stream pair driving one intercom endpoint
pub struct AudioDuplex {
    input_device: Option<String>,
    output_device: Option<String>,
    sample_rate: u32,
    channels: u16,
    frames_per_chunk: usize,

    /// Whether the streams are running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    chunks_captured: Arc<AtomicU64>,
    chunks_rendered: Arc<AtomicU64>,
}

impl AudioDuplex {
    /// Describe the streams; devices are opened by [`start`](Self::start).
    /// `None` selects the host default device.
    pub fn new(
        params: &StreamParams,
        sample_rate: u32,
        input_device: Option<String>,
        output_device: Option<String>,
    ) -> Self {
        Self {
            input_device,
            output_device,
            sample_rate,
            channels: params.channels as u16,
            frames_per_chunk: params.frames_per_chunk,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            chunks_captured: Arc::new(AtomicU64::new(0)),
            chunks_rendered: Arc::new(AtomicU64::new(0)),
        }
    }

    fn stream_config(&self, device: &AudioDevice) -> Result<(StreamConfig, PcmFormat), AudioError> {
        let supported = device.default_config()?;
        debug!(
            device = %device.name,
            format = ?supported.sample_format(),
            "Default device format"
        );
        let format = pcm_format(supported.sample_format())?;
        let config = StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: buffer_size_for(supported.buffer_size(), self.frames_per_chunk as u32),
        };
        Ok((config, format))
    }

    /// Open both devices and start streaming
    pub fn start<S: DatagramSink + 'static>(
        &mut self,
        sender: ChunkSender<S>,
        player: ChunkPlayer,
    ) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let input = get_device(self.input_device.as_deref(), Direction::Input)?;
        let output = get_device(self.output_device.as_deref(), Direction::Output)?;
        let (input_config, input_format) = self.stream_config(&input)?;
        let (output_config, output_format) = self.stream_config(&output)?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let chunks_captured = self.chunks_captured.clone();
        let chunks_rendered = self.chunks_rendered.clone();
        let chunk_len = self.frames_per_chunk * self.channels as usize;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-duplex".to_string())
            .spawn(move || {
                let input_device = input.into_inner();
                let output_device = output.into_inner();

                let input_stream = match input_format {
                    PcmFormat::I16 => build_input::<i16, S>(
                        &input_device,
                        &input_config,
                        chunk_len,
                        sender,
                        chunks_captured,
                        error_tx.clone(),
                    ),
                    PcmFormat::F32 => build_input::<f32, S>(
                        &input_device,
                        &input_config,
                        chunk_len,
                        sender,
                        chunks_captured,
                        error_tx.clone(),
                    ),
                };
                let output_stream = match output_format {
                    PcmFormat::I16 => build_output::<i16>(
                        &output_device,
                        &output_config,
                        chunk_len,
                        player,
                        chunks_rendered,
                        error_tx.clone(),
                    ),
                    PcmFormat::F32 => build_output::<f32>(
                        &output_device,
                        &output_config,
                        chunk_len,
                        player,
                        chunks_rendered,
                        error_tx.clone(),
                    ),
                };

                let (input_stream, output_stream) = match (input_stream, output_stream) {
                    (Ok(input), Ok(output)) => (input, output),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to build stream: {}", e);
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                for stream in [&input_stream, &output_stream] {
                    if let Err(e) = stream.play() {
                        error!("Failed to start stream: {}", e);
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                }

                // Keep thread alive while running; dropping the streams stops them
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop both streams
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Check if the streams are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whole chunks handed to the sender so far
    pub fn chunks_captured(&self) -> u64 {
        self.chunks_captured.load(Ordering::Relaxed)
    }

    /// Whole chunks pulled from the player so far
    pub fn chunks_rendered(&self) -> u64 {
        self.chunks_rendered.load(Ordering::Relaxed)
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioDuplex {
    fn drop(&mut self) {
        self.stop();
    }
}
