//! Data-Flow Control (DFC)
//!
//! Chooses, once per outbound chunk, how many bit-planes to send. The
//! receive path counts the planes that arrive for each incoming chunk; on
//! rollover to a newer chunk that count becomes `NORB`. The send path then
//! moves its budget `NOBPTS` toward it:
//!
//! ```text
//! NOBPTS = floor(0.75 * NOBPTS + 0.25 * NORB) + 1 + previous_skipped
//! NOBPTS = min(NOBPTS, 16 * channels)
//! ```
//!
//! The `+ 1` tests for spare capacity so a healthy link climbs back to the
//! full plane count, one plane per chunk.

pub mod empty;

pub use empty::EmptyPlaneFilter;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::protocol::{chunk_is_newer, RECEIVED_COUNT_UNKNOWN};

/// Skips per channel above which a chunk is treated as near-silence
pub const SILENCE_SKIP_THRESHOLD: u32 = 8;

const NORB_UNKNOWN: u32 = u32::MAX;

/// Budget policy, selected at start-up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowMode {
    /// Always send every plane
    Unlimited,
    /// Adapt the budget to the observed plane arrival rate
    #[default]
    Adaptive,
}

/// Where `NORB` comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackSource {
    /// Planes of the peer's chunks reaching us; assumes a symmetric path
    #[default]
    Observed,
    /// The peer's `received_count` field: our planes reaching the peer
    Reported,
}

#[derive(Debug, Default)]
struct Tally {
    current: Option<u16>,
    count: u32,
}

/// Receive-side plane counting, shared between the receive loop (writer)
/// and the send path (reader).
#[derive(Debug)]
pub struct ReceiveFeedback {
    source: FeedbackSource,
    /// Touched by the receive loop only
    tally: Mutex<Tally>,
    observed: AtomicU32,
    reported: AtomicU32,
}

impl ReceiveFeedback {
    pub fn new(source: FeedbackSource) -> Self {
        Self {
            source,
            tally: Mutex::new(Tally::default()),
            observed: AtomicU32::new(NORB_UNKNOWN),
            reported: AtomicU32::new(NORB_UNKNOWN),
        }
    }

    pub fn source(&self) -> FeedbackSource {
        self.source
    }

    /// Count one arriving plane.
    ///
    /// Returns the completed count when this plane opens a newer chunk.
    /// Planes of older chunks are ignored here.
    pub fn record_plane(&self, chunk_number: u16, received_count: Option<u8>) -> Option<u32> {
        if let Some(count) = received_count {
            self.reported.store(u32::from(count), Ordering::Relaxed);
        }

        let mut tally = self.tally.lock();
        match tally.current {
            Some(current) if current == chunk_number => {
                tally.count += 1;
                None
            }
            Some(current) if !chunk_is_newer(chunk_number, current) => None,
            Some(_) => {
                let completed = tally.count;
                tally.current = Some(chunk_number);
                tally.count = 1;
                self.observed.store(completed, Ordering::Relaxed);
                Some(completed)
            }
            None => {
                tally.current = Some(chunk_number);
                tally.count = 1;
                None
            }
        }
    }

    /// Planes seen for the last completed incoming chunk
    pub fn observed_norb(&self) -> Option<u32> {
        known(self.observed.load(Ordering::Relaxed))
    }

    /// Last count reported by the peer
    pub fn reported_norb(&self) -> Option<u32> {
        known(self.reported.load(Ordering::Relaxed))
    }

    /// `NORB` according to the configured source
    pub fn norb(&self) -> Option<u32> {
        match self.source {
            FeedbackSource::Observed => self.observed_norb(),
            FeedbackSource::Reported => self.reported_norb(),
        }
    }

    /// Value to stamp into outgoing `received_count` fields
    pub fn received_count(&self) -> Option<u8> {
        self.observed_norb()
            .map(|n| n.min(u32::from(RECEIVED_COUNT_UNKNOWN) - 1) as u8)
    }
}

fn known(value: u32) -> Option<u32> {
    (value != NORB_UNKNOWN).then_some(value)
}

/// Send-side budget state, owned by the audio thread
#[derive(Debug, Clone)]
pub struct FlowControl {
    mode: FlowMode,
    channels: u32,
    max_planes: u32,
    nobpts: u32,
}

impl FlowControl {
    pub fn new(mode: FlowMode, channels: usize, max_planes: usize) -> Self {
        Self {
            mode,
            channels: channels as u32,
            max_planes: max_planes as u32,
            nobpts: max_planes as u32,
        }
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    /// Current budget (`NOBPTS`)
    pub fn nobpts(&self) -> u32 {
        self.nobpts
    }

    pub fn max_planes(&self) -> u32 {
        self.max_planes
    }

    /// Compute the budget for the next outbound chunk.
    ///
    /// `previous_skipped` is the number of empty planes suppressed in the
    /// chunk just sent. The result is always in `[0, max_planes]`.
    pub fn next_budget(&mut self, norb: Option<u32>, previous_skipped: u32) -> u32 {
        self.nobpts = match (self.mode, norb) {
            (FlowMode::Unlimited, _) | (_, None) => self.max_planes,
            _ if previous_skipped > SILENCE_SKIP_THRESHOLD * self.channels => self.max_planes,
            (FlowMode::Adaptive, Some(norb)) => {
                let norb = norb.min(self.max_planes);
                let smoothed = (3 * self.nobpts + norb) / 4;
                (smoothed + 1 + previous_skipped).min(self.max_planes)
            }
        };
        self.nobpts
    }
}
