//! Boundary between the scheduling logic and whatever actually makes sound.
//!
//! Everything the loops do is expressed as commitments against the output's own
//! clock: start this buffer at `t`, stop that segment at `t`, ramp that gain from
//! `t`. The backend is responsible for honouring them sample-accurately.
use std::sync::Arc;

use cadenza_shared::{EngineError, Sink};
use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::assets::AudioBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// One scheduled playback of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

/// Sent on the request's `on_end` channel once a segment has finished sounding,
/// whether it ran out naturally or was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEnded {
    pub segment: SegmentId,
    pub channel: ChannelId,
}

pub struct SegmentRequest {
    pub channel: ChannelId,
    pub buffer: AudioBuffer,
    /// Output time at which the segment starts sounding
    pub start: f64,
    /// Seconds into the buffer to begin from
    pub offset: f64,
    pub on_end: Sender<SegmentEnded>,
}

pub trait OutputBackend: Send {
    /// The output's monotonic clock, in seconds
    fn current_time(&self) -> f64;

    /// A gain stage feeding `sink`, owned by one track
    fn create_channel(&mut self, sink: &Sink) -> ChannelId;

    fn start_segment(&mut self, request: SegmentRequest) -> SegmentId;

    /// Stopping an already finished segment is a no-op.
    fn stop_segment(&mut self, segment: SegmentId, at: f64);

    fn set_gain(&mut self, channel: ChannelId, value: f32, at: f64);

    /// Linear ramp from the gain in effect at `at` to `target`, reached at `at + duration`.
    fn ramp_gain(&mut self, channel: ChannelId, target: f32, at: f64, duration: f64);

    fn set_master_gain(&mut self, value: f32, at: f64);

    fn connect(&mut self, channel: ChannelId, sink: &Sink);

    /// `None` disconnects the channel from every sink.
    fn disconnect(&mut self, channel: ChannelId, sink: Option<&Sink>);

    fn suspend(&mut self) -> Result<(), EngineError>;

    fn resume(&mut self) -> Result<(), EngineError>;

    /// Called once per poll. Passive backends use it to report ended segments.
    fn service(&mut self) {}
}

/// An output shared by an orchestrator and its duplicates
pub type SharedOutput = Arc<Mutex<dyn OutputBackend>>;

pub fn share<O: OutputBackend + 'static>(output: O) -> SharedOutput {
    Arc::new(Mutex::new(output))
}
