//! Per-track loop scheduler.
//!
//! A track never owns a timer. It reacts to three inputs: explicit start/stop
//! requests, beat notifications carrying the time of the next boundary, and
//! segment-ended reports. Every reaction is a set of commitments on the output.
use cadenza_shared::{Alignment, BEAT_EPSILON, EngineError, FIRST_TICK_EPSILON, Sink};
use crossbeam_channel::Sender;
use tracing::debug;

use crate::assets::AudioBuffer;
use crate::clock::Clock;
use crate::output::{ChannelId, OutputBackend, SegmentEnded, SegmentId, SegmentRequest};

/// What a scheduler needs to commit work: the output, the shared clock and where
/// segment-ended reports go.
pub struct LoopContext<'a> {
    pub output: &'a mut dyn OutputBackend,
    pub clock: &'a Clock,
    pub ended_tx: &'a Sender<SegmentEnded>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Playing,
    PlayingOnce,
    /// Stop requested, teardown still pending
    Stopping,
}

/// A deferred teardown, returned by `stop` and handed back to `teardown` once due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Teardown {
    /// Output time at which the remaining segments must be silent
    pub halt_at: f64,
    lifecycle: u64,
}

#[derive(Debug)]
pub struct LoopScheduler {
    name: String,
    buffer: AudioBuffer,
    loop_beats: u32,
    alignment: Alignment,
    channel: ChannelId,
    destination: Sink,

    playing: bool,
    /// No recurring lifecycle is running
    stopped: bool,
    subscribed: bool,
    start_time: f64,
    beats_until_restart: i64,
    next_restart_at: f64,
    current: Option<SegmentId>,
    /// Older segments that may still be sounding
    pending_segments: Vec<SegmentId>,
    once_segment: Option<SegmentId>,
    stop_ref_count: u32,
    /// Restarts at or after this time are suppressed while a stop is pending
    halt_at: Option<f64>,
    lifecycle: u64,
}

impl LoopScheduler {
    pub fn new(
        name: &str,
        buffer: AudioBuffer,
        loop_beats: u32,
        alignment: Alignment,
        channel: ChannelId,
        destination: Sink,
    ) -> Self {
        Self {
            name: name.to_string(),
            buffer,
            loop_beats: loop_beats.max(1),
            alignment,
            channel,
            destination,
            playing: false,
            stopped: true,
            subscribed: false,
            start_time: 0.0,
            beats_until_restart: 0,
            next_restart_at: 0.0,
            current: None,
            pending_segments: Vec::new(),
            once_segment: None,
            stop_ref_count: 0,
            halt_at: None,
            lifecycle: 0,
        }
    }

    /// A fresh, stopped scheduler for the same sound on another channel.
    pub fn duplicate(&self, channel: ChannelId) -> Self {
        Self::new(
            &self.name,
            self.buffer.clone(),
            self.loop_beats,
            self.alignment,
            channel,
            self.destination.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn destination(&self) -> &Sink {
        &self.destination
    }

    pub fn loop_beats(&self) -> u32 {
        self.loop_beats
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether the scheduler needs beat notifications
    pub fn wants_beats(&self) -> bool {
        self.subscribed
    }

    pub fn stop_ref_count(&self) -> u32 {
        self.stop_ref_count
    }

    /// Output time of the next scheduled restart
    pub fn next_restart_at(&self) -> f64 {
        self.next_restart_at
    }

    pub fn state(&self) -> LoopState {
        if !self.stopped {
            if self.playing {
                LoopState::Playing
            } else {
                LoopState::Stopping
            }
        } else if self.once_segment.is_some() {
            LoopState::PlayingOnce
        } else {
            LoopState::Stopped
        }
    }

    /// Segments not yet reported as ended, oldest first
    pub fn alive_segments(&self) -> Vec<SegmentId> {
        self.pending_segments
            .iter()
            .copied()
            .chain(self.current)
            .collect()
    }

    pub fn set_alignment(&mut self, alignment: Alignment) -> Result<(), EngineError> {
        if self.state() != LoopState::Stopped {
            return Err(EngineError::State(format!(
                "cannot change the alignment of `{}` while it is playing",
                self.name
            )));
        }
        self.alignment = alignment;
        Ok(())
    }

    /// Start sounding at `at`. `next_beat` is the clock's next boundary; a start
    /// earlier than it has already missed that boundary's notification and
    /// catches up on it here.
    pub fn start(&mut self, ctx: &mut LoopContext, at: f64, fade: f64, once: bool, next_beat: f64) {
        if self.stopped {
            let clock = ctx.clock;
            let beat = clock.beat_length();
            let (offset, remaining) = match self.alignment {
                Alignment::Absolute => {
                    let position = clock.beat_position(at, self.loop_beats);
                    (
                        position as f64 * beat + clock.offset(at),
                        (self.loop_beats - position) as i64,
                    )
                }
                Alignment::Relative => (clock.offset(at), self.loop_beats as i64),
            };

            self.stopped = once;
            self.start_time = at;
            self.halt_at = None;
            self.beats_until_restart = remaining;
            self.next_restart_at = at - clock.offset(at) + remaining as f64 * beat;

            let segment = self.spawn_segment(ctx, at, offset);
            if once {
                self.once_segment = Some(segment);
            }

            ctx.output.set_gain(self.channel, 0.0, at);
            self.fade_to(ctx, 1.0, at, fade);

            if !once {
                self.subscribed = true;
                if at < next_beat - FIRST_TICK_EPSILON {
                    self.on_beat(ctx, next_beat);
                }
            }
            self.playing = !once;
        } else {
            // Revive a lifecycle whose stop has not been torn down yet
            self.fade_to(ctx, 1.0, at, fade);
            if !once {
                self.playing = true;
                self.halt_at = None;
            }
        }
    }

    /// React to a beat notification carrying the time of the next boundary.
    pub fn on_beat(&mut self, ctx: &mut LoopContext, next_beat: f64) {
        if next_beat + FIRST_TICK_EPSILON < self.start_time {
            return;
        }
        if next_beat - self.start_time > FIRST_TICK_EPSILON {
            self.beats_until_restart -= 1;
        }
        if self.beats_until_restart <= 0 && !self.stopped {
            let halted = self
                .halt_at
                .is_some_and(|halt| next_beat >= halt - BEAT_EPSILON);
            if !halted {
                self.spawn_segment(ctx, next_beat, 0.0);
            }
            self.beats_until_restart = self.loop_beats as i64;
        }
        self.next_restart_at = next_beat + self.beats_until_restart as f64 * ctx.clock.beat_length();
    }

    /// Stop at `at`, fading out over `fade` seconds. Returns the teardown to run
    /// once the fade (or, with `keep`, the current bar) is over.
    pub fn stop(&mut self, ctx: &mut LoopContext, at: f64, fade: f64, keep: bool) -> Option<Teardown> {
        self.playing = false;
        let fade = fade.max(0.0);
        if fade > 0.0 {
            ctx.output.ramp_gain(self.channel, 0.0, at, fade);
        }
        let faded = at + fade;

        if self.stopped {
            // Nothing recurring to tear down, only a once segment may be sounding
            if !keep {
                for segment in self.alive_segments() {
                    ctx.output.stop_segment(segment, faded);
                }
            }
            return None;
        }

        let halt_at = if keep {
            self.bar_end(at, ctx.clock).max(faded)
        } else {
            faded
        };
        self.halt_at = Some(halt_at);
        self.stop_ref_count += 1;
        debug!(
            "[Loop:{}] Stop at {:.3}, silent from {:.3} ({} pending)",
            self.name, at, halt_at, self.stop_ref_count
        );
        Some(Teardown {
            halt_at,
            lifecycle: self.lifecycle,
        })
    }

    /// Run a teardown returned by `stop`. Only the last outstanding teardown of a
    /// lifecycle that is still stopping does anything. Returns whether it did.
    pub fn teardown(&mut self, ctx: &mut LoopContext, teardown: &Teardown) -> bool {
        if teardown.lifecycle != self.lifecycle {
            return false;
        }
        self.stop_ref_count = self.stop_ref_count.saturating_sub(1);
        if self.playing || self.stopped || self.stop_ref_count > 0 {
            return false;
        }
        let now = ctx.output.current_time();
        let at = self.halt_at.unwrap_or(teardown.halt_at).max(now);
        self.halt(ctx, at);
        debug!("[Loop:{}] Torn down at {:.3}", self.name, at);
        true
    }

    /// Immediate stop: no fade, no bar completion, pending teardowns invalidated.
    pub fn force_stop(&mut self, ctx: &mut LoopContext) {
        let now = ctx.output.current_time();
        self.playing = false;
        self.once_segment = None;
        self.halt(ctx, now);
    }

    pub fn segment_ended(&mut self, segment: SegmentId) {
        if self.current == Some(segment) {
            self.current = None;
        }
        self.pending_segments.retain(|s| *s != segment);
        if self.once_segment == Some(segment) {
            self.once_segment = None;
        }
    }

    pub fn connect(&mut self, output: &mut dyn OutputBackend, sink: &Sink) {
        output.connect(self.channel, sink);
    }

    pub fn disconnect(&mut self, output: &mut dyn OutputBackend, sink: Option<&Sink>) {
        output.disconnect(self.channel, sink);
    }

    fn halt(&mut self, ctx: &mut LoopContext, at: f64) {
        for segment in self.alive_segments() {
            ctx.output.stop_segment(segment, at);
        }
        self.stopped = true;
        self.subscribed = false;
        self.halt_at = None;
        self.stop_ref_count = 0;
        self.lifecycle += 1;
    }

    /// End of the bar that is running at `at`, from the track's own restart grid.
    fn bar_end(&self, at: f64, clock: &Clock) -> f64 {
        let period = self.loop_beats as f64 * clock.beat_length();
        let mut end = self.next_restart_at;
        if end < at - BEAT_EPSILON {
            end += ((at - end) / period - BEAT_EPSILON).ceil() * period;
        }
        end
    }

    fn fade_to(&self, ctx: &mut LoopContext, target: f32, at: f64, fade: f64) {
        if fade > 0.0 {
            ctx.output.ramp_gain(self.channel, target, at, fade);
        } else {
            ctx.output.set_gain(self.channel, target, at);
        }
    }

    fn spawn_segment(&mut self, ctx: &mut LoopContext, at: f64, offset: f64) -> SegmentId {
        if let Some(previous) = self.current.take() {
            self.pending_segments.push(previous);
        }
        let segment = ctx.output.start_segment(SegmentRequest {
            channel: self.channel,
            buffer: self.buffer.clone(),
            start: at,
            offset,
            on_end: ctx.ended_tx.clone(),
        });
        debug!(
            "[Loop:{}] Segment {} at {:.3} from {:.3}s",
            self.name, segment.0, at, offset
        );
        self.current = Some(segment);
        segment
    }
}
