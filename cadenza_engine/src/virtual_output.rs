//! Output backend that keeps time and records commitments without rendering audio.
//!
//! In manual mode time only moves when the owner calls `advance`, which makes whole
//! sessions reproducible in tests. In realtime mode it follows the wall clock and
//! freezes while suspended, like a paused audio context. Only manual outputs keep
//! an event log unless recording is switched on.
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use cadenza_shared::{EngineError, Sink};
use crossbeam_channel::Sender;
use tracing::debug;

use crate::output::{ChannelId, OutputBackend, SegmentEnded, SegmentId, SegmentRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    SegmentStarted { segment: SegmentId, channel: ChannelId, buffer: String, at: f64, offset: f64 },
    SegmentStopped { segment: SegmentId, at: f64 },
    SegmentEnded { segment: SegmentId, at: f64 },
    Gain { channel: ChannelId, value: f32, at: f64 },
    GainRamp { channel: ChannelId, target: f32, at: f64, duration: f64 },
    MasterGain { value: f32, at: f64 },
    Connected { channel: ChannelId, sink: Sink },
    Disconnected { channel: ChannelId, sink: Option<Sink> },
    Suspended { at: f64 },
    Resumed { at: f64 },
}

#[derive(Debug)]
enum TimeSource {
    Manual { now: f64 },
    Realtime { origin: Option<Instant>, base: f64 },
}

#[derive(Debug, Clone, Copy)]
enum Automation {
    Set { value: f32, at: f64 },
    Ramp { target: f32, at: f64, duration: f64 },
}

impl Automation {
    fn at(&self) -> f64 {
        match self {
            Automation::Set { at, .. } | Automation::Ramp { at, .. } => *at,
        }
    }
}

#[derive(Debug, Default)]
struct Channel {
    sinks: Vec<Sink>,
    automation: Vec<Automation>,
}

#[derive(Debug)]
struct Segment {
    channel: ChannelId,
    start: f64,
    natural_end: f64,
    stop_at: Option<f64>,
    on_end: Sender<SegmentEnded>,
}

impl Segment {
    fn end(&self) -> f64 {
        match self.stop_at {
            Some(stop) => stop.min(self.natural_end),
            None => self.natural_end,
        }
    }
}

#[derive(Debug)]
pub struct VirtualOutput {
    time: TimeSource,
    suspended: bool,
    next_id: u64,
    channels: HashMap<ChannelId, Channel>,
    segments: BTreeMap<SegmentId, Segment>,
    master_gain: f32,
    recording: bool,
    events: Vec<OutputEvent>,
}

impl VirtualOutput {
    /// Time starts at `now` and only moves on `advance`.
    pub fn manual(now: f64) -> Self {
        Self::with_time(TimeSource::Manual { now }, true)
    }

    pub fn realtime() -> Self {
        Self::with_time(
            TimeSource::Realtime {
                origin: Some(Instant::now()),
                base: 0.0,
            },
            false,
        )
    }

    /// Keep (or stop keeping) an `OutputEvent` for every commitment.
    pub fn recording(mut self, on: bool) -> Self {
        self.recording = on;
        if !on {
            self.events.clear();
        }
        self
    }

    fn with_time(time: TimeSource, recording: bool) -> Self {
        Self {
            time,
            suspended: false,
            next_id: 1,
            channels: HashMap::new(),
            segments: BTreeMap::new(),
            master_gain: 1.0,
            recording,
            events: Vec::new(),
        }
    }

    /// Move a manual clock forward and report the segments that ended on the way.
    /// Has no effect on a realtime clock or while suspended.
    pub fn advance(&mut self, seconds: f64) {
        if self.suspended {
            return;
        }
        if let TimeSource::Manual { now } = &mut self.time {
            *now += seconds.max(0.0);
        }
        self.report_ended();
    }

    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn sinks(&self, channel: ChannelId) -> Vec<Sink> {
        self.channels
            .get(&channel)
            .map(|c| c.sinks.clone())
            .unwrap_or_default()
    }

    /// Segments that have not been reported as ended yet
    pub fn live_segments(&self) -> Vec<SegmentId> {
        self.segments.keys().copied().collect()
    }

    /// Segments producing sound at output time `time`
    pub fn sounding_at(&self, time: f64) -> Vec<SegmentId> {
        self.segments
            .iter()
            .filter(|(_, s)| s.start <= time && time < s.end())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Scheduled end of a live segment
    pub fn segment_end(&self, segment: SegmentId) -> Option<f64> {
        self.segments.get(&segment).map(Segment::end)
    }

    /// Gain of `channel` at `time`, following its automation in time order.
    pub fn gain_at(&self, channel: ChannelId, time: f64) -> f32 {
        let Some(channel) = self.channels.get(&channel) else {
            return 1.0;
        };
        let mut points: Vec<Automation> = channel
            .automation
            .iter()
            .copied()
            .filter(|p| p.at() <= time)
            .collect();
        points.sort_by(|a, b| a.at().total_cmp(&b.at()));

        let mut value = 1.0;
        for (i, point) in points.iter().enumerate() {
            // A ramp is interrupted by the next automation point
            let until = points.get(i + 1).map_or(time, Automation::at);
            match *point {
                Automation::Set { value: v, .. } => value = v,
                Automation::Ramp { target, at, duration } => {
                    if duration <= 0.0 || until >= at + duration {
                        value = target;
                    } else {
                        let progress = ((until - at) / duration) as f32;
                        value += (target - value) * progress;
                    }
                }
            }
        }
        value
    }

    fn record(&mut self, event: OutputEvent) {
        if self.recording {
            self.events.push(event);
        }
    }

    /// Drop automation points hidden behind the latest `Set` that is already due.
    fn prune_automation(&mut self) {
        let now = self.current_time();
        for channel in self.channels.values_mut() {
            let latest_set = channel
                .automation
                .iter()
                .filter_map(|p| match *p {
                    Automation::Set { at, .. } if at <= now => Some(at),
                    _ => None,
                })
                .max_by(f64::total_cmp);
            if let Some(cutoff) = latest_set {
                channel.automation.retain(|p| p.at() >= cutoff);
            }
        }
    }

    fn report_ended(&mut self) {
        let now = self.current_time();
        let ended: Vec<SegmentId> = self
            .segments
            .iter()
            .filter(|(_, s)| s.end() <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in ended {
            if let Some(segment) = self.segments.remove(&id) {
                let at = segment.end();
                self.record(OutputEvent::SegmentEnded { segment: id, at });
                let _ = segment.on_end.send(SegmentEnded {
                    segment: id,
                    channel: segment.channel,
                });
            }
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl OutputBackend for VirtualOutput {
    fn current_time(&self) -> f64 {
        match &self.time {
            TimeSource::Manual { now } => *now,
            TimeSource::Realtime { origin, base } => {
                base + origin.map(|o| o.elapsed().as_secs_f64()).unwrap_or(0.0)
            }
        }
    }

    fn create_channel(&mut self, sink: &Sink) -> ChannelId {
        let id = ChannelId(self.next_id());
        self.channels.insert(
            id,
            Channel {
                sinks: vec![sink.clone()],
                automation: Vec::new(),
            },
        );
        id
    }

    fn start_segment(&mut self, request: SegmentRequest) -> SegmentId {
        let id = SegmentId(self.next_id());
        let remaining = (request.buffer.duration_seconds - request.offset).max(0.0);
        debug!(
            "[VirtualOutput] Segment {} of {} at {:.3} (offset {:.3})",
            id.0, request.buffer.name, request.start, request.offset
        );
        self.record(OutputEvent::SegmentStarted {
            segment: id,
            channel: request.channel,
            buffer: request.buffer.name.clone(),
            at: request.start,
            offset: request.offset,
        });
        self.segments.insert(
            id,
            Segment {
                channel: request.channel,
                start: request.start,
                natural_end: request.start + remaining,
                stop_at: None,
                on_end: request.on_end,
            },
        );
        id
    }

    fn stop_segment(&mut self, segment: SegmentId, at: f64) {
        if let Some(s) = self.segments.get_mut(&segment) {
            s.stop_at = Some(s.stop_at.map_or(at, |prev| prev.min(at)));
            self.record(OutputEvent::SegmentStopped { segment, at });
        }
    }

    fn set_gain(&mut self, channel: ChannelId, value: f32, at: f64) {
        if let Some(c) = self.channels.get_mut(&channel) {
            c.automation.push(Automation::Set { value, at });
            self.record(OutputEvent::Gain { channel, value, at });
        }
    }

    fn ramp_gain(&mut self, channel: ChannelId, target: f32, at: f64, duration: f64) {
        if let Some(c) = self.channels.get_mut(&channel) {
            c.automation.push(Automation::Ramp { target, at, duration });
            self.record(OutputEvent::GainRamp {
                channel,
                target,
                at,
                duration,
            });
        }
    }

    fn set_master_gain(&mut self, value: f32, at: f64) {
        self.master_gain = value;
        self.record(OutputEvent::MasterGain { value, at });
    }

    fn connect(&mut self, channel: ChannelId, sink: &Sink) {
        if let Some(c) = self.channels.get_mut(&channel) {
            if !c.sinks.contains(sink) {
                c.sinks.push(sink.clone());
            }
            self.record(OutputEvent::Connected {
                channel,
                sink: sink.clone(),
            });
        }
    }

    fn disconnect(&mut self, channel: ChannelId, sink: Option<&Sink>) {
        if let Some(c) = self.channels.get_mut(&channel) {
            match sink {
                Some(sink) => c.sinks.retain(|s| s != sink),
                None => c.sinks.clear(),
            }
            self.record(OutputEvent::Disconnected {
                channel,
                sink: sink.cloned(),
            });
        }
    }

    fn suspend(&mut self) -> Result<(), EngineError> {
        if self.suspended {
            return Ok(());
        }
        let at = self.current_time();
        if let TimeSource::Realtime { origin, base } = &mut self.time {
            *base = at;
            *origin = None;
        }
        self.suspended = true;
        self.record(OutputEvent::Suspended { at });
        debug!("[VirtualOutput] Suspended at {:.3}", at);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        if !self.suspended {
            return Ok(());
        }
        if let TimeSource::Realtime { origin, .. } = &mut self.time {
            *origin = Some(Instant::now());
        }
        self.suspended = false;
        let at = self.current_time();
        self.record(OutputEvent::Resumed { at });
        debug!("[VirtualOutput] Resumed at {:.3}", at);
        Ok(())
    }

    fn service(&mut self) {
        self.report_ended();
        self.prune_automation();
    }
}
