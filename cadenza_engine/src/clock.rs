//! Tempo clock shared by every loop of an orchestrator.
//!
//! The clock is always one beat ahead: it knows the output time of the next
//! unconsumed boundary, and every time the output clock reaches that boundary it
//! emits a beat carrying the time of the following one. Consumers commit their
//! future work against that time, so the coarseness of the poll never leaks into
//! what gets scheduled.
use std::collections::VecDeque;

use cadenza_shared::{BEAT_EPSILON, EngineError};

fn reached(elapsed: f64, boundary: f64) -> bool {
    elapsed >= boundary || (elapsed - boundary).abs() < BEAT_EPSILON
}

#[derive(Debug, Clone)]
pub struct Clock {
    bpm: f64,
    beat_length: f64,
    /// Output time of beat 0
    session_start: f64,
    /// Index of the next unconsumed boundary, counted from `session_start`
    next_index: u64,
    running: bool,
    /// Beats emitted but not yet delivered to subscribers
    emitted: VecDeque<f64>,
}

impl Clock {
    pub fn new(bpm: f64) -> Result<Self, EngineError> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(EngineError::invalid(format!("bpm must be positive, got {bpm}")));
        }
        Ok(Self {
            bpm,
            beat_length: 60.0 / bpm,
            session_start: 0.0,
            next_index: 1,
            running: false,
            emitted: VecDeque::new(),
        })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Length of a beat in seconds
    pub fn beat_length(&self) -> f64 {
        self.beat_length
    }

    pub fn session_start(&self) -> f64 {
        self.session_start
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Seconds from the session start to the next unconsumed boundary
    pub fn next_beat_offset(&self) -> f64 {
        self.next_index as f64 * self.beat_length
    }

    /// Pin beat 0 to `epoch` and emit the first beat right away.
    pub fn start(&mut self, epoch: f64) {
        self.session_start = epoch;
        self.next_index = 1;
        self.running = true;
        self.emitted.clear();
        self.emit();
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.emitted.clear();
    }

    /// Advance past every boundary reached at output time `now`, emitting one beat per
    /// boundary. Returns how many beats were emitted.
    pub fn poll(&mut self, now: f64) -> usize {
        if !self.running {
            return 0;
        }
        let elapsed = now - self.session_start;
        let mut count = 0;
        while reached(elapsed, self.next_beat_offset()) {
            self.next_index += 1;
            self.emit();
            count += 1;
        }
        count
    }

    /// Output time of the next boundary. A stale boundary is fixed first, so this
    /// never answers with a time already in the past.
    pub fn next_beat_time(&mut self, now: f64) -> f64 {
        self.poll(now);
        self.session_start + self.next_beat_offset()
    }

    /// Output time of the `n`th upcoming boundary (`n = 1` is the next one).
    pub fn next_nth_beat_time(&mut self, now: f64, n: u32) -> f64 {
        let n = n.max(1);
        self.next_beat_time(now) + (n - 1) as f64 * self.beat_length
    }

    /// Phase of `time` inside its beat, in `[0, beat_length)`.
    pub fn offset(&self, time: f64) -> f64 {
        let phase = (time - self.session_start).rem_euclid(self.beat_length);
        if phase < BEAT_EPSILON || self.beat_length - phase < BEAT_EPSILON {
            0.0
        } else {
            phase
        }
    }

    /// Position of `time` inside a `measure_size`-beat measure counted from the session
    /// start, in `[0, measure_size)`.
    pub fn beat_position(&self, time: f64, measure_size: u32) -> u32 {
        let measure_size = measure_size.max(1);
        let measure_length = self.beat_length * measure_size as f64;
        let in_measure = (time - self.session_start).rem_euclid(measure_length);
        if measure_length - in_measure < BEAT_EPSILON {
            return 0;
        }
        let position = (in_measure / self.beat_length).floor() as u32;
        let remainder = in_measure - position as f64 * self.beat_length;
        if (self.beat_length - remainder).abs() < BEAT_EPSILON {
            (position + 1) % measure_size
        } else {
            position.min(measure_size - 1)
        }
    }

    /// Drain the beats emitted since the last call, oldest first.
    pub fn take_beats(&mut self) -> Vec<f64> {
        self.emitted.drain(..).collect()
    }

    fn emit(&mut self) {
        let time = self.session_start + self.next_beat_offset();
        self.emitted.push_back(time);
    }
}
