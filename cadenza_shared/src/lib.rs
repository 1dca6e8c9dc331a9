use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod error;
pub mod options;
pub mod session;

pub use error::EngineError;
pub use options::{Action, EventOptions, PlayOptions, ScheduleOptions};
pub use session::{Alignment, EngineConfig, PlayerConfig, SessionConfig, Sink};

/// Opaque handle returned by `add_listener` and `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Period of the clock poll (the coarse software timer)
pub const POLL_INTERVAL_MS: u64 = 50;

/// Delay between `start` and the session epoch, so the first boundary is schedulable
pub const STARTUP_LATENCY: f64 = 0.1;

/// Tolerance when comparing a time against a beat boundary (float + poll jitter)
pub const BEAT_EPSILON: f64 = 0.000_001;

/// Tolerance used by loop schedulers to recognise the tick of their own start instant
pub const FIRST_TICK_EPSILON: f64 = 0.000_1;
