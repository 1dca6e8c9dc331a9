use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EngineError;

/// Options for `play`, `stop` and `toggle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayOptions {
    /// Fade in/out length in seconds
    pub fade: f64,
    /// Act on the current output time instead of the next beat
    pub now: bool,
    /// Play a single segment, never re-triggered
    pub once: bool,
    /// On stop, let the current bar finish
    pub keep: bool,
}

/// Quantization options for `wait` and `add_listener`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventOptions {
    /// Fire on the next boundary of a `beats`-sized measure
    pub absolute: bool,
    /// Phase shift, in beats, added to the countdown
    pub offset: i32,
}

impl EventOptions {
    /// Number of beat ticks to count down before firing.
    ///
    /// `measure_position` is the current position inside a `beats`-sized measure and is
    /// only used for absolute quantization.
    pub fn countdown(&self, beats: u32, measure_position: u32) -> i64 {
        let position = if self.absolute { measure_position as i64 } else { 0 };
        beats as i64 - position + self.offset as i64
    }
}

/// Options for `schedule`: the player options (minus `now`) plus quantization
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    pub fade: f64,
    pub once: bool,
    pub keep: bool,
    pub absolute: bool,
    pub offset: i32,
}

impl ScheduleOptions {
    pub fn event(&self) -> EventOptions {
        EventOptions {
            absolute: self.absolute,
            offset: self.offset,
        }
    }

    pub fn player(&self) -> PlayOptions {
        PlayOptions {
            fade: self.fade,
            now: false,
            once: self.once,
            keep: self.keep,
        }
    }
}

/// What `schedule` does once the target beat is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Play,
    Stop,
    #[default]
    Toggle,
}

impl FromStr for Action {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(Action::Play),
            "stop" => Ok(Action::Stop),
            "toggle" => Ok(Action::Toggle),
            other => Err(EngineError::invalid(format!(
                "action `{other}` is not recognized (must be within [play, stop, toggle])"
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Play => "play",
            Action::Stop => "stop",
            Action::Toggle => "toggle",
        };
        f.write_str(name)
    }
}
