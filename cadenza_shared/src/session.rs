use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{EngineError, POLL_INTERVAL_MS, STARTUP_LATENCY};

/// Whether a loop is pinned to the session's measure grid or to its own start instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Absolute,
    Relative,
}

/// Output sink a track channel is wired to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sink {
    #[default]
    Master,
    Named(String),
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Master => f.write_str("master"),
            Sink::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Sink {
    fn from(name: &str) -> Self {
        if name == "master" {
            Sink::Master
        } else {
            Sink::Named(name.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub name: String,
    /// Location of the sound file, resolved by the asset loader
    pub url: String,
    /// Number of beats the loop spans
    pub length: u32,
    #[serde(default)]
    pub position: Alignment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl PlayerConfig {
    pub fn new(name: &str, url: &str, length: u32) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            length,
            position: Alignment::Absolute,
            destination: None,
        }
    }

    pub fn relative(mut self) -> Self {
        self.position = Alignment::Relative;
        self
    }

    pub fn sink(&self) -> Sink {
        self.destination
            .as_deref()
            .map(Sink::from)
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.is_empty() {
            return Err(EngineError::invalid("player name must not be empty"));
        }
        if self.length == 0 {
            return Err(EngineError::invalid(format!(
                "player `{}` must span at least one beat",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bpm: f64,
    pub poll_interval_ms: u64,
    /// Seconds between `start` and the first beat of the session
    pub startup_latency: f64,
    pub master_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            poll_interval_ms: POLL_INTERVAL_MS,
            startup_latency: STARTUP_LATENCY,
            master_gain: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn with_bpm(bpm: f64) -> Self {
        Self { bpm, ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(EngineError::invalid(format!("bpm must be positive, got {}", self.bpm)));
        }
        if !(self.startup_latency.is_finite() && self.startup_latency >= 0.0) {
            return Err(EngineError::invalid("startup latency must not be negative"));
        }
        if self.poll_interval_ms == 0 {
            return Err(EngineError::invalid("poll interval must be at least 1ms"));
        }
        Ok(())
    }
}

/// Everything needed to bring up a session: tempo, loops, and which loops start with it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub players: Vec<PlayerConfig>,
    #[serde(default)]
    pub autoplay: Vec<String>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.engine.validate()?;
        for player in &self.players {
            player.validate()?;
        }
        for name in &self.autoplay {
            if !self.players.iter().any(|p| &p.name == name) {
                return Err(EngineError::NotFound(name.clone()));
            }
        }
        Ok(())
    }
}

pub fn load_session_file(path: &Path) -> Result<SessionConfig, EngineError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Session(format!("{}: {}", path.display(), e)))?;
    let session: SessionConfig = serde_json::from_str(&content)
        .map_err(|e| EngineError::Session(format!("{}: {}", path.display(), e)))?;
    session.validate()?;
    Ok(session)
}

pub fn save_session_file(session: &SessionConfig, path: &Path) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(session).map_err(|e| EngineError::Session(e.to_string()))?;
    let mut file = File::create(path).map_err(|e| EngineError::Session(e.to_string()))?;
    file.write_all(json.as_bytes())
        .map_err(|e| EngineError::Session(e.to_string()))?;
    Ok(())
}
