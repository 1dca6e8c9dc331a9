use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use cadenza_shared::{EngineError, PlayerConfig};
use tracing::{debug, warn};

/// A decoded sound, ready to be handed to the output as a segment source.
#[derive(Clone)]
pub struct AudioBuffer {
    pub name: String,
    pub data: Arc<Vec<f32>>, // Interleaved
    pub channels: u16,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

impl AudioBuffer {
    pub fn from_samples(name: &str, data: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let duration_seconds = if sample_rate == 0 {
            0.0
        } else {
            data.len() as f64 / (channels as f64 * sample_rate as f64)
        };
        Self {
            name: name.to_string(),
            data: Arc::new(data),
            channels,
            sample_rate,
            duration_seconds,
        }
    }

    /// Mono silence of the given length. Handy for tests and for placeholders.
    pub fn silence(name: &str, duration_seconds: f64, sample_rate: u32) -> Self {
        let frames = (duration_seconds * sample_rate as f64).round() as usize;
        let mut buffer = Self::from_samples(name, vec![0.0; frames], 1, sample_rate);
        buffer.duration_seconds = duration_seconds;
        buffer
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }
}

impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("duration_seconds", &self.duration_seconds)
            .finish()
    }
}

/// Turns a player's `url` into a decoded buffer.
pub trait AssetLoader: Send + Sync {
    fn load(&self, name: &str, url: &str) -> Result<AudioBuffer, EngineError>;
}

/// Decodes WAV files from disk. Relative urls resolve against `root`.
#[derive(Debug, Clone)]
pub struct WavLoader {
    root: PathBuf,
}

impl WavLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Default for WavLoader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl AssetLoader for WavLoader {
    fn load(&self, name: &str, url: &str) -> Result<AudioBuffer, EngineError> {
        let path = self.resolve(url);
        let fail = |message: String| EngineError::Asset {
            name: name.to_string(),
            message,
        };

        let reader = hound::WavReader::open(&path).map_err(|e| fail(format!("{}: {}", path.display(), e)))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| fail(e.to_string()))?,
            hound::SampleFormat::Int => {
                let max_val = 2.0_f32.powi(spec.bits_per_sample as i32 - 1);
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|x| x as f32 / max_val))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| fail(e.to_string()))?
            }
        };

        let buffer = AudioBuffer::from_samples(name, samples, spec.channels, spec.sample_rate);
        debug!(
            "[AudioPool] Decoded {} from {} ({:.3}s)",
            name,
            path.display(),
            buffer.duration_seconds
        );
        Ok(buffer)
    }
}

/// Decoded buffers keyed by player name.
#[derive(Clone, Default)]
pub struct AudioPool {
    assets: HashMap<String, AudioBuffer>,
}

impl AudioPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, buffer: AudioBuffer) {
        self.assets.insert(buffer.name.clone(), buffer);
    }

    pub fn get(&self, name: &str) -> Option<&AudioBuffer> {
        self.assets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.assets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Decode every player's sound concurrently. Fails as a whole on the first error,
/// since tracks are only built once the full set is available.
pub fn load_all(loader: &dyn AssetLoader, players: &[PlayerConfig]) -> Result<Vec<AudioBuffer>, EngineError> {
    let results: Vec<Result<AudioBuffer, EngineError>> = thread::scope(|scope| {
        let handles: Vec<_> = players
            .iter()
            .map(|player| scope.spawn(move || loader.load(&player.name, &player.url)))
            .collect();
        handles
            .into_iter()
            .zip(players)
            .map(|(handle, player)| {
                handle.join().unwrap_or_else(|_| {
                    Err(EngineError::Asset {
                        name: player.name.clone(),
                        message: "loader panicked".to_string(),
                    })
                })
            })
            .collect()
    });

    let mut buffers = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(buffer) => buffers.push(buffer),
            Err(e) => {
                warn!("[AudioPool] {}", e);
                return Err(e);
            }
        }
    }
    Ok(buffers)
}
