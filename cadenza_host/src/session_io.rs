use std::path::{Path, PathBuf};

use cadenza_engine::WavLoader;
use cadenza_shared::SessionConfig;
use cadenza_shared::session::load_session_file;
use tracing::info;

/// Load a session and a loader for its sounds. Urls resolve against `assets_dir`,
/// or the session file's directory when none is given.
pub fn open_session(path: &Path, assets_dir: Option<&Path>) -> Result<(SessionConfig, WavLoader), anyhow::Error> {
    let session = load_session_file(path)?;
    let root = match assets_dir {
        Some(dir) => dir.to_path_buf(),
        None => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    info!(
        "[SessionIO] Loaded {} ({} players, {} bpm), assets from {}",
        path.display(),
        session.players.len(),
        session.engine.bpm,
        root.display()
    );
    Ok((session, WavLoader::new(root)))
}
