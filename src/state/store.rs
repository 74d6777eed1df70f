//! Persistent storage of the selected interception state

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StateError;
use crate::rules::TransparentProxyState;

/// Default location of the state file
pub const DEFAULT_STATE_PATH: &str = "/var/lib/tproxy-ctl/state.json";

/// Durable record of the requested `(mode, scope)`
pub trait StateStore: Send + Sync {
    /// Load the last saved state, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<TransparentProxyState>, StateError>;

    /// Save `state`, replacing the previous value
    fn save(&self, state: &TransparentProxyState) -> Result<(), StateError>;
}

/// JSON file store.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash never leaves a half-written state file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<TransparentProxyState>, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn save(&self, state: &TransparentProxyState) -> Result<(), StateError> {
        let json =
            serde_json::to_string_pretty(state).map_err(|e| StateError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            self.io_error(e)
        })?;

        debug!("Saved transparent proxy state {} to {}", state, self.path.display());
        Ok(())
    }
}

/// Volatile store for tests and `--preview` style runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<TransparentProxyState>>,
    fail_saves: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `state`
    pub fn with_state(state: TransparentProxyState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            fail_saves: Mutex::new(None),
        }
    }

    /// Make subsequent saves fail with an I/O error carrying `reason`
    pub fn fail_saves(&self, reason: &str) {
        *self.fail_saves.lock() = Some(reason.to_string());
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<TransparentProxyState>, StateError> {
        Ok(*self.state.lock())
    }

    fn save(&self, state: &TransparentProxyState) -> Result<(), StateError> {
        if let Some(reason) = self.fail_saves.lock().clone() {
            return Err(StateError::Io {
                path: PathBuf::from("<memory>"),
                source: io::Error::new(io::ErrorKind::Other, reason),
            });
        }
        *self.state.lock() = Some(*state);
        Ok(())
    }
}
