use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::WorkoutState;

/// Bumped when the persisted layout changes incompatibly. Unknown versions
/// load as an absent snapshot rather than erroring.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u32,
    state: WorkoutState,
}

/// Durable home for the session snapshot.
///
/// An absent snapshot is equivalent to the default idle state; `clear` is
/// how a reset guarantees a clean slate across restarts.
pub trait SnapshotStore: Send {
    fn load(&self) -> Option<WorkoutState>;
    fn save(&self, state: &WorkoutState) -> Result<(), PersistError>;
    fn clear(&self) -> Result<(), PersistError>;
}

/// File-backed snapshot store under the platform data directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "liftlog") {
            pd.data_local_dir().join("session.json")
        } else {
            PathBuf::from("liftlog_session.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Option<WorkoutState> {
        let bytes = fs::read(&self.path).ok()?;
        match serde_json::from_slice::<PersistedSnapshot>(&bytes) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Some(snapshot.state),
            Ok(snapshot) => {
                log::warn!(
                    "ignoring persisted snapshot with unknown version {}",
                    snapshot.version
                );
                None
            }
            Err(err) => {
                log::warn!("ignoring unreadable persisted snapshot: {err}");
                None
            }
        }
    }

    fn save(&self, state: &WorkoutState) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = PersistedSnapshot {
            version: SNAPSHOT_VERSION,
            state: state.clone(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory snapshot store for tests. Clones share the same slot so a test
/// can inspect what the engine persisted.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    slot: Arc<Mutex<Option<WorkoutState>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted(&self) -> Option<WorkoutState> {
        self.slot.lock().unwrap().clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Option<WorkoutState> {
        self.slot.lock().unwrap().clone()
    }

    fn save(&self, state: &WorkoutState) -> Result<(), PersistError> {
        *self.slot.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}
