use std::path::{Path, PathBuf};

use tracing::warn;

use crate::state::Message;

/// Name of the single persisted key holding the message history.
pub const STORAGE_KEY: &str = "studio_history";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to write history: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persists the conversation as one JSON array under [`STORAGE_KEY`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(directory: &Path) -> Self {
        Self {
            path: directory.join(format!("{STORAGE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved history. Missing, corrupt or non-array content is
    /// treated as no history.
    pub fn load(&self) -> Vec<Message> {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<Message>>(&contents) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Discarding unreadable history at {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }

    /// Write the full history. Empty histories are not written.
    pub fn save(&self, messages: &[Message]) -> Result<(), SessionError> {
        if messages.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string(messages)?;
        // Replace atomically: readers see the old array or the new one.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
