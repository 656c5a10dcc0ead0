use crate::error::DaemonError;
use rotate_ipc::RotationState;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Reads and writes the rotation file a daemon is bound to.
pub struct Persistence {
    path: PathBuf,
}

impl Persistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<RotationState, DaemonError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        RotationState::decode(&text).map_err(|source| DaemonError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrites the file in place. A file that has vanished is not
    /// recreated.
    pub async fn save(&self, state: &RotationState) -> Result<(), DaemonError> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(state.encode().as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> DaemonError {
        if source.kind() == ErrorKind::NotFound {
            DaemonError::MissingTarget(self.path.clone())
        } else {
            DaemonError::Io {
                path: self.path.clone(),
                source,
            }
        }
    }
}
