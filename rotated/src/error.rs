use rotate_ipc::{IpcError, ParseError};
use std::path::PathBuf;
use thiserror::Error;

/// Failures that end a daemon run.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("rotation file not found: {}", .0.display())]
    MissingTarget(PathBuf),

    #[error("could not parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command channel: {0}")]
    Channel(#[from] IpcError),
}
