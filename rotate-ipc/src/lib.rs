//! Everything rotated and rotatectl agree on.
//!
//! The two processes never talk directly. They share the rotation file
//! itself and a one-slot mailbox next to it: the client drops a command into
//! `<target>.ipc`, the daemon picks it up on its next tick and deletes it.

pub mod policy;
pub mod rotation;

pub use policy::{RotationPolicy, RoundRobin};
pub use rotation::{Assignment, ParseError, RotationState, Span, TimerState};

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Commands that rotatectl can send to a running rotated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "stop" => Ok(Command::Stop),
            other => Err(IpcError::MalformedCommand(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unrecognized command {0:?}")]
    MalformedCommand(String),

    #[error("rotation file not found: {0}")]
    MissingTarget(PathBuf),
}

pub const COMMAND_SUFFIX: &str = ".ipc";

pub const DEFAULT_ROTATION_FILE: &str = ".rotate/rotation";

pub const HOOKS_DIR_NAME: &str = "hooks";

/// Mailbox path for a target: the target path with `.ipc` appended.
pub fn command_path(target: &Path) -> PathBuf {
    let mut path = target.as_os_str().to_owned();
    path.push(COMMAND_SUFFIX);
    PathBuf::from(path)
}

/// Hooks live next to the rotation file they belong to.
pub fn default_hooks_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) => parent.join(HOOKS_DIR_NAME),
        None => PathBuf::from(HOOKS_DIR_NAME),
    }
}

/// Leaves a command for the daemon bound to `target`. Whatever was pending
/// and not yet picked up is replaced.
pub async fn send(target: &Path, command: Command) -> Result<(), IpcError> {
    if !tokio::fs::try_exists(target).await? {
        return Err(IpcError::MissingTarget(target.to_path_buf()));
    }
    tokio::fs::write(command_path(target), command.as_str()).await?;
    Ok(())
}

/// Takes the pending command for `target`, if any.
///
/// The mailbox is emptied whether or not its content made sense; unreadable
/// or unknown content reads as "no command".
pub async fn poll(target: &Path) -> Option<Command> {
    let path = command_path(target);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Could not read command file {}: {}", path.display(), e);
            None
        }
    };
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Could not remove command file {}: {}", path.display(), e);
        }
    }

    let content = String::from_utf8_lossy(&bytes?).into_owned();
    match content.trim().parse() {
        Ok(command) => Some(command),
        Err(e) => {
            warn!("Ignoring command file {}: {}", path.display(), e);
            None
        }
    }
}

/// Drops any pending command, e.g. one left behind by a daemon that is no
/// longer running.
pub async fn clear(target: &Path) -> Result<(), IpcError> {
    let path = command_path(target);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            debug!("Removed stale command file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
