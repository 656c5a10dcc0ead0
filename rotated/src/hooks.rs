//! Runs user scripts on lifecycle events.
//!
//! For an event `E` the runner looks in the hooks directory for:
//! - `E` itself, if it is an executable file
//! - every executable file inside `E.d/`
//!
//! Each hook gets the rotation file path as its only argument and
//! `ROTATE_EVENT=E` in its environment. A failing hook is logged and the
//! next one still runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const EXPIRE_EVENT: &str = "expire";

/// Outcome of running every hook for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSummary {
    pub ran: usize,
    pub failed: usize,
}

pub struct Hooks {
    dir: PathBuf,
    timeout: Duration,
}

impl Hooks {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hooks registered for `event`, in the order they will run.
    pub async fn discover(&self, event: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();

        let single = self.dir.join(event);
        if is_executable(&single).await {
            found.push(single);
        }

        let drop_in = self.dir.join(format!("{event}.d"));
        if let Ok(mut entries) = tokio::fs::read_dir(&drop_in).await {
            let mut scripts = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if is_executable(&path).await {
                    scripts.push(path);
                }
            }
            scripts.sort();
            found.extend(scripts);
        }

        found
    }

    pub async fn run(&self, event: &str, target: &Path) -> HookSummary {
        let hooks = self.discover(event).await;
        if hooks.is_empty() {
            debug!("No '{}' hooks in {}", event, self.dir.display());
            return HookSummary::default();
        }

        info!("Triggering {} '{}' hook(s)", hooks.len(), event);
        let mut summary = HookSummary::default();
        for hook in hooks {
            summary.ran += 1;
            if let Err(reason) = self.run_one(&hook, event, target).await {
                summary.failed += 1;
                warn!("Hook {} failed: {}", hook.display(), reason);
            }
        }
        if summary.failed > 0 {
            warn!("{} of {} '{}' hook(s) failed", summary.failed, summary.ran, event);
        }
        summary
    }

    async fn run_one(&self, hook: &Path, event: &str, target: &Path) -> Result<(), String> {
        let child = Command::new(hook)
            .arg(target)
            .env("ROTATE_EVENT", event)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("could not start: {e}"))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| format!("could not wait: {e}"))?,
            Err(_) => return Err(format!("timed out after {:?}", self.timeout)),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("[hook {}] stderr: {}", hook.display(), stderr.trim());
        }
        if output.status.success() {
            debug!("[hook {}] ok", hook.display());
            Ok(())
        } else {
            Err(format!("exited with {}", output.status))
        }
    }
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
async fn is_executable(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}
