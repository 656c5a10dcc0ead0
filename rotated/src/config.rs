use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub hooks: HooksConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between ticks.
    #[serde(deserialize_with = "positive_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HooksConfig {
    /// Overrides the `hooks/` directory next to the rotation file.
    pub dir: Option<PathBuf>,
    #[serde(deserialize_with = "positive_secs")]
    pub timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { interval_secs: 1 }
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            dir: None,
            timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.daemon.interval_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hooks.timeout_secs)
    }

    pub fn hooks_dir(&self, target: &Path) -> PathBuf {
        self.hooks
            .dir
            .clone()
            .unwrap_or_else(|| rotate_ipc::default_hooks_dir(target))
    }
}

fn positive_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs: u64 = serde::Deserialize::deserialize(deserializer)?;
    if secs == 0 {
        return Err(serde::de::Error::custom("must be at least 1 second"));
    }
    Ok(secs)
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "pabloagn", "rotate")
        .map(|proj_dirs| proj_dirs.config_dir().join("rotate.toml"))
}

/// Loads `explicit` if given (it must exist), otherwise the per-user config
/// file if there is one, otherwise defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Config::default()),
        },
    };
    let config_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at {:?}", path))?;
    parse_config(&config_str).with_context(|| format!("Failed to parse config file at {:?}", path))
}

fn parse_config(config_str: &str) -> Result<Config> {
    Ok(toml::from_str(config_str)?)
}
