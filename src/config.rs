use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SandboxError;

const CONFIG_FILE: &str = "sandboxd.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub staging: StagingConfig,
}

/// External tool configuration - locates the build script and docker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Path to the build-and-run script, relative to the working
    /// directory unless absolute.
    #[serde(default = "default_build_script")]
    pub build_script: PathBuf,

    /// Docker binary used for container control (stop/rm/ps/logs).
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            build_script: default_build_script(),
            docker_bin: default_docker_bin(),
        }
    }
}

/// Deadlines for external calls. Build/run gets minutes; container
/// control probes get seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Wall-clock limit for the build-and-run script.
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,

    /// Limit for `docker stop`.
    #[serde(default = "default_stop_secs")]
    pub stop_secs: u64,

    /// Limit for `docker rm -f` / `docker rmi -f`.
    #[serde(default = "default_remove_secs")]
    pub remove_secs: u64,

    /// Limit for `docker ps` existence/status probes.
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,

    /// Limit for `docker logs` queries.
    #[serde(default = "default_logs_secs")]
    pub logs_secs: u64,

    /// Grace period for output drain tasks after a process exits.
    #[serde(default = "default_drain_grace_secs")]
    pub drain_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            build_secs: default_build_secs(),
            stop_secs: default_stop_secs(),
            remove_secs: default_remove_secs(),
            probe_secs: default_probe_secs(),
            logs_secs: default_logs_secs(),
            drain_grace_secs: default_drain_grace_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    pub fn remove(&self) -> Duration {
        Duration::from_secs(self.remove_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn logs(&self) -> Duration {
        Duration::from_secs(self.logs_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

/// Staging area configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Root under which per-run staging directories are created.
    #[serde(default = "default_staging_root")]
    pub root: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: default_staging_root(),
        }
    }
}

// Default value functions

fn default_build_script() -> PathBuf {
    PathBuf::from("scripts/build_and_run.sh")
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_build_secs() -> u64 {
    300
}

fn default_stop_secs() -> u64 {
    30
}

fn default_remove_secs() -> u64 {
    10
}

fn default_probe_secs() -> u64 {
    5
}

fn default_logs_secs() -> u64 {
    30
}

fn default_drain_grace_secs() -> u64 {
    10
}

fn default_staging_root() -> PathBuf {
    std::env::temp_dir()
}

impl Config {
    /// Load configuration from file, using defaults if not found.
    pub fn load(work_dir: &Path) -> Result<Self> {
        let config_path = work_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Verifies that the external build/run tool exists. A missing
    /// tool is a startup-time configuration error, not a per-run
    /// surprise.
    pub fn validate(&self) -> std::result::Result<(), SandboxError> {
        if !self.tool.build_script.exists() {
            return Err(SandboxError::configuration(format!(
                "Build tool not found: {}",
                self.tool.build_script.display()
            )));
        }
        Ok(())
    }
}
