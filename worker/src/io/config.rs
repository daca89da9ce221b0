//! Worker configuration stored in `worker.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "worker.toml";

/// Worker configuration (TOML).
///
/// Read once at startup and never mutated afterwards. Missing fields default
/// to values that work against a master on the local host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Only report pulled node ids back to the master; never execute them.
    pub collect_only: bool,

    pub master: MasterConfig,
    pub collect: CollectConfig,
    pub run: RunConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MasterConfig {
    /// `host:port` of the master's request/reply endpoint.
    pub endpoint: String,

    /// Give up waiting for a reply after this many seconds. Unset blocks forever.
    pub read_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectConfig {
    /// Command printing one node id per line.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Command executing a single test. `{nodeid}` is substituted, or the node
    /// id is appended when no argument contains the placeholder.
    pub command: Vec<String>,

    pub test_timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is dropped.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5555".to_string(),
            read_timeout_secs: None,
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "pytest".to_string(),
                "--collect-only".to_string(),
                "-q".to_string(),
            ],
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string(), "{nodeid}".to_string()],
            test_timeout_secs: 60 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            collect_only: false,
            master: MasterConfig::default(),
            collect: CollectConfig::default(),
            run: RunConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.master.endpoint.trim().is_empty() {
            return Err(anyhow!("master.endpoint must be non-empty"));
        }
        if self.master.read_timeout_secs == Some(0) {
            return Err(anyhow!("master.read_timeout_secs must be > 0 when set"));
        }
        if is_blank_command(&self.collect.command) {
            return Err(anyhow!("collect.command must be a non-empty array"));
        }
        if is_blank_command(&self.run.command) {
            return Err(anyhow!("run.command must be a non-empty array"));
        }
        if self.run.test_timeout_secs == 0 {
            return Err(anyhow!("run.test_timeout_secs must be > 0"));
        }
        if self.run.output_limit_bytes == 0 {
            return Err(anyhow!("run.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.master.read_timeout_secs.map(Duration::from_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.run.test_timeout_secs)
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkerConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkerConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = WorkerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
