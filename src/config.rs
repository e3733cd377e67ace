//! Configuration for rotalog
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! config that logs to stdout only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rotation::RotationPolicy;

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Main log file (stable alias path); no file output when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,

    /// Separate file receiving ERROR events only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_base_path: Option<PathBuf>,

    /// Minimum level, as an EnvFilter directive (default: "info")
    #[serde(default = "default_level")]
    pub level: String,

    /// Write JSON lines to the file sinks instead of plain text
    #[serde(default)]
    pub json_format: bool,

    /// Record span lifecycles and thread ids along with each event
    #[serde(default)]
    pub trace: bool,

    /// Don't mirror events to stdout
    #[serde(default)]
    pub disable_stdout: bool,

    #[serde(default)]
    pub rotation: RotationConfig,
}

/// Rotation and retention settings shared by the file sinks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationConfig {
    /// strftime pattern for rotated names of the main log; derived from
    /// `base_path` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,

    /// Rotation period in seconds, 0 to disable (default: 86400 = daily)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Rotate before the file would exceed this size, 0 to disable
    #[serde(default)]
    pub max_size_bytes: u64,

    /// Delete archives older than this, 0 for no age limit (default: 7 days)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Keep at most this many expired archives, 0 for no count limit
    #[serde(default)]
    pub max_count: usize,

    /// Gzip rotated files
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// Write buffer per file in bytes, 0 to write through
    #[serde(default)]
    pub buffer_bytes: usize,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_compress() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            error_base_path: None,
            level: default_level(),
            json_format: false,
            trace: false,
            disable_stdout: false,
            rotation: RotationConfig::default(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            name_pattern: None,
            interval_secs: default_interval_secs(),
            max_size_bytes: 0,
            max_age_secs: default_max_age_secs(),
            max_count: 0,
            compress: default_compress(),
            buffer_bytes: 0,
        }
    }
}

impl LogConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load from the default location, or return defaults if there is none
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.base_path = config.base_path.map(|p| expand_path(&p));
        config.error_base_path = config.error_base_path.map(|p| expand_path(&p));
        Ok(config)
    }

    /// Policy for the main log file
    pub fn main_policy(&self) -> Result<Option<RotationPolicy>> {
        self.base_path
            .as_deref()
            .map(|base| self.rotation.policy_for(base, self.rotation.name_pattern.as_deref()))
            .transpose()
    }

    /// Policy for the error log; always uses a pattern derived from its own path
    ///
    /// Fails if its rotated files would be picked up by the main log's
    /// compression and retention, or the other way round.
    pub fn error_policy(&self) -> Result<Option<RotationPolicy>> {
        let Some(base) = self.error_base_path.as_deref() else {
            return Ok(None);
        };
        let policy = self.rotation.policy_for(base, None)?;
        if let Some(main) = self.main_policy()? {
            if claims_files_of(&main, &policy)? || claims_files_of(&policy, &main)? {
                bail!(
                    "Error log {} and main log {} have overlapping rotated file names",
                    base.display(),
                    main.base_path().display()
                );
            }
        }
        Ok(Some(policy))
    }
}

impl RotationConfig {
    /// Build a validated policy for one file
    pub fn policy_for(&self, base_path: &Path, name_pattern: Option<&str>) -> Result<RotationPolicy> {
        let mut builder = RotationPolicy::builder(base_path)
            .rotation_interval(Duration::from_secs(self.interval_secs))
            .max_size_bytes(self.max_size_bytes)
            .max_age(Duration::from_secs(self.max_age_secs))
            .max_count(self.max_count)
            .compress(self.compress)
            .buffer_capacity(self.buffer_bytes);
        if let Some(pattern) = name_pattern {
            builder = builder.name_pattern(shellexpand::tilde(pattern).into_owned());
        }
        builder
            .build()
            .with_context(|| format!("Invalid rotation settings for {}", base_path.display()))
    }
}

/// Whether `owner`'s rotated-file glob matches `other`'s alias or rotated names
fn claims_files_of(owner: &RotationPolicy, other: &RotationPolicy) -> Result<bool> {
    let glob = owner.rotated_glob();
    let pattern = glob::Pattern::new(&glob)
        .with_context(|| format!("Invalid rotated file glob {}", glob))?;
    let sample = other.file_name_at(DateTime::<Utc>::UNIX_EPOCH.fixed_offset());
    Ok(pattern.matches_path(other.base_path()) || pattern.matches_path(&sample))
}

/// Default config file location (~/.config/rotalog/config.toml on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rotalog").join("config.toml"))
}

/// Expand a leading `~` in a configured path
fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path.to_path_buf(),
    }
}
