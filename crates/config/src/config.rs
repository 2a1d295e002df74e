//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the subdirectory used for merged output when `out_dir` is unset.
pub const DEFAULT_OUT_SUBDIR: &str = "daily";

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value supplied through the environment is not acceptable
    InvalidValue { key: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::InvalidValue { key, message } => {
                write!(f, "Invalid {}: {}", key, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

/// Run configuration, immutable for the lifetime of a pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Input directory holding raw segments (one subdirectory per source)
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Output directory for merged files (defaults to `<dir>/daily`)
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    /// Raw segment retention in days (None = keep forever, 0 = immediate mode)
    #[serde(default)]
    pub raw_retention_days: Option<u32>,
    /// Merged output retention in days (None = keep forever)
    #[serde(default)]
    pub merged_retention_days: Option<u32>,
    /// 5-field cron expression; empty means run once and exit
    #[serde(default)]
    pub cron: String,
    /// Re-merge days whose output already exists
    #[serde(default)]
    pub overwrite: bool,
    /// Log intended actions without touching any file
    #[serde(default)]
    pub dry_run: bool,
    /// Path or name of the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            out_dir: None,
            raw_retention_days: None,
            merged_retention_days: None,
            cron: String::new(),
            overwrite: false,
            dry_run: false,
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

/// Strips whitespace and any number of matching surrounding quote pairs.
///
/// Container runtimes frequently pass `"0 3 * * *"` with the quotes intact.
pub fn trim_matching_quotes(s: &str) -> &str {
    let mut s = s.trim();
    while s.len() >= 2 {
        let bytes = s.as_bytes();
        let (first, last) = (bytes[0], bytes[s.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            s = s[1..s.len() - 1].trim();
        } else {
            break;
        }
    }
    s
}

/// Parses a retention horizon: a non-negative whole number of days.
pub fn parse_retention_days(key: &str, raw: &str) -> Result<u32, ConfigError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a non-negative integer, got '{}'", raw.trim()),
        })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Reads an environment variable, treating empty values as unset.
fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set and non-empty:
    /// - SEGMERGE_DIR -> dir
    /// - SEGMERGE_OUT_DIR -> out_dir
    /// - SEGMERGE_DAYS -> raw_retention_days
    /// - SEGMERGE_MERGED_DAYS -> merged_retention_days
    /// - SEGMERGE_CRON -> cron
    /// - SEGMERGE_OVERWRITE -> overwrite
    /// - SEGMERGE_DRY_RUN -> dry_run
    /// - SEGMERGE_FFMPEG -> ffmpeg_path
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = env_non_empty("SEGMERGE_DIR") {
            self.dir = PathBuf::from(val);
        }

        if let Some(val) = env_non_empty("SEGMERGE_OUT_DIR") {
            self.out_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = env_non_empty("SEGMERGE_DAYS") {
            self.raw_retention_days = Some(parse_retention_days("SEGMERGE_DAYS", &val)?);
        }

        if let Some(val) = env_non_empty("SEGMERGE_MERGED_DAYS") {
            self.merged_retention_days =
                Some(parse_retention_days("SEGMERGE_MERGED_DAYS", &val)?);
        }

        if let Some(val) = env_non_empty("SEGMERGE_CRON") {
            self.cron = val;
        }

        // Unrecognised boolean spellings keep the existing value
        if let Some(val) = env_non_empty("SEGMERGE_OVERWRITE").and_then(|v| parse_bool(&v)) {
            self.overwrite = val;
        }

        if let Some(val) = env_non_empty("SEGMERGE_DRY_RUN").and_then(|v| parse_bool(&v)) {
            self.dry_run = val;
        }

        if let Some(val) = env_non_empty("SEGMERGE_FFMPEG") {
            self.ffmpeg_path = PathBuf::from(val);
        }

        self.normalize();
        Ok(())
    }

    /// Load configuration from an optional file and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Canonicalise free-form values after any layer has been applied
    pub fn normalize(&mut self) {
        self.cron = trim_matching_quotes(&self.cron).to_string();
    }

    /// Directory merged outputs are written under
    pub fn resolved_out_dir(&self) -> PathBuf {
        match &self.out_dir {
            Some(dir) => dir.clone(),
            None => self.dir.join(DEFAULT_OUT_SUBDIR),
        }
    }

    /// A non-empty cron expression selects daemon mode
    pub fn is_daemon(&self) -> bool {
        !self.cron.is_empty()
    }
}
