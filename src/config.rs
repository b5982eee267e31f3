//! Configuration file parser for ~/.config/feedrelay/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but makes no sense (zero interval, empty locale, ...)
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration. Any subset of keys may be given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between the start of one update cycle and the next.
    pub refresh_interval_seconds: u64,

    /// Maximum number of feeds checked per cycle.
    pub feeds_per_cycle: usize,

    /// Per-fetch timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Locale whose weekday/month names feed dates may use (e.g. "ru").
    pub date_locale: String,

    /// SQLite database file; defaults to `<config dir>/feedrelay.db`.
    pub database_path: Option<PathBuf>,

    /// Default tracing filter when RUST_LOG is unset.
    pub log_level: String,

    /// Subscriber id that receives feedback messages.
    pub operator_id: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 300,
            feeds_per_cycle: 20,
            request_timeout_seconds: 30,
            date_locale: "en".to_string(),
            database_path: None,
            log_level: "info".to_string(),
            operator_id: None,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "refresh_interval_seconds",
        "feeds_per_cycle",
        "request_timeout_seconds",
        "date_locale",
        "database_path",
        "log_level",
        "operator_id",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// The result is not validated; call [`Config::validate`] once CLI
    /// overrides have been applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content, path)
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            path = %path.display(),
            interval = config.refresh_interval_seconds,
            feeds_per_cycle = config.feeds_per_cycle,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_seconds must be positive".into(),
            ));
        }
        if self.feeds_per_cycle == 0 {
            return Err(ConfigError::Invalid("feeds_per_cycle must be positive".into()));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be positive".into(),
            ));
        }
        if self.date_locale.trim().is_empty() {
            return Err(ConfigError::Invalid("date_locale must not be empty".into()));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Worst-case cycle length: every selected feed hitting the timeout.
    pub fn worst_case_cycle(&self) -> Duration {
        let feeds = u32::try_from(self.feeds_per_cycle).unwrap_or(u32::MAX);
        self.request_timeout().saturating_mul(feeds)
    }

    pub fn database_path_or(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feedrelay.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================
