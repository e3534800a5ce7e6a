//! Typed configuration from environment variables and an optional TOML file.
//!
//! Limits are never rejected: anything that is not a positive integer
//! becomes 1. An unknown limiter mode is an error.

use crate::error::{Error, Result};
use crate::limiter::{Limit, Mode};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub limit: Limit,
    pub mode: Mode,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limit: Limit::default(),
            mode: Mode::default(),
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

/// Top-level TOML layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    limiter: LimiterSection,
    #[serde(default)]
    telemetry: TelemetrySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimiterSection {
    /// Any TOML value; see [`Limit`] for how it is coerced.
    limit: Option<Limit>,
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TelemetrySection {
    endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML document. Keys it omits keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_toml(content)?;
        Ok(config)
    }

    /// Environment first, then the file at `path` on top of it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("cannot read config file {}: {e}", path.display()))
            })?;
            config.apply_toml(&content).map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
                other => other,
            })?;
        }
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var("SLOTQ_LIMIT") {
            self.limit = Limit::parse_lenient(&raw);
        }
        if let Ok(raw) = std::env::var("SLOTQ_MODE") {
            self.mode = parse_mode(&raw)?;
        }
        if let Ok(endpoint) = std::env::var("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    fn apply_toml(&mut self, content: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;

        if let Some(limit) = file.limiter.limit {
            self.limit = limit;
        }
        if let Some(ref mode) = file.limiter.mode {
            self.mode = parse_mode(mode)?;
        }
        if let Some(endpoint) = file.telemetry.endpoint {
            self.otel_endpoint = Some(endpoint);
        }
        if let Some(level) = file.telemetry.log_level {
            self.log_level = level;
        }
        Ok(())
    }
}

fn parse_mode(raw: &str) -> Result<Mode> {
    raw.parse().map_err(Error::Config)
}
