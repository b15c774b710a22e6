//! Sync configuration
//!
//! Precedence: built-in defaults, then an optional TOML file, then
//! `COST_SYNC_*` environment variables, then CLI flags (applied by the
//! binary). Every setting is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::derive::DerivationScope;
use crate::render::Binding;

/// Poll intervals below this are rejected.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote cost record endpoint
    pub source_url: String,
    /// Cache-busting version used for the first fetch
    pub data_version: Option<String>,
    pub auto_refresh: bool,
    #[serde(rename = "refresh_interval_ms", with = "duration_ms")]
    pub refresh_interval: Duration,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Local record file used for forced selection and as refresh fallback
    pub local_file: Option<PathBuf>,
    pub scope: DerivationScope,
    #[serde(rename = "binding")]
    pub bindings: Vec<Binding>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_url: "http://localhost:8000/costs.json".to_string(),
            data_version: None,
            auto_refresh: true,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
            request_timeout: Duration::from_secs(30),
            local_file: None,
            scope: DerivationScope::default(),
            bindings: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Defaults, overlaid with `path` when given, then the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;

        if config.refresh_interval < MIN_REFRESH_INTERVAL {
            warn!(
                refresh_interval_ms = config.refresh_interval.as_millis() as u64,
                "refresh interval below minimum, using default"
            );
            config.refresh_interval = DEFAULT_REFRESH_INTERVAL;
        }
        Ok(config)
    }

    /// Overlay `COST_SYNC_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("COST_SYNC_SOURCE_URL").filter(|v| !v.trim().is_empty()) {
            self.source_url = url;
        }
        if let Some(version) = lookup("COST_SYNC_DATA_VERSION").filter(|v| !v.trim().is_empty()) {
            self.data_version = Some(version);
        }
        if let Some(enabled) = lookup("COST_SYNC_AUTO_REFRESH") {
            self.auto_refresh = !matches!(
                enabled.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }
        if let Some(interval) = lookup("COST_SYNC_REFRESH_INTERVAL_MS") {
            match interval.trim().parse::<u64>() {
                Ok(ms) => self.set_refresh_interval_ms(ms),
                Err(_) => warn!(value = %interval, "ignoring unparseable COST_SYNC_REFRESH_INTERVAL_MS"),
            }
        }
        if let Some(path) = lookup("COST_SYNC_LOCAL_FILE").filter(|v| !v.trim().is_empty()) {
            self.local_file = Some(PathBuf::from(path));
        }
    }

    /// Apply an interval override. Values under the minimum are ignored and
    /// the current interval is kept.
    pub fn set_refresh_interval_ms(&mut self, ms: u64) {
        let interval = Duration::from_millis(ms);
        if interval < MIN_REFRESH_INTERVAL {
            warn!(
                requested_ms = ms,
                minimum_ms = MIN_REFRESH_INTERVAL.as_millis() as u64,
                "refresh interval override below minimum, ignored"
            );
            return;
        }
        self.refresh_interval = interval;
    }
}

// Durations are written as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
