// =============================================================================
// Collector Configuration - file-backed settings with env overrides
// =============================================================================
//
// Loaded once by the binary and turned into a fresh `CollectionRequest` per
// run; nothing here is read by the collector itself, so concurrent runs never
// share a timeout.
//
// Persistence uses an atomic tmp + rename pattern.  All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an
// older config file.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collector::CollectionRequest;
use crate::market_data::kline_stream::DEFAULT_STREAM_URL;
use crate::types::CompletionPolicy;

pub const CONFIG_FILE: &str = "snapshot_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()]
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_termination_grace_ms() -> u64 {
    500
}

fn default_feed_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_ema_period() -> usize {
    9
}

// =============================================================================
// CollectorConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Instruments to snapshot, exchange-native or dashed (`BTC-USDT`).
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Candle interval, e.g. `1m`, `1h`, `1d`.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Upper bound on one collection run, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a killed worker may take to stop, in milliseconds.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,

    /// When a run may end before its timeout.
    #[serde(default)]
    pub completion: CompletionPolicy,

    /// Base URL of the kline WebSocket endpoint.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Where to write the chart; `None` means `./render.html`.
    #[serde(default)]
    pub chart_path: Option<PathBuf>,

    /// Period of the EMA overlay drawn on the chart.
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            interval: default_interval(),
            timeout_secs: default_timeout_secs(),
            termination_grace_ms: default_termination_grace_ms(),
            completion: CompletionPolicy::default(),
            feed_url: default_feed_url(),
            chart_path: None,
            ema_period: default_ema_period(),
        }
    }
}

impl CollectorConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read collector config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse collector config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            interval = %config.interval,
            timeout_secs = config.timeout_secs,
            "collector config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise collector config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "collector config saved (atomic)");
        Ok(())
    }

    /// Apply `SNAPSHOT_*` overrides.  `lookup` is `std::env::var(..).ok()`
    /// in the binary.  Malformed values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(syms) = lookup("SNAPSHOT_SYMBOLS") {
            self.symbols = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(interval) = lookup("SNAPSHOT_INTERVAL") {
            let interval = interval.trim();
            if !interval.is_empty() {
                self.interval = interval.to_string();
            }
        }
        if let Some(raw) = lookup("SNAPSHOT_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.timeout_secs = secs,
                _ => warn!(value = %raw, "ignoring invalid SNAPSHOT_TIMEOUT_SECS"),
            }
        }
        if let Some(path) = lookup("SNAPSHOT_CHART_PATH") {
            if !path.trim().is_empty() {
                self.chart_path = Some(PathBuf::from(path.trim()));
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// A fresh request for one run.
    pub fn request(&self) -> CollectionRequest {
        CollectionRequest::new(self.symbols.clone(), self.interval.clone(), self.timeout())
    }
}
