//! Configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. The file lives in
//! the data directory (the same directory the store writes renders and
//! documents to). Stock defaults are the base layer; the user file overrides
//! only the keys it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [targets]
//! small = [510, 510]        # Pixel size of the small widget render
//! medium = [1092, 510]
//! large = [1092, 1146]
//!
//! [encoding]
//! master_quality = 0.88     # JPEG start quality (0.10-0.95)
//! master_max_bytes = 2500000
//! render_quality = 0.85
//! small_max_bytes = 450000
//! medium_max_bytes = 650000
//! large_max_bytes = 900000
//! manual_quality = 0.92
//! manual_max_bytes = 1800000
//!
//! [pipeline]
//! analysis_max_edge = 1024  # Longest edge of the detection image
//! master_max_edge = 3072    # Longest edge of the persisted master
//! max_concurrent = 1        # Pipeline permits (omit for auto = CPU cores)
//!
//! [shuffle]
//! batch_size = 10
//! rotation_interval_minutes = 60
//! include_screenshots = false
//! minimum_pixel_dimension = 800
//! sort_order = "newest"     # newest | oldest | random
//!
//! [scoring]
//! max_edge = 512
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::geometry::PixelSize;
use crate::imaging::EncodeSettings;
use crate::source::SortOrder;
use crate::types::{RenderTargets, WidgetSize};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Name of the config file inside the data directory.
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration loaded from `config.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Per-size render targets in pixels.
    pub targets: TargetsConfig,
    /// JPEG start qualities and byte budgets.
    pub encoding: EncodingConfig,
    /// Decode sizes and concurrency.
    pub pipeline: PipelineConfig,
    /// Album shuffle defaults and driver pacing.
    pub shuffle: ShuffleConfig,
    /// Quality scorer settings.
    pub scoring: ScoringConfig,
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, [w, h]) in [
            ("small", self.targets.small),
            ("medium", self.targets.medium),
            ("large", self.targets.large),
        ] {
            if w == 0 || h == 0 {
                return Err(ConfigError::Validation(format!(
                    "targets.{name} values must be non-zero"
                )));
            }
        }
        for (name, q) in [
            ("master_quality", self.encoding.master_quality),
            ("render_quality", self.encoding.render_quality),
            ("manual_quality", self.encoding.manual_quality),
        ] {
            if !(0.1..=0.95).contains(&q) {
                return Err(ConfigError::Validation(format!(
                    "encoding.{name} must be 0.10-0.95"
                )));
            }
        }
        if self.pipeline.analysis_max_edge == 0 || self.pipeline.master_max_edge == 0 {
            return Err(ConfigError::Validation(
                "pipeline max edges must be non-zero".into(),
            ));
        }
        if self.pipeline.max_concurrent == Some(0) {
            return Err(ConfigError::Validation(
                "pipeline.max_concurrent must be at least 1".into(),
            ));
        }
        if self.shuffle.batch_size == 0 {
            return Err(ConfigError::Validation(
                "shuffle.batch_size must be at least 1".into(),
            ));
        }
        if self.scoring.max_edge == 0 {
            return Err(ConfigError::Validation(
                "scoring.max_edge must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Render targets as pixel sizes.
    pub fn render_targets(&self) -> RenderTargets {
        RenderTargets::from_fn(|size| {
            let [w, h] = self.targets.get(size);
            PixelSize::new(w, h)
        })
    }
}

/// Widget render sizes as `[width, height]` pixel pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetsConfig {
    pub small: [u32; 2],
    pub medium: [u32; 2],
    pub large: [u32; 2],
}

impl TargetsConfig {
    pub fn get(&self, size: WidgetSize) -> [u32; 2] {
        match size {
            WidgetSize::Small => self.small,
            WidgetSize::Medium => self.medium,
            WidgetSize::Large => self.large,
        }
    }
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            small: [510, 510],
            medium: [1092, 510],
            large: [1092, 1146],
        }
    }
}

/// JPEG encoding budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    pub master_quality: f64,
    pub master_max_bytes: usize,
    pub render_quality: f64,
    pub small_max_bytes: usize,
    pub medium_max_bytes: usize,
    pub large_max_bytes: usize,
    pub manual_quality: f64,
    pub manual_max_bytes: usize,
}

impl EncodingConfig {
    pub fn master(&self) -> EncodeSettings {
        EncodeSettings::new(self.master_quality, self.master_max_bytes)
    }

    pub fn render(&self, size: WidgetSize) -> EncodeSettings {
        let max_bytes = match size {
            WidgetSize::Small => self.small_max_bytes,
            WidgetSize::Medium => self.medium_max_bytes,
            WidgetSize::Large => self.large_max_bytes,
        };
        EncodeSettings::new(self.render_quality, max_bytes)
    }

    pub fn manual(&self) -> EncodeSettings {
        EncodeSettings::new(self.manual_quality, self.manual_max_bytes)
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            master_quality: 0.88,
            master_max_bytes: 2_500_000,
            render_quality: 0.85,
            small_max_bytes: 450_000,
            medium_max_bytes: 650_000,
            large_max_bytes: 900_000,
            manual_quality: 0.92,
            manual_max_bytes: 1_800_000,
        }
    }
}

/// Decode sizes and pipeline concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub analysis_max_edge: u32,
    pub master_max_edge: u32,
    /// Maximum number of pipeline runs in flight.
    /// When absent, defaults to the number of CPU cores.
    /// `1` serializes every run behind a single permit.
    pub max_concurrent: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_max_edge: 1024,
            master_max_edge: 3072,
            max_concurrent: None,
        }
    }
}

/// Resolve the effective number of pipeline permits.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_permits(config: &PipelineConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_concurrent
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Album shuffle defaults and driver pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShuffleConfig {
    /// Entries prepared per batch.
    pub batch_size: usize,
    /// Rotation interval for new manifests (0 = manual only).
    pub rotation_interval_minutes: i64,
    pub include_screenshots: bool,
    /// Shortest edge a candidate needs, clamped to 200-4000.
    pub minimum_pixel_dimension: u32,
    pub sort_order: SortOrder,
    /// Driver pause before the first batch.
    pub settle_ms: u64,
    /// Driver poll interval while the host is inactive.
    pub idle_poll_ms: u64,
    /// Driver poll interval while another batch holds the manifest.
    pub busy_poll_ms: u64,
    /// Driver pause between batches.
    pub batch_pause_ms: u64,
}

impl ShuffleConfig {
    pub fn effective_minimum_pixel_dimension(&self) -> u32 {
        self.minimum_pixel_dimension.clamp(200, 4000)
    }

    pub fn pacing(&self) -> DriverPacing {
        DriverPacing {
            settle: Duration::from_millis(self.settle_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            busy_poll: Duration::from_millis(self.busy_poll_ms),
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            rotation_interval_minutes: 60,
            include_screenshots: false,
            minimum_pixel_dimension: 800,
            sort_order: SortOrder::Newest,
            settle_ms: 250,
            idle_poll_ms: 1000,
            busy_poll_ms: 500,
            batch_pause_ms: 350,
        }
    }
}

/// Pauses used by the prepare-while-possible driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPacing {
    pub settle: Duration,
    pub idle_poll: Duration,
    pub busy_poll: Duration,
    pub batch_pause: Duration,
}

impl DriverPacing {
    /// No pauses at all; used by tests and one-shot CLI runs.
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            idle_poll: Duration::ZERO,
            busy_poll: Duration::ZERO,
            batch_pause: Duration::ZERO,
        }
    }
}

/// Quality scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    /// Longest edge the scorer decodes at.
    pub max_edge: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { max_edge: 512 }
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r#"# smartframe configuration
# ========================
# Every key is optional; the values below are the defaults.

[targets]
# Pixel size of each widget render as [width, height].
small = [510, 510]
medium = [1092, 510]
large = [1092, 1146]

[encoding]
# JPEG start quality (0.10-0.95). When a file exceeds its byte budget the
# quality steps down by 0.05, never below 0.65, at most six times.
master_quality = 0.88
master_max_bytes = 2500000
render_quality = 0.85
small_max_bytes = 450000
medium_max_bytes = 650000
large_max_bytes = 900000
manual_quality = 0.92
manual_max_bytes = 1800000

[pipeline]
# Longest edge of the image subject detection runs on.
analysis_max_edge = 1024
# Longest edge of the stored master every render is cut from.
master_max_edge = 3072
# Number of pipeline runs allowed at once. Omit for one per CPU core,
# set to 1 to serialize every run.
# max_concurrent = 1

[shuffle]
# Entries prepared per batch.
batch_size = 10
# Rotation interval for new shuffles, in minutes. 0 = advance manually.
rotation_interval_minutes = 60
# Candidates with "screenshot" in their name are skipped unless enabled.
include_screenshots = false
# Shortest edge a candidate needs (clamped to 200-4000).
minimum_pixel_dimension = 800
# Candidate order: "newest", "oldest" or "random".
sort_order = "newest"
# Driver pacing in milliseconds.
settle_ms = 250
idle_poll_ms = 1000
busy_poll_ms = 500
batch_pause_ms = 350

[scoring]
# Longest edge the quality scorer decodes at.
max_edge = 512
"#
}
