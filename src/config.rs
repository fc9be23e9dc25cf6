use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::AdjustmentPolicy;
use crate::runner::RunConfiguration;
use crate::window::{DateRange, WindowScheduler};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bidding: BiddingConfig,
    #[serde(default)]
    pub windows: WindowsConfig,
    #[serde(default)]
    pub markers: MarkersConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiddingConfig {
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_min_conversions")]
    pub min_conversions: u32,
    #[serde(default = "default_min_adjustment")]
    pub min_adjustment: f64,
    #[serde(default = "default_max_adjustment")]
    pub max_adjustment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    #[serde(default = "default_lookback")]
    pub lookback: Vec<DateRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkersConfig {
    #[serde(default)]
    pub sync: bool,
    #[serde(default = "default_marker_label")]
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesConfig {
    #[serde(default)]
    pub report_untargetable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformBackend {
    #[default]
    Http,
    Fixture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub backend: PlatformBackend,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub fixture_path: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub step: Option<f64>,
    pub min_conversions: Option<u32>,
    pub windows: Option<Vec<DateRange>>,
    pub fixture_path: Option<String>,
    pub sync_markers: Option<bool>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/device-bid-tuner/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(step) = overrides.step {
            self.bidding.step = step;
        }
        if let Some(min_conversions) = overrides.min_conversions {
            self.bidding.min_conversions = min_conversions;
        }
        if let Some(windows) = overrides.windows {
            self.windows.lookback = windows;
        }
        if let Some(path) = overrides.fixture_path {
            self.platform.backend = PlatformBackend::Fixture;
            self.platform.fixture_path = Some(path);
        }
        if let Some(sync) = overrides.sync_markers {
            self.markers.sync = sync;
        }
    }

    pub fn policy(&self) -> AdjustmentPolicy {
        AdjustmentPolicy {
            step: self.bidding.step,
            min_conversions: self.bidding.min_conversions,
            min_adjustment: self.bidding.min_adjustment,
            max_adjustment: self.bidding.max_adjustment,
        }
    }

    /// Builds and validates the immutable settings for one run.
    pub fn run_configuration(&self, dry_run: bool) -> Result<RunConfiguration> {
        let config = RunConfiguration {
            policy: self.policy(),
            scheduler: WindowScheduler::new(self.windows.lookback.clone()),
            dry_run,
            report_untargetable: self.devices.report_untargetable,
            marker_label: self.markers.sync.then(|| self.markers.label.clone()),
        };
        config.validate().context("invalid run configuration")?;
        Ok(config)
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn default_template() -> String {
        let template = r#"[bidding]
step = 0.05
min_conversions = 5
min_adjustment = 0.10
max_adjustment = 1.90

[windows]
# Evaluated in order; a campaign is processed by the first window that has data for it.
lookback = ["LAST_YEAR", "ALL_TIME"]

[markers]
sync = false
label = "_processing_device"

[devices]
report_untargetable = false

[platform]
backend = "http"
base_url = "https://ads.example.com/api/v1"
api_token = ""
timeout_secs = 30

[storage]
db_path = "~/.local/share/device-bid-tuner/decisions.db"
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for BiddingConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            min_conversions: default_min_conversions(),
            min_adjustment: default_min_adjustment(),
            max_adjustment: default_max_adjustment(),
        }
    }
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
        }
    }
}

impl Default for MarkersConfig {
    fn default() -> Self {
        Self {
            sync: false,
            label: default_marker_label(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            backend: PlatformBackend::default(),
            base_url: String::new(),
            api_token: String::new(),
            fixture_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_step() -> f64 {
    0.05
}

fn default_min_conversions() -> u32 {
    5
}

fn default_min_adjustment() -> f64 {
    0.10
}

fn default_max_adjustment() -> f64 {
    1.90
}

fn default_lookback() -> Vec<DateRange> {
    WindowScheduler::default().windows().to_vec()
}

fn default_marker_label() -> String {
    "_processing_device".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> String {
    "~/.local/share/device-bid-tuner/decisions.db".to_string()
}
