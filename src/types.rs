use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CampaignId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CampaignId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CampaignId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    #[default]
    Standard,
    Shopping,
}

impl CampaignKind {
    pub const ALL: [CampaignKind; 2] = [CampaignKind::Standard, CampaignKind::Shopping];
}

impl Display for CampaignKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Standard => "Standard Campaigns",
            Self::Shopping => "Shopping Campaigns",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: CampaignKind,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Campaign {
    pub fn new(id: impl Into<CampaignId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: CampaignKind::Standard,
            active: true,
        }
    }

    pub fn with_kind(mut self, kind: CampaignKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

fn default_active() -> bool {
    true
}

/// Device segment as reported by the metrics source. `Other` never has a
/// bid target and is skipped by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Desktop,
    MobileFullBrowser,
    Tablet,
    Other,
}

impl Device {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::MobileFullBrowser => "mobile",
            Self::Tablet => "tablet",
            Self::Other => "other",
        }
    }

    /// Maps a report's device label onto a segment. Unknown labels become
    /// `Other` rather than an error.
    pub fn from_report_label(label: &str) -> Self {
        match label.trim() {
            "Computers" | "DESKTOP" => Self::Desktop,
            "Mobile devices with full browsers" | "MOBILE" => Self::MobileFullBrowser,
            "Tablets with full browsers" | "TABLET" => Self::Tablet,
            _ => Self::Other,
        }
    }

    pub fn is_targetable(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Desktop => "Computers",
            Self::MobileFullBrowser => "Mobile",
            Self::Tablet => "Tablets",
            Self::Other => "Other",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Error)]
#[error("unknown device: {0}")]
pub struct DeviceParseError(pub String);

impl FromStr for Device {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "desktop" | "computers" => Ok(Self::Desktop),
            "mobile" | "mobile_full_browser" => Ok(Self::MobileFullBrowser),
            "tablet" | "tablets" => Ok(Self::Tablet),
            "other" => Ok(Self::Other),
            _ => Err(DeviceParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CampaignMetrics {
    pub clicks: f64,
    #[serde(default)]
    pub conversions: f64,
    pub revenue: f64,
}

impl CampaignMetrics {
    pub fn revenue_per_click(&self) -> f64 {
        revenue_per_click(self.revenue, self.clicks)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DeviceMetrics {
    pub device: Device,
    pub clicks: f64,
    pub conversions: f64,
    pub revenue: f64,
}

impl DeviceMetrics {
    pub fn revenue_per_click(&self) -> f64 {
        revenue_per_click(self.revenue, self.clicks)
    }
}

/// Zero clicks yields zero rather than a division error.
pub fn revenue_per_click(revenue: f64, clicks: f64) -> f64 {
    if clicks <= 0.0 {
        0.0
    } else {
        revenue / clicks
    }
}
