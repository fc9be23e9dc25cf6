pub mod normalize;

use serde::{Deserialize, Serialize};

use crate::error::BidError;
use crate::metrics::normalize::{parse_count, parse_decimal};
use crate::types::{CampaignMetrics, Device, DeviceMetrics};

/// A report cell as the reporting service emits it: either a JSON number or
/// a formatted string such as `"1,234.50"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportValue {
    Number(f64),
    Text(String),
}

impl Default for ReportValue {
    fn default() -> Self {
        Self::Number(0.0)
    }
}

impl From<f64> for ReportValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ReportValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignReportRow {
    #[serde(default)]
    pub clicks: ReportValue,
    #[serde(default)]
    pub conversions: ReportValue,
    #[serde(default)]
    pub conversion_value: ReportValue,
}

impl CampaignReportRow {
    pub fn to_metrics(&self) -> Result<CampaignMetrics, BidError> {
        Ok(CampaignMetrics {
            clicks: parse_count("clicks", &self.clicks)?,
            conversions: parse_count("conversions", &self.conversions)?,
            revenue: parse_decimal("conversion_value", &self.conversion_value)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReportRow {
    pub device: String,
    #[serde(default)]
    pub clicks: ReportValue,
    #[serde(default)]
    pub conversions: ReportValue,
    #[serde(default)]
    pub conversion_value: ReportValue,
}

impl DeviceReportRow {
    pub fn to_metrics(&self) -> Result<DeviceMetrics, BidError> {
        Ok(DeviceMetrics {
            device: Device::from_report_label(&self.device),
            clicks: parse_count("clicks", &self.clicks)?,
            conversions: parse_count("conversions", &self.conversions)?,
            revenue: parse_decimal("conversion_value", &self.conversion_value)?,
        })
    }
}

pub fn device_rows_to_metrics(rows: &[DeviceReportRow]) -> Result<Vec<DeviceMetrics>, BidError> {
    rows.iter().map(DeviceReportRow::to_metrics).collect()
}
