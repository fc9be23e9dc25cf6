use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BidError;
use crate::metrics::{device_rows_to_metrics, CampaignReportRow, DeviceReportRow};
use crate::platform::{BidTargetStore, CampaignRegistry, MetricsSource};
use crate::types::{Campaign, CampaignId, CampaignMetrics, Device, DeviceMetrics};
use crate::window::DateRange;

/// Window key used when a campaign has no data for the exact window label.
pub const ANY_WINDOW: &str = "*";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub campaigns: Vec<FixtureCampaign>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureCampaign {
    #[serde(flatten)]
    pub campaign: Campaign,
    #[serde(default)]
    pub bid_modifiers: BTreeMap<Device, f64>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub windows: BTreeMap<String, FixtureReport>,
    #[serde(default)]
    pub metrics_unavailable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureReport {
    #[serde(default)]
    pub campaign: CampaignReportRow,
    #[serde(default)]
    pub devices: Vec<DeviceReportRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BidWrite {
    pub campaign: CampaignId,
    pub device: Device,
    pub value: f64,
}

#[derive(Debug, Default)]
struct FixtureState {
    data: FixtureData,
    writes: Vec<BidWrite>,
    metric_calls: Vec<(CampaignId, String)>,
}

/// In-memory platform backed by a JSON document. Used for dry rehearsals
/// and as the collaborator double in tests.
#[derive(Debug, Default)]
pub struct FixturePlatform {
    state: Mutex<FixtureState>,
}

impl FixturePlatform {
    pub fn new(data: FixtureData) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                data,
                ..FixtureState::default()
            }),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading fixture: {}", path.display()))?;
        let data: FixtureData = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing fixture JSON: {}", path.display()))?;
        Ok(Self::new(data))
    }

    pub fn writes(&self) -> Vec<BidWrite> {
        self.lock().writes.clone()
    }

    /// `(campaign, window)` pairs for which campaign metrics were requested.
    pub fn metric_calls(&self) -> Vec<(CampaignId, String)> {
        self.lock().metric_calls.clone()
    }

    pub fn bid_modifier(&self, campaign: &CampaignId, device: Device) -> Option<f64> {
        let state = self.lock();
        find(&state.data, campaign).and_then(|c| c.bid_modifiers.get(&device).copied())
    }

    pub fn campaign_labels(&self, campaign: &CampaignId) -> BTreeSet<String> {
        let state = self.lock();
        find(&state.data, campaign)
            .map(|c| c.labels.clone())
            .unwrap_or_default()
    }

    pub fn known_labels(&self) -> BTreeSet<String> {
        self.lock().data.labels.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, campaign: &CampaignId, window: &DateRange) -> Result<FixtureReport, BidError> {
        let mut state = self.lock();
        state
            .metric_calls
            .push((campaign.clone(), window.to_string()));
        let entry = find(&state.data, campaign).ok_or_else(|| BidError::MetricsUnavailable {
            campaign: campaign.clone(),
            window: window.to_string(),
            reason: "unknown campaign".to_string(),
        })?;
        if entry.metrics_unavailable {
            return Err(BidError::MetricsUnavailable {
                campaign: campaign.clone(),
                window: window.to_string(),
                reason: "reporting service returned an error".to_string(),
            });
        }
        Ok(report_for(entry, window).cloned().unwrap_or_default())
    }
}

fn find<'a>(data: &'a FixtureData, campaign: &CampaignId) -> Option<&'a FixtureCampaign> {
    data.campaigns.iter().find(|c| &c.campaign.id == campaign)
}

fn find_mut<'a>(data: &'a mut FixtureData, campaign: &CampaignId) -> Option<&'a mut FixtureCampaign> {
    data.campaigns.iter_mut().find(|c| &c.campaign.id == campaign)
}

fn report_for<'a>(entry: &'a FixtureCampaign, window: &DateRange) -> Option<&'a FixtureReport> {
    entry
        .windows
        .get(&window.to_string())
        .or_else(|| entry.windows.get(ANY_WINDOW))
}

#[async_trait]
impl MetricsSource for FixturePlatform {
    async fn campaign_metrics(
        &self,
        campaign: &CampaignId,
        window: &DateRange,
    ) -> Result<CampaignMetrics, BidError> {
        self.report(campaign, window)?.campaign.to_metrics()
    }

    async fn device_metrics(
        &self,
        campaign: &CampaignId,
        window: &DateRange,
    ) -> Result<Vec<DeviceMetrics>, BidError> {
        device_rows_to_metrics(&self.report(campaign, window)?.devices)
    }
}

#[async_trait]
impl CampaignRegistry for FixturePlatform {
    async fn list_active_campaigns(&self) -> Result<Vec<Campaign>> {
        let state = self.lock();
        Ok(state
            .data
            .campaigns
            .iter()
            .filter(|c| c.campaign.active)
            .map(|c| c.campaign.clone())
            .collect())
    }

    async fn list_active_eligible_campaigns(
        &self,
        window: &DateRange,
        min_conversions: u32,
    ) -> Result<Vec<Campaign>> {
        let state = self.lock();
        let mut out = Vec::new();
        for entry in state.data.campaigns.iter().filter(|c| c.campaign.active) {
            let conversions = report_for(entry, window)
                .map(|r| r.campaign.to_metrics().map(|m| m.conversions).unwrap_or(0.0))
                .unwrap_or(0.0);
            if conversions >= f64::from(min_conversions) {
                out.push(entry.campaign.clone());
            }
        }
        Ok(out)
    }

    async fn ensure_marker_label(&self, label: &str) -> Result<(), BidError> {
        self.lock().data.labels.insert(label.to_string());
        Ok(())
    }

    async fn set_marker(&self, campaign: &CampaignId, label: &str) -> Result<(), BidError> {
        let mut state = self.lock();
        if let Some(entry) = find_mut(&mut state.data, campaign) {
            entry.labels.insert(label.to_string());
        }
        Ok(())
    }

    async fn clear_marker(&self, campaign: &CampaignId, label: &str) -> Result<(), BidError> {
        let mut state = self.lock();
        if let Some(entry) = find_mut(&mut state.data, campaign) {
            entry.labels.remove(label);
        }
        Ok(())
    }

    async fn has_marker(&self, campaign: &CampaignId, label: &str) -> Result<bool, BidError> {
        let state = self.lock();
        Ok(find(&state.data, campaign)
            .map(|c| c.labels.contains(label))
            .unwrap_or(false))
    }
}

#[async_trait]
impl BidTargetStore for FixturePlatform {
    async fn bid_adjustment(
        &self,
        campaign: &CampaignId,
        device: Device,
    ) -> Result<Option<f64>, BidError> {
        Ok(self.bid_modifier(campaign, device))
    }

    async fn set_bid_adjustment(
        &self,
        campaign: &CampaignId,
        device: Device,
        value: f64,
    ) -> Result<(), BidError> {
        let mut state = self.lock();
        let entry = find_mut(&mut state.data, campaign)
            .filter(|c| c.bid_modifiers.contains_key(&device))
            .ok_or_else(|| BidError::UntargetableDevice {
                campaign: campaign.clone(),
                device,
            })?;
        entry.bid_modifiers.insert(device, value);
        state.writes.push(BidWrite {
            campaign: campaign.clone(),
            device,
            value,
        });
        Ok(())
    }
}
