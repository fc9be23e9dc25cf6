pub mod fixture;
pub mod http;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::{PlatformBackend, PlatformConfig};
use crate::error::BidError;
use crate::platform::fixture::FixturePlatform;
use crate::platform::http::HttpPlatform;
use crate::types::{Campaign, CampaignId, CampaignMetrics, Device, DeviceMetrics};
use crate::window::DateRange;

/// Reporting service: aggregate clicks, conversions and revenue.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn campaign_metrics(
        &self,
        campaign: &CampaignId,
        window: &DateRange,
    ) -> Result<CampaignMetrics, BidError>;

    async fn device_metrics(
        &self,
        campaign: &CampaignId,
        window: &DateRange,
    ) -> Result<Vec<DeviceMetrics>, BidError>;
}

/// Campaign enumeration and the processing-marker label.
#[async_trait]
pub trait CampaignRegistry: Send + Sync {
    async fn list_active_campaigns(&self) -> Result<Vec<Campaign>>;

    /// Active campaigns with at least `min_conversions` over `window`.
    async fn list_active_eligible_campaigns(
        &self,
        window: &DateRange,
        min_conversions: u32,
    ) -> Result<Vec<Campaign>>;

    async fn ensure_marker_label(&self, label: &str) -> Result<(), BidError>;
    async fn set_marker(&self, campaign: &CampaignId, label: &str) -> Result<(), BidError>;
    async fn clear_marker(&self, campaign: &CampaignId, label: &str) -> Result<(), BidError>;
    async fn has_marker(&self, campaign: &CampaignId, label: &str) -> Result<bool, BidError>;
}

/// Per (campaign, device) bid multipliers. `None` means the device has no
/// target on the campaign.
#[async_trait]
pub trait BidTargetStore: Send + Sync {
    async fn bid_adjustment(
        &self,
        campaign: &CampaignId,
        device: Device,
    ) -> Result<Option<f64>, BidError>;

    async fn set_bid_adjustment(
        &self,
        campaign: &CampaignId,
        device: Device,
        value: f64,
    ) -> Result<(), BidError>;
}

#[derive(Clone)]
pub struct Platform {
    pub metrics: Arc<dyn MetricsSource>,
    pub registry: Arc<dyn CampaignRegistry>,
    pub bids: Arc<dyn BidTargetStore>,
}

impl Platform {
    /// Wraps one backend that implements all three collaborators.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: MetricsSource + CampaignRegistry + BidTargetStore + 'static,
    {
        Self {
            metrics: backend.clone(),
            registry: backend.clone(),
            bids: backend,
        }
    }
}

pub fn build_platform(config: &PlatformConfig, today: NaiveDate) -> Result<Platform> {
    match config.backend {
        PlatformBackend::Http => {
            if config.base_url.trim().is_empty() {
                return Err(anyhow!("platform.base_url is required for the http backend"));
            }
            let client = HttpPlatform::new(
                &config.base_url,
                &config.api_token,
                config.timeout_secs,
                today,
            )?;
            Ok(Platform::from_backend(Arc::new(client)))
        }
        PlatformBackend::Fixture => {
            let path = config
                .fixture_path
                .as_deref()
                .ok_or_else(|| anyhow!("platform.fixture_path is required for the fixture backend"))?;
            let fixture = FixturePlatform::load(path)
                .with_context(|| format!("failed loading fixture platform: {path}"))?;
            Ok(Platform::from_backend(Arc::new(fixture)))
        }
    }
}
