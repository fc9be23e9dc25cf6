use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::BidError;
use crate::metrics::{device_rows_to_metrics, CampaignReportRow, DeviceReportRow};
use crate::platform::{BidTargetStore, CampaignRegistry, MetricsSource};
use crate::types::{Campaign, CampaignId, CampaignMetrics, Device, DeviceMetrics};
use crate::window::DateRange;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6;
const ERROR_PREVIEW_CHARS: usize = 180;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BidModifierBody {
    bid_modifier: f64,
}

/// REST client for the advertising platform. Implements every collaborator
/// the run needs.
pub struct HttpPlatform {
    client: Client,
    base_url: String,
    api_token: String,
    today: NaiveDate,
}

impl HttpPlatform {
    pub fn new(base_url: &str, api_token: &str, timeout_secs: u64, today: NaiveDate) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("device-bid-tuner/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            today,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        if self.api_token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_token)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>> {
        let url = self.url(path);
        let response = self
            .authorized(self.client.get(&url).query(query))
            .send()
            .await
            .with_context(|| format!("failed GET request: {url}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .with_context(|| format!("failed reading response body: {url}"))?;
        if !status.is_success() {
            let preview: String = body.chars().take(ERROR_PREVIEW_CHARS).collect();
            return Err(anyhow!("GET {url} returned {status}: {preview}"));
        }
        let parsed = serde_json::from_str(&body).with_context(|| format!("invalid JSON response: {url}"))?;
        Ok(Some(parsed))
    }

    /// Sends a mutating request; 404 is reported as `Ok(false)`.
    async fn send(&self, req: RequestBuilder, what: &str) -> Result<bool> {
        let response = self
            .authorized(req)
            .send()
            .await
            .with_context(|| format!("failed request: {what}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(ERROR_PREVIEW_CHARS).collect();
            return Err(anyhow!("{what} returned {status}: {preview}"));
        }
        Ok(true)
    }

    fn during(&self, window: &DateRange) -> String {
        window.during(self.today)
    }

    fn bid_path(campaign: &CampaignId, device: Device) -> String {
        format!("/campaigns/{campaign}/devices/{}/bid_modifier", device.as_slug())
    }

    fn marker_error(campaign: &CampaignId, label: &str, err: anyhow::Error) -> BidError {
        BidError::MarkerUnavailable {
            campaign: campaign.clone(),
            label: label.to_string(),
            reason: format!("{err:#}"),
        }
    }
}

#[async_trait]
impl MetricsSource for HttpPlatform {
    async fn campaign_metrics(
        &self,
        campaign: &CampaignId,
        window: &DateRange,
    ) -> Result<CampaignMetrics, BidError> {
        let during = self.during(window);
        let row: Option<CampaignReportRow> = self
            .get_json(&format!("/campaigns/{campaign}/report"), &[("during", during.clone())])
            .await
            .map_err(|err| BidError::MetricsUnavailable {
                campaign: campaign.clone(),
                window: during.clone(),
                reason: format!("{err:#}"),
            })?;
        row.unwrap_or_default().to_metrics()
    }

    async fn device_metrics(
        &self,
        campaign: &CampaignId,
        window: &DateRange,
    ) -> Result<Vec<DeviceMetrics>, BidError> {
        let during = self.during(window);
        let rows: Option<Vec<DeviceReportRow>> = self
            .get_json(
                &format!("/campaigns/{campaign}/report/devices"),
                &[("during", during.clone())],
            )
            .await
            .map_err(|err| BidError::MetricsUnavailable {
                campaign: campaign.clone(),
                window: during.clone(),
                reason: format!("{err:#}"),
            })?;
        device_rows_to_metrics(&rows.unwrap_or_default())
    }
}

#[async_trait]
impl CampaignRegistry for HttpPlatform {
    async fn list_active_campaigns(&self) -> Result<Vec<Campaign>> {
        let campaigns: Option<Vec<Campaign>> = self
            .get_json("/campaigns", &[("status", "ENABLED".to_string())])
            .await?;
        Ok(campaigns.unwrap_or_default())
    }

    async fn list_active_eligible_campaigns(
        &self,
        window: &DateRange,
        min_conversions: u32,
    ) -> Result<Vec<Campaign>> {
        let campaigns: Option<Vec<Campaign>> = self
            .get_json(
                "/campaigns",
                &[
                    ("status", "ENABLED".to_string()),
                    ("during", self.during(window)),
                    ("min_conversions", min_conversions.to_string()),
                ],
            )
            .await?;
        Ok(campaigns.unwrap_or_default())
    }

    async fn ensure_marker_label(&self, label: &str) -> Result<(), BidError> {
        let lookup = |err: anyhow::Error| BidError::MarkerUnavailable {
            campaign: CampaignId::from("*"),
            label: label.to_string(),
            reason: format!("{err:#}"),
        };
        let existing: Option<serde_json::Value> = self
            .get_json(&format!("/labels/{label}"), &[])
            .await
            .map_err(lookup)?;
        if existing.is_some() {
            return Ok(());
        }
        let req = self.client.post(self.url("/labels")).json(&json!({
            "name": label,
            "description": "device-bid-tuner processing marker",
        }));
        self.send(req, "create label").await.map_err(lookup)?;
        Ok(())
    }

    async fn set_marker(&self, campaign: &CampaignId, label: &str) -> Result<(), BidError> {
        let req = self
            .client
            .put(self.url(&format!("/campaigns/{campaign}/labels/{label}")));
        self.send(req, "apply label")
            .await
            .map_err(|err| Self::marker_error(campaign, label, err))?;
        Ok(())
    }

    async fn clear_marker(&self, campaign: &CampaignId, label: &str) -> Result<(), BidError> {
        let req = self
            .client
            .delete(self.url(&format!("/campaigns/{campaign}/labels/{label}")));
        self.send(req, "remove label")
            .await
            .map_err(|err| Self::marker_error(campaign, label, err))?;
        Ok(())
    }

    async fn has_marker(&self, campaign: &CampaignId, label: &str) -> Result<bool, BidError> {
        let labels: Option<Vec<String>> = self
            .get_json(&format!("/campaigns/{campaign}/labels"), &[])
            .await
            .map_err(|err| Self::marker_error(campaign, label, err))?;
        Ok(labels.unwrap_or_default().iter().any(|l| l == label))
    }
}

#[async_trait]
impl BidTargetStore for HttpPlatform {
    async fn bid_adjustment(
        &self,
        campaign: &CampaignId,
        device: Device,
    ) -> Result<Option<f64>, BidError> {
        let body: Option<BidModifierBody> = self
            .get_json(&Self::bid_path(campaign, device), &[])
            .await
            .map_err(|err| BidError::BidTargetUnavailable {
                campaign: campaign.clone(),
                device,
                reason: format!("{err:#}"),
            })?;
        Ok(body.map(|b| b.bid_modifier))
    }

    async fn set_bid_adjustment(
        &self,
        campaign: &CampaignId,
        device: Device,
        value: f64,
    ) -> Result<(), BidError> {
        let req = self
            .client
            .put(self.url(&Self::bid_path(campaign, device)))
            .json(&BidModifierBody {
                bid_modifier: value,
            });
        let found = self
            .send(req, "set bid modifier")
            .await
            .map_err(|err| BidError::BidTargetUnavailable {
                campaign: campaign.clone(),
                device,
                reason: format!("{err:#}"),
            })?;
        if !found {
            return Err(BidError::UntargetableDevice {
                campaign: campaign.clone(),
                device,
            });
        }
        Ok(())
    }
}
