use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{AdjustmentPolicy, Decision, DecisionReason};
use crate::error::BidError;
use crate::platform::{BidTargetStore, MetricsSource};
use crate::types::{Campaign, DeviceMetrics};
use crate::window::DateRange;

/// A campaign evaluation that stopped early. `applied` holds the decisions
/// already written to the bid store before the failure.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct EvaluationError {
    pub error: BidError,
    pub applied: Vec<Decision>,
    /// The failure came from a bid write rather than from reading.
    pub writing: bool,
}

impl EvaluationError {
    /// Routine skips only: nothing written and the cause is expected.
    pub fn is_expected(&self) -> bool {
        !self.writing && self.applied.is_empty() && self.error.is_expected()
    }
}

impl From<BidError> for EvaluationError {
    fn from(error: BidError) -> Self {
        Self {
            error,
            applied: Vec::new(),
            writing: false,
        }
    }
}

/// Decides and applies device bid multipliers for one campaign in one window.
pub struct AdjustmentEngine<'a> {
    policy: AdjustmentPolicy,
    metrics: &'a dyn MetricsSource,
    bids: &'a dyn BidTargetStore,
    dry_run: bool,
    report_untargetable: bool,
}

impl<'a> AdjustmentEngine<'a> {
    pub fn new(
        policy: AdjustmentPolicy,
        metrics: &'a dyn MetricsSource,
        bids: &'a dyn BidTargetStore,
    ) -> Self {
        Self {
            policy,
            metrics,
            bids,
            dry_run: false,
            report_untargetable: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn report_untargetable(mut self, report: bool) -> Self {
        self.report_untargetable = report;
        self
    }

    /// Returns one decision per targetable device. Fails with
    /// `NoBaselineData` when the campaign has no revenue per click to
    /// compare against; the caller leaves such campaigns eligible.
    ///
    /// Every device is decided before any bid is written.
    pub async fn evaluate_campaign(
        &self,
        campaign: &Campaign,
        window: &DateRange,
    ) -> Result<Vec<Decision>, EvaluationError> {
        let totals = self.metrics.campaign_metrics(&campaign.id, window).await?;
        let baseline = totals.revenue_per_click();
        if baseline <= 0.0 {
            return Err(BidError::NoBaselineData {
                campaign: campaign.id.clone(),
                window: window.to_string(),
            }
            .into());
        }

        let rows = self.metrics.device_metrics(&campaign.id, window).await?;
        let mut decisions = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(decision) = self.decide_device(campaign, window, &row, baseline).await? {
                decisions.push(decision);
            }
        }
        self.apply(decisions).await
    }

    async fn decide_device(
        &self,
        campaign: &Campaign,
        window: &DateRange,
        row: &DeviceMetrics,
        baseline: f64,
    ) -> Result<Option<Decision>, BidError> {
        let target = row.revenue_per_click() / baseline;
        let current = if row.device.is_targetable() {
            self.bids.bid_adjustment(&campaign.id, row.device).await?
        } else {
            None
        };

        let Some(current) = current else {
            let skipped = BidError::UntargetableDevice {
                campaign: campaign.id.clone(),
                device: row.device,
            };
            debug!(campaign = %campaign.id, device = %row.device, "{skipped}");
            if !self.report_untargetable {
                return Ok(None);
            }
            return Ok(Some(Decision {
                campaign: campaign.id.clone(),
                campaign_name: campaign.name.clone(),
                device: row.device,
                window: window.to_string(),
                old: None,
                new: None,
                target,
                conversions: row.conversions,
                reason: DecisionReason::Untargetable,
                applied: false,
            }));
        };

        let outcome = self.policy.step_toward(current, target, row.conversions);
        if !outcome.changes(current) {
            debug!(
                campaign = %campaign.id,
                device = %row.device,
                window = %window,
                current,
                target,
                reason = %outcome.reason,
                "bid adjustment unchanged"
            );
        }

        Ok(Some(Decision {
            campaign: campaign.id.clone(),
            campaign_name: campaign.name.clone(),
            device: row.device,
            window: window.to_string(),
            old: Some(current),
            new: Some(outcome.value),
            target,
            conversions: row.conversions,
            reason: outcome.reason,
            applied: false,
        }))
    }

    /// Writes every changed decision in order, stopping at the first failed
    /// write.
    async fn apply(&self, mut decisions: Vec<Decision>) -> Result<Vec<Decision>, EvaluationError> {
        let mut failed = None;
        for decision in decisions.iter_mut().filter(|d| d.changed()) {
            let Some(new) = decision.new else {
                continue;
            };
            if !self.dry_run {
                if let Err(err) = self
                    .bids
                    .set_bid_adjustment(&decision.campaign, decision.device, new)
                    .await
                {
                    warn!(
                        campaign = %decision.campaign,
                        device = %decision.device,
                        "bid write failed: {err}"
                    );
                    failed = Some(err);
                    break;
                }
                decision.applied = true;
            }
            info!(
                campaign = %decision.campaign,
                device = %decision.device,
                window = %decision.window,
                old = decision.old,
                new,
                target = decision.target,
                reason = %decision.reason,
                dry_run = self.dry_run,
                "bid adjustment"
            );
        }

        match failed {
            Some(error) => Err(EvaluationError {
                error,
                applied: decisions.into_iter().filter(|d| d.applied).collect(),
                writing: true,
            }),
            None => Ok(decisions),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::platform::fixture::{FixtureData, FixturePlatform};
    use crate::types::{CampaignId, Device};

    /// Bid store whose tablet writes come back as not found.
    struct TabletWritesRejected(FixturePlatform);

    #[async_trait]
    impl BidTargetStore for TabletWritesRejected {
        async fn bid_adjustment(
            &self,
            campaign: &CampaignId,
            device: Device,
        ) -> Result<Option<f64>, BidError> {
            self.0.bid_adjustment(campaign, device).await
        }

        async fn set_bid_adjustment(
            &self,
            campaign: &CampaignId,
            device: Device,
            value: f64,
        ) -> Result<(), BidError> {
            if device == Device::Tablet {
                return Err(BidError::UntargetableDevice {
                    campaign: campaign.clone(),
                    device,
                });
            }
            self.0.set_bid_adjustment(campaign, device, value).await
        }
    }

    fn platform(devices: serde_json::Value, modifiers: serde_json::Value) -> FixturePlatform {
        let data: FixtureData = serde_json::from_value(json!({
            "campaigns": [{
                "id": "7",
                "name": "Shoes",
                "bid_modifiers": modifiers,
                "windows": {
                    "*": {
                        "campaign": { "clicks": 1000, "conversions": 40, "conversion_value": "1,000.00" },
                        "devices": devices
                    }
                }
            }]
        }))
        .expect("fixture");
        FixturePlatform::new(data)
    }

    fn campaign() -> Campaign {
        Campaign::new("7", "Shoes")
    }

    fn find(decisions: &[Decision], device: Device) -> &Decision {
        decisions
            .iter()
            .find(|d| d.device == device)
            .expect("decision for device")
    }

    #[tokio::test]
    async fn applies_bounded_steps_per_device() {
        let fixture = platform(
            json!([
                { "device": "Computers", "clicks": 500, "conversions": 10, "conversion_value": "750" },
                { "device": "Tablets with full browsers", "clicks": 100, "conversions": 2, "conversion_value": "20" },
                { "device": "Mobile devices with full browsers", "clicks": 100, "conversions": 3, "conversion_value": "180" }
            ]),
            json!({ "desktop": 1.0, "tablet": 1.0, "mobile_full_browser": 1.0 }),
        );
        let engine = AdjustmentEngine::new(AdjustmentPolicy::default(), &fixture, &fixture);
        let decisions = engine
            .evaluate_campaign(&campaign(), &DateRange::LastYear)
            .await
            .expect("evaluated");

        let desktop = find(&decisions, Device::Desktop);
        assert_eq!(desktop.reason, DecisionReason::Increase);
        assert!((desktop.target - 1.5).abs() < 1e-9);
        assert_eq!(desktop.new, Some(1.05));

        let tablet = find(&decisions, Device::Tablet);
        assert_eq!(tablet.reason, DecisionReason::Decrease);
        assert_eq!(tablet.new, Some(0.95));

        let mobile = find(&decisions, Device::MobileFullBrowser);
        assert_eq!(mobile.reason, DecisionReason::DecreaseUnproven);
        assert_eq!(mobile.new, Some(0.95));

        let id = CampaignId::from("7");
        assert_eq!(fixture.bid_modifier(&id, Device::Desktop), Some(1.05));
        assert_eq!(fixture.bid_modifier(&id, Device::Tablet), Some(0.95));
        assert_eq!(fixture.writes().len(), 3);
    }

    #[tokio::test]
    async fn zero_campaign_clicks_is_no_baseline() {
        let data: FixtureData = serde_json::from_value(json!({
            "campaigns": [{
                "id": "7",
                "bid_modifiers": { "desktop": 1.0 },
                "windows": { "*": { "campaign": { "clicks": 0, "conversion_value": "0" } } }
            }]
        }))
        .expect("fixture");
        let fixture = FixturePlatform::new(data);
        let engine = AdjustmentEngine::new(AdjustmentPolicy::default(), &fixture, &fixture);
        let err = engine
            .evaluate_campaign(&campaign(), &DateRange::AllTime)
            .await
            .expect_err("no baseline");
        assert!(matches!(err.error, BidError::NoBaselineData { .. }));
        assert!(err.is_expected());
        assert!(fixture.writes().is_empty());
    }

    #[tokio::test]
    async fn skips_untargetable_devices_unless_reported() {
        let devices = json!([
            { "device": "Computers", "clicks": 500, "conversions": 10, "conversion_value": "500" },
            { "device": "Other", "clicks": 50, "conversions": 1, "conversion_value": "10" },
            { "device": "Tablets with full browsers", "clicks": 50, "conversions": 1, "conversion_value": "10" }
        ]);
        let fixture = platform(devices.clone(), json!({ "desktop": 1.0 }));
        let engine = AdjustmentEngine::new(AdjustmentPolicy::default(), &fixture, &fixture);
        let decisions = engine
            .evaluate_campaign(&campaign(), &DateRange::AllTime)
            .await
            .expect("evaluated");
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].reason, DecisionReason::WithinDeadBand);
        assert!(fixture.writes().is_empty());

        let fixture = platform(devices, json!({ "desktop": 1.0 }));
        let engine = AdjustmentEngine::new(AdjustmentPolicy::default(), &fixture, &fixture)
            .report_untargetable(true);
        let decisions = engine
            .evaluate_campaign(&campaign(), &DateRange::AllTime)
            .await
            .expect("evaluated");
        let untargetable: Vec<_> = decisions
            .iter()
            .filter(|d| d.reason == DecisionReason::Untargetable)
            .collect();
        assert_eq!(untargetable.len(), 2);
        assert!(untargetable.iter().all(|d| d.old.is_none() && !d.applied));
    }

    #[tokio::test]
    async fn dry_run_decides_without_writing() {
        let fixture = platform(
            json!([{ "device": "Computers", "clicks": 500, "conversions": 10, "conversion_value": "750" }]),
            json!({ "desktop": 1.89 }),
        );
        let policy = AdjustmentPolicy::default();
        let engine = AdjustmentEngine::new(policy, &fixture, &fixture).dry_run(true);
        let decisions = engine
            .evaluate_campaign(&campaign(), &DateRange::AllTime)
            .await
            .expect("evaluated");
        assert_eq!(decisions[0].new, Some(1.84));
        assert!(!decisions[0].applied);
        assert!(fixture.writes().is_empty());
    }

    #[tokio::test]
    async fn caps_increase_at_max_adjustment() {
        let fixture = platform(
            json!([{ "device": "Computers", "clicks": 100, "conversions": 10, "conversion_value": "200" }]),
            json!({ "desktop": 1.89 }),
        );
        let engine = AdjustmentEngine::new(AdjustmentPolicy::default(), &fixture, &fixture);
        let decisions = engine
            .evaluate_campaign(&campaign(), &DateRange::AllTime)
            .await
            .expect("evaluated");
        assert_eq!(decisions[0].new, Some(1.9));
        assert_eq!(
            fixture.bid_modifier(&CampaignId::from("7"), Device::Desktop),
            Some(1.9)
        );
    }

    #[tokio::test]
    async fn failed_write_reports_what_was_already_applied() {
        let store = TabletWritesRejected(platform(
            json!([
                { "device": "Computers", "clicks": 500, "conversions": 10, "conversion_value": "750" },
                { "device": "Tablets with full browsers", "clicks": 100, "conversions": 2, "conversion_value": "20" }
            ]),
            json!({ "desktop": 1.0, "tablet": 1.0 }),
        ));
        let engine = AdjustmentEngine::new(AdjustmentPolicy::default(), &store.0, &store);
        let err = engine
            .evaluate_campaign(&campaign(), &DateRange::LastYear)
            .await
            .expect_err("tablet write rejected");

        assert!(err.writing);
        assert!(!err.is_expected());
        assert_eq!(err.applied.len(), 1);
        assert_eq!(err.applied[0].device, Device::Desktop);
        assert!(err.applied[0].applied);
        assert_eq!(
            store.0.bid_modifier(&CampaignId::from("7"), Device::Desktop),
            Some(1.05)
        );
        assert_eq!(
            store.0.bid_modifier(&CampaignId::from("7"), Device::Tablet),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn failed_read_writes_nothing() {
        let fixture = platform(
            json!([
                { "device": "Computers", "clicks": 500, "conversions": 10, "conversion_value": "750" },
                { "device": "Tablets with full browsers", "clicks": 100, "conversions": 2, "conversion_value": "n/a" }
            ]),
            json!({ "desktop": 1.0, "tablet": 1.0 }),
        );
        let engine = AdjustmentEngine::new(AdjustmentPolicy::default(), &fixture, &fixture);
        let err = engine
            .evaluate_campaign(&campaign(), &DateRange::LastYear)
            .await
            .expect_err("garbled revenue");
        assert!(matches!(err.error, BidError::InvalidNumericData { .. }));
        assert!(err.applied.is_empty());
        assert!(fixture.writes().is_empty());
    }
}
