//! One full run: reset eligibility, evaluate every window in order, clean up.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{AdjustmentEngine, AdjustmentPolicy, Decision, EvaluationError};
use crate::eligibility::{EligibilityTracker, MarkerSync};
use crate::error::BidError;
use crate::platform::Platform;
use crate::types::{Campaign, CampaignId, CampaignKind};
use crate::window::{DateRange, WindowScheduler};

#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub policy: AdjustmentPolicy,
    pub scheduler: WindowScheduler,
    pub dry_run: bool,
    pub report_untargetable: bool,
    /// Registry label to mirror eligibility into; `None` keeps it in-process.
    pub marker_label: Option<String>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            policy: AdjustmentPolicy::default(),
            scheduler: WindowScheduler::default(),
            dry_run: false,
            report_untargetable: false,
            marker_label: None,
        }
    }
}

impl RunConfiguration {
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        if self.scheduler.is_empty() {
            return Err(anyhow!("at least one lookback window is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSkip {
    pub campaign: CampaignId,
    pub window: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignFailure {
    pub campaign: Option<CampaignId>,
    pub window: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowSummary {
    pub window: String,
    pub candidates: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub changes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub windows: Vec<WindowSummary>,
    pub decisions: Vec<Decision>,
    pub skipped: Vec<CampaignSkip>,
    pub failures: Vec<CampaignFailure>,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            started_at,
            finished_at: None,
            dry_run,
            windows: Vec::new(),
            decisions: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn changes(&self) -> usize {
        self.decisions.iter().filter(|d| d.changed()).count()
    }

    pub fn evaluated_campaigns(&self) -> usize {
        self.windows.iter().map(|w| w.evaluated).sum()
    }
}

pub struct BidTuner {
    platform: Platform,
    config: RunConfiguration,
}

impl BidTuner {
    pub fn new(platform: Platform, config: RunConfiguration) -> Self {
        Self { platform, config }
    }

    /// Fails only when eligibility cannot be reset or finalized; per-campaign
    /// problems end up in the report instead.
    pub async fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let mut report = RunReport::new(self.config.dry_run);
        info!(
            run_id = %report.run_id,
            windows = self.config.scheduler.len(),
            dry_run = self.config.dry_run,
            "starting bid adjustment run"
        );

        let active = self
            .platform
            .registry
            .list_active_campaigns()
            .await
            .context("failed listing active campaigns for eligibility reset")?;
        let mut tracker = match &self.config.marker_label {
            Some(label) => EligibilityTracker::with_marker_sync(MarkerSync::new(
                self.platform.registry.clone(),
                label.clone(),
            )),
            None => EligibilityTracker::in_process(),
        };
        tracker
            .reset(&active)
            .await
            .context("failed resetting eligibility markers")?;

        for window in self.config.scheduler.windows() {
            let summary = self.run_window(window, &mut tracker, &mut report).await;
            report.windows.push(summary);
        }

        let sweep = match self.platform.registry.list_active_campaigns().await {
            Ok(campaigns) => campaigns,
            Err(err) => {
                tracker.finalize(&active).await;
                return Err(err.context("failed listing active campaigns for cleanup"));
            }
        };
        tracker.finalize(&sweep).await;

        report.finished_at = Some(Utc::now());
        info!(
            run_id = %report.run_id,
            evaluated = report.evaluated_campaigns(),
            changes = report.changes(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "bid adjustment run finished"
        );
        Ok(report)
    }

    async fn run_window(
        &self,
        window: &DateRange,
        tracker: &mut EligibilityTracker,
        report: &mut RunReport,
    ) -> WindowSummary {
        let label = window.to_string();
        let mut summary = WindowSummary {
            window: label.clone(),
            ..WindowSummary::default()
        };
        info!(window = %label, remaining = tracker.remaining(), "evaluating window");

        let candidates = match self
            .platform
            .registry
            .list_active_eligible_campaigns(window, self.config.policy.min_conversions)
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(window = %label, "failed listing eligible campaigns: {err:#}");
                summary.failed += 1;
                report.failures.push(CampaignFailure {
                    campaign: None,
                    window: label,
                    error: format!("{err:#}"),
                });
                return summary;
            }
        };

        let engine = AdjustmentEngine::new(
            self.config.policy,
            self.platform.metrics.as_ref(),
            self.platform.bids.as_ref(),
        )
        .dry_run(self.config.dry_run)
        .report_untargetable(self.config.report_untargetable);

        for kind in CampaignKind::ALL {
            let batch: Vec<&Campaign> = candidates
                .iter()
                .filter(|c| c.kind == kind && c.active && tracker.is_eligible(&c.id))
                .collect();
            if batch.is_empty() {
                continue;
            }
            info!(window = %label, "--- {kind} ({})", batch.len());
            summary.candidates += batch.len();

            for campaign in batch {
                match engine.evaluate_campaign(campaign, window).await {
                    Ok(decisions) => {
                        tracker.mark_done(&campaign.id).await;
                        summary.evaluated += 1;
                        summary.changes += decisions.iter().filter(|d| d.changed()).count();
                        report.decisions.extend(decisions);
                    }
                    Err(err) if err.is_expected() => {
                        debug!(campaign = %campaign.id, window = %label, "skipping campaign: {err}");
                        summary.skipped += 1;
                        report.skipped.push(CampaignSkip {
                            campaign: campaign.id.clone(),
                            window: label.clone(),
                            reason: err.to_string(),
                        });
                    }
                    Err(err) => {
                        let EvaluationError { error, applied, .. } = err;
                        if applied.is_empty() {
                            warn!(campaign = %campaign.id, window = %label, "campaign failed: {error}");
                        } else {
                            // written bids must not be stepped again by a later window
                            warn!(
                                campaign = %campaign.id,
                                window = %label,
                                applied = applied.len(),
                                "campaign partially applied: {error}"
                            );
                            tracker.mark_done(&campaign.id).await;
                            summary.changes += applied.len();
                            report.decisions.extend(applied);
                        }
                        summary.failed += 1;
                        report.failures.push(failure(campaign, &label, &error));
                    }
                }
            }
        }
        summary
    }
}

fn failure(campaign: &Campaign, window: &str, err: &BidError) -> CampaignFailure {
    CampaignFailure {
        campaign: Some(campaign.id.clone()),
        window: window.to_string(),
        error: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::platform::fixture::{FixtureData, FixturePlatform};
    use crate::platform::BidTargetStore;
    use crate::types::Device;

    /// Fails the `fail_on`-th bid write (1-based), once.
    struct FlakyBids {
        inner: Arc<FixturePlatform>,
        calls: AtomicUsize,
        fail_on: usize,
        not_found: bool,
    }

    #[async_trait]
    impl BidTargetStore for FlakyBids {
        async fn bid_adjustment(
            &self,
            campaign: &CampaignId,
            device: Device,
        ) -> Result<Option<f64>, BidError> {
            self.inner.bid_adjustment(campaign, device).await
        }

        async fn set_bid_adjustment(
            &self,
            campaign: &CampaignId,
            device: Device,
            value: f64,
        ) -> Result<(), BidError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                if self.not_found {
                    return Err(BidError::UntargetableDevice {
                        campaign: campaign.clone(),
                        device,
                    });
                }
                return Err(BidError::BidTargetUnavailable {
                    campaign: campaign.clone(),
                    device,
                    reason: "503 Service Unavailable".to_string(),
                });
            }
            self.inner.set_bid_adjustment(campaign, device, value).await
        }
    }

    fn fixture(value: serde_json::Value) -> Arc<FixturePlatform> {
        let data: FixtureData = serde_json::from_value(value).expect("fixture");
        Arc::new(FixturePlatform::new(data))
    }

    fn report_row(clicks: u32, conversions: u32, revenue: &str) -> serde_json::Value {
        json!({ "clicks": clicks, "conversions": conversions, "conversion_value": revenue })
    }

    #[tokio::test]
    async fn later_windows_only_see_unprocessed_campaigns() {
        let platform = fixture(json!({
            "campaigns": [
                {
                    "id": "a",
                    "bid_modifiers": { "desktop": 1.0 },
                    "windows": {
                        "*": {
                            "campaign": report_row(1000, 20, "1000"),
                            "devices": [{ "device": "Computers", "clicks": 500, "conversions": 10, "conversion_value": "750" }]
                        }
                    }
                },
                {
                    "id": "b",
                    "bid_modifiers": { "desktop": 1.0 },
                    "windows": {
                        "LAST_YEAR": { "campaign": report_row(0, 6, "0") },
                        "ALL_TIME": {
                            "campaign": report_row(200, 8, "400"),
                            "devices": [{ "device": "Computers", "clicks": 100, "conversions": 8, "conversion_value": "100" }]
                        }
                    }
                }
            ]
        }));
        let tuner = BidTuner::new(Platform::from_backend(platform.clone()), RunConfiguration::default());
        let report = tuner.run().await.expect("run");

        assert_eq!(report.windows.len(), 2);
        assert_eq!(report.windows[0].evaluated, 1);
        assert_eq!(report.windows[0].skipped, 1);
        assert_eq!(report.windows[1].evaluated, 1);
        assert_eq!(report.skipped[0].campaign, CampaignId::from("b"));

        let a_calls = platform
            .metric_calls()
            .into_iter()
            .filter(|(id, _)| id.as_str() == "a")
            .count();
        assert_eq!(a_calls, 2, "campaign and device report for one window only");
        assert_eq!(
            platform.bid_modifier(&"a".into(), Device::Desktop),
            Some(1.05)
        );
        assert_eq!(
            platform.bid_modifier(&"b".into(), Device::Desktop),
            Some(0.95)
        );
    }

    #[tokio::test]
    async fn one_failing_campaign_does_not_abort_the_run() {
        let platform = fixture(json!({
            "campaigns": [
                {
                    "id": "broken",
                    "metrics_unavailable": true,
                    "windows": { "*": { "campaign": report_row(10, 10, "10") } }
                },
                {
                    "id": "garbled",
                    "bid_modifiers": { "desktop": 1.0 },
                    "windows": {
                        "*": {
                            "campaign": report_row(100, 10, "100"),
                            "devices": [{ "device": "Computers", "clicks": 10, "conversions": 9, "conversion_value": "n/a" }]
                        }
                    }
                },
                {
                    "id": "fine",
                    "bid_modifiers": { "tablet": 1.0 },
                    "windows": {
                        "*": {
                            "campaign": report_row(100, 10, "100"),
                            "devices": [{ "device": "Tablets with full browsers", "clicks": 10, "conversions": 1, "conversion_value": "1" }]
                        }
                    }
                }
            ]
        }));
        let tuner = BidTuner::new(Platform::from_backend(platform.clone()), RunConfiguration::default());
        let report = tuner.run().await.expect("run");

        let failed: Vec<_> = report
            .failures
            .iter()
            .filter_map(|f| f.campaign.as_ref().map(|c| c.as_str().to_string()))
            .collect();
        // failed campaigns stay eligible, so the second window retries them
        assert_eq!(failed, vec!["broken", "garbled", "broken", "garbled"]);
        assert_eq!(
            platform.bid_modifier(&"fine".into(), Device::Tablet),
            Some(0.95)
        );
    }

    #[tokio::test]
    async fn stored_values_stay_within_bounds() {
        let platform = fixture(json!({
            "campaigns": [{
                "id": "x",
                "bid_modifiers": { "desktop": 1.88, "tablet": 0.12 },
                "windows": {
                    "*": {
                        "campaign": report_row(100, 50, "100"),
                        "devices": [
                            { "device": "Computers", "clicks": 10, "conversions": 40, "conversion_value": "90" },
                            { "device": "Tablets with full browsers", "clicks": 10, "conversions": 0, "conversion_value": "0" }
                        ]
                    }
                }
            }]
        }));
        let policy = AdjustmentPolicy::default();
        for _ in 0..3 {
            let tuner = BidTuner::new(
                Platform::from_backend(platform.clone()),
                RunConfiguration::default(),
            );
            tuner.run().await.expect("run");
            for device in [Device::Desktop, Device::Tablet] {
                let value = platform.bid_modifier(&"x".into(), device).expect("value");
                assert!(value >= policy.min_adjustment && value <= policy.max_adjustment);
            }
        }
        assert_eq!(platform.bid_modifier(&"x".into(), Device::Desktop), Some(1.9));
        assert_eq!(platform.bid_modifier(&"x".into(), Device::Tablet), Some(0.1));
    }

    #[tokio::test]
    async fn rejects_empty_window_schedule() {
        let platform = fixture(json!({ "campaigns": [] }));
        let config = RunConfiguration {
            scheduler: WindowScheduler::new(Vec::new()),
            ..RunConfiguration::default()
        };
        let tuner = BidTuner::new(Platform::from_backend(platform), config);
        assert!(tuner.run().await.is_err());
    }

    #[tokio::test]
    async fn partially_applied_campaign_is_not_stepped_again() {
        for not_found in [false, true] {
            let platform = fixture(json!({
                "campaigns": [
                    {
                        "id": "a",
                        "bid_modifiers": { "desktop": 1.0, "tablet": 1.0 },
                        "windows": {
                            "*": {
                                "campaign": report_row(1000, 20, "1000"),
                                "devices": [
                                    { "device": "Computers", "clicks": 500, "conversions": 10, "conversion_value": "750" },
                                    { "device": "Tablets with full browsers", "clicks": 100, "conversions": 2, "conversion_value": "20" }
                                ]
                            }
                        }
                    },
                    {
                        "id": "b",
                        "bid_modifiers": { "desktop": 1.0 },
                        "windows": {
                            "*": {
                                "campaign": report_row(100, 10, "100"),
                                "devices": [{ "device": "Computers", "clicks": 50, "conversions": 5, "conversion_value": "10" }]
                            }
                        }
                    }
                ]
            }));
            let bids = Arc::new(FlakyBids {
                inner: platform.clone(),
                calls: AtomicUsize::new(0),
                fail_on: 2,
                not_found,
            });
            let backend = Platform {
                metrics: platform.clone(),
                registry: platform.clone(),
                bids,
            };
            let report = BidTuner::new(backend, RunConfiguration::default())
                .run()
                .await
                .expect("run");

            assert_eq!(platform.bid_modifier(&"a".into(), Device::Desktop), Some(1.05));
            assert_eq!(platform.bid_modifier(&"a".into(), Device::Tablet), Some(1.0));
            // the other campaign is unaffected
            assert_eq!(platform.bid_modifier(&"b".into(), Device::Desktop), Some(0.95));

            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].window, "LAST_YEAR");
            assert_eq!(report.failures[0].campaign, Some(CampaignId::from("a")));
            assert!(report.skipped.is_empty());
            assert_eq!(report.windows[0].changes, 2);
            assert_eq!(report.windows[1].candidates, 0);

            let applied: Vec<_> = report
                .decisions
                .iter()
                .filter(|d| d.campaign.as_str() == "a")
                .collect();
            assert_eq!(applied.len(), 1);
            assert_eq!(applied[0].device, Device::Desktop);
            assert!(applied[0].applied);
        }
    }
}
