use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::BidError;
use crate::platform::CampaignRegistry;
use crate::types::{Campaign, CampaignId};

/// Registry-side mirror of the in-process eligibility set.
#[derive(Clone)]
pub struct MarkerSync {
    registry: Arc<dyn CampaignRegistry>,
    label: String,
}

impl MarkerSync {
    pub fn new(registry: Arc<dyn CampaignRegistry>, label: impl Into<String>) -> Self {
        Self {
            registry,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Campaigns not yet processed in the current run.
///
/// Eligibility lives in memory; when a [`MarkerSync`] is attached every
/// transition is also written through to the registry label. Failures on
/// individual campaigns are logged and ignored.
#[derive(Default)]
pub struct EligibilityTracker {
    remaining: BTreeSet<CampaignId>,
    sync: Option<MarkerSync>,
}

impl EligibilityTracker {
    pub fn in_process() -> Self {
        Self::default()
    }

    pub fn with_marker_sync(sync: MarkerSync) -> Self {
        Self {
            remaining: BTreeSet::new(),
            sync: Some(sync),
        }
    }

    /// Drops anything left by an interrupted run, then marks every active
    /// campaign eligible. Fails only if the marker label cannot be ensured.
    pub async fn reset(&mut self, active: &[Campaign]) -> Result<(), BidError> {
        self.remaining.clear();

        if let Some(sync) = &self.sync {
            sync.registry.ensure_marker_label(&sync.label).await?;
            for campaign in active {
                match sync.registry.has_marker(&campaign.id, &sync.label).await {
                    Ok(true) => {
                        debug!(campaign = %campaign.id, "clearing residual marker");
                        if let Err(err) = sync.registry.clear_marker(&campaign.id, &sync.label).await {
                            warn!(campaign = %campaign.id, "failed clearing residual marker: {err}");
                        }
                    }
                    Ok(false) => {}
                    Err(err) => warn!(campaign = %campaign.id, "failed reading marker: {err}"),
                }
            }
        }

        for campaign in active.iter().filter(|c| c.active) {
            self.remaining.insert(campaign.id.clone());
            if let Some(sync) = &self.sync {
                if let Err(err) = sync.registry.set_marker(&campaign.id, &sync.label).await {
                    warn!(campaign = %campaign.id, "failed applying marker: {err}");
                }
            }
        }
        info!(eligible = self.remaining.len(), "eligibility reset");
        Ok(())
    }

    pub fn is_eligible(&self, campaign: &CampaignId) -> bool {
        self.remaining.contains(campaign)
    }

    /// No-op for campaigns already done or never eligible.
    pub async fn mark_done(&mut self, campaign: &CampaignId) {
        if !self.remaining.remove(campaign) {
            return;
        }
        if let Some(sync) = &self.sync {
            if let Err(err) = sync.registry.clear_marker(campaign, &sync.label).await {
                warn!(campaign = %campaign, "failed clearing marker: {err}");
            }
        }
    }

    /// Clears every marker at run end, whether or not the run succeeded.
    pub async fn finalize(&mut self, active: &[Campaign]) {
        let leftover = self.remaining.len();
        self.remaining.clear();
        if let Some(sync) = &self.sync {
            for campaign in active {
                if let Err(err) = sync.registry.clear_marker(&campaign.id, &sync.label).await {
                    warn!(campaign = %campaign.id, "failed clearing marker during cleanup: {err}");
                }
            }
        }
        info!(unprocessed = leftover, "eligibility finalized");
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}
