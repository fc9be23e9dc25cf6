use thiserror::Error;

use crate::types::{CampaignId, Device};

/// Per-campaign failures raised by collaborators and the adjustment engine.
#[derive(Debug, Error)]
pub enum BidError {
    #[error("metrics unavailable for campaign {campaign} over {window}: {reason}")]
    MetricsUnavailable {
        campaign: CampaignId,
        window: String,
        reason: String,
    },
    #[error("campaign {campaign} has no baseline revenue per click over {window}")]
    NoBaselineData { campaign: CampaignId, window: String },
    #[error("device {device} has no bid target on campaign {campaign}")]
    UntargetableDevice { campaign: CampaignId, device: Device },
    #[error("invalid numeric value for {field}: {raw:?}")]
    InvalidNumericData { field: &'static str, raw: String },
    #[error("bid target for {device} on campaign {campaign} unavailable: {reason}")]
    BidTargetUnavailable {
        campaign: CampaignId,
        device: Device,
        reason: String,
    },
    #[error("marker {label} on campaign {campaign} unavailable: {reason}")]
    MarkerUnavailable {
        campaign: CampaignId,
        label: String,
        reason: String,
    },
}

impl BidError {
    /// Missing baseline and untargetable devices are routine skips; the
    /// campaign stays eligible for a later window.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::NoBaselineData { .. } | Self::UntargetableDevice { .. }
        )
    }
}
