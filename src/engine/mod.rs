pub mod evaluator;
pub mod policy;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CampaignId, Device};

pub use evaluator::{AdjustmentEngine, EvaluationError};
pub use policy::{AdjustmentPolicy, PolicyError, StepOutcome};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Increase,
    Decrease,
    /// Target above current, but too few conversions to trust an increase.
    DecreaseUnproven,
    WithinDeadBand,
    /// The clamped step equals the current value.
    AtBound,
    /// Stored value sat outside the bounds and was pulled back in.
    Clamped,
    /// Reported device with no bid target on the campaign.
    Untargetable,
}

impl DecisionReason {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::DecreaseUnproven => "decrease_unproven",
            Self::WithinDeadBand => "within_dead_band",
            Self::AtBound => "at_bound",
            Self::Clamped => "clamped",
            Self::Untargetable => "untargetable",
        }
    }
}

impl Display for DecisionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Error)]
#[error("unknown decision reason: {0}")]
pub struct ReasonParseError(pub String);

impl FromStr for DecisionReason {
    type Err = ReasonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "increase" => Ok(Self::Increase),
            "decrease" => Ok(Self::Decrease),
            "decrease_unproven" => Ok(Self::DecreaseUnproven),
            "within_dead_band" => Ok(Self::WithinDeadBand),
            "at_bound" => Ok(Self::AtBound),
            "clamped" => Ok(Self::Clamped),
            "untargetable" => Ok(Self::Untargetable),
            other => Err(ReasonParseError(other.to_string())),
        }
    }
}

/// One device evaluation within one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub campaign: CampaignId,
    pub campaign_name: String,
    pub device: Device,
    pub window: String,
    pub old: Option<f64>,
    pub new: Option<f64>,
    pub target: f64,
    pub conversions: f64,
    pub reason: DecisionReason,
    pub applied: bool,
}

impl Decision {
    pub fn changed(&self) -> bool {
        match (self.old, self.new) {
            (Some(old), Some(new)) => (new - old).abs() > f64::EPSILON,
            _ => false,
        }
    }
}
