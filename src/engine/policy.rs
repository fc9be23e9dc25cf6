use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::DecisionReason;

/// Slack applied to the dead-band comparison so that a gap of exactly one
/// step (modulo float rounding) counts as outside the band.
pub const DEAD_BAND_EPSILON: f64 = 1e-9;

/// Stored multipliers are rounded to this many decimal places.
const MULTIPLIER_DECIMALS: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentPolicy {
    pub step: f64,
    pub min_conversions: u32,
    pub min_adjustment: f64,
    pub max_adjustment: f64,
}

impl Default for AdjustmentPolicy {
    fn default() -> Self {
        Self {
            step: 0.05,
            min_conversions: 5,
            min_adjustment: 0.10,
            max_adjustment: 1.90,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("step must be positive and finite, got {0}")]
    InvalidStep(f64),
    #[error("adjustment bounds must satisfy 0 <= min <= max, got [{min}, {max}]")]
    InvalidBounds { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub value: f64,
    pub reason: DecisionReason,
}

impl StepOutcome {
    pub fn changes(&self, current: f64) -> bool {
        (self.value - current).abs() > f64::EPSILON
    }
}

impl AdjustmentPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(PolicyError::InvalidStep(self.step));
        }
        let bounds_ok = self.min_adjustment.is_finite()
            && self.max_adjustment.is_finite()
            && self.min_adjustment >= 0.0
            && self.min_adjustment <= self.max_adjustment;
        if !bounds_ok {
            return Err(PolicyError::InvalidBounds {
                min: self.min_adjustment,
                max: self.max_adjustment,
            });
        }
        Ok(())
    }

    /// Moves `current` one step toward `target`.
    ///
    /// A gap smaller than one step leaves the value alone; a gap of exactly
    /// one step moves. Increases need `min_conversions`; without them the
    /// value steps down instead, since an unproven segment should not be
    /// bid up. The result always lies in `[min_adjustment, max_adjustment]`,
    /// even when `current` starts outside it.
    pub fn step_toward(&self, current: f64, target: f64, conversions: f64) -> StepOutcome {
        let gap = (current - target).abs();
        let (proposed, reason) = if gap + DEAD_BAND_EPSILON < self.step {
            (current, DecisionReason::WithinDeadBand)
        } else if target > current {
            if conversions >= f64::from(self.min_conversions) {
                (current + self.step, DecisionReason::Increase)
            } else {
                (current - self.step, DecisionReason::DecreaseUnproven)
            }
        } else {
            (current - self.step, DecisionReason::Decrease)
        };

        let bounded = self.clamp(proposed);
        let value = round_multiplier(bounded);
        if (value - current).abs() <= f64::EPSILON {
            let reason = match reason {
                DecisionReason::WithinDeadBand => reason,
                _ => DecisionReason::AtBound,
            };
            return StepOutcome {
                value: current,
                reason,
            };
        }

        // a clamp that turns the move around is reported as such
        let reversed = match reason {
            DecisionReason::Increase => value < current,
            DecisionReason::Decrease | DecisionReason::DecreaseUnproven => value > current,
            _ => true,
        };
        if (bounded - proposed).abs() > f64::EPSILON && reversed {
            return StepOutcome {
                value,
                reason: DecisionReason::Clamped,
            };
        }
        StepOutcome { value, reason }
    }

    fn clamp(&self, value: f64) -> f64 {
        value.max(self.min_adjustment).min(self.max_adjustment)
    }
}

pub fn round_multiplier(value: f64) -> f64 {
    let scale = 10f64.powi(MULTIPLIER_DECIMALS);
    (value * scale).round() / scale
}
