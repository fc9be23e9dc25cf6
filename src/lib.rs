//! Incremental device bid adjustments for advertising campaigns.
//!
//! Each run walks an ordered list of lookback windows. For every campaign
//! that has not yet been processed in the run, device revenue per click is
//! compared against the campaign average and each device multiplier moves
//! one bounded step toward that ratio.

pub mod config;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod output;
pub mod platform;
pub mod runner;
pub mod snapshot;
pub mod types;
pub mod window;
