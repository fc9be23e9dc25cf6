pub mod tracker;

pub use tracker::{EligibilityTracker, MarkerSync};
