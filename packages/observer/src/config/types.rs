//! Observer configuration types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::geometry::MIN_THRESHOLD;

/// Default upper bound on notification rounds a headless pump runs.
const DEFAULT_MAX_PUMP_ROUNDS: u32 = 64;

/// Tuning knobs for the observation engine.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ObserverConfig {
    /// Threshold a fresh intersection notifier starts at (1.0 = fully visible).
    pub initial_threshold: f64,

    /// Threshold used in place of a zero ratio so the notifier stays usable.
    pub min_threshold: f64,

    /// Ratios closer than this to the configured threshold count as unchanged.
    pub ratio_tolerance: f64,

    /// Whether late subscribers receive the current rectangle immediately.
    pub replay_late_subscribers: bool,

    /// Maximum notification rounds a headless pump runs before giving up.
    pub max_pump_rounds: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 1.0,
            min_threshold: MIN_THRESHOLD,
            ratio_tolerance: 1e-9,
            replay_late_subscribers: true,
            max_pump_rounds: DEFAULT_MAX_PUMP_ROUNDS,
        }
    }
}

impl ObserverConfig {
    /// Checks that thresholds are usable intersection ratios.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !in_unit_range(self.initial_threshold, 1.0) {
            return Err(ConfigError::Invalid(format!(
                "initialThreshold must be in (0, 1], got {}",
                self.initial_threshold
            )));
        }

        if !in_unit_range(self.min_threshold, self.initial_threshold) {
            return Err(ConfigError::Invalid(format!(
                "minThreshold must be in (0, initialThreshold], got {}",
                self.min_threshold
            )));
        }

        if self.ratio_tolerance.is_nan() || self.ratio_tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ratioTolerance must not be negative, got {}",
                self.ratio_tolerance
            )));
        }

        if self.max_pump_rounds == 0 {
            return Err(ConfigError::Invalid("maxPumpRounds must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Whether `value` lies in `(0, upper]`. NaN never does.
fn in_unit_range(value: f64, upper: f64) -> bool { value > 0.0 && value <= upper }
