use std::time::Duration;

use hifitime::Unit;

use crate::error::Error;
use crate::ledger;

/// Cache tuning. Defaults request a full week of coverage
/// (42 predictions of 4 hours each).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Ledger capacity, maximum predictions held at once.
    pub max_predictions: u16,
    /// Validity duration per prediction, in minutes.
    pub prediction_period_min: u16,
    /// Remaining coverage, in prediction periods, below which a
    /// preemptive top up is requested.
    pub replacement_threshold: u16,
    /// How long an unanswered request keeps further requests coalesced
    /// before eligibility re-arms.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_predictions: 42,
            prediction_period_min: 240,
            replacement_threshold: 1,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Storage region size this configuration requires.
    pub fn storage_bytes(&self) -> usize {
        ledger::required_bytes(self.max_predictions)
    }
    pub(crate) fn coverage_threshold(&self) -> hifitime::Duration {
        (self.replacement_threshold as f64 * self.prediction_period_min as f64) * Unit::Minute
    }
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_predictions == 0 {
            return Err(Error::InvalidArgument("zero prediction capacity"));
        }
        if self.prediction_period_min == 0 {
            return Err(Error::InvalidArgument("empty prediction period"));
        }
        Ok(())
    }
}
