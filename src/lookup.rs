//! Prediction lookup: which stored record applies right now.
use itertools::Itertools;
use log::debug;

use crate::error::Error;
use crate::prediction::{Prediction, PredictionSet};
use crate::time::TimeEstimate;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How much the returned record should be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeConfidence {
    /// Absolute time was known and falls inside the record's interval.
    Known,
    /// Absolute time was uncertain, treat the resulting fix as best effort.
    Approximate,
}

/// Successful lookup result.
#[derive(Debug, Clone)]
pub struct PredictionMatch {
    /// Position in the stored set, `0..len`.
    pub index: usize,
    pub prediction: Prediction,
    pub confidence: TimeConfidence,
}

/// Selects the single record applying at the estimated current time.
/// Intervals are scanned in ascending start order; the first half open
/// interval containing the timestamp wins (non overlap is guaranteed by
/// construction).
pub(crate) fn find(set: &PredictionSet, estimate: TimeEstimate) -> Result<PredictionMatch, Error> {
    if set.is_empty() {
        return Err(Error::NotYetKnown);
    }
    match estimate {
        TimeEstimate::Known(t) => {
            if let Some((index, prediction)) = set.iter().find_position(|p| p.contains(t)) {
                debug!("{:?} - covered by prediction #{}", t, index);
                return Ok(PredictionMatch {
                    index,
                    prediction: prediction.clone(),
                    confidence: TimeConfidence::Known,
                });
            }
            // past the last interval, or a gap: either way nothing useful left
            Err(Error::Expired)
        },
        TimeEstimate::Approximate(t) => {
            if let Some((index, prediction)) = set.iter().find_position(|p| p.contains(t)) {
                return Ok(PredictionMatch {
                    index,
                    prediction: prediction.clone(),
                    confidence: TimeConfidence::Approximate,
                });
            }
            earliest(set)
        },
        TimeEstimate::Unknown => earliest(set),
    }
}

/// Absolute time is not reliably known: serve the earliest stored record,
/// flagged approximate, and let the caller decide.
fn earliest(set: &PredictionSet) -> Result<PredictionMatch, Error> {
    match set.first() {
        Some(prediction) => Ok(PredictionMatch {
            index: 0,
            prediction: prediction.clone(),
            confidence: TimeConfidence::Approximate,
        }),
        None => Err(Error::NotYetKnown),
    }
}
