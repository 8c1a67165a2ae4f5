//! GPS time scale helpers and local clock state.
use std::time::Instant;

use hifitime::{Duration, Epoch};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: u32 = 86_400;

/// GPS day / time-of-day pair: days elapsed since the GPS epoch
/// (1980-01-06) and seconds into that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GpsTime {
    pub day: u16,
    pub time_of_day: u32,
}

impl GpsTime {
    pub fn new(day: u16, time_of_day: u32) -> Self {
        debug_assert!(time_of_day < SECONDS_PER_DAY);
        Self { day, time_of_day }
    }
    /// Expressed as an [Epoch] in the GPST timescale.
    pub fn to_epoch(&self) -> Epoch {
        Epoch::from_gpst_seconds(
            self.day as f64 * SECONDS_PER_DAY as f64 + self.time_of_day as f64,
        )
    }
    /// Splits an [Epoch] into day / time-of-day, rounded to the nearest
    /// second. Returns None prior to the GPS epoch or past the day
    /// counter range.
    pub fn from_epoch(t: Epoch) -> Option<Self> {
        let total = t.to_gpst_seconds().round();
        if total < 0.0 {
            return None;
        }
        let day = (total / SECONDS_PER_DAY as f64).floor();
        if day > u16::MAX as f64 {
            return None;
        }
        let time_of_day = (total - day * SECONDS_PER_DAY as f64) as u32;
        Some(Self {
            day: day as u16,
            time_of_day: time_of_day.min(SECONDS_PER_DAY - 1),
        })
    }
    /// Seconds elapsed since the GPS epoch.
    pub(crate) fn total_seconds(&self) -> u64 {
        self.day as u64 * SECONDS_PER_DAY as u64 + self.time_of_day as u64
    }
}

/// Implement this trait to provide the platform's best knowledge of
/// current time. Return None whenever absolute time is not reliably known,
/// the cache then degrades to approximate lookups instead of guessing.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Option<Epoch>;
}

/// [TimeSource] backed by the system clock.
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Option<Epoch> {
        Epoch::now().ok()
    }
}

/// Current time as well as the cache can tell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeEstimate {
    /// Absolute time is reliably known.
    Known(Epoch),
    /// Best effort estimate, derived from the last prediction activity.
    Approximate(Epoch),
    /// No usable estimate at all.
    Unknown,
}

impl TimeEstimate {
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Self::Known(t) | Self::Approximate(t) => Some(*t),
            Self::Unknown => None,
        }
    }
    pub fn known(&self) -> Option<Epoch> {
        match self {
            Self::Known(t) => Some(*t),
            _ => None,
        }
    }
}

/// Leap second offset and a best-estimate-of-now anchor, refreshed by
/// prediction activity. The anchor pairs a GPST epoch with the monotonic
/// instant it was observed, so "approximately now" survives without a
/// reliable wall clock.
#[derive(Debug, Default)]
pub(crate) struct ClockState {
    leap_seconds: i32,
    anchor: Option<(Epoch, Instant)>,
}

impl ClockState {
    pub fn leap_seconds(&self) -> i32 {
        self.leap_seconds
    }
    pub fn set_leap_seconds(&mut self, leap_seconds: i32) {
        self.leap_seconds = leap_seconds;
    }
    pub fn observe(&mut self, t: Epoch) {
        self.anchor = Some((t, Instant::now()));
    }
    pub fn estimate(&self, source: &dyn TimeSource) -> TimeEstimate {
        if let Some(now) = source.now() {
            return TimeEstimate::Known(now);
        }
        match self.anchor {
            Some((epoch, observed)) => TimeEstimate::Approximate(
                epoch + Duration::from_seconds(observed.elapsed().as_secs_f64()),
            ),
            None => TimeEstimate::Unknown,
        }
    }
}
