use gnss::prelude::{Constellation, SV};
use hifitime::{Duration, Epoch, Unit};
use itertools::Itertools;

use crate::error::Error;
use crate::time::GpsTime;

/// Number of satellites covered per prediction (GPS constellation).
pub const GPS_SV_COUNT: usize = 32;
/// Opaque ephemeris payload per satellite, in bytes.
pub const EPHEMERIS_SV_BYTES: usize = 64;
/// Total ephemeris payload per prediction, in bytes.
pub const EPHEMERIS_BYTES: usize = GPS_SV_COUNT * EPHEMERIS_SV_BYTES;
/// Health byte marking a satellite with no usable ephemeris.
pub const EMPTY_EPHEM_HEALTH: u8 = 0xFF;

/// GPST seconds at millisecond resolution. Interval bounds are integer
/// seconds; rounding keeps sub-microsecond [Epoch] conversion noise from
/// flipping the half open boundary decision.
fn clock_seconds(t: Epoch) -> f64 {
    (t.to_gpst_seconds() * 1.0E3).round() / 1.0E3
}

/// One ephemeris snapshot, valid over the half open interval
/// `[start, start + period)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Interval start.
    pub time: GpsTime,
    /// Validity duration in minutes.
    pub period_min: u16,
    /// Opaque satellite ephemeris payload, [EPHEMERIS_SV_BYTES] per SV.
    pub ephemeris: Vec<u8>,
    /// Per satellite health, [EMPTY_EPHEM_HEALTH] when unknown.
    pub health: [u8; GPS_SV_COUNT],
}

impl Prediction {
    /// Builds a new Prediction, verifying the interval is non empty and the
    /// payload matches the constellation size.
    pub fn new(
        time: GpsTime,
        period_min: u16,
        ephemeris: Vec<u8>,
        health: [u8; GPS_SV_COUNT],
    ) -> Result<Self, Error> {
        if period_min == 0 {
            return Err(Error::InvalidArgument("empty validity interval"));
        }
        if ephemeris.len() != EPHEMERIS_BYTES {
            return Err(Error::InvalidArgument("ephemeris payload length"));
        }
        Ok(Self {
            time,
            period_min,
            ephemeris,
            health,
        })
    }
    pub fn start(&self) -> Epoch {
        self.time.to_epoch()
    }
    pub fn period(&self) -> Duration {
        self.period_min as f64 * Unit::Minute
    }
    pub fn end(&self) -> Epoch {
        self.start() + self.period()
    }
    pub(crate) fn start_seconds(&self) -> u64 {
        self.time.total_seconds()
    }
    pub(crate) fn end_seconds(&self) -> u64 {
        self.start_seconds() + self.period_min as u64 * 60
    }
    /// True if `t` falls within the half open validity interval.
    pub fn contains(&self, t: Epoch) -> bool {
        let s = clock_seconds(t);
        s >= self.start_seconds() as f64 && s < self.end_seconds() as f64
    }
    pub fn expired_at(&self, t: Epoch) -> bool {
        clock_seconds(t) >= self.end_seconds() as f64
    }
    /// Ephemeris payload slice for one satellite.
    pub fn sv_ephemeris(&self, sv: SV) -> Option<&[u8]> {
        if sv.constellation != Constellation::GPS {
            return None;
        }
        let index = sv.prn.checked_sub(1)? as usize;
        if index >= GPS_SV_COUNT {
            return None;
        }
        Some(&self.ephemeris[index * EPHEMERIS_SV_BYTES..(index + 1) * EPHEMERIS_SV_BYTES])
    }
    pub fn sv_health(&self, sv: SV) -> Option<u8> {
        if sv.constellation != Constellation::GPS {
            return None;
        }
        let index = sv.prn.checked_sub(1)? as usize;
        self.health.get(index).copied()
    }
    /// True if `next` starts exactly where this interval ends.
    pub(crate) fn extends_to(&self, next: &Prediction) -> bool {
        next.start_seconds() == self.end_seconds()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    /// Ledger sequence number, mirrors storage eviction order.
    seq: u32,
    prediction: Prediction,
}

/// Ordered sequence of [Prediction]s covering contiguous, non overlapping
/// intervals: interval `i+1` starts exactly where interval `i` ends.
#[derive(Debug, Clone, Default)]
pub struct PredictionSet {
    entries: Vec<Entry>,
}

impl PredictionSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<&Prediction> {
        self.entries.get(index).map(|e| &e.prediction)
    }
    pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
        self.entries.iter().map(|e| &e.prediction)
    }
    pub fn first(&self) -> Option<&Prediction> {
        self.entries.first().map(|e| &e.prediction)
    }
    pub fn last(&self) -> Option<&Prediction> {
        self.entries.last().map(|e| &e.prediction)
    }
    /// Start of the covered window.
    pub fn coverage_start(&self) -> Option<Epoch> {
        self.first().map(|p| p.start())
    }
    /// End of the covered window.
    pub fn coverage_end(&self) -> Option<Epoch> {
        self.last().map(|p| p.end())
    }
    /// Verifies the contiguity invariant over the whole set.
    pub fn contiguous(&self) -> bool {
        self.iter()
            .tuple_windows()
            .all(|(a, b)| a.extends_to(b))
    }
    /// Number of intervals not yet expired at `t`.
    pub(crate) fn live_count(&self, t: Epoch) -> usize {
        self.iter().filter(|p| !p.expired_at(t)).count()
    }
    /// Appends a record. Refused (false) when it does not extend the
    /// covered window contiguously.
    pub(crate) fn push(&mut self, seq: u32, prediction: Prediction) -> bool {
        if let Some(last) = self.last() {
            if !last.extends_to(&prediction) {
                return false;
            }
        }
        self.entries.push(Entry { seq, prediction });
        true
    }
    /// Drops the record persisted under `seq`, if present.
    pub(crate) fn evict_seq(&mut self, seq: u32) {
        self.entries.retain(|e| e.seq != seq);
    }
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
