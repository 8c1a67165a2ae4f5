use hifitime::Epoch;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Error;

const LAT_SCALE: f64 = (1 << 23) as f64;
const LON_SCALE: f64 = (1 << 24) as f64;

/// Last known position in fixed point normalized form:
/// `lat_norm = (lat / 90) * 2^23`, `lon_norm = (lon / 360) * 2^24`.
/// Owned by the cache, updated only through the location entry points.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocationEstimate {
    pub lat_norm: i32,
    pub lon_norm: i32,
    /// When this position was recorded, if time was known then.
    pub recorded_at: Option<Epoch>,
}

impl LocationEstimate {
    /// Builds from a position in decimal degrees.
    pub fn from_degrees(lat: f64, lon: f64, recorded_at: Option<Epoch>) -> Result<Self, Error> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidArgument("latitude out of range"));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidArgument("longitude out of range"));
        }
        Ok(Self {
            lat_norm: (lat / 90.0 * LAT_SCALE).round() as i32,
            lon_norm: (lon / 360.0 * LON_SCALE).round() as i32,
            recorded_at,
        })
    }
    /// Builds from an already normalized position.
    pub fn from_normalized(lat_norm: i32, lon_norm: i32, recorded_at: Option<Epoch>) -> Self {
        Self {
            lat_norm,
            lon_norm,
            recorded_at,
        }
    }
    pub fn latitude_deg(&self) -> f64 {
        self.lat_norm as f64 / LAT_SCALE * 90.0
    }
    pub fn longitude_deg(&self) -> f64 {
        self.lon_norm as f64 / LON_SCALE * 360.0
    }
}
