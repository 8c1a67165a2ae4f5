//! Projection of a selected prediction into the assistance format a GNSS
//! receiver consumes, filtered by the elements it asked for.
use gnss::prelude::{Constellation, SV};
use thiserror::Error;

use crate::error::Error;
use crate::location::LocationEstimate;
use crate::prediction::{Prediction, EMPTY_EPHEM_HEALTH, GPS_SV_COUNT};
use crate::time::GpsTime;

/// Delivery failure reported by the receiving driver or socket.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InjectionError(pub String);

/// Which assistance elements the receiver currently needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssistanceRequest {
    /// Per satellite ephemeris mask, bit `prn - 1`.
    pub sv_mask_ephe: u32,
    /// GPS system time.
    pub system_time: bool,
    /// Last known receiver position.
    pub position: bool,
    /// GPS to UTC leap second offset.
    pub utc: bool,
    /// Known-unhealthy satellite flags.
    pub integrity: bool,
}

impl AssistanceRequest {
    /// Everything this cache can provide, for every satellite.
    pub fn ephemeris_all() -> Self {
        Self {
            sv_mask_ephe: u32::MAX,
            system_time: true,
            position: true,
            utc: true,
            integrity: true,
        }
    }
}

/// Ephemeris payload for one satellite.
#[derive(Debug, Clone, PartialEq)]
pub struct SvEphemeris<'a> {
    pub sv: SV,
    pub health: u8,
    pub data: &'a [u8],
}

/// Assistance elements projected from one prediction, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistanceData<'a> {
    pub system_time: Option<GpsTime>,
    pub leap_seconds: Option<i32>,
    pub position: Option<LocationEstimate>,
    /// Bit `prn - 1` set for satellites with known bad health.
    pub integrity_mask: Option<u32>,
    pub ephemerides: Vec<SvEphemeris<'a>>,
}

/// The GNSS consumer of assistance data: the receiver driver, or an
/// alternate socket shaped transport supplied by the integrator.
pub trait GnssSink {
    fn deliver(&mut self, data: &AssistanceData<'_>) -> Result<(), InjectionError>;
}

/// Filters `prediction` down to the elements `request` asks for.
/// Satellites without usable ephemeris (health [EMPTY_EPHEM_HEALTH]) are
/// never injected.
pub(crate) fn project<'a>(
    prediction: &'a Prediction,
    request: &AssistanceRequest,
    system_time: Option<GpsTime>,
    leap_seconds: i32,
    position: Option<LocationEstimate>,
) -> Result<AssistanceData<'a>, Error> {
    if request.sv_mask_ephe == 0
        && !request.system_time
        && !request.position
        && !request.utc
        && !request.integrity
    {
        return Err(Error::InvalidArgument("empty assistance request"));
    }

    let mut ephemerides = Vec::new();
    for index in 0..GPS_SV_COUNT {
        if request.sv_mask_ephe & (1 << index) == 0 {
            continue;
        }
        let health = prediction.health[index];
        if health == EMPTY_EPHEM_HEALTH {
            continue;
        }
        let sv = SV {
            constellation: Constellation::GPS,
            prn: index as u8 + 1,
        };
        match prediction.sv_ephemeris(sv) {
            Some(data) => ephemerides.push(SvEphemeris { sv, health, data }),
            None => continue,
        }
    }
    if request.sv_mask_ephe != 0 && ephemerides.is_empty() {
        return Err(Error::InvalidArgument(
            "assistance mask selects no usable satellite",
        ));
    }

    let integrity_mask = request.integrity.then(|| {
        prediction
            .health
            .iter()
            .enumerate()
            .filter(|(_, h)| **h != 0 && **h != EMPTY_EPHEM_HEALTH)
            .fold(0u32, |mask, (index, _)| mask | 1 << index)
    });

    Ok(AssistanceData {
        system_time: request.system_time.then_some(system_time).flatten(),
        leap_seconds: request.utc.then_some(leap_seconds),
        position: request.position.then_some(position).flatten(),
        integrity_mask,
        ephemerides,
    })
}
