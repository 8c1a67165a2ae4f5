#![doc = include_str!("../README.md")]

extern crate gnss_rs as gnss;

// private modules
mod cache;
mod codec;
mod config;
mod error;
mod events;
mod inject;
mod ledger;
mod location;
mod lookup;
mod prediction;
mod scheduler;
mod storage;
mod time;
mod transport;

// pub export
pub use error::Error;

#[cfg(test)]
mod tests;

// prelude
pub mod prelude {
    pub use crate::cache::{CacheState, InitParams, PgpsCache};
    pub use crate::codec::{PgpsRequest, REQUEST_BYTES};
    pub use crate::config::Config;
    pub use crate::error::Error;
    pub use crate::events::{EventHandler, PgpsEvent};
    pub use crate::inject::{
        AssistanceData, AssistanceRequest, GnssSink, InjectionError, SvEphemeris,
    };
    pub use crate::location::LocationEstimate;
    pub use crate::lookup::{PredictionMatch, TimeConfidence};
    pub use crate::prediction::{
        Prediction, PredictionSet, EMPTY_EPHEM_HEALTH, EPHEMERIS_BYTES, EPHEMERIS_SV_BYTES,
        GPS_SV_COUNT,
    };
    pub use crate::storage::{FileStorage, MemoryStorage, Storage, StorageError};
    pub use crate::time::{GpsTime, SystemTimeSource, TimeEstimate, TimeSource, SECONDS_PER_DAY};
    pub use crate::transport::{Transport, TransportError};
    // re-export
    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, TimeScale};
}
