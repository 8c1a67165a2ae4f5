//! Refill scheduling: when to ask the assistance service for more
//! predictions, and how many.
use std::time::Instant;

use log::{debug, info, warn};

use crate::codec::PgpsRequest;
use crate::config::Config;
use crate::prediction::PredictionSet;
use crate::time::{GpsTime, TimeEstimate, SECONDS_PER_DAY};

#[derive(Debug)]
struct InFlight {
    request: PgpsRequest,
    issued: Instant,
}

/// Tracks the single outstanding request and plans replacements.
/// Concurrent equivalent requests coalesce onto the outstanding one; the
/// in-flight latch is time bounded so a lost response can never wedge
/// refill eligibility.
#[derive(Debug)]
pub(crate) struct RefillScheduler {
    in_flight: Option<InFlight>,
    last_refresh: Option<Instant>,
    timeout: std::time::Duration,
}

impl RefillScheduler {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            in_flight: None,
            last_refresh: None,
            timeout,
        }
    }

    /// True while a request is outstanding and not yet timed out.
    pub fn loading(&self) -> bool {
        match &self.in_flight {
            Some(flight) => flight.issued.elapsed() < self.timeout,
            None => false,
        }
    }

    /// A maximally sized batch anchored at the current best known time,
    /// aligned down to a period boundary. Unknown time anchors at zero and
    /// leaves the start to the server.
    pub fn plan_full(&self, estimate: TimeEstimate, config: &Config) -> PgpsRequest {
        let anchor = estimate
            .epoch()
            .and_then(GpsTime::from_epoch)
            .map(|t| align_down(t, config.prediction_period_min))
            .unwrap_or(GpsTime {
                day: 0,
                time_of_day: 0,
            });
        PgpsRequest {
            prediction_count: config.max_predictions,
            prediction_period_min: config.prediction_period_min,
            gps_day: anchor.day,
            gps_time_of_day: anchor.time_of_day,
        }
    }

    /// Opportunistic top up: once remaining coverage drops below the
    /// configured threshold, asks for enough records to refill the ledger,
    /// anchored where current coverage ends.
    pub fn plan_topup(
        &self,
        set: &PredictionSet,
        estimate: TimeEstimate,
        config: &Config,
    ) -> Option<PgpsRequest> {
        let t = estimate.epoch()?;
        let end = set.coverage_end()?;
        let remaining = end - t;
        if remaining >= config.coverage_threshold() {
            debug!("coverage {} remaining, no refill needed", remaining);
            return None;
        }
        let live = set.live_count(t) as u16;
        let count = config.max_predictions.checked_sub(live)?;
        if count == 0 {
            return None;
        }
        if let Some(refreshed) = self.last_refresh {
            debug!("last refresh {:?} ago", refreshed.elapsed());
        }
        let anchor = GpsTime::from_epoch(end)?;
        info!(
            "coverage {} remaining, requesting {} predictions",
            remaining, count
        );
        Some(PgpsRequest {
            prediction_count: count,
            prediction_period_min: config.prediction_period_min,
            gps_day: anchor.day,
            gps_time_of_day: anchor.time_of_day,
        })
    }

    /// Claims the outbound slot for `request`. False when an earlier
    /// request is still in flight (the new one coalesces onto it).
    pub fn begin(&mut self, request: PgpsRequest) -> bool {
        if let Some(flight) = &self.in_flight {
            if flight.issued.elapsed() < self.timeout {
                debug!("request coalesced onto in-flight batch {:?}", flight.request);
                return false;
            }
            warn!("in-flight request timed out, re-arming");
        }
        self.in_flight = Some(InFlight {
            request,
            issued: Instant::now(),
        });
        true
    }

    /// The batch resolved (fully received, or abandoned on decode error).
    pub fn resolve(&mut self) {
        if self.in_flight.take().is_some() {
            self.last_refresh = Some(Instant::now());
            debug!("in-flight request resolved");
        }
    }

    /// Releases the outbound slot without marking a refresh, e.g. when the
    /// transport refused the request.
    pub fn abort(&mut self) {
        self.in_flight = None;
    }
}

fn align_down(t: GpsTime, period_min: u16) -> GpsTime {
    let period_sec = period_min as u32 * 60;
    if period_sec == 0 || period_sec > SECONDS_PER_DAY {
        return t;
    }
    GpsTime {
        day: t.day,
        time_of_day: t.time_of_day - t.time_of_day % period_sec,
    }
}
