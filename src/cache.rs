//! P-GPS assistance cache.
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::{
    codec::{PgpsRequest, StreamDecoder},
    config::Config,
    error::Error,
    events::{EventHandler, PgpsEvent, Waiter},
    inject::{self, AssistanceRequest, GnssSink},
    ledger::Ledger,
    location::LocationEstimate,
    lookup::{self, PredictionMatch},
    prediction::{Prediction, PredictionSet},
    scheduler::RefillScheduler,
    storage::Storage,
    time::{ClockState, GpsTime, TimeEstimate, TimeSource},
    transport::Transport,
};

/// Cache lifecycle. `Loading` is re-entered on every refill until the
/// active batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Init,
    Unavailable,
    Loading,
    Available,
    Ready,
}

/// Everything the cache needs at initialization. Construction loads and
/// validates persisted predictions and issues a refill request when
/// needed; no other entry point exists before it succeeds.
pub struct InitParams<S: Storage, T: Transport> {
    pub config: Config,
    /// Persistent region backing the ledger.
    pub storage: S,
    /// Outbound link to the assistance service.
    pub transport: T,
    /// Observer receiving lifecycle events.
    pub handler: Box<dyn EventHandler>,
    /// Platform knowledge of current absolute time.
    pub time_source: Box<dyn TimeSource>,
}

/// Mutable cache state: one mutual exclusion domain. Every mutation
/// (ledger writes, state transitions, clock/location updates) happens
/// under this lock; the event handler and the transport are only ever
/// invoked outside of it.
struct Core<S: Storage> {
    config: Config,
    state: CacheState,
    ledger: Ledger<S>,
    set: PredictionSet,
    clock: ClockState,
    location: Option<LocationEstimate>,
    decoder: StreamDecoder,
    scheduler: RefillScheduler,
    waiters: Vec<Waiter>,
    events: Vec<(PgpsEvent, Option<Prediction>)>,
}

impl<S: Storage> Core<S> {
    fn transition(&mut self, state: CacheState, prediction: Option<Prediction>) {
        debug!("cache state {:?} -> {:?}", self.state, state);
        self.state = state;
        let event = match state {
            CacheState::Init => PgpsEvent::Init,
            CacheState::Unavailable => PgpsEvent::Unavailable,
            CacheState::Loading => PgpsEvent::Loading,
            CacheState::Available => PgpsEvent::Available,
            CacheState::Ready => PgpsEvent::Ready,
        };
        self.events.push((event, prediction));
    }
    fn take_events(&mut self) -> Vec<(PgpsEvent, Option<Prediction>)> {
        std::mem::take(&mut self.events)
    }
}

/// The predictive GPS assistance cache.
///
/// Stores time bounded ephemeris predictions in a fixed size persistent
/// region, refreshes them from an assistance service ahead of expiry, and
/// serves the record applying "now" to a GNSS receiver. Safe to share
/// between an application context and the transport response context.
pub struct PgpsCache<S: Storage, T: Transport> {
    core: Mutex<Core<S>>,
    transport: Mutex<T>,
    handler: Box<dyn EventHandler>,
    time_source: Box<dyn TimeSource>,
}

impl<S: Storage, T: Transport> PgpsCache<S, T> {
    /// Initializes the cache: loads whatever the ledger holds, validates
    /// it, and requests missing predictions (or a full set if nothing
    /// usable survived). Fires `Init` and the resulting state events.
    pub fn new(params: InitParams<S, T>) -> Result<Self, Error> {
        params.config.validate()?;
        let (ledger, loaded) = Ledger::open(params.storage, params.config.max_predictions)?;

        let mut core = Core {
            state: CacheState::Init,
            ledger,
            set: PredictionSet::default(),
            clock: ClockState::default(),
            location: None,
            decoder: StreamDecoder::default(),
            scheduler: RefillScheduler::new(params.config.request_timeout),
            waiters: Vec::new(),
            events: vec![(PgpsEvent::Init, None)],
            config: params.config,
        };

        if loaded.corrupt_slots > 0 {
            // integrity failure: treat the whole region as empty and fall
            // back to a full request
            warn!(
                "{} corrupt ledger slots ({}), starting over",
                loaded.corrupt_slots,
                Error::StorageCorrupt
            );
            core.ledger.erase_all()?;
        } else {
            for record in loaded.records {
                if !core.set.push(record.seq, record.prediction.clone()) {
                    debug!("stored history breaks at #{}, keeping newest run", record.seq);
                    core.set.clear();
                    let _ = core.set.push(record.seq, record.prediction);
                }
            }
        }

        let estimate = core.clock.estimate(params.time_source.as_ref());
        if let Some(now) = estimate.known() {
            if core.set.last().map(|p| p.expired_at(now)).unwrap_or(false) {
                info!("every stored prediction expired, starting over");
                core.set.clear();
                core.ledger.erase_all()?;
            }
        }

        let plan = if core.set.is_empty() {
            core.transition(CacheState::Unavailable, None);
            Some(core.scheduler.plan_full(estimate, &core.config))
        } else {
            info!("{} stored predictions validated", core.set.len());
            core.transition(CacheState::Ready, None);
            core.scheduler.plan_topup(&core.set, estimate, &core.config)
        };
        let outbound = match plan {
            Some(request) if core.scheduler.begin(request) => {
                core.transition(CacheState::Loading, None);
                Some(request)
            },
            _ => None,
        };
        let events = core.take_events();

        let cache = Self {
            core: Mutex::new(core),
            transport: Mutex::new(params.transport),
            handler: params.handler,
            time_source: params.time_source,
        };
        cache.flush_events(events);
        cache.dispatch(outbound)?;
        Ok(cache)
    }

    /// Updates the last known position, in decimal degrees. Current time
    /// is recorded along with it when known.
    pub fn set_location(&self, lat_deg: f64, lon_deg: f64) -> Result<(), Error> {
        let mut core = self.core.lock();
        let estimate = core.clock.estimate(self.time_source.as_ref());
        if let TimeEstimate::Known(t) = estimate {
            core.clock.observe(t);
        }
        let location = LocationEstimate::from_degrees(lat_deg, lon_deg, estimate.epoch())?;
        debug!(
            "location updated: {:.4} {:.4}",
            location.latitude_deg(),
            location.longitude_deg()
        );
        core.location = Some(location);
        Ok(())
    }

    /// Updates the last known position, already in normalized fixed point
    /// form.
    pub fn set_location_normalized(&self, lat_norm: i32, lon_norm: i32) {
        let mut core = self.core.lock();
        let estimate = core.clock.estimate(self.time_source.as_ref());
        if let TimeEstimate::Known(t) = estimate {
            core.clock.observe(t);
        }
        core.location = Some(LocationEstimate::from_normalized(
            lat_norm,
            lon_norm,
            estimate.epoch(),
        ));
    }

    /// Updates the GPS to UTC leap second offset.
    pub fn set_leap_seconds(&self, leap_seconds: i32) {
        self.core.lock().clock.set_leap_seconds(leap_seconds);
    }

    /// Last known position, if any was recorded.
    pub fn location(&self) -> Option<LocationEstimate> {
        self.core.lock().location
    }

    /// Finds the prediction applying at the current (best estimate of)
    /// time. When every stored interval has lapsed the set is retired and
    /// a refill request goes out before the `Expired` error is returned.
    pub fn find_prediction(&self) -> Result<PredictionMatch, Error> {
        let (result, outbound, events) = {
            let mut core = self.core.lock();
            let estimate = core.clock.estimate(self.time_source.as_ref());
            let mut result = lookup::find(&core.set, estimate);
            let mut outbound = None;
            match result {
                Ok(ref found) => {
                    debug!(
                        "prediction #{} applies ({:?})",
                        found.index, found.confidence
                    );
                    if let TimeEstimate::Known(t) = estimate {
                        core.clock.observe(t);
                    }
                },
                Err(Error::Expired) => {
                    info!("all stored predictions expired, retiring set");
                    core.set.clear();
                    if let Err(e) = core.ledger.erase_all() {
                        warn!("ledger reclaim failed: {}", e);
                    }
                    core.transition(CacheState::Unavailable, None);
                    let plan = core.scheduler.plan_full(estimate, &core.config);
                    if core.scheduler.begin(plan) {
                        core.transition(CacheState::Loading, None);
                        outbound = Some(plan);
                    }
                },
                Err(Error::NotYetKnown) => {
                    if core.scheduler.loading() {
                        result = Err(Error::Loading);
                    }
                },
                Err(_) => {},
            }
            (result, outbound, core.take_events())
        };
        self.flush_events(events);
        if let Err(e) = self.dispatch(outbound) {
            warn!("refill request failed: {}", e);
        }
        result
    }

    /// Schedules `callback` for when a prediction covering "now" exists.
    /// Immediate if one is already stored; otherwise the callback queues
    /// and a request is issued if none is under way. Every queued waiter
    /// fires once the data arrives.
    pub fn notify_prediction<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnOnce(&Prediction) + Send + 'static,
    {
        let mut callback = Some(callback);
        let mut immediate = None;
        let mut outbound = None;
        let events = {
            let mut core = self.core.lock();
            let estimate = core.clock.estimate(self.time_source.as_ref());
            match lookup::find(&core.set, estimate) {
                Ok(found) => immediate = Some(found.prediction),
                Err(_) => {
                    if let Some(callback) = callback.take() {
                        core.waiters.push(Box::new(callback));
                    }
                    debug!("prediction not stored yet, notification deferred");
                    if !core.scheduler.loading() {
                        let plan = core.scheduler.plan_full(estimate, &core.config);
                        if core.scheduler.begin(plan) {
                            core.transition(CacheState::Loading, None);
                            outbound = Some(plan);
                        }
                    }
                },
            }
            core.take_events()
        };
        self.flush_events(events);
        if let (Some(prediction), Some(callback)) = (immediate, callback.take()) {
            callback(&prediction);
        }
        self.dispatch(outbound)
    }

    /// Requests the given batch from the assistance service. Parameters
    /// are validated against the implementation maxima; a request already
    /// in flight absorbs this one.
    pub fn request(&self, request: &PgpsRequest) -> Result<(), Error> {
        let (outbound, events) = {
            let mut core = self.core.lock();
            request.validate(core.config.max_predictions)?;
            let outbound = if core.scheduler.begin(*request) {
                core.transition(CacheState::Loading, None);
                Some(*request)
            } else {
                None
            };
            (outbound, core.take_events())
        };
        self.flush_events(events);
        self.dispatch(outbound)
    }

    /// Requests a maximally sized batch anchored at the current best
    /// known time.
    pub fn request_all(&self) -> Result<(), Error> {
        let (outbound, events) = {
            let mut core = self.core.lock();
            let estimate = core.clock.estimate(self.time_source.as_ref());
            let plan = core.scheduler.plan_full(estimate, &core.config);
            let outbound = if core.scheduler.begin(plan) {
                core.transition(CacheState::Loading, None);
                Some(plan)
            } else {
                None
            };
            (outbound, core.take_events())
        };
        self.flush_events(events);
        self.dispatch(outbound)
    }

    /// Downloads more predictions if it is time: remaining coverage below
    /// the replacement threshold, or nothing stored at all. Idempotent
    /// while a request is in flight.
    pub fn preemptive_updates(&self) -> Result<(), Error> {
        let (outbound, events) = {
            let mut core = self.core.lock();
            let estimate = core.clock.estimate(self.time_source.as_ref());
            let plan = if core.set.is_empty() {
                Some(core.scheduler.plan_full(estimate, &core.config))
            } else {
                core.scheduler.plan_topup(&core.set, estimate, &core.config)
            };
            let outbound = match plan {
                Some(request) if core.scheduler.begin(request) => {
                    core.transition(CacheState::Loading, None);
                    Some(request)
                },
                _ => None,
            };
            (outbound, core.take_events())
        };
        self.flush_events(events);
        self.dispatch(outbound)
    }

    /// Processes binary prediction data received from the assistance
    /// service, incrementally. Each completed record is persisted before
    /// it is reported; the first fires `Available`, the last `Ready`.
    /// Malformed bytes discard the response, leave stored state untouched
    /// and translate into a fresh request.
    pub fn process(&self, buf: &[u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Err(Error::InvalidArgument("empty response buffer"));
        }
        let mut result = Ok(());
        let mut outbound = None;
        let mut fired: Vec<Waiter> = Vec::new();
        let mut fired_with = None;
        let events = {
            let mut core = self.core.lock();
            let max_count = core.config.max_predictions;
            let estimate = core.clock.estimate(self.time_source.as_ref());
            let now = estimate.known();
            match core.decoder.feed(buf, max_count) {
                Err(e) => {
                    warn!("discarding assistance response: {}", e);
                    core.decoder.reset();
                    core.scheduler.abort();
                    // absorbed: a fresh request replaces the bad response
                    let plan = core.scheduler.plan_full(estimate, &core.config);
                    if core.scheduler.begin(plan) {
                        core.transition(CacheState::Loading, None);
                        outbound = Some(plan);
                    }
                    result = Err(e);
                },
                Ok(records) => {
                    for prediction in records {
                        let stored = match core.ledger.store(&prediction, now) {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                error!("ledger write failed: {}", e);
                                result = Err(e.into());
                                break;
                            },
                        };
                        debug!("record #{} persisted in slot {}", stored.seq, stored.slot);
                        if let Some(evicted) = stored.evicted_seq {
                            core.set.evict_seq(evicted);
                        }
                        if !core.set.push(stored.seq, prediction.clone()) {
                            info!("batch does not extend stored coverage, replacing set");
                            core.set.clear();
                            let _ = core.set.push(stored.seq, prediction.clone());
                        }
                        if core.state != CacheState::Available {
                            core.transition(CacheState::Available, Some(prediction));
                        } else {
                            core.events.push((PgpsEvent::Available, Some(prediction)));
                        }
                    }
                    if result.is_ok() && core.decoder.complete() {
                        let header = core.decoder.header();
                        core.decoder.reset();
                        core.scheduler.resolve();
                        if now.is_none() {
                            // the batch anchor is the freshest hint of
                            // what "now" is
                            if let Some(header) = header {
                                let anchor = header.anchor();
                                if anchor.day != 0 || anchor.time_of_day != 0 {
                                    core.clock.observe(anchor.to_epoch());
                                }
                            }
                        }
                        core.transition(CacheState::Ready, None);
                        info!("prediction set complete, {} records", core.set.len());
                    }
                    if result.is_ok() && !core.waiters.is_empty() {
                        let estimate = core.clock.estimate(self.time_source.as_ref());
                        if let Ok(found) = lookup::find(&core.set, estimate) {
                            fired_with = Some(found.prediction);
                            fired = core.waiters.drain(..).collect();
                        }
                    }
                },
            }
            core.take_events()
        };
        self.flush_events(events);
        if let Some(prediction) = fired_with {
            for waiter in fired {
                waiter(&prediction);
            }
        }
        if let Err(e) = self.dispatch(outbound) {
            warn!("replacement request failed: {}", e);
        }
        result
    }

    /// Injects one prediction into the GNSS consumer, filtered by the
    /// assistance elements it asked for.
    pub fn inject(
        &self,
        prediction: &Prediction,
        request: &AssistanceRequest,
        sink: &mut dyn GnssSink,
    ) -> Result<(), Error> {
        let (system_time, leap_seconds, position) = {
            let core = self.core.lock();
            let estimate = core.clock.estimate(self.time_source.as_ref());
            let system_time = estimate
                .epoch()
                .and_then(GpsTime::from_epoch)
                .or(Some(prediction.time));
            (system_time, core.clock.leap_seconds(), core.location)
        };
        let data = inject::project(prediction, request, system_time, leap_seconds, position)?;
        sink.deliver(&data)?;
        debug!("injected {} ephemerides", data.ephemerides.len());
        Ok(())
    }

    /// True while a request was sent and loading has not completed.
    pub fn loading(&self) -> bool {
        self.core.lock().scheduler.loading()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CacheState {
        self.core.lock().state
    }

    fn flush_events(&self, events: Vec<(PgpsEvent, Option<Prediction>)>) {
        for (event, prediction) in events {
            self.handler.handle(event, prediction.as_ref());
        }
    }

    fn dispatch(&self, outbound: Option<PgpsRequest>) -> Result<(), Error> {
        let Some(request) = outbound else {
            return Ok(());
        };
        info!(
            "requesting {} predictions of {} min from day {} tod {}",
            request.prediction_count,
            request.prediction_period_min,
            request.gps_day,
            request.gps_time_of_day
        );
        let frame = request.encode();
        if let Err(e) = self.transport.lock().send(&frame) {
            error!("transport refused assistance request: {}", e);
            self.core.lock().scheduler.abort();
            return Err(e.into());
        }
        Ok(())
    }
}
