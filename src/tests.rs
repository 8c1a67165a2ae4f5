use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use hifitime::Epoch;
use parking_lot::Mutex;
use rstest::rstest;

use crate::{
    cache::{CacheState, InitParams, PgpsCache},
    codec::{self, PgpsRequest, StreamDecoder, RECORD_BYTES, REQUEST_BYTES},
    config::Config,
    error::Error,
    events::{EventHandler, PgpsEvent},
    inject::{self, AssistanceData, AssistanceRequest, GnssSink, InjectionError},
    ledger::{self, Ledger, HEADER_BYTES},
    location::LocationEstimate,
    lookup::{self, TimeConfidence},
    prediction::{Prediction, PredictionSet, EMPTY_EPHEM_HEALTH, EPHEMERIS_BYTES, GPS_SV_COUNT},
    storage::{FileStorage, MemoryStorage},
    time::{GpsTime, TimeEstimate, TimeSource, SECONDS_PER_DAY},
    transport::{Transport, TransportError},
};

const DAY: u16 = 16_600;
const PERIOD_MIN: u16 = 240;
const PERIOD_SEC: u64 = PERIOD_MIN as u64 * 60;

#[derive(Default, Clone)]
struct EventLog {
    events: Arc<Mutex<Vec<(PgpsEvent, Option<GpsTime>)>>>,
}

impl EventLog {
    fn handler(&self) -> Box<dyn EventHandler> {
        let events = self.events.clone();
        Box::new(move |event: PgpsEvent, prediction: Option<&Prediction>| {
            events.lock().push((event, prediction.map(|p| p.time)));
        })
    }
    fn kinds(&self) -> Vec<PgpsEvent> {
        self.events.lock().iter().map(|(event, _)| *event).collect()
    }
}

#[derive(Default, Clone)]
struct MockTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    refuse: bool,
}

impl MockTransport {
    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
    fn sent_request(&self, index: usize) -> PgpsRequest {
        PgpsRequest::decode(&self.sent.lock()[index]).unwrap()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, request: &[u8]) -> Result<(), TransportError> {
        if self.refuse {
            return Err(TransportError("link down".to_string()));
        }
        self.sent.lock().push(request.to_vec());
        Ok(())
    }
}

#[derive(Default, Clone)]
struct TestClock {
    now: Arc<Mutex<Option<Epoch>>>,
}

impl TestClock {
    fn set(&self, t: Option<Epoch>) {
        *self.now.lock() = t;
    }
}

impl TimeSource for TestClock {
    fn now(&self) -> Option<Epoch> {
        *self.now.lock()
    }
}

#[derive(Default)]
struct MockSink {
    delivered: Vec<(usize, Option<i32>, Option<u32>)>,
}

impl GnssSink for MockSink {
    fn deliver(&mut self, data: &AssistanceData<'_>) -> Result<(), InjectionError> {
        self.delivered
            .push((data.ephemerides.len(), data.leap_seconds, data.integrity_mask));
        Ok(())
    }
}

fn small_config() -> Config {
    Config {
        max_predictions: 4,
        prediction_period_min: PERIOD_MIN,
        ..Default::default()
    }
}

fn prediction(day: u16, time_of_day: u32, period_min: u16) -> Prediction {
    let mut health = [EMPTY_EPHEM_HEALTH; GPS_SV_COUNT];
    health[0] = 0;
    health[1] = 0;
    Prediction {
        time: GpsTime::new(day, time_of_day),
        period_min,
        ephemeris: vec![0xAB; EPHEMERIS_BYTES],
        health,
    }
}

fn advance(time: GpsTime, seconds: u64) -> GpsTime {
    let total = time.day as u64 * SECONDS_PER_DAY as u64 + time.time_of_day as u64 + seconds;
    GpsTime::new(
        (total / SECONDS_PER_DAY as u64) as u16,
        (total % SECONDS_PER_DAY as u64) as u32,
    )
}

fn record_bytes(p: &Prediction) -> Vec<u8> {
    let mut buf = bytes::BytesMut::new();
    codec::encode_record(p, &mut buf);
    buf.to_vec()
}

fn batch_stream(anchor: GpsTime, count: u16) -> Vec<u8> {
    let header = PgpsRequest {
        prediction_count: count,
        prediction_period_min: PERIOD_MIN,
        gps_day: anchor.day,
        gps_time_of_day: anchor.time_of_day,
    };
    let mut stream = header.encode().to_vec();
    for index in 0..count {
        let start = advance(anchor, index as u64 * PERIOD_SEC);
        stream.extend(record_bytes(&prediction(start.day, start.time_of_day, PERIOD_MIN)));
    }
    stream
}

struct Rig {
    cache: PgpsCache<MemoryStorage, MockTransport>,
    events: EventLog,
    transport: MockTransport,
    clock: TestClock,
}

fn rig(config: Config, now: Option<Epoch>) -> Rig {
    let events = EventLog::default();
    let transport = MockTransport::default();
    let clock = TestClock::default();
    clock.set(now);
    let storage = MemoryStorage::new(config.storage_bytes());
    let cache = PgpsCache::new(InitParams {
        storage,
        transport: transport.clone(),
        handler: events.handler(),
        time_source: Box::new(clock.clone()),
        config,
    })
    .unwrap();
    Rig {
        cache,
        events,
        transport,
        clock,
    }
}

#[rstest]
#[case(42, 240, 16_600, 0)]
#[case(1, 30, 0, 86_399)]
#[case(4, 240, 2_190, 57_600)]
fn request_roundtrip(
    #[case] prediction_count: u16,
    #[case] prediction_period_min: u16,
    #[case] gps_day: u16,
    #[case] gps_time_of_day: u32,
) {
    let request = PgpsRequest {
        prediction_count,
        prediction_period_min,
        gps_day,
        gps_time_of_day,
    };
    let frame = request.encode();
    assert_eq!(frame.len(), REQUEST_BYTES);
    assert_eq!(PgpsRequest::decode(&frame).unwrap(), request);
}

#[test]
fn request_encode_layout_is_big_endian() {
    let request = PgpsRequest {
        prediction_count: 0x0102,
        prediction_period_min: 0x0304,
        gps_day: 0x0506,
        gps_time_of_day: 0x0708090A,
    };
    assert_eq!(
        request.encode(),
        [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]
    );
}

#[test]
fn record_roundtrip() {
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    let mut rng = SmallRng::seed_from_u64(0x5047);
    let mut p = prediction(DAY, 3_600, PERIOD_MIN);
    rng.fill(&mut p.ephemeris[..]);
    let bytes = record_bytes(&p);
    assert_eq!(bytes.len(), RECORD_BYTES);
    assert_eq!(codec::decode_record(&bytes).unwrap(), p);
}

#[test]
fn gps_time_epoch_roundtrip() {
    let t = GpsTime::new(DAY, 43_200);
    assert_eq!(GpsTime::from_epoch(t.to_epoch()), Some(t));
}

#[test]
fn boundary_timestamp_maps_to_next_interval() {
    let mut set = PredictionSet::default();
    assert!(set.push(0, prediction(DAY, 0, PERIOD_MIN)));
    assert!(set.push(1, prediction(DAY, PERIOD_SEC as u32, PERIOD_MIN)));
    assert!(set.contiguous());

    // exactly the first interval's end: half open, belongs to the next
    let boundary = GpsTime::new(DAY, PERIOD_SEC as u32).to_epoch();
    let found = lookup::find(&set, TimeEstimate::Known(boundary)).unwrap();
    assert_eq!(found.index, 1);
    assert_eq!(found.confidence, TimeConfidence::Known);
}

#[test]
fn lookup_with_unknown_time_serves_earliest() {
    let mut set = PredictionSet::default();
    assert!(set.push(0, prediction(DAY, 0, PERIOD_MIN)));
    assert!(set.push(1, prediction(DAY, PERIOD_SEC as u32, PERIOD_MIN)));

    let found = lookup::find(&set, TimeEstimate::Unknown).unwrap();
    assert_eq!(found.index, 0);
    assert_eq!(found.confidence, TimeConfidence::Approximate);
}

#[test]
fn lookup_past_coverage_is_expired() {
    let mut set = PredictionSet::default();
    assert!(set.push(0, prediction(DAY, 0, PERIOD_MIN)));

    let late = GpsTime::new(DAY, PERIOD_SEC as u32 + 60).to_epoch();
    assert!(matches!(
        lookup::find(&set, TimeEstimate::Known(late)),
        Err(Error::Expired)
    ));
}

#[test]
fn set_refuses_gap() {
    let mut set = PredictionSet::default();
    assert!(set.push(0, prediction(DAY, 0, PERIOD_MIN)));
    // starts one period too late
    assert!(!set.push(1, prediction(DAY, 2 * PERIOD_SEC as u32, PERIOD_MIN)));
    assert_eq!(set.len(), 1);
}

#[test]
fn scenario_a_empty_ledger_init() {
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));

    assert_eq!(
        rig.events.kinds(),
        vec![PgpsEvent::Init, PgpsEvent::Unavailable, PgpsEvent::Loading]
    );
    assert_eq!(rig.cache.state(), CacheState::Loading);
    assert!(rig.cache.loading());
    assert_eq!(rig.transport.sent_count(), 1);
    // maximal batch, anchored at now aligned down to a period boundary
    assert_eq!(
        rig.transport.sent_request(0),
        PgpsRequest {
            prediction_count: 4,
            prediction_period_min: PERIOD_MIN,
            gps_day: DAY,
            gps_time_of_day: 0,
        }
    );
}

#[test]
fn scenario_b_available_fires_first_ready_fires_last() {
    let anchor = GpsTime::new(DAY, 0);
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(Config::default(), Some(t0));
    let count = 42u16;

    let header = PgpsRequest {
        prediction_count: count,
        prediction_period_min: PERIOD_MIN,
        gps_day: anchor.day,
        gps_time_of_day: anchor.time_of_day,
    };
    rig.cache.process(&header.encode()).unwrap();
    assert_eq!(
        rig.events.kinds(),
        vec![PgpsEvent::Init, PgpsEvent::Unavailable, PgpsEvent::Loading]
    );

    for index in 0..count {
        let start = advance(anchor, index as u64 * PERIOD_SEC);
        rig.cache
            .process(&record_bytes(&prediction(start.day, start.time_of_day, PERIOD_MIN)))
            .unwrap();

        let kinds = rig.events.kinds();
        let available = kinds.iter().filter(|e| **e == PgpsEvent::Available).count();
        let ready = kinds.iter().filter(|e| **e == PgpsEvent::Ready).count();
        assert_eq!(available, index as usize + 1);
        if index < count - 1 {
            assert_eq!(ready, 0, "READY fired before record {}", count);
        } else {
            assert_eq!(ready, 1);
            assert_eq!(kinds.last(), Some(&PgpsEvent::Ready));
        }
    }
    assert_eq!(rig.cache.state(), CacheState::Ready);
    assert!(!rig.cache.loading());
}

#[test]
fn scenario_c_expiry_retires_and_requests() {
    let anchor = GpsTime::new(DAY, 0);
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));
    rig.cache.process(&batch_stream(anchor, 4)).unwrap();
    assert_eq!(rig.cache.state(), CacheState::Ready);
    assert_eq!(rig.transport.sent_count(), 1);

    // one minute past the last interval's end
    let late = advance(anchor, 4 * PERIOD_SEC + 60).to_epoch();
    rig.clock.set(Some(late));
    assert!(matches!(rig.cache.find_prediction(), Err(Error::Expired)));

    assert_eq!(rig.transport.sent_count(), 2);
    let refill = rig.transport.sent_request(1);
    assert_eq!(refill.prediction_count, 4);
    let kinds = rig.events.kinds();
    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[PgpsEvent::Unavailable, PgpsEvent::Loading]
    );
}

#[test]
fn scenario_d_corrupt_slot_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pgps.bin");
    let config = small_config();
    let t0 = GpsTime::new(DAY, 600).to_epoch();

    {
        let events = EventLog::default();
        let transport = MockTransport::default();
        let clock = TestClock::default();
        clock.set(Some(t0));
        let cache = PgpsCache::new(InitParams {
            storage: FileStorage::open(&path, config.storage_bytes()).unwrap(),
            transport: transport.clone(),
            handler: events.handler(),
            time_source: Box::new(clock),
            config: config.clone(),
        })
        .unwrap();
        cache.process(&batch_stream(GpsTime::new(DAY, 0), 4)).unwrap();
        assert_eq!(cache.state(), CacheState::Ready);
    }

    // damage the first stored record
    {
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(HEADER_BYTES as u64 + 4)).unwrap();
        file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    }

    let events = EventLog::default();
    let transport = MockTransport::default();
    let clock = TestClock::default();
    clock.set(Some(t0));
    let cache = PgpsCache::new(InitParams {
        storage: FileStorage::open(&path, config.storage_bytes()).unwrap(),
        transport: transport.clone(),
        handler: events.handler(),
        time_source: Box::new(clock),
        config,
    })
    .unwrap();

    assert_eq!(
        events.kinds(),
        vec![PgpsEvent::Init, PgpsEvent::Unavailable, PgpsEvent::Loading]
    );
    assert_eq!(cache.state(), CacheState::Loading);
    assert_eq!(transport.sent_count(), 1);
}

#[test]
fn persisted_set_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pgps.bin");
    let config = small_config();
    let t0 = GpsTime::new(DAY, 600).to_epoch();

    {
        let events = EventLog::default();
        let transport = MockTransport::default();
        let clock = TestClock::default();
        clock.set(Some(t0));
        let cache = PgpsCache::new(InitParams {
            storage: FileStorage::open(&path, config.storage_bytes()).unwrap(),
            transport: transport.clone(),
            handler: events.handler(),
            time_source: Box::new(clock),
            config: config.clone(),
        })
        .unwrap();
        cache.process(&batch_stream(GpsTime::new(DAY, 0), 4)).unwrap();
    }

    let events = EventLog::default();
    let transport = MockTransport::default();
    let clock = TestClock::default();
    clock.set(Some(t0));
    let cache = PgpsCache::new(InitParams {
        storage: FileStorage::open(&path, config.storage_bytes()).unwrap(),
        transport: transport.clone(),
        handler: events.handler(),
        time_source: Box::new(clock),
        config,
    })
    .unwrap();

    // full coverage reloaded from storage, no request needed
    assert_eq!(events.kinds(), vec![PgpsEvent::Init, PgpsEvent::Ready]);
    assert_eq!(transport.sent_count(), 0);
    let found = cache.find_prediction().unwrap();
    assert_eq!(found.index, 0);
    assert_eq!(found.confidence, TimeConfidence::Known);
}

#[test]
fn scenario_e_overlapping_requests_coalesce() {
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));
    rig.cache.process(&batch_stream(GpsTime::new(DAY, 0), 4)).unwrap();
    assert_eq!(rig.transport.sent_count(), 1);

    rig.cache.request_all().unwrap();
    rig.cache.request_all().unwrap();
    // the second call coalesced onto the in-flight batch
    assert_eq!(rig.transport.sent_count(), 2);
}

#[test]
fn preemptive_updates_are_idempotent() {
    let anchor = GpsTime::new(DAY, 0);
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));
    rig.cache.process(&batch_stream(anchor, 4)).unwrap();
    assert_eq!(rig.transport.sent_count(), 1);

    // plenty of coverage left: nothing to do
    rig.cache.preemptive_updates().unwrap();
    assert_eq!(rig.transport.sent_count(), 1);

    // one minute of coverage left: top up, once
    let near_end = advance(anchor, 4 * PERIOD_SEC - 60).to_epoch();
    rig.clock.set(Some(near_end));
    rig.cache.preemptive_updates().unwrap();
    rig.cache.preemptive_updates().unwrap();
    assert_eq!(rig.transport.sent_count(), 2);

    let topup = rig.transport.sent_request(1);
    assert_eq!(topup.prediction_count, 3);
    assert_eq!(topup.gps_day, advance(anchor, 4 * PERIOD_SEC).day);
    assert_eq!(topup.gps_time_of_day, advance(anchor, 4 * PERIOD_SEC).time_of_day);
}

#[test]
fn request_validates_against_capacity() {
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));
    let request = PgpsRequest {
        prediction_count: 5,
        prediction_period_min: PERIOD_MIN,
        gps_day: DAY,
        gps_time_of_day: 0,
    };
    assert!(matches!(
        rig.cache.request(&request),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn timed_out_request_rearms_eligibility() {
    let config = Config {
        request_timeout: std::time::Duration::ZERO,
        ..small_config()
    };
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(config, Some(t0));
    assert_eq!(rig.transport.sent_count(), 1);

    // the outstanding request is immediately considered lost
    rig.cache.request_all().unwrap();
    rig.cache.request_all().unwrap();
    assert_eq!(rig.transport.sent_count(), 3);
}

#[test]
fn malformed_response_is_discarded() {
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));

    // valid header, first record breaks batch continuity
    let header = PgpsRequest {
        prediction_count: 2,
        prediction_period_min: PERIOD_MIN,
        gps_day: DAY,
        gps_time_of_day: 0,
    };
    let mut stream = header.encode().to_vec();
    stream.extend(record_bytes(&prediction(DAY, 7_200, PERIOD_MIN)));

    assert!(matches!(rig.cache.process(&stream), Err(Error::Decode(_))));
    // nothing committed, a replacement request went out
    assert!(matches!(rig.cache.find_prediction(), Err(Error::Loading)));
    assert_eq!(rig.transport.sent_count(), 2);
}

#[test]
fn decoder_handles_fragmented_stream() {
    let anchor = GpsTime::new(DAY, 0);
    let stream = batch_stream(anchor, 2);
    let mut decoder = StreamDecoder::default();
    let mut decoded = Vec::new();
    for chunk in stream.chunks(7) {
        decoded.extend(decoder.feed(chunk, 4).unwrap());
    }
    assert_eq!(decoded.len(), 2);
    assert!(decoder.complete());
    assert_eq!(decoded[0].time, anchor);
    assert_eq!(decoded[1].time, advance(anchor, PERIOD_SEC));
}

#[test]
fn ledger_wraparound_evicts_oldest() {
    let storage = MemoryStorage::new(ledger::required_bytes(3));
    let (mut ledger, outcome) = Ledger::open(storage, 3).unwrap();
    assert!(outcome.records.is_empty());

    for index in 0..3u16 {
        let start = advance(GpsTime::new(DAY, 0), index as u64 * PERIOD_SEC);
        let stored = ledger
            .store(&prediction(start.day, start.time_of_day, PERIOD_MIN), None)
            .unwrap();
        assert_eq!(stored.evicted_seq, None);
    }
    let start = advance(GpsTime::new(DAY, 0), 3 * PERIOD_SEC);
    let stored = ledger
        .store(&prediction(start.day, start.time_of_day, PERIOD_MIN), None)
        .unwrap();
    assert_eq!(stored.evicted_seq, Some(0));

    let (_, outcome) = Ledger::open(ledger.into_inner(), 3).unwrap();
    let seqs: Vec<u32> = outcome.records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(outcome.corrupt_slots, 0);
}

#[test]
fn ledger_reclaims_expired_before_oldest() {
    let storage = MemoryStorage::new(ledger::required_bytes(3));
    let (mut ledger, _) = Ledger::open(storage, 3).unwrap();

    // seq 0 ends far in the future, seq 1 is already over
    ledger
        .store(&prediction(DAY + 10, 0, PERIOD_MIN), None)
        .unwrap();
    ledger.store(&prediction(DAY, 0, PERIOD_MIN), None).unwrap();
    ledger
        .store(&prediction(DAY + 11, 0, PERIOD_MIN), None)
        .unwrap();

    let now = GpsTime::new(DAY, PERIOD_SEC as u32 + 60).to_epoch();
    let stored = ledger
        .store(&prediction(DAY + 12, 0, PERIOD_MIN), Some(now))
        .unwrap();
    assert_eq!(stored.evicted_seq, Some(1));
}

#[test]
fn ledger_checksum_detects_corruption() {
    let storage = MemoryStorage::new(ledger::required_bytes(2));
    let (mut ledger, _) = Ledger::open(storage, 2).unwrap();
    ledger.store(&prediction(DAY, 0, PERIOD_MIN), None).unwrap();

    let mut storage = ledger.into_inner();
    let mut byte = [0u8; 1];
    crate::storage::Storage::read(&mut storage, HEADER_BYTES + 8, &mut byte).unwrap();
    crate::storage::Storage::write(&mut storage, HEADER_BYTES + 8, &[byte[0] ^ 0xFF]).unwrap();

    let (_, outcome) = Ledger::open(storage, 2).unwrap();
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.corrupt_slots, 1);
}

#[rstest]
#[case(45.0, 90.0, 1 << 22, 1 << 22)]
#[case(-90.0, -180.0, -(1 << 23), -(1 << 23))]
#[case(0.0, 0.0, 0, 0)]
fn location_normalization(
    #[case] lat: f64,
    #[case] lon: f64,
    #[case] lat_norm: i32,
    #[case] lon_norm: i32,
) {
    let location = LocationEstimate::from_degrees(lat, lon, None).unwrap();
    assert_eq!(location.lat_norm, lat_norm);
    assert_eq!(location.lon_norm, lon_norm);
}

#[test]
fn injection_filters_by_mask_and_health() {
    let mut p = prediction(DAY, 0, PERIOD_MIN);
    p.health = [EMPTY_EPHEM_HEALTH; GPS_SV_COUNT];
    p.health[0] = 0; // healthy
    p.health[2] = 3; // known unhealthy

    let request = AssistanceRequest {
        sv_mask_ephe: 0b111,
        system_time: true,
        position: false,
        utc: true,
        integrity: true,
    };
    let data = inject::project(&p, &request, Some(p.time), 18, None).unwrap();

    let prns: Vec<u8> = data.ephemerides.iter().map(|e| e.sv.prn).collect();
    assert_eq!(prns, vec![1, 3]);
    assert_eq!(data.integrity_mask, Some(0b100));
    assert_eq!(data.leap_seconds, Some(18));
    assert_eq!(data.system_time, Some(p.time));
    assert_eq!(data.position, None);
    for e in &data.ephemerides {
        assert_eq!(e.data.len(), crate::prediction::EPHEMERIS_SV_BYTES);
    }
}

#[test]
fn injection_rejects_unusable_mask() {
    let mut p = prediction(DAY, 0, PERIOD_MIN);
    p.health = [EMPTY_EPHEM_HEALTH; GPS_SV_COUNT];
    p.health[0] = 0;

    // only satellites with no usable ephemeris selected
    let request = AssistanceRequest {
        sv_mask_ephe: 0b10,
        ..Default::default()
    };
    assert!(matches!(
        inject::project(&p, &request, None, 0, None),
        Err(Error::InvalidArgument(_))
    ));

    // nothing requested at all
    assert!(matches!(
        inject::project(&p, &AssistanceRequest::default(), None, 0, None),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn inject_reaches_the_sink() {
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));
    rig.cache.process(&batch_stream(GpsTime::new(DAY, 0), 4)).unwrap();
    rig.cache.set_leap_seconds(18);
    rig.cache.set_location(45.0, 90.0).unwrap();

    let found = rig.cache.find_prediction().unwrap();
    let mut sink = MockSink::default();
    rig.cache
        .inject(&found.prediction, &AssistanceRequest::ephemeris_all(), &mut sink)
        .unwrap();

    assert_eq!(sink.delivered.len(), 1);
    let (ephemerides, leap_seconds, integrity) = sink.delivered[0];
    assert_eq!(ephemerides, 2); // two healthy satellites in the fixture
    assert_eq!(leap_seconds, Some(18));
    assert_eq!(integrity, Some(0));
}

#[test]
fn notify_prediction_is_deferred_until_data_arrives() {
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));
    let notified: Arc<Mutex<Vec<GpsTime>>> = Arc::default();

    let sink = notified.clone();
    rig.cache
        .notify_prediction(move |p: &Prediction| {
            sink.lock().push(p.time);
        })
        .unwrap();
    // a request is already in flight from init, no duplicate goes out
    assert_eq!(rig.transport.sent_count(), 1);
    assert!(notified.lock().is_empty());

    rig.cache.process(&batch_stream(GpsTime::new(DAY, 0), 4)).unwrap();
    assert_eq!(notified.lock().as_slice(), &[GpsTime::new(DAY, 0)]);
}

#[test]
fn notify_prediction_fires_immediately_when_stored() {
    let t0 = GpsTime::new(DAY, 600).to_epoch();
    let rig = rig(small_config(), Some(t0));
    rig.cache.process(&batch_stream(GpsTime::new(DAY, 0), 4)).unwrap();

    let notified: Arc<Mutex<Vec<GpsTime>>> = Arc::default();
    let sink = notified.clone();
    rig.cache
        .notify_prediction(move |p: &Prediction| {
            sink.lock().push(p.time);
        })
        .unwrap();
    assert_eq!(notified.lock().as_slice(), &[GpsTime::new(DAY, 0)]);
}

#[test]
fn transport_refusal_surfaces() {
    let events = EventLog::default();
    let transport = MockTransport {
        refuse: true,
        ..Default::default()
    };
    let clock = TestClock::default();
    clock.set(Some(GpsTime::new(DAY, 600).to_epoch()));
    let config = small_config();
    let result = PgpsCache::new(InitParams {
        storage: MemoryStorage::new(config.storage_bytes()),
        transport,
        handler: events.handler(),
        time_source: Box::new(clock),
        config,
    });
    assert!(matches!(result, Err(Error::Transport(_))));
}
