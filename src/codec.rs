//! P-GPS wire codec: batch request serialization and incremental
//! decoding of the prediction response stream. All fields big endian.
use bytes::{Buf, BufMut, BytesMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::prediction::{Prediction, EPHEMERIS_BYTES, GPS_SV_COUNT};
use crate::time::{GpsTime, SECONDS_PER_DAY};

/// Serialized [PgpsRequest] size.
pub const REQUEST_BYTES: usize = 10;
/// Serialized prediction record size.
pub(crate) const RECORD_BYTES: usize = 2 + 4 + 2 + GPS_SV_COUNT + EPHEMERIS_BYTES;

/// One batch of predictions, as requested from the assistance service.
/// Also heads the response stream, echoed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PgpsRequest {
    /// Number of predictions desired.
    pub prediction_count: u16,
    /// Validity time per prediction, in minutes.
    pub prediction_period_min: u16,
    /// Days since the GPS epoch for the start of the first prediction.
    /// Zero leaves the anchor to the server.
    pub gps_day: u16,
    /// Seconds into `gps_day` for the start of the first prediction.
    pub gps_time_of_day: u32,
}

impl PgpsRequest {
    pub fn encode(&self) -> [u8; REQUEST_BYTES] {
        let mut frame = [0u8; REQUEST_BYTES];
        let mut buf = &mut frame[..];
        buf.put_u16(self.prediction_count);
        buf.put_u16(self.prediction_period_min);
        buf.put_u16(self.gps_day);
        buf.put_u32(self.gps_time_of_day);
        frame
    }
    pub fn decode(mut buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < REQUEST_BYTES {
            return Err(Error::Decode("truncated batch header"));
        }
        let request = Self {
            prediction_count: buf.get_u16(),
            prediction_period_min: buf.get_u16(),
            gps_day: buf.get_u16(),
            gps_time_of_day: buf.get_u32(),
        };
        if request.gps_time_of_day >= SECONDS_PER_DAY {
            return Err(Error::Decode("time of day out of range"));
        }
        Ok(request)
    }
    /// Start of the first requested interval.
    pub fn anchor(&self) -> GpsTime {
        GpsTime::new(self.gps_day, self.gps_time_of_day)
    }
    /// Checks request parameters against the implementation maxima.
    pub(crate) fn validate(&self, max_count: u16) -> Result<(), Error> {
        if self.prediction_count == 0 || self.prediction_count > max_count {
            return Err(Error::InvalidArgument(
                "prediction count exceeds cache capacity",
            ));
        }
        if self.prediction_period_min == 0 {
            return Err(Error::InvalidArgument("empty prediction period"));
        }
        if self.gps_time_of_day >= SECONDS_PER_DAY {
            return Err(Error::InvalidArgument("time of day out of range"));
        }
        Ok(())
    }
}

pub(crate) fn encode_record(prediction: &Prediction, buf: &mut BytesMut) {
    buf.put_u16(prediction.time.day);
    buf.put_u32(prediction.time.time_of_day);
    buf.put_u16(prediction.period_min);
    buf.put_slice(&prediction.health);
    buf.put_slice(&prediction.ephemeris);
}

pub(crate) fn decode_record(mut buf: &[u8]) -> Result<Prediction, Error> {
    if buf.len() != RECORD_BYTES {
        return Err(Error::Decode("record length"));
    }
    let day = buf.get_u16();
    let time_of_day = buf.get_u32();
    let period_min = buf.get_u16();
    if time_of_day >= SECONDS_PER_DAY {
        return Err(Error::Decode("time of day out of range"));
    }
    if period_min == 0 {
        return Err(Error::Decode("empty validity interval"));
    }
    let mut health = [0u8; GPS_SV_COUNT];
    buf.copy_to_slice(&mut health);
    let mut ephemeris = vec![0u8; EPHEMERIS_BYTES];
    buf.copy_to_slice(&mut ephemeris);
    Ok(Prediction {
        time: GpsTime::new(day, time_of_day),
        period_min,
        ephemeris,
        health,
    })
}

/// Incremental decoder for one response stream. Bytes accumulate across
/// [StreamDecoder::feed] calls; only whole validated records are emitted,
/// malformed input errors out without committing anything.
#[derive(Debug, Default)]
pub(crate) struct StreamDecoder {
    buf: BytesMut,
    header: Option<PgpsRequest>,
    emitted: u16,
}

impl StreamDecoder {
    /// Batch header, once seen.
    pub fn header(&self) -> Option<PgpsRequest> {
        self.header
    }
    /// True once every declared record of the active batch was emitted.
    pub fn complete(&self) -> bool {
        match self.header {
            Some(header) => self.emitted >= header.prediction_count,
            None => false,
        }
    }
    /// Discards the active batch and any buffered bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.header = None;
        self.emitted = 0;
    }
    /// Consumes a chunk of the response stream, emitting every record that
    /// completed. `max_count` bounds the declared batch size.
    pub fn feed(&mut self, data: &[u8], max_count: u16) -> Result<Vec<Prediction>, Error> {
        self.buf.extend_from_slice(data);

        if self.header.is_none() {
            if self.buf.len() < REQUEST_BYTES {
                return Ok(Vec::new());
            }
            let header = PgpsRequest::decode(&self.buf[..REQUEST_BYTES])?;
            if header.prediction_count == 0 || header.prediction_count > max_count {
                return Err(Error::Decode("declared prediction count out of range"));
            }
            if header.prediction_period_min == 0 {
                return Err(Error::Decode("empty prediction period"));
            }
            self.buf.advance(REQUEST_BYTES);
            self.header = Some(header);
        }

        let header = match self.header {
            Some(header) => header,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::new();
        while self.buf.len() >= RECORD_BYTES && self.emitted < header.prediction_count {
            let record = decode_record(&self.buf[..RECORD_BYTES])?;
            if record.period_min != header.prediction_period_min {
                return Err(Error::Decode("record period differs from batch header"));
            }
            // records must tile the batch window in declared order
            let expected = header.anchor().total_seconds()
                + self.emitted as u64 * header.prediction_period_min as u64 * 60;
            if record.start_seconds() != expected {
                return Err(Error::Decode("record breaks batch continuity"));
            }
            self.buf.advance(RECORD_BYTES);
            self.emitted += 1;
            records.push(record);
        }

        if self.complete() && !self.buf.is_empty() {
            return Err(Error::Decode("trailing bytes after final record"));
        }

        Ok(records)
    }
}
