//! Persistent prediction ledger: fixed capacity slots over a byte
//! addressable region, wraparound allocation, per slot integrity checks.
use bytes::{Buf, BufMut, BytesMut};
use hifitime::Epoch;
use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::codec::{decode_record, encode_record, RECORD_BYTES};
use crate::prediction::Prediction;
use crate::storage::{Storage, StorageError};

const MAGIC: u32 = 0x5047_5053; // "PGPS"
const VERSION: u16 = 1;
const SEQ_EMPTY: u32 = u32::MAX;

pub(crate) const HEADER_BYTES: usize = 12;
/// Slot layout: sequence number, record, checksum.
pub(crate) const SLOT_BYTES: usize = 4 + RECORD_BYTES + 4;

/// Region size needed for `slot_count` predictions.
pub(crate) fn required_bytes(slot_count: u16) -> usize {
    HEADER_BYTES + slot_count as usize * SLOT_BYTES
}

/// First word of a SHA-256 digest, big endian.
fn checksum32(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Occupied { seq: u32, end: Epoch },
}

/// One record recovered at [Ledger::open].
pub(crate) struct LoadedRecord {
    pub seq: u32,
    pub prediction: Prediction,
}

pub(crate) struct LoadOutcome {
    /// Valid records, in write order.
    pub records: Vec<LoadedRecord>,
    /// Slots failing integrity validation, treated as absent.
    pub corrupt_slots: usize,
}

pub(crate) struct StoreOutcome {
    pub slot: u16,
    pub seq: u32,
    /// Sequence number of the record this write displaced, if any.
    pub evicted_seq: Option<u32>,
}

pub(crate) struct Ledger<S: Storage> {
    storage: S,
    slots: Vec<Slot>,
    next_seq: u32,
}

impl<S: Storage> Ledger<S> {
    /// Opens the region, validating the layout header and every occupied
    /// slot. A foreign or damaged header reformats the region as empty;
    /// individual corrupt slots are skipped and counted.
    pub fn open(storage: S, slot_count: u16) -> Result<(Self, LoadOutcome), StorageError> {
        let required = required_bytes(slot_count);
        if storage.size() < required {
            return Err(StorageError::RegionTooSmall {
                size: storage.size(),
                required,
            });
        }
        let mut ledger = Self {
            storage,
            slots: vec![Slot::Empty; slot_count as usize],
            next_seq: 0,
        };
        if !ledger.header_valid()? {
            debug!("unrecognized ledger header, formatting {} slots", slot_count);
            ledger.format()?;
            return Ok((
                ledger,
                LoadOutcome {
                    records: Vec::new(),
                    corrupt_slots: 0,
                },
            ));
        }
        let outcome = ledger.scan()?;
        Ok((ledger, outcome))
    }

    /// Persists one record, durably, before returning. Allocation is
    /// circular: first empty slot, else the oldest fully expired record,
    /// else the single oldest record regardless of validity.
    pub fn store(
        &mut self,
        prediction: &Prediction,
        now: Option<Epoch>,
    ) -> Result<StoreOutcome, StorageError> {
        let (slot, evicted_seq) = self.pick_slot(now);
        let seq = self.next_seq;

        let mut buf = BytesMut::with_capacity(SLOT_BYTES);
        buf.put_u32(seq);
        encode_record(prediction, &mut buf);
        let checksum = checksum32(&buf);
        buf.put_u32(checksum);

        self.storage.write(HEADER_BYTES + slot * SLOT_BYTES, &buf)?;
        self.slots[slot] = Slot::Occupied {
            seq,
            end: prediction.end(),
        };
        self.next_seq += 1;
        if let Some(evicted) = evicted_seq {
            debug!("slot {} reclaimed, record #{} displaced", slot, evicted);
        }
        Ok(StoreOutcome {
            slot: slot as u16,
            seq,
            evicted_seq,
        })
    }

    /// Reclaims the whole region.
    pub fn erase_all(&mut self) -> Result<(), StorageError> {
        self.format()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> S {
        self.storage
    }

    fn header_valid(&mut self) -> Result<bool, StorageError> {
        let mut header = [0u8; HEADER_BYTES];
        self.storage.read(0, &mut header)?;
        let mut buf = &header[..];
        Ok(buf.get_u32() == MAGIC
            && buf.get_u16() == VERSION
            && buf.get_u16() == self.slots.len() as u16
            && buf.get_u32() == SLOT_BYTES as u32)
    }

    fn format(&mut self) -> Result<(), StorageError> {
        let size = required_bytes(self.slots.len() as u16);
        self.storage.erase(0, size)?;
        let mut header = BytesMut::with_capacity(HEADER_BYTES);
        header.put_u32(MAGIC);
        header.put_u16(VERSION);
        header.put_u16(self.slots.len() as u16);
        header.put_u32(SLOT_BYTES as u32);
        self.storage.write(0, &header)?;
        self.slots.fill(Slot::Empty);
        Ok(())
    }

    fn scan(&mut self) -> Result<LoadOutcome, StorageError> {
        let mut records = Vec::new();
        let mut corrupt_slots = 0;
        let mut buf = vec![0u8; SLOT_BYTES];
        for slot in 0..self.slots.len() {
            self.storage.read(HEADER_BYTES + slot * SLOT_BYTES, &mut buf)?;
            let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
            if seq == SEQ_EMPTY {
                continue;
            }
            let body = &buf[..4 + RECORD_BYTES];
            let stored = (&buf[4 + RECORD_BYTES..]).get_u32();
            if checksum32(body) != stored {
                warn!("slot {} failed checksum, discarded", slot);
                corrupt_slots += 1;
                continue;
            }
            match decode_record(&buf[4..4 + RECORD_BYTES]) {
                Ok(prediction) => {
                    self.slots[slot] = Slot::Occupied {
                        seq,
                        end: prediction.end(),
                    };
                    self.next_seq = self.next_seq.max(seq + 1);
                    records.push(LoadedRecord { seq, prediction });
                },
                Err(e) => {
                    warn!("slot {} holds an undecodable record ({}), discarded", slot, e);
                    corrupt_slots += 1;
                },
            }
        }
        records.sort_by_key(|r| r.seq);
        debug!(
            "ledger scan: {} records, {} corrupt slots",
            records.len(),
            corrupt_slots
        );
        Ok(LoadOutcome {
            records,
            corrupt_slots,
        })
    }

    fn pick_slot(&self, now: Option<Epoch>) -> (usize, Option<u32>) {
        for (index, slot) in self.slots.iter().enumerate() {
            if matches!(slot, Slot::Empty) {
                return (index, None);
            }
        }
        // all occupied: oldest expired first, then oldest outright
        let mut expired: Option<(usize, u32)> = None;
        let mut oldest: Option<(usize, u32)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Slot::Occupied { seq, end } = slot {
                if oldest.map(|(_, s)| *seq < s).unwrap_or(true) {
                    oldest = Some((index, *seq));
                }
                if let Some(now) = now {
                    if *end <= now && expired.map(|(_, s)| *seq < s).unwrap_or(true) {
                        expired = Some((index, *seq));
                    }
                }
            }
        }
        match expired.or(oldest) {
            Some((index, seq)) => (index, Some(seq)),
            None => (0, None),
        }
    }
}
