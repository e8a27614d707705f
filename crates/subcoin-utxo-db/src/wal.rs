//! Write-ahead batch encoding and the commit phases.
//!
//! A commit first makes the whole batch durable in the WAL store (body, then a
//! header announcing the new tag), then applies it to the main store at absolute
//! offsets. Applying the same batch twice leaves the main store unchanged, which
//! is what makes replay after a crash safe.
//!
//! WAL body, little-endian:
//!
//! ```text
//! base_cursor: u64
//! slot_count:  u64
//! slot_count × (index: u64, slot: [u8; SLOT_SIZE])
//! log_len:     u64
//! log:         [u8; log_len]
//! ```

use crate::header::{HEADER_SIZE, Header, checksum};
use crate::slot::SLOT_SIZE;
use crate::store::ByteStore;
use crate::table::Layout;
use crate::value::VALUE_UNIT;
use crate::{Error, Result};
use std::io::ErrorKind;

/// Raw slot bytes keyed by slot number.
pub(crate) type SlotWrite = (u64, [u8; SLOT_SIZE]);

/// A batch as stored in the WAL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WalBatch {
    pub(crate) base_cursor: u64,
    pub(crate) slots: Vec<SlotWrite>,
    pub(crate) log: Vec<u8>,
}

pub(crate) fn encode_body(base_cursor: u64, slots: &[SlotWrite], log: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + slots.len() * (8 + SLOT_SIZE) + log.len());
    out.extend_from_slice(&base_cursor.to_le_bytes());
    out.extend_from_slice(&(slots.len() as u64).to_le_bytes());
    for (index, raw) in slots {
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(raw);
    }
    out.extend_from_slice(&(log.len() as u64).to_le_bytes());
    out.extend_from_slice(log);
    out
}

impl WalBatch {
    pub(crate) fn decode(mut body: &[u8]) -> Result<Self> {
        let base_cursor = take_u64(&mut body)?;

        let count = take_u64(&mut body)?;
        let count = usize::try_from(count)
            .ok()
            .filter(|count| count.saturating_mul(8 + SLOT_SIZE) <= body.len())
            .ok_or_else(|| Error::CorruptWal(format!("{count} slot writes exceed the body")))?;

        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let index = take_u64(&mut body)?;
            let mut raw = [0u8; SLOT_SIZE];
            raw.copy_from_slice(take(&mut body, SLOT_SIZE)?);
            slots.push((index, raw));
        }

        let log_len = take_u64(&mut body)?;
        let log_len = usize::try_from(log_len)
            .map_err(|_| Error::CorruptWal(format!("log of {log_len} bytes")))?;
        if log_len % VALUE_UNIT != 0 {
            return Err(Error::CorruptWal(format!(
                "log of {log_len} bytes is not a whole number of units"
            )));
        }
        let log = take(&mut body, log_len)?.to_vec();

        if !body.is_empty() {
            return Err(Error::CorruptWal(format!(
                "{} trailing bytes after the batch",
                body.len()
            )));
        }

        Ok(Self {
            base_cursor,
            slots,
            log,
        })
    }

    /// Reads the batch announced by `header`, verifying its checksum.
    pub(crate) fn read<S: ByteStore + ?Sized>(wal: &S, header: &Header) -> Result<Self> {
        if header.body_len == 0 {
            // Baseline: nothing beyond the header itself.
            return Ok(Self {
                base_cursor: header.cursor,
                slots: Vec::new(),
                log: Vec::new(),
            });
        }

        let len = usize::try_from(header.body_len)
            .map_err(|_| Error::CorruptWal(format!("body of {} bytes", header.body_len)))?;
        let mut body = vec![0u8; len];
        match wal.read_at(HEADER_SIZE as u64, &mut body) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Err(Error::CorruptWal(format!(
                    "body of {len} bytes is truncated"
                )));
            }
            Err(err) => return Err(err.into()),
        }

        if checksum(&body) != header.body_checksum {
            return Err(Error::CorruptWal(format!(
                "body checksum mismatch for tag {}",
                header.tag
            )));
        }

        Self::decode(&body)
    }

    /// Checks the batch against the table it is about to be applied to.
    pub(crate) fn validate(&self, layout: &Layout, header: &Header) -> Result<()> {
        if let Some((index, _)) = self.slots.iter().find(|(index, _)| *index >= layout.slot_count) {
            return Err(Error::CorruptWal(format!(
                "slot #{index} outside a table of {} slots",
                layout.slot_count
            )));
        }

        let end = self.base_cursor + (self.log.len() / VALUE_UNIT) as u64;
        if end != header.cursor {
            return Err(Error::CorruptWal(format!(
                "batch ends at unit {end}, header cursor is {}",
                header.cursor
            )));
        }

        Ok(())
    }
}

fn take<'a>(body: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if body.len() < len {
        return Err(Error::CorruptWal(format!(
            "expected {len} more bytes, {} left",
            body.len()
        )));
    }
    let (head, rest) = body.split_at(len);
    *body = rest;
    Ok(head)
}

fn take_u64(body: &mut &[u8]) -> Result<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(take(body, 8)?);
    Ok(u64::from_le_bytes(raw))
}

/// Phase 1: makes the batch durable in the WAL store.
///
/// The header goes last so that a crash before it leaves the previous header,
/// and with it the previous tag, in place.
pub(crate) fn write_ahead<S: ByteStore + ?Sized>(
    wal: &mut S,
    header: &Header,
    body: &[u8],
) -> Result<()> {
    wal.write_at(HEADER_SIZE as u64, body)?;
    wal.sync()?;
    header.write(wal)?;
    wal.sync()?;
    Ok(())
}

/// Phase 2: writes the batch to the main store, then its header.
pub(crate) fn apply<S: ByteStore + ?Sized>(
    main: &mut S,
    layout: &Layout,
    header: &Header,
    base_cursor: u64,
    slots: &[SlotWrite],
    log: &[u8],
) -> Result<()> {
    // Adjacent slots go out in a single write.
    let mut run_start = 0;
    let mut run = Vec::new();
    for (index, raw) in slots {
        if !run.is_empty() && *index != run_start + (run.len() / SLOT_SIZE) as u64 {
            main.write_at(layout.slot_offset(run_start), &run)?;
            run.clear();
        }
        if run.is_empty() {
            run_start = *index;
        }
        run.extend_from_slice(raw);
    }
    if !run.is_empty() {
        main.write_at(layout.slot_offset(run_start), &run)?;
    }

    if !log.is_empty() {
        main.write_at(layout.unit_offset(base_cursor), log)?;
    }

    header.without_body().write(main)?;
    main.sync()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Stats;
    use crate::store::MemStore;

    fn batch() -> WalBatch {
        WalBatch {
            base_cursor: 3,
            slots: vec![(1, [0xAA; SLOT_SIZE]), (2, [0xBB; SLOT_SIZE]), (6, [0xCC; SLOT_SIZE])],
            log: vec![7u8; 2 * VALUE_UNIT],
        }
    }

    #[test]
    fn test_body_decodes_what_was_encoded() {
        let batch = batch();
        let body = encode_body(batch.base_cursor, &batch.slots, &batch.log);
        assert_eq!(body.len(), 24 + 3 * 18 + 16);
        assert_eq!(WalBatch::decode(&body).unwrap(), batch);
    }

    #[test]
    fn test_malformed_bodies_are_rejected() {
        let batch = batch();
        let body = encode_body(batch.base_cursor, &batch.slots, &batch.log);

        assert!(matches!(
            WalBatch::decode(&body[..body.len() - 1]),
            Err(Error::CorruptWal(_))
        ));

        let mut trailing = body.clone();
        trailing.push(0);
        assert!(matches!(WalBatch::decode(&trailing), Err(Error::CorruptWal(_))));

        let odd_log = encode_body(0, &[], &[1, 2, 3]);
        assert!(matches!(WalBatch::decode(&odd_log), Err(Error::CorruptWal(_))));
    }

    #[test]
    fn test_read_verifies_checksum() {
        let batch = batch();
        let body = encode_body(batch.base_cursor, &batch.slots, &batch.log);
        let header = Header {
            tag: 9,
            cursor: 5,
            body_len: body.len() as u64,
            body_checksum: checksum(&body),
            ..Header::new(Stats::new(4))
        };

        let mut wal = MemStore::new();
        write_ahead(&mut wal, &header, &body).unwrap();
        assert_eq!(WalBatch::read(&wal, &header).unwrap(), batch);

        wal.write_at(HEADER_SIZE as u64 + 30, &[0xFF]).unwrap();
        assert!(matches!(
            WalBatch::read(&wal, &header),
            Err(Error::CorruptWal(_))
        ));
    }

    #[test]
    fn test_validate_against_layout() {
        let layout = Layout::for_capacity(4).unwrap();
        let header = Header {
            cursor: 5,
            ..Header::new(Stats::new(4))
        };
        assert!(batch().validate(&layout, &header).is_ok());

        let mut outside = batch();
        outside.slots.push((8, [0; SLOT_SIZE]));
        assert!(outside.validate(&layout, &header).is_err());

        let short = Header { cursor: 4, ..header };
        assert!(batch().validate(&layout, &short).is_err());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let layout = Layout::for_capacity(4).unwrap();
        let header = Header {
            tag: 1,
            cursor: 5,
            ..Header::new(Stats::new(4))
        };
        let batch = batch();

        let mut main = MemStore::new();
        apply(&mut main, &layout, &header, batch.base_cursor, &batch.slots, &batch.log).unwrap();
        let once = main.to_vec();
        apply(&mut main, &layout, &header, batch.base_cursor, &batch.slots, &batch.log).unwrap();
        assert_eq!(main.to_vec(), once);

        let mut raw = [0u8; SLOT_SIZE];
        main.read_at(layout.slot_offset(2), &mut raw).unwrap();
        assert_eq!(raw, [0xBB; SLOT_SIZE]);
        assert_eq!(main.len() as u64, layout.unit_offset(5));
        assert_eq!(Header::read(&main).unwrap().unwrap(), header);
    }
}
