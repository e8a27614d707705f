//! Slot table addressing and the linear-probe scanner.

use crate::batch::{MAX_CURSOR, Pending};
use crate::header::{HEADER_SIZE, Header};
use crate::key::InternalKey;
use crate::slot::{Entry, SLOT_SIZE, Slot};
use crate::store::ByteStore;
use crate::value::{VALUE_UNIT, Value, ValueSource, read_value};
use crate::{Error, Result};
use std::ops::ControlFlow;

/// Byte offsets of the main store regions: header, slot table, value log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) slot_count: u64,
}

impl Layout {
    pub(crate) fn for_capacity(capacity: u64) -> Result<Self> {
        let slot_count = capacity
            .checked_mul(2)
            .filter(|slots| *slots > 0)
            .ok_or(Error::InvalidCapacity(capacity))?;

        // The whole store, log included, must be addressable.
        slot_count
            .checked_mul(SLOT_SIZE as u64)
            .and_then(|table| table.checked_add(HEADER_SIZE as u64))
            .and_then(|log_begin| log_begin.checked_add(MAX_CURSOR * VALUE_UNIT as u64))
            .ok_or(Error::InvalidCapacity(capacity))?;

        Ok(Self { slot_count })
    }

    /// Layout described by a stored header, checking that its counters are plausible.
    pub(crate) fn for_header(header: &Header) -> Result<Self> {
        let layout = Self::for_capacity(header.stats.capacity).map_err(|_| {
            Error::CorruptHeader(format!("invalid capacity {}", header.stats.capacity))
        })?;

        if header.stats.tombstones > layout.slot_count {
            return Err(Error::CorruptHeader(format!(
                "{} tombstones in a table of {} slots",
                header.stats.tombstones, layout.slot_count
            )));
        }

        if header.cursor > MAX_CURSOR {
            return Err(Error::CorruptHeader(format!(
                "value log cursor {} out of range",
                header.cursor
            )));
        }

        // A plain record takes a slot; every extra collision entry takes log bytes.
        let max_records = layout.slot_count + header.cursor * VALUE_UNIT as u64;
        if header.stats.live > max_records {
            return Err(Error::CorruptHeader(format!(
                "{} live records but room for at most {max_records}",
                header.stats.live
            )));
        }

        Ok(layout)
    }

    pub(crate) fn slot_offset(&self, index: u64) -> u64 {
        HEADER_SIZE as u64 + index * SLOT_SIZE as u64
    }

    pub(crate) fn log_begin(&self) -> u64 {
        self.slot_offset(self.slot_count)
    }

    pub(crate) fn unit_offset(&self, pointer: u64) -> u64 {
        self.log_begin() + pointer * VALUE_UNIT as u64
    }

    pub(crate) fn next(&self, index: u64) -> u64 {
        (index + 1) % self.slot_count
    }

    pub(crate) fn prev(&self, index: u64) -> u64 {
        (index + self.slot_count - 1) % self.slot_count
    }
}

/// Outcome of probing for an internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    Found { index: u64, entry: Entry },
    /// Absent; `index` is the first reusable slot on the probe path.
    Vacant { index: u64, reuses_tombstone: bool },
}

/// Read view of the table as the pending batch sees it.
pub(crate) struct Table<'a, S> {
    layout: Layout,
    main: &'a S,
    pending: &'a Pending,
    batch_slots: usize,
}

impl<'a, S: ByteStore> Table<'a, S> {
    pub(crate) fn new(layout: Layout, main: &'a S, pending: &'a Pending, batch_slots: usize) -> Self {
        Self {
            layout,
            main,
            pending,
            batch_slots: batch_slots.max(1),
        }
    }

    /// Effective content of slot `index`.
    pub(crate) fn slot(&self, index: u64) -> Result<Slot> {
        if let Some(slot) = self.pending.slots.get(&index) {
            return Ok(*slot);
        }
        let mut raw = [0u8; SLOT_SIZE];
        self.main.read_at(self.layout.slot_offset(index), &mut raw)?;
        Slot::decode(index, &raw)
    }

    /// Visits `count` slots starting at `start`, wrapping at the end of the
    /// table, until `f` breaks.
    pub(crate) fn scan<T, F>(&self, start: u64, count: u64, mut f: F) -> Result<Option<T>>
    where
        F: FnMut(u64, Slot) -> Result<ControlFlow<T>>,
    {
        let mut buf = vec![0u8; self.batch_slots * SLOT_SIZE];
        let mut index = start % self.layout.slot_count;
        let mut remaining = count;

        while remaining > 0 {
            // A batch never crosses the end of the table.
            let batch = remaining
                .min(self.batch_slots as u64)
                .min(self.layout.slot_count - index);
            let raw = &mut buf[..batch as usize * SLOT_SIZE];
            self.main.read_at(self.layout.slot_offset(index), raw)?;

            for (i, chunk) in raw.chunks_exact(SLOT_SIZE).enumerate() {
                let at = index + i as u64;
                let slot = match self.pending.slots.get(&at) {
                    Some(slot) => *slot,
                    None => Slot::decode(at, chunk)?,
                };
                if let ControlFlow::Break(found) = f(at, slot)? {
                    return Ok(Some(found));
                }
            }

            remaining -= batch;
            index = (index + batch) % self.layout.slot_count;
        }

        Ok(None)
    }

    /// Follows the probe sequence of `key` up to the first empty slot.
    pub(crate) fn probe(&self, key: &InternalKey) -> Result<Probe> {
        let slot_count = self.layout.slot_count;
        let mut tombstone = None;

        let outcome = self.scan(key.default_slot(slot_count), slot_count, |index, slot| {
            Ok(match slot {
                Slot::Empty => ControlFlow::Break(match tombstone {
                    Some(index) => Probe::Vacant {
                        index,
                        reuses_tombstone: true,
                    },
                    None => Probe::Vacant {
                        index,
                        reuses_tombstone: false,
                    },
                }),
                Slot::Tombstone => {
                    tombstone.get_or_insert(index);
                    ControlFlow::Continue(())
                }
                Slot::Occupied(entry) if entry.key == *key => {
                    ControlFlow::Break(Probe::Found { index, entry })
                }
                Slot::Occupied(_) => ControlFlow::Continue(()),
            })
        })?;

        outcome.ok_or(Error::TableExhausted { slots: slot_count })
    }

    /// Tombstones directly preceding `index`, nearest first.
    pub(crate) fn tombstones_before(&self, index: u64) -> Result<Vec<u64>> {
        let mut found = Vec::new();
        let mut at = self.layout.prev(index);
        while at != index && self.slot(at)? == Slot::Tombstone {
            found.push(at);
            at = self.layout.prev(at);
        }
        Ok(found)
    }

    pub(crate) fn read_value(&self, entry: &Entry) -> Result<Value> {
        read_value(self, entry.pointer, entry.default_len)
    }
}

impl<S: ByteStore> ValueSource for Table<'_, S> {
    fn read_units(&self, pointer: u64, buf: &mut [u8]) -> Result<()> {
        if self.pending.owns(pointer) {
            return self.pending.read_units(pointer, buf);
        }
        self.main.read_at(self.layout.unit_offset(pointer), buf)?;
        Ok(())
    }
}
