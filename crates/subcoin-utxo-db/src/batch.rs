//! In-memory write batch staged between commits.

use crate::header::{Header, Stats};
use crate::slot::Slot;
use crate::value::{EncodedValue, VALUE_UNIT};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Exclusive upper bound of the value log cursor, in units.
pub(crate) const MAX_CURSOR: u64 = 1 << 32;

/// Slot overrides and value log appends not yet committed.
///
/// Every lookup consults the overrides before the main store, so an uncommitted
/// write is immediately visible to the engine that staged it.
#[derive(Debug)]
pub(crate) struct Pending {
    /// Slot number to new slot content, in storage order.
    pub(crate) slots: BTreeMap<u64, Slot>,
    /// Value log bytes to append at `base_cursor`.
    pub(crate) log: Vec<u8>,
    /// Committed cursor this batch extends.
    pub(crate) base_cursor: u64,
    /// Stats as they will be once this batch commits.
    pub(crate) stats: Stats,
}

impl Pending {
    pub(crate) fn new(committed: &Header) -> Self {
        Self {
            slots: BTreeMap::new(),
            log: Vec::new(),
            base_cursor: committed.cursor,
            stats: committed.stats,
        }
    }

    /// Logical value log cursor, in units.
    pub(crate) fn cursor(&self) -> u64 {
        self.base_cursor + (self.log.len() / VALUE_UNIT) as u64
    }

    pub(crate) fn set_slot(&mut self, index: u64, slot: Slot) {
        self.slots.insert(index, slot);
    }

    /// Appends `value` to the log and returns its unit pointer.
    pub(crate) fn append(&mut self, value: &EncodedValue) -> Result<u32> {
        let pointer = self.cursor();
        if pointer + value.units() > MAX_CURSOR {
            return Err(Error::ValueLogExhausted(pointer));
        }
        self.log.extend_from_slice(&value.bytes);
        Ok(pointer as u32)
    }

    /// Whether `pointer` refers to a value appended by this batch.
    pub(crate) fn owns(&self, pointer: u64) -> bool {
        pointer >= self.base_cursor
    }

    pub(crate) fn read_units(&self, pointer: u64, buf: &mut [u8]) -> Result<()> {
        let start = (pointer - self.base_cursor) as usize * VALUE_UNIT;
        let bytes = self.log.get(start..start + buf.len()).ok_or_else(|| {
            Error::CorruptValue(format!(
                "pointer {pointer} beyond the pending cursor {}",
                self.cursor()
            ))
        })?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.log.is_empty()
    }
}
