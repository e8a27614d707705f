//! Fixed-size slot records.

use crate::key::{InternalKey, KEY_LEN, SlotFlags};
use crate::{Error, Result};

/// Width of a value log pointer in bytes.
pub const POINTER_LEN: usize = 4;

/// Width of a slot: internal key followed by a little-endian unit pointer.
pub const SLOT_SIZE: usize = KEY_LEN + POINTER_LEN;

/// Key and value location of an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) key: InternalKey,
    pub(crate) pointer: u32,
    pub(crate) default_len: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Empty,
    Tombstone,
    Occupied(Entry),
}

impl Slot {
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub(crate) fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut raw = [0u8; SLOT_SIZE];
        match self {
            Self::Empty => {}
            Self::Tombstone => raw[0] = SlotFlags::TOMBSTONE.bits(),
            Self::Occupied(entry) => {
                let mut flags = SlotFlags::OCCUPIED;
                flags.set(SlotFlags::DEFAULT_LEN, entry.default_len);
                raw[..KEY_LEN].copy_from_slice(&entry.key.with_flags(flags));
                raw[KEY_LEN..].copy_from_slice(&entry.pointer.to_le_bytes());
            }
        }
        raw
    }

    /// Decodes the raw bytes of slot `index`.
    pub(crate) fn decode(index: u64, raw: &[u8]) -> Result<Self> {
        if raw.len() != SLOT_SIZE {
            return Err(Error::InvalidKeyShape {
                expected: SLOT_SIZE,
                actual: raw.len(),
            });
        }

        let (key, flags) = InternalKey::from_slice(&raw[..KEY_LEN])?;

        if flags.is_valid_key() && flags.is_deleted() {
            return Err(Error::CorruptSlot(index));
        }

        if flags.is_valid_key() {
            let pointer = u32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]);
            return Ok(Self::Occupied(Entry {
                key,
                pointer,
                default_len: flags.contains(SlotFlags::DEFAULT_LEN),
            }));
        }

        if flags.is_deleted() {
            return Ok(Self::Tombstone);
        }

        // Writers only ever leave unused slots zeroed.
        if raw.iter().any(|b| *b != 0) {
            return Err(Error::CorruptSlot(index));
        }

        Ok(Self::Empty)
    }
}
