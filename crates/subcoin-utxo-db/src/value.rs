//! Value log records.
//!
//! The value log is an append-only sequence of [`VALUE_UNIT`]-byte units. A
//! plain value of exactly one unit is stored bare and flagged through
//! [`SlotFlags::DEFAULT_LEN`](crate::SlotFlags::DEFAULT_LEN) on its slot.
//! Everything else is framed by a signed 16-bit little-endian length, negative
//! for a [`CollisionRecord`], and zero-padded to a whole number of units.

use crate::collision::CollisionRecord;
use crate::{Error, Result};

/// Size of a value log unit, and of a value stored without a length header.
pub const VALUE_UNIT: usize = 8;

/// Largest payload the length header can describe.
pub const MAX_VALUE_LEN: usize = i16::MAX as usize;

const LEN_HEADER: usize = 2;

/// Decoded content of a slot's value pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Value of the single key owning the slot.
    Plain(Vec<u8>),
    /// Values of several keys sharing the slot's internal key.
    Collision(CollisionRecord),
}

impl Value {
    /// Number of logical records represented.
    pub fn record_count(&self) -> u64 {
        match self {
            Self::Plain(_) => 1,
            Self::Collision(record) => record.len() as u64,
        }
    }

    /// Looks up the value of `key` within this slot.
    pub fn get(&self, key: &[u8]) -> &[u8] {
        match self {
            Self::Plain(value) => value,
            Self::Collision(record) => record.get(key),
        }
    }

    pub(crate) fn encode(&self) -> Result<EncodedValue> {
        match self {
            Self::Plain(value) if value.len() == VALUE_UNIT => Ok(EncodedValue {
                bytes: value.clone(),
                default_len: true,
            }),
            Self::Plain(value) => EncodedValue::framed(value, false),
            Self::Collision(record) => EncodedValue::framed(&record.encode(), true),
        }
    }
}

/// Rejects payloads that cannot be framed, before anything is staged.
pub(crate) fn ensure_value_len(len: usize) -> Result<()> {
    if len > MAX_VALUE_LEN {
        return Err(Error::ValueTooLarge {
            len,
            max: MAX_VALUE_LEN,
        });
    }
    Ok(())
}

/// Value log bytes ready to be appended.
#[derive(Debug)]
pub(crate) struct EncodedValue {
    pub(crate) bytes: Vec<u8>,
    pub(crate) default_len: bool,
}

impl EncodedValue {
    fn framed(payload: &[u8], collision: bool) -> Result<Self> {
        ensure_value_len(payload.len())?;

        let len = payload.len() as i16;
        let header = if collision { -len } else { len };

        let mut bytes = Vec::with_capacity(padded_len(LEN_HEADER + payload.len()));
        bytes.extend_from_slice(&header.to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes.resize(padded_len(bytes.len()), 0);

        Ok(Self {
            bytes,
            default_len: false,
        })
    }

    pub(crate) fn units(&self) -> u64 {
        (self.bytes.len() / VALUE_UNIT) as u64
    }
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(VALUE_UNIT) * VALUE_UNIT
}

/// Random access to value log units, wherever they currently live.
pub(crate) trait ValueSource {
    /// Fills `buf` (a whole number of units) starting at unit `pointer`.
    fn read_units(&self, pointer: u64, buf: &mut [u8]) -> Result<()>;
}

/// Reads and decodes the record at `pointer`.
pub(crate) fn read_value<S: ValueSource + ?Sized>(
    source: &S,
    pointer: u32,
    default_len: bool,
) -> Result<Value> {
    let pointer = u64::from(pointer);

    let mut head = [0u8; VALUE_UNIT];
    source.read_units(pointer, &mut head)?;
    if default_len {
        return Ok(Value::Plain(head.to_vec()));
    }

    let header = i16::from_le_bytes([head[0], head[1]]);
    let len = usize::from(header.unsigned_abs());
    if len > MAX_VALUE_LEN {
        return Err(Error::CorruptValue(format!(
            "length header {header} at unit {pointer}"
        )));
    }

    let mut buf = vec![0u8; padded_len(LEN_HEADER + len)];
    buf[..VALUE_UNIT].copy_from_slice(&head);
    if buf.len() > VALUE_UNIT {
        source.read_units(pointer + 1, &mut buf[VALUE_UNIT..])?;
    }

    let payload = &buf[LEN_HEADER..LEN_HEADER + len];
    if header < 0 {
        CollisionRecord::decode(payload).map(Value::Collision)
    } else {
        Ok(Value::Plain(payload.to_vec()))
    }
}
