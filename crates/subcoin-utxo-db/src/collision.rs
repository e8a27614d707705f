//! Collision records.
//!
//! When distinct full keys truncate to the same internal key, the slot points at
//! a record holding the value of whichever key claimed the slot first (its full
//! key is unknown) followed by `(full_key, value)` pairs for every later key.
//!
//! Serialized as a flat sequence of compact-size prefixed byte strings:
//! `first, key_1, value_1, ..., key_n, value_n`, so the count is always odd.

use crate::value::Value;
use crate::{Error, Result};

/// Values sharing a single internal key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionRecord {
    first: Vec<u8>,
    others: Vec<(Vec<u8>, Vec<u8>)>,
}

impl CollisionRecord {
    /// Creates a record from the slot's existing value and a newly colliding entry.
    pub fn new(first: Vec<u8>, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            first,
            others: vec![(key, value)],
        }
    }

    /// Value of the anonymous first entry.
    pub fn first(&self) -> &[u8] {
        &self.first
    }

    /// Keyed entries in insertion order.
    pub fn others(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.others
    }

    /// Number of logical records held.
    pub fn len(&self) -> usize {
        1 + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Looks up `key`, falling back to the anonymous first value.
    pub fn get(&self, key: &[u8]) -> &[u8] {
        self.others
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&self.first)
    }

    /// Inserts or replaces the entry for `key`. Returns `true` if a new entry was added.
    pub fn upsert(&mut self, key: &[u8], value: Vec<u8>) -> bool {
        match self.others.iter_mut().find(|(k, _)| k.as_slice() == key) {
            Some((_, existing)) => {
                *existing = value;
                false
            }
            None => {
                self.others.push((key.to_vec(), value));
                true
            }
        }
    }

    /// Drops the entry for `key` (or the anonymous first value if `key` is not
    /// listed) and returns what the slot should hold afterwards.
    pub fn remove(mut self, key: &[u8]) -> Value {
        match self.others.iter().position(|(k, _)| k.as_slice() == key) {
            Some(index) => {
                self.others.remove(index);
            }
            None => {
                // The promoted entry loses its key, like any first value.
                let (_, promoted) = self.others.remove(0);
                self.first = promoted;
            }
        }

        if self.others.is_empty() {
            Value::Plain(self.first)
        } else {
            Value::Collision(self)
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.first.len()
                + self
                    .others
                    .iter()
                    .map(|(k, v)| k.len() + v.len() + 2)
                    .sum::<usize>()
                + 1,
        );
        write_bytes(&mut out, &self.first);
        for (key, value) in &self.others {
            write_bytes(&mut out, key);
            write_bytes(&mut out, value);
        }
        out
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        while !data.is_empty() {
            entries.push(read_bytes(&mut data)?);
        }

        if entries.len() % 2 == 0 {
            return Err(Error::CorruptValue(format!(
                "collision record with {} entries",
                entries.len()
            )));
        }

        let mut entries = entries.into_iter();
        let first = entries.next().unwrap_or_default();
        let mut others = Vec::with_capacity(entries.len() / 2);
        while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
            others.push((key, value));
        }

        if others.is_empty() {
            return Err(Error::CorruptValue(
                "collision record without colliding entries".to_string(),
            ));
        }

        Ok(Self { first, others })
    }
}

// https://github.com/bitcoin/bitcoin/blob/0903ce8dbc25d3823b03d52f6e6bff74d19e801e/src/serialize.h#L305
fn write_compact_size(out: &mut Vec<u8>, size: u64) {
    if size < 253 {
        out.push(size as u8);
    } else if size <= 0xFFFF {
        out.push(253);
        out.extend_from_slice(&(size as u16).to_le_bytes());
    } else if size <= 0xFFFF_FFFF {
        out.push(254);
        out.extend_from_slice(&(size as u32).to_le_bytes());
    } else {
        out.push(255);
        out.extend_from_slice(&size.to_le_bytes());
    }
}

fn read_compact_size(data: &mut &[u8]) -> Result<u64> {
    let (&marker, rest) = data
        .split_first()
        .ok_or_else(|| Error::CorruptValue("truncated length prefix".to_string()))?;
    *data = rest;

    let width = match marker {
        0..=252 => return Ok(marker as u64),
        253 => 2,
        254 => 4,
        255 => 8,
    };

    if data.len() < width {
        return Err(Error::CorruptValue("truncated length prefix".to_string()));
    }
    let (raw, rest) = data.split_at(width);
    *data = rest;

    let mut wide = [0u8; 8];
    wide[..width].copy_from_slice(raw);
    Ok(u64::from_le_bytes(wide))
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn read_bytes(data: &mut &[u8]) -> Result<Vec<u8>> {
    let len = read_compact_size(data)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= data.len())
        .ok_or_else(|| {
            Error::CorruptValue(format!(
                "entry of {len} bytes exceeds the remaining {} bytes",
                data.len()
            ))
        })?;
    let (bytes, rest) = data.split_at(len);
    *data = rest;
    Ok(bytes.to_vec())
}
