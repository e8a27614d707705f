//! On-disk header shared by the main and write-ahead stores.
//!
//! Layout (little-endian, [`HEADER_SIZE`] bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0 | magic `SUBUTXO\0` |
//! | 8 | format version (u32) |
//! | 12 | reserved |
//! | 16 | capacity |
//! | 24 | live records |
//! | 32 | tombstones |
//! | 40 | dead values |
//! | 48 | commit tag |
//! | 56 | value log cursor, in units |
//! | 64 | WAL body length (zero in the main store) |
//! | 72 | WAL body checksum |
//! | 80 | checksum of bytes `0..80` |
//! | 88 | reserved |

use crate::store::ByteStore;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;

pub const HEADER_SIZE: usize = 96;

pub const MAGIC: [u8; 8] = *b"SUBUTXO\0";

pub const FORMAT_VERSION: u32 = 1;

const CHECKSUM_OFFSET: usize = 80;

/// Counters persisted with every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Number of records the table was sized for.
    pub capacity: u64,
    /// Number of live records, counting each entry of a collision record.
    pub live: u64,
    /// Number of tombstone slots.
    pub tombstones: u64,
    /// Number of value log records no slot points at anymore.
    pub dead_values: u64,
}

impl Stats {
    pub(crate) fn new(capacity: u64) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) stats: Stats,
    pub(crate) tag: u64,
    pub(crate) cursor: u64,
    pub(crate) body_len: u64,
    pub(crate) body_checksum: u64,
}

/// Why a header could not be trusted.
#[derive(Debug)]
pub(crate) enum HeaderDefect {
    /// Incomplete write: never written, short, or failing its checksum.
    Torn,
    /// Not a header of this format.
    Foreign(String),
}

impl HeaderDefect {
    pub(crate) fn into_error(self, store: &str) -> Error {
        match self {
            Self::Torn => Error::CorruptHeader(format!("{store} header is torn")),
            Self::Foreign(reason) => Error::CorruptHeader(format!("{store} header: {reason}")),
        }
    }
}

impl Header {
    pub(crate) fn new(stats: Stats) -> Self {
        Self {
            stats,
            tag: 0,
            cursor: 0,
            body_len: 0,
            body_checksum: 0,
        }
    }

    pub(crate) fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());

        let fields = [
            self.stats.capacity,
            self.stats.live,
            self.stats.tombstones,
            self.stats.dead_values,
            self.tag,
            self.cursor,
            self.body_len,
            self.body_checksum,
        ];
        for (i, field) in fields.iter().enumerate() {
            let at = 16 + i * 8;
            buf[at..at + 8].copy_from_slice(&field.to_le_bytes());
        }

        let sum = checksum(&buf[..CHECKSUM_OFFSET]);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8].copy_from_slice(&sum.to_le_bytes());
        buf
    }

    pub(crate) fn decode(buf: &[u8; HEADER_SIZE]) -> std::result::Result<Self, HeaderDefect> {
        if buf.iter().all(|b| *b == 0) {
            return Err(HeaderDefect::Torn);
        }

        if buf[0..8] != MAGIC {
            return Err(HeaderDefect::Foreign(format!(
                "bad magic {:?}",
                &buf[0..8]
            )));
        }

        let version = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if version != FORMAT_VERSION {
            return Err(HeaderDefect::Foreign(format!(
                "unsupported version {version}"
            )));
        }

        if read_u64(buf, CHECKSUM_OFFSET) != checksum(&buf[..CHECKSUM_OFFSET]) {
            return Err(HeaderDefect::Torn);
        }

        Ok(Self {
            stats: Stats {
                capacity: read_u64(buf, 16),
                live: read_u64(buf, 24),
                tombstones: read_u64(buf, 32),
                dead_values: read_u64(buf, 40),
            },
            tag: read_u64(buf, 48),
            cursor: read_u64(buf, 56),
            body_len: read_u64(buf, 64),
            body_checksum: read_u64(buf, 72),
        })
    }

    /// Reads the header at the start of `store`. A store too short to hold one
    /// reports [`HeaderDefect::Torn`].
    pub(crate) fn read<S: ByteStore + ?Sized>(
        store: &S,
    ) -> Result<std::result::Result<Self, HeaderDefect>> {
        let mut buf = [0u8; HEADER_SIZE];
        match store.read_at(0, &mut buf) {
            Ok(()) => Ok(Self::decode(&buf)),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(Err(HeaderDefect::Torn)),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn write<S: ByteStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        store.write_at(0, &self.encode())?;
        Ok(())
    }

    /// Same header without the WAL body description, as kept in the main store.
    pub(crate) fn without_body(self) -> Self {
        Self {
            body_len: 0,
            body_checksum: 0,
            ..self
        }
    }
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// First eight bytes of SHA-256, little-endian.
pub(crate) fn checksum(data: &[u8]) -> u64 {
    let hash = Sha256::digest(data);
    read_u64(&hash, 0)
}
