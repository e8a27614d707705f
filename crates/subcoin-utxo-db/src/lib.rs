//! Fixed-capacity hash table storage engine for the Bitcoin UTXO set.
//!
//! The table lives in a single byte store laid out as a header, a slot table of
//! twice the configured capacity, and an append-only value log. A second byte
//! store holds the write-ahead copy of the batch being committed.
//!
//! ## Architecture
//!
//! - **Truncated keys**: Full keys are hashed down to 6 bytes; three bits of the
//!   first byte carry the slot state (occupied, tombstone, default length)
//! - **Open addressing**: Linear probing from the key's default slot, with
//!   tombstones keeping probe chains intact after removals
//! - **Value log**: Values are appended in 8-byte units and never overwritten
//! - **Collision records**: Distinct keys sharing an internal key keep their
//!   values in a single record
//! - **Two-phase commit**: Batches are written to the WAL before the main store,
//!   so an interrupted commit is replayed on load
//!
//! Capacity is fixed at creation. Growing or compacting a table means
//! [rebuilding](UtxoDb::rebuild) it into a new one.

mod batch;
mod collision;
mod db;
mod error;
mod header;
mod key;
mod options;
mod rebuild;
mod slot;
mod store;
mod table;
mod value;
mod wal;

pub use collision::CollisionRecord;
pub use db::{UtxoDb, VerifyReport};
pub use error::Error;
pub use header::{FORMAT_VERSION, HEADER_SIZE, MAGIC, Stats};
pub use key::{InternalKey, KEY_LEN, KeyHasher, Sha256KeyHasher, SlotFlags};
pub use options::{
    DEFAULT_REBUILD_COMMIT_INTERVAL, DEFAULT_SCAN_BATCH_SLOTS, Options, OptionsBuilder,
};
pub use rebuild::RebuildProgress;
pub use slot::{POINTER_LEN, SLOT_SIZE};
pub use store::{ByteStore, FileStore, MemStore};
pub use value::{MAX_VALUE_LEN, VALUE_UNIT, Value};

/// Result type for UTXO table operations.
pub type Result<T> = std::result::Result<T, Error>;
