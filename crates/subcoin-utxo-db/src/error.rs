//! Error types for the UTXO hash-table store.

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying seek/read/write/sync failure.
    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    /// Value payload does not fit the 16-bit length header.
    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    /// Internal key of unexpected width reached the key codec.
    #[error("Invalid internal key width: expected {expected} bytes, got {actual}")]
    InvalidKeyShape { expected: usize, actual: usize },

    /// Bad magic, version, checksum or an implausible header.
    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    /// A probe wrapped the whole table without finding an empty slot.
    #[error("Slot table exhausted: all {slots} slots probed without finding an empty one")]
    TableExhausted { slots: u64 },

    /// Commit tag must be strictly greater than the stored one.
    #[error("Commit tag not advancing: current {current}, requested {requested}")]
    CommitTagNotAdvancing { current: u64, requested: u64 },

    /// Capacity must be non-zero and the table must be addressable.
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(u64),

    /// A slot holds a flag combination no writer produces.
    #[error("Corrupt slot #{0}")]
    CorruptSlot(u64),

    /// A value log record could not be decoded.
    #[error("Corrupt value: {0}")]
    CorruptValue(String),

    /// The write-ahead store holds a batch that fails validation.
    #[error("Corrupt WAL: {0}")]
    CorruptWal(String),

    /// The 32-bit value pointer space is used up.
    #[error("Value log exhausted at cursor {0}")]
    ValueLogExhausted(u64),

    /// The rebuild target records more progress than the source table has slots.
    #[error("Rebuild progress {tag} is beyond the source table ({slots} slots)")]
    RebuildOutOfRange { tag: u64, slots: u64 },
}
