//! Error types for the UTXO view.

use bitcoin::OutPoint;

/// Errors that can occur during UTXO view operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Table error.
    #[error(transparent)]
    Db(#[from] subcoin_utxo_db::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// UTXO not found when trying to spend.
    #[error("UTXO not found: {0}")]
    UtxoNotFound(OutPoint),

    /// Stored metadata could not be decoded.
    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
