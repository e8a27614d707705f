//! UTXO set view over the [`subcoin_utxo_db`] hash-table store.
//!
//! Outpoints are stored under their 36-byte serialization (txid || vout) and
//! coins as bincode-encoded [`Coin`]s. The best block height lives in the same
//! table under a reserved metadata key, so it travels with the records through
//! a rebuild.

mod coin;
mod error;
mod view;

pub use coin::{Coin, key_to_outpoint, outpoint_to_key};
pub use error::Error;
pub use view::{BlockChanges, CoinsDb, UtxoView};

/// Result type for UTXO view operations.
pub type Result<T> = std::result::Result<T, Error>;
