use crate::coin::{Coin, outpoint_to_key};
use crate::{Error, Result};
use bitcoin::{Block, OutPoint};
use subcoin_utxo_db::{ByteStore, UtxoDb};

/// Reserved key of the best block height record.
///
/// Outpoint keys are always 36 bytes, so this key never names a coin.
const BEST_HEIGHT_KEY: &[u8] = b"subcoin:best-height";

/// Read/spend/add access to the UTXO set, as used by transaction validation.
pub trait UtxoView {
    /// Get a UTXO by outpoint.
    fn get(&self, outpoint: &OutPoint) -> Result<Option<Coin>>;

    /// Remove a UTXO and return it.
    fn spend(&self, outpoint: &OutPoint) -> Result<Coin>;

    /// Insert a UTXO.
    ///
    /// Adding an outpoint that is already unspent does not replace it: both
    /// coins are kept, `get` returns the newer one, and spending it brings
    /// the older one back.
    fn add(&self, outpoint: &OutPoint, coin: &Coin) -> Result<()>;
}

/// UTXO changes of one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockChanges {
    pub created: u64,
    pub spent: u64,
}

/// [`UtxoView`] backed by a [`UtxoDb`].
pub struct CoinsDb<S> {
    db: UtxoDb<S>,
}

impl<S: ByteStore> CoinsDb<S> {
    pub fn new(db: UtxoDb<S>) -> Self {
        Self { db }
    }

    pub fn inner(&self) -> &UtxoDb<S> {
        &self.db
    }

    pub fn into_inner(self) -> UtxoDb<S> {
        self.db
    }

    /// Height of the last flushed block, if any.
    pub fn best_height(&self) -> Result<Option<u32>> {
        match self.db.get(BEST_HEIGHT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    Error::CorruptMetadata(format!("best height of {} bytes", bytes.len()))
                })?;
                Ok(Some(u32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Number of unspent outputs, including staged changes.
    pub fn utxo_count(&self) -> Result<u64> {
        let meta = u64::from(self.best_height()?.is_some());
        Ok(self.db.stats().live.saturating_sub(meta))
    }

    /// Records `height` as the best block and commits everything staged.
    ///
    /// Each flush advances the table's commit tag by one.
    pub fn flush(&self, height: u32) -> Result<()> {
        if self.best_height()?.is_some() {
            self.db.remove(BEST_HEIGHT_KEY)?;
        }
        self.db.add(BEST_HEIGHT_KEY, &height.to_le_bytes())?;

        let tag = self.db.tag()? + 1;
        self.db.commit(tag)?;

        tracing::debug!("Flushed UTXO set at height {height} (commit {tag})");

        Ok(())
    }

    /// Apply a Bitcoin block's UTXO changes.
    ///
    /// Outputs created earlier in the block are visible to later inputs since
    /// the table reads its own staged writes. Nothing is committed; on error the
    /// staged changes are incomplete and the table should be reloaded.
    ///
    /// The two duplicate mainnet coinbases allowed before BIP30 (blocks 91842
    /// and 91880) re-add an unspent outpoint; see [`UtxoView::add`] for how the
    /// table keeps both coins.
    pub fn apply_block(&self, block: &Block, height: u32) -> Result<BlockChanges> {
        let mut changes = BlockChanges::default();

        for tx in &block.txdata {
            let txid = tx.compute_txid();
            let is_coinbase = tx.is_coinbase();

            // Process inputs (spend UTXOs) - skip for coinbase
            if !is_coinbase {
                for input in &tx.input {
                    self.spend(&input.previous_output)?;
                    changes.spent += 1;
                }
            }

            for (vout, output) in tx.output.iter().enumerate() {
                // Skip OP_RETURN outputs (unspendable)
                if output.script_pubkey.is_op_return() {
                    continue;
                }

                let outpoint = OutPoint {
                    txid,
                    vout: vout as u32,
                };
                self.add(&outpoint, &Coin::from_txout(output, height, is_coinbase))?;
                changes.created += 1;
            }
        }

        tracing::debug!(
            "Applied block {height}: +{} -{} UTXOs, total: {}",
            changes.created,
            changes.spent,
            self.utxo_count()?
        );

        Ok(changes)
    }
}

impl<S: ByteStore> UtxoView for CoinsDb<S> {
    fn get(&self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        self.db
            .get(&outpoint_to_key(outpoint))?
            .map(|bytes| Coin::decode(&bytes).map_err(Error::from))
            .transpose()
    }

    fn spend(&self, outpoint: &OutPoint) -> Result<Coin> {
        let key = outpoint_to_key(outpoint);
        let bytes = self
            .db
            .get(&key)?
            .ok_or(Error::UtxoNotFound(*outpoint))?;
        let coin = Coin::decode(&bytes)?;
        self.db.remove(&key)?;
        Ok(coin)
    }

    fn add(&self, outpoint: &OutPoint, coin: &Coin) -> Result<()> {
        self.db.add(&outpoint_to_key(outpoint), &coin.encode()?)?;
        Ok(())
    }
}
