//! Coin and outpoint encoding.

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, TxOut, Txid};
use serde::{Deserialize, Serialize};

/// Unspent transaction output as stored in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Whether the coin is from a coinbase transaction.
    pub is_coinbase: bool,
    /// Transfer value in satoshis.
    pub amount: u64,
    // Block height at which this containing transaction was included.
    pub height: u32,
    /// Spending condition of the output.
    pub script_pubkey: Vec<u8>,
}

impl Coin {
    pub fn from_txout(txout: &TxOut, height: u32, is_coinbase: bool) -> Self {
        Self {
            is_coinbase,
            amount: txout.value.to_sat(),
            height,
            script_pubkey: txout.script_pubkey.to_bytes(),
        }
    }

    /// Serialize to bytes for storage.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Convert OutPoint to storage key (36 bytes).
///
/// Format: txid (32 bytes, raw) || vout (4 bytes, little-endian)
pub fn outpoint_to_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(outpoint.txid.as_byte_array());
    key[32..].copy_from_slice(&outpoint.vout.to_le_bytes());
    key
}

/// Parse storage key back to OutPoint.
pub fn key_to_outpoint(key: &[u8; 36]) -> OutPoint {
    let mut txid_bytes = [0u8; 32];
    txid_bytes.copy_from_slice(&key[..32]);
    let mut vout_bytes = [0u8; 4];
    vout_bytes.copy_from_slice(&key[32..]);
    OutPoint {
        txid: Txid::from_byte_array(txid_bytes),
        vout: u32::from_le_bytes(vout_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{Amount, ScriptBuf};

    #[test]
    fn test_coin_roundtrip() {
        let coin = Coin {
            is_coinbase: true,
            amount: 5000000000,
            height: 0,
            script_pubkey: vec![0x51], // OP_TRUE
        };

        let encoded = coin.encode().unwrap();
        let decoded = Coin::decode(&encoded).unwrap();

        assert_eq!(coin, decoded);
    }

    #[test]
    fn test_outpoint_key_roundtrip() {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([7u8; 32]),
            vout: 42,
        };

        let key = outpoint_to_key(&outpoint);
        assert_eq!(&key[32..], &[42, 0, 0, 0]);
        assert_eq!(key_to_outpoint(&key), outpoint);
    }

    #[test]
    fn test_from_txout() {
        let txout = TxOut {
            value: Amount::from_sat(1234),
            script_pubkey: ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x00]),
        };
        let coin = Coin::from_txout(&txout, 7, false);
        assert_eq!(coin.amount, 1234);
        assert_eq!(coin.height, 7);
        assert!(!coin.is_coinbase);
        assert_eq!(coin.script_pubkey, vec![0x6a, 0x01, 0x00]);
    }
}
