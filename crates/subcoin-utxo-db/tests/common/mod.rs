//! Helpers shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subcoin_utxo_db::{ByteStore, KEY_LEN, KeyHasher, MemStore};

/// Store that simulates a crash after a number of writes.
///
/// The budget is shared by every clone, so the main and WAL stores of one
/// engine count down together. The write that exhausts the budget is torn: only
/// its first half reaches the inner store.
#[derive(Clone)]
pub struct CrashingStore {
    pub inner: MemStore,
    budget: Arc<Mutex<Option<usize>>>,
}

impl CrashingStore {
    pub fn pair() -> (Self, Self, CrashSwitch) {
        let budget = Arc::new(Mutex::new(None));
        let store = |budget: &Arc<Mutex<Option<usize>>>| Self {
            inner: MemStore::new(),
            budget: budget.clone(),
        };
        (store(&budget), store(&budget), CrashSwitch(budget))
    }
}

/// Arms the crash of a [`CrashingStore`] pair.
#[derive(Clone)]
pub struct CrashSwitch(Arc<Mutex<Option<usize>>>);

impl CrashSwitch {
    /// Lets `writes` more writes through, then crashes.
    pub fn crash_after(&self, writes: usize) {
        *self.0.lock() = Some(writes);
    }

    pub fn disarm(&self) {
        *self.0.lock() = None;
    }
}

impl ByteStore for CrashingStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        let mut budget = self.budget.lock();
        match budget.as_mut() {
            Some(0) => {
                self.inner.write_at(offset, &buf[..buf.len() / 2])?;
                Err(std::io::Error::other("simulated crash"))
            }
            Some(remaining) => {
                *remaining -= 1;
                self.inner.write_at(offset, buf)
            }
            None => self.inner.write_at(offset, buf),
        }
    }

    fn sync(&mut self) -> std::io::Result<()> {
        if *self.budget.lock() == Some(0) {
            return Err(std::io::Error::other("simulated crash"));
        }
        Ok(())
    }
}

/// Keeps a single byte of SHA-256, so 256 internal keys cover every key.
#[derive(Debug)]
pub struct NarrowHasher;

impl KeyHasher for NarrowHasher {
    fn digest(&self, key: &[u8]) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        out[KEY_LEN - 1] = Sha256::digest(key)[0];
        out
    }
}

/// 36-byte key shaped like a serialized outpoint.
pub fn outpoint_key(n: u32) -> Vec<u8> {
    let mut key = Sha256::digest(&n.to_le_bytes()).to_vec();
    key.extend_from_slice(&(n % 7).to_le_bytes());
    key
}

pub fn value_for(n: u32) -> Vec<u8> {
    let len = (n as usize * 7) % 90;
    (0..len).map(|i| (n as usize + i) as u8).collect()
}
