//! Internal key codec.
//!
//! A caller key of any length is hashed and truncated to [`KEY_LEN`] bytes. The
//! top three bits of the first byte are reserved for the slot status flags, so an
//! [`InternalKey`] always holds the flag-free form and the stored form only
//! exists transiently as the output of [`InternalKey::with_flags`].

use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Width of an internal key in bytes.
pub const KEY_LEN: usize = 6;

bitflags::bitflags! {
    /// Status bits packed into the first byte of a stored internal key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u8 {
        /// The slot holds a live key and a value pointer.
        const OCCUPIED = 0b1000_0000;
        /// The slot was deleted but still links a probe chain.
        const TOMBSTONE = 0b0100_0000;
        /// The value is exactly one unit long and has no length header.
        const DEFAULT_LEN = 0b0010_0000;
    }
}

const FLAG_MASK: u8 = SlotFlags::all().bits();

impl SlotFlags {
    /// Whether the slot holds a live key.
    pub fn is_valid_key(self) -> bool {
        self.contains(Self::OCCUPIED)
    }

    /// Whether the slot was never used or has been reclaimed.
    pub fn is_unused(self) -> bool {
        !self.intersects(Self::OCCUPIED | Self::TOMBSTONE)
    }

    /// Whether the slot is a tombstone.
    pub fn is_deleted(self) -> bool {
        self.contains(Self::TOMBSTONE)
    }
}

/// Strategy deriving the [`KEY_LEN`]-byte prefix of an internal key.
pub trait KeyHasher: std::fmt::Debug + Send + Sync {
    /// Returns the truncated digest of `key`. Flag bits are cleared by the caller.
    fn digest(&self, key: &[u8]) -> [u8; KEY_LEN];
}

/// Default [`KeyHasher`]: the leading bytes of SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyHasher;

impl KeyHasher for Sha256KeyHasher {
    fn digest(&self, key: &[u8]) -> [u8; KEY_LEN] {
        let hash = Sha256::digest(key);
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&hash[..KEY_LEN]);
        out
    }
}

/// Flag-free truncated key used for table addressing and comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalKey([u8; KEY_LEN]);

impl InternalKey {
    /// Derives the internal key of `full_key`.
    pub fn derive(hasher: &dyn KeyHasher, full_key: &[u8]) -> Self {
        Self::without_flags(hasher.digest(full_key)).0
    }

    /// Splits a stored key into its flag-free form and its flags.
    pub fn without_flags(mut stored: [u8; KEY_LEN]) -> (Self, SlotFlags) {
        let flags = SlotFlags::from_bits_truncate(stored[0]);
        stored[0] &= !FLAG_MASK;
        (Self(stored), flags)
    }

    /// Same as [`Self::without_flags`] for a borrowed slice of stored bytes.
    pub fn from_slice(stored: &[u8]) -> Result<(Self, SlotFlags)> {
        let stored: [u8; KEY_LEN] = stored.try_into().map_err(|_| Error::InvalidKeyShape {
            expected: KEY_LEN,
            actual: stored.len(),
        })?;
        Ok(Self::without_flags(stored))
    }

    /// Returns the stored form carrying `flags`.
    pub fn with_flags(&self, flags: SlotFlags) -> [u8; KEY_LEN] {
        let mut stored = self.0;
        stored[0] |= flags.bits();
        stored
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// First slot probed for this key in a table of `slot_count` slots.
    pub fn default_slot(&self, slot_count: u64) -> u64 {
        let mut wide = [0u8; 8];
        wide[8 - KEY_LEN..].copy_from_slice(&self.0);
        u64::from_be_bytes(wide) % slot_count
    }
}

impl std::fmt::Display for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_clears_flag_bits() {
        for i in 0u32..256 {
            let key = InternalKey::derive(&Sha256KeyHasher, &i.to_le_bytes());
            assert_eq!(key.as_bytes()[0] & FLAG_MASK, 0);
        }
    }

    #[test]
    fn test_flags_roundtrip_is_idempotent() {
        let key = InternalKey::derive(&Sha256KeyHasher, b"outpoint");
        let flags = SlotFlags::OCCUPIED | SlotFlags::DEFAULT_LEN;

        let stored = key.with_flags(flags);
        let (decoded, decoded_flags) = InternalKey::without_flags(stored);
        assert_eq!(decoded, key);
        assert_eq!(decoded_flags, flags);

        // Stripping twice yields the same key and no flags.
        let (again, none) = InternalKey::without_flags(*decoded.as_bytes());
        assert_eq!(again, key);
        assert!(none.is_empty());
        assert!(none.is_unused());
    }

    #[test]
    fn test_predicates() {
        assert!(SlotFlags::OCCUPIED.is_valid_key());
        assert!(!SlotFlags::OCCUPIED.is_unused());
        assert!(SlotFlags::TOMBSTONE.is_deleted());
        assert!(!SlotFlags::TOMBSTONE.is_unused());
        assert!(SlotFlags::DEFAULT_LEN.is_unused());
    }

    #[test]
    fn test_from_slice_rejects_wrong_width() {
        assert!(matches!(
            InternalKey::from_slice(&[0u8; 5]),
            Err(Error::InvalidKeyShape {
                expected: KEY_LEN,
                actual: 5
            })
        ));
        assert!(InternalKey::from_slice(&[0xff; KEY_LEN]).is_ok());
    }

    #[test]
    fn test_default_slot_uses_big_endian_key_bytes() {
        let (key, _) = InternalKey::without_flags([0, 0, 0, 0, 1, 2]);
        assert_eq!(key.default_slot(1000), 0x0102 % 1000);
        assert_eq!(key.to_string(), "000000000102");
    }
}
