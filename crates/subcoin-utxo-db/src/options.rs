use crate::key::{KeyHasher, Sha256KeyHasher};
use std::sync::Arc;

/// Number of slots read per store access while probing.
pub const DEFAULT_SCAN_BATCH_SLOTS: usize = 64;

/// Number of source slots copied between two commits of a rebuild.
pub const DEFAULT_REBUILD_COMMIT_INTERVAL: u64 = 65_536;

/// Configuration options for a [`UtxoDb`](crate::UtxoDb).
///
/// The hasher is not persisted. A table must always be reopened with the hasher
/// it was created with.
#[derive(Clone, Debug)]
pub struct Options {
    /// Strategy deriving internal keys from full keys.
    pub hasher: Arc<dyn KeyHasher>,

    /// Slots fetched per read while scanning (default: 64)
    pub scan_batch_slots: usize,

    /// Source slots processed between rebuild commits (default: 65536)
    pub rebuild_commit_interval: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            hasher: Arc::new(Sha256KeyHasher),
            scan_batch_slots: DEFAULT_SCAN_BATCH_SLOTS,
            rebuild_commit_interval: DEFAULT_REBUILD_COMMIT_INTERVAL,
        }
    }
}

impl Options {
    /// Create new options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuring options
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

/// Builder pattern for Options
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the internal key hasher
    pub fn hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.options.hasher = hasher;
        self
    }

    /// Set the number of slots read at once while scanning
    pub fn scan_batch_slots(mut self, slots: usize) -> Self {
        self.options.scan_batch_slots = slots.max(1);
        self
    }

    /// Set the number of source slots between rebuild commits
    pub fn rebuild_commit_interval(mut self, slots: u64) -> Self {
        self.options.rebuild_commit_interval = slots.max(1);
        self
    }

    /// Build the options
    pub fn build(self) -> Options {
        self.options
    }
}
