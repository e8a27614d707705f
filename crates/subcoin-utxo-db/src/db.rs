use crate::batch::Pending;
use crate::collision::CollisionRecord;
use crate::header::{Header, HeaderDefect, Stats, checksum};
use crate::key::InternalKey;
use crate::options::Options;
use crate::slot::{Entry, SLOT_SIZE, Slot};
use crate::store::ByteStore;
use crate::table::{Layout, Probe, Table};
use crate::value::{EncodedValue, VALUE_UNIT, Value, ensure_value_len};
use crate::wal::{self, SlotWrite, WalBatch};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::ops::ControlFlow;

/// Bytes of zeroed slot table written per store access while formatting.
const FORMAT_CHUNK: usize = 1 << 20;

/// Main store, WAL store and the header of the last durable commit.
struct Stores<S> {
    main: S,
    wal: S,
    committed: Header,
}

/// Result of recounting the table against its stats block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    /// Slots holding a live internal key.
    pub occupied_slots: u64,
    /// Records found, counting every entry of collision records.
    pub records: u64,
    /// Tombstone slots found.
    pub tombstones: u64,
    /// Stats the engine currently reports.
    pub stats: Stats,
}

impl VerifyReport {
    /// Whether the recount agrees with the stats block.
    pub fn is_consistent(&self) -> bool {
        self.records == self.stats.live && self.tombstones == self.stats.tombstones
    }
}

/// Fixed-capacity hash table of UTXO records over a pair of byte stores.
///
/// Writes are staged in memory and become durable with [`UtxoDb::commit`]. Two
/// locks guard the engine, always taken in the same order: the logical lock over
/// the pending batch, then the physical lock over the stores. Lookups share
/// both; writers take the logical lock exclusively and share the stores; a
/// commit holds both exclusively.
pub struct UtxoDb<S> {
    options: Options,
    layout: Layout,
    pending: RwLock<Pending>,
    stores: RwLock<Stores<S>>,
}

impl<S: ByteStore> UtxoDb<S> {
    /// Formats `main` and `wal` as an empty table sized for `capacity` records.
    pub fn new(capacity: u64, main: S, wal: S) -> Result<Self> {
        Self::with_options(capacity, main, wal, Options::default())
    }

    /// Same as [`Self::new`] with custom options.
    pub fn with_options(capacity: u64, mut main: S, mut wal: S, options: Options) -> Result<Self> {
        let layout = Layout::for_capacity(capacity)?;
        let header = Header::new(Stats::new(capacity));

        // Slots first: a store without a header is never mistaken for a table.
        let end = layout.log_begin();
        let mut offset = layout.slot_offset(0);
        let zeros = vec![0u8; FORMAT_CHUNK];
        while offset < end {
            let len = (end - offset).min(FORMAT_CHUNK as u64) as usize;
            main.write_at(offset, &zeros[..len])?;
            offset += len as u64;
        }
        header.write(&mut main)?;
        main.sync()?;

        header.write(&mut wal)?;
        wal.sync()?;

        tracing::info!(
            "Created UTXO table with capacity {capacity} ({} slots)",
            layout.slot_count
        );

        Ok(Self::from_parts(layout, main, wal, header, options))
    }

    /// Opens a table previously formatted by [`Self::new`], replaying the last
    /// commit if it was interrupted.
    pub fn load(main: S, wal: S) -> Result<Self> {
        Self::load_with_options(main, wal, Options::default())
    }

    /// Same as [`Self::load`] with custom options.
    pub fn load_with_options(mut main: S, mut wal: S, options: Options) -> Result<Self> {
        let main_header = Header::read(&main)?;
        let wal_header = Header::read(&wal)?;

        let committed = match (main_header, wal_header) {
            (Err(defect @ HeaderDefect::Foreign(_)), _) => return Err(defect.into_error("main")),
            (_, Err(defect @ HeaderDefect::Foreign(_))) => return Err(defect.into_error("WAL")),
            (Ok(main_header), Ok(wal_header)) if wal_header.tag == main_header.tag => {
                if wal_header.without_body() != main_header {
                    return Err(Error::CorruptHeader(format!(
                        "main and WAL headers disagree at tag {}",
                        main_header.tag
                    )));
                }
                main_header
            }
            (Ok(main_header), Ok(wal_header)) if wal_header.tag > main_header.tag => {
                if wal_header.stats.capacity != main_header.stats.capacity {
                    return Err(Error::CorruptHeader(format!(
                        "WAL capacity {} does not match main capacity {}",
                        wal_header.stats.capacity, main_header.stats.capacity
                    )));
                }
                replay(&mut main, &wal, &wal_header)?
            }
            (Ok(main_header), Ok(wal_header)) => {
                return Err(Error::CorruptHeader(format!(
                    "WAL tag {} is behind main tag {}",
                    wal_header.tag, main_header.tag
                )));
            }
            (Err(HeaderDefect::Torn), Ok(wal_header)) => replay(&mut main, &wal, &wal_header)?,
            (Ok(main_header), Err(HeaderDefect::Torn)) => {
                // The interrupted commit never reached the main store.
                tracing::warn!(
                    "WAL header is torn, rewriting baseline at tag {}",
                    main_header.tag
                );
                main_header.write(&mut wal)?;
                wal.sync()?;
                main_header
            }
            (Err(HeaderDefect::Torn), Err(HeaderDefect::Torn)) => {
                return Err(Error::CorruptHeader(
                    "neither the main nor the WAL header is readable".to_string(),
                ));
            }
        };

        let layout = Layout::for_header(&committed)?;
        check_extent(&main, &layout, &committed)?;

        tracing::info!(
            "Loaded UTXO table at tag {}: {} live records, {} tombstones, {} dead values",
            committed.tag,
            committed.stats.live,
            committed.stats.tombstones,
            committed.stats.dead_values
        );

        Ok(Self::from_parts(layout, main, wal, committed, options))
    }

    fn from_parts(layout: Layout, main: S, wal: S, committed: Header, options: Options) -> Self {
        Self {
            options,
            layout,
            pending: RwLock::new(Pending::new(&committed)),
            stores: RwLock::new(Stores {
                main,
                wal,
                committed,
            }),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Number of slots in the table, twice the capacity.
    pub fn slot_count(&self) -> u64 {
        self.layout.slot_count
    }

    fn internal_key(&self, key: &[u8]) -> InternalKey {
        InternalKey::derive(self.options.hasher.as_ref(), key)
    }

    /// Looks up the value stored under `key`, including uncommitted writes.
    ///
    /// Keys are matched by internal key. When several keys share one, the value
    /// of a key that was never listed in the collision record is the record's
    /// anonymous first value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key_hash = self.internal_key(key);

        let pending = self.pending.read();
        let stores = self.stores.read();
        let table = self.table(&stores.main, &pending);

        let Probe::Found { entry, .. } = table.probe(&key_hash)? else {
            return Ok(None);
        };

        Ok(Some(match table.read_value(&entry)? {
            Value::Plain(value) => value,
            Value::Collision(record) => record.get(key).to_vec(),
        }))
    }

    /// Whether a record is stored under `key`.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let key_hash = self.internal_key(key);

        let pending = self.pending.read();
        let stores = self.stores.read();
        let table = self.table(&stores.main, &pending);

        Ok(matches!(table.probe(&key_hash)?, Probe::Found { .. }))
    }

    /// Stages `value` under `key`.
    ///
    /// Adding to a slot whose internal key is already present turns it into a
    /// collision record; a key already listed there gets its value replaced.
    pub fn add(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure_value_len(value.len())?;
        let key_hash = self.internal_key(key);

        let mut pending = self.pending.write();
        let stores = self.stores.read();
        let table = self.table(&stores.main, &pending);

        match table.probe(&key_hash)? {
            Probe::Found { index, entry } => {
                let (merged, added) = match table.read_value(&entry)? {
                    Value::Plain(first) => (
                        CollisionRecord::new(first, key.to_vec(), value.to_vec()),
                        true,
                    ),
                    Value::Collision(mut record) => {
                        let added = record.upsert(key, value.to_vec());
                        (record, added)
                    }
                };
                let records = merged.len();
                let encoded = Value::Collision(merged).encode()?;

                place(&mut pending, index, key_hash, &encoded)?;
                if added {
                    pending.stats.live += 1;
                }
                pending.stats.dead_values += 1;

                tracing::trace!("Internal key {key_hash} at slot #{index} now holds {records} records");
            }
            Probe::Vacant {
                index,
                reuses_tombstone,
            } => {
                let encoded = Value::Plain(value.to_vec()).encode()?;

                place(&mut pending, index, key_hash, &encoded)?;
                pending.stats.live += 1;
                if reuses_tombstone {
                    pending.stats.tombstones -= 1;
                }
            }
        }

        Ok(())
    }

    /// Stages the removal of `key`. Returns `false` if it is not present.
    ///
    /// Removal is not the inverse of an overwrite: after `add(k, v1)` and
    /// `add(k, v2)` the slot holds a collision record whose anonymous first
    /// value is `v1`, so removing `k` drops `v2` and `get(k)` returns `v1`
    /// again, with one record still live. Callers that replace values must
    /// remove before adding.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        let key_hash = self.internal_key(key);

        let mut pending = self.pending.write();
        let stores = self.stores.read();
        let table = self.table(&stores.main, &pending);

        let Probe::Found { index, entry } = table.probe(&key_hash)? else {
            return Ok(false);
        };

        match table.read_value(&entry)? {
            Value::Plain(_) => {
                let next_is_empty = table.slot(self.layout.next(index))?.is_empty();
                if next_is_empty {
                    let reclaimed = table.tombstones_before(index)?;
                    pending.set_slot(index, Slot::Empty);
                    for tombstone in &reclaimed {
                        pending.set_slot(*tombstone, Slot::Empty);
                    }
                    pending.stats.tombstones -= reclaimed.len() as u64;
                } else {
                    pending.set_slot(index, Slot::Tombstone);
                    pending.stats.tombstones += 1;
                }
            }
            Value::Collision(record) => {
                let encoded = record.remove(key).encode()?;
                place(&mut pending, index, key_hash, &encoded)?;
            }
        }

        pending.stats.live -= 1;
        pending.stats.dead_values += 1;
        Ok(true)
    }

    /// Makes every staged write durable under `tag`, which must exceed the
    /// current one.
    ///
    /// If any phase fails the staged writes are kept, so the commit can be
    /// retried once the store recovers.
    pub fn commit(&self, tag: u64) -> Result<()> {
        let mut pending = self.pending.write();
        let mut stores = self.stores.write();
        let Stores {
            main,
            wal,
            committed,
        } = &mut *stores;

        if tag <= committed.tag {
            return Err(Error::CommitTagNotAdvancing {
                current: committed.tag,
                requested: tag,
            });
        }

        let slots: Vec<SlotWrite> = pending
            .slots
            .iter()
            .map(|(index, slot)| (*index, slot.encode()))
            .collect();
        let body = wal::encode_body(pending.base_cursor, &slots, &pending.log);

        let header = Header {
            stats: pending.stats,
            tag,
            cursor: pending.cursor(),
            body_len: body.len() as u64,
            body_checksum: checksum(&body),
        };

        wal::write_ahead(wal, &header, &body)?;
        wal::apply(
            main,
            &self.layout,
            &header,
            pending.base_cursor,
            &slots,
            &pending.log,
        )?;

        *committed = header.without_body();
        *pending = Pending::new(committed);

        tracing::debug!(
            "Committed tag {tag}: {} slots, {} WAL bytes, {} live records",
            slots.len(),
            body.len(),
            header.stats.live
        );

        Ok(())
    }

    /// Tag of the last commit, as recorded in the main store.
    pub fn tag(&self) -> Result<u64> {
        let stores = self.stores.read();
        Header::read(&stores.main)?
            .map(|header| header.tag)
            .map_err(|defect| defect.into_error("main"))
    }

    /// Bytes of value log appended since the last commit.
    pub fn pending_value_bytes(&self) -> usize {
        self.pending.read().log.len()
    }

    /// Whether anything is staged since the last commit.
    pub fn has_pending(&self) -> bool {
        !self.pending.read().is_empty()
    }

    /// Stats including staged writes.
    pub fn stats(&self) -> Stats {
        self.pending.read().stats
    }

    /// Stats as of the last commit.
    pub fn committed_stats(&self) -> Stats {
        self.stores.read().committed.stats
    }

    /// Visits every occupied slot in storage order with its decoded value.
    ///
    /// `f` runs under the engine's read locks. Calling [`Self::add`],
    /// [`Self::remove`] or [`Self::commit`] on the same engine from inside it
    /// deadlocks.
    pub fn for_each_record<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(InternalKey, Value) -> Result<()>,
    {
        self.for_each_entry(0, self.layout.slot_count, |_, key, value| f(key, value))
    }

    /// Visits the occupied slots among `count` slots from `start`.
    pub(crate) fn for_each_entry<F>(&self, start: u64, count: u64, mut f: F) -> Result<()>
    where
        F: FnMut(u64, InternalKey, Value) -> Result<()>,
    {
        let pending = self.pending.read();
        let stores = self.stores.read();
        let table = self.table(&stores.main, &pending);

        table.scan(start, count, |index, slot| {
            if let Slot::Occupied(entry) = slot {
                f(index, entry.key, table.read_value(&entry)?)?;
            }
            Ok(ControlFlow::<()>::Continue(()))
        })?;
        Ok(())
    }

    /// Recounts records and tombstones, decoding every value on the way.
    pub fn verify(&self) -> Result<VerifyReport> {
        let pending = self.pending.read();
        let stores = self.stores.read();
        let table = self.table(&stores.main, &pending);

        let mut report = VerifyReport {
            occupied_slots: 0,
            records: 0,
            tombstones: 0,
            stats: pending.stats,
        };

        table.scan(0, self.layout.slot_count, |_, slot| {
            match slot {
                Slot::Occupied(entry) => {
                    report.occupied_slots += 1;
                    report.records += table.read_value(&entry)?.record_count();
                }
                Slot::Tombstone => report.tombstones += 1,
                Slot::Empty => {}
            }
            Ok(ControlFlow::<()>::Continue(()))
        })?;

        if !report.is_consistent() {
            tracing::warn!(
                "Table recount differs from stats: {} records vs {} live, {} tombstones vs {}",
                report.records,
                report.stats.live,
                report.tombstones,
                report.stats.tombstones
            );
        }

        Ok(report)
    }

    /// Stages `value` under an internal key known to be absent.
    pub(crate) fn insert_record(&self, key_hash: InternalKey, value: &Value) -> Result<()> {
        let mut pending = self.pending.write();
        let stores = self.stores.read();
        let table = self.table(&stores.main, &pending);

        match table.probe(&key_hash)? {
            Probe::Found { index, .. } => Err(Error::CorruptSlot(index)),
            Probe::Vacant {
                index,
                reuses_tombstone,
            } => {
                let encoded = value.encode()?;
                place(&mut pending, index, key_hash, &encoded)?;
                pending.stats.live += value.record_count();
                if reuses_tombstone {
                    pending.stats.tombstones -= 1;
                }
                Ok(())
            }
        }
    }

    /// Releases the stores, discarding anything staged since the last commit.
    pub fn into_stores(self) -> (S, S) {
        let Stores { main, wal, .. } = self.stores.into_inner();
        (main, wal)
    }

    fn table<'a>(&self, main: &'a S, pending: &'a Pending) -> Table<'a, S> {
        Table::new(self.layout, main, pending, self.options.scan_batch_slots)
    }
}

/// Appends `encoded` and points slot `index` at it.
fn place(pending: &mut Pending, index: u64, key: InternalKey, encoded: &EncodedValue) -> Result<()> {
    let pointer = pending.append(encoded)?;
    pending.set_slot(
        index,
        Slot::Occupied(Entry {
            key,
            pointer,
            default_len: encoded.default_len,
        }),
    );
    Ok(())
}

/// Fails with `CorruptHeader` when the main store ends before the last slot or
/// the last value log unit its header describes.
fn check_extent<S: ByteStore>(main: &S, layout: &Layout, header: &Header) -> Result<()> {
    let (offset, len) = match header.cursor {
        0 => (layout.slot_offset(layout.slot_count - 1), SLOT_SIZE),
        cursor => (layout.unit_offset(cursor - 1), VALUE_UNIT),
    };

    let mut buf = vec![0u8; len];
    match main.read_at(offset, &mut buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::CorruptHeader(format!(
                "main store is truncated: header at tag {} describes data up to byte {}",
                header.tag,
                offset + len as u64
            )))
        }
        Err(err) => Err(err.into()),
    }
}

/// Re-applies the batch announced by `wal_header` and returns the repaired
/// main header.
fn replay<S: ByteStore>(main: &mut S, wal: &S, wal_header: &Header) -> Result<Header> {
    let layout = Layout::for_header(wal_header)?;
    let batch = WalBatch::read(wal, wal_header)?;
    batch.validate(&layout, wal_header)?;

    wal::apply(
        main,
        &layout,
        wal_header,
        batch.base_cursor,
        &batch.slots,
        &batch.log,
    )?;

    tracing::warn!(
        "Replayed interrupted commit {}: {} slots, {} value bytes",
        wal_header.tag,
        batch.slots.len(),
        batch.log.len()
    );

    Ok(wal_header.without_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KEY_LEN, KeyHasher};
    use crate::store::MemStore;
    use std::sync::Arc;

    fn new_db(capacity: u64) -> (UtxoDb<MemStore>, MemStore, MemStore) {
        let main = MemStore::new();
        let wal = MemStore::new();
        let db = UtxoDb::new(capacity, main.clone(), wal.clone()).unwrap();
        (db, main, wal)
    }

    /// Maps every key to the same internal key.
    #[derive(Debug)]
    struct ConstantHasher;

    impl KeyHasher for ConstantHasher {
        fn digest(&self, _key: &[u8]) -> [u8; KEY_LEN] {
            [0, 0, 0, 0, 0, 1]
        }
    }

    /// Uses the key bytes themselves, so tests choose their default slot.
    #[derive(Debug)]
    struct IdentityHasher;

    impl KeyHasher for IdentityHasher {
        fn digest(&self, key: &[u8]) -> [u8; KEY_LEN] {
            let mut out = [0u8; KEY_LEN];
            out[KEY_LEN - key.len()..].copy_from_slice(key);
            out
        }
    }

    fn db_with_hasher(capacity: u64, hasher: Arc<dyn KeyHasher>) -> UtxoDb<MemStore> {
        let options = Options::builder().hasher(hasher).build();
        UtxoDb::with_options(capacity, MemStore::new(), MemStore::new(), options).unwrap()
    }

    #[test]
    fn test_new_formats_both_stores() {
        let (db, main, wal) = new_db(10);
        assert_eq!(db.slot_count(), 20);
        assert_eq!(main.len() as u64, db.layout.log_begin());
        assert_eq!(wal.len(), crate::header::HEADER_SIZE);
        assert_eq!(db.tag().unwrap(), 0);
        assert_eq!(db.stats(), Stats::new(10));

        assert!(matches!(
            UtxoDb::new(0, MemStore::new(), MemStore::new()),
            Err(Error::InvalidCapacity(0))
        ));
    }

    #[test]
    fn test_add_get_remove_before_and_after_commit() {
        let (db, main, wal) = new_db(16);

        db.add(b"alpha", b"one").unwrap();
        db.add(b"bravo", &[2u8; 8]).unwrap();
        assert_eq!(db.get(b"alpha").unwrap(), Some(b"one".to_vec()));
        assert_eq!(db.get(b"bravo").unwrap(), Some(vec![2u8; 8]));
        assert_eq!(db.get(b"charlie").unwrap(), None);
        assert_eq!(db.pending_value_bytes(), 16);
        assert_eq!(db.committed_stats().live, 0);

        db.commit(1).unwrap();
        assert_eq!(db.pending_value_bytes(), 0);
        assert!(!db.has_pending());
        assert_eq!(db.committed_stats().live, 2);

        assert!(db.remove(b"alpha").unwrap());
        assert!(!db.remove(b"alpha").unwrap());
        assert!(!db.contains(b"alpha").unwrap());
        assert!(db.contains(b"bravo").unwrap());
        db.commit(2).unwrap();

        drop(db);
        let db = UtxoDb::load(main, wal).unwrap();
        assert_eq!(db.tag().unwrap(), 2);
        assert_eq!(db.get(b"alpha").unwrap(), None);
        assert_eq!(db.get(b"bravo").unwrap(), Some(vec![2u8; 8]));
        assert_eq!(db.stats().live, 1);
        assert_eq!(db.stats().dead_values, 1);
    }

    #[test]
    fn test_remove_after_overwrite_restores_first_value() {
        let (db, _, _) = new_db(16);

        db.add(b"key", b"v1").unwrap();
        db.add(b"key", b"v2").unwrap();
        assert_eq!(db.get(b"key").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(db.stats().live, 2);

        assert!(db.remove(b"key").unwrap());
        assert_eq!(db.get(b"key").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(db.stats().live, 1);

        assert!(db.remove(b"key").unwrap());
        assert_eq!(db.get(b"key").unwrap(), None);
        assert_eq!(db.stats().live, 0);
    }

    #[test]
    fn test_remove_records_collected_by_enumeration() {
        let (db, _, _) = new_db(16);
        for i in 0u8..6 {
            db.add(&[i], &[i; 3]).unwrap();
        }
        db.commit(1).unwrap();

        // Mutations happen after the visit, once the read locks are released.
        let mut even = Vec::new();
        db.for_each_record(|_, value| {
            if let Value::Plain(bytes) = value {
                if bytes[0] % 2 == 0 {
                    even.push(vec![bytes[0]]);
                }
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(even.len(), 3);

        for key in &even {
            assert!(db.remove(key).unwrap());
        }
        assert_eq!(db.stats().live, 3);
    }

    #[test]
    fn test_load_rejects_truncated_main_store() {
        let (db, main, wal) = new_db(16);
        db.add(b"alpha", &[7u8; 40]).unwrap();
        db.commit(1).unwrap();
        drop(db);

        let bytes = main.to_vec();
        let truncated = MemStore::from_bytes(&bytes[..bytes.len() - VALUE_UNIT]);
        assert!(matches!(
            UtxoDb::load(truncated, wal.snapshot()),
            Err(Error::CorruptHeader(_))
        ));

        assert!(UtxoDb::load(main, wal).is_ok());
    }

    #[test]
    fn test_load_rejects_truncated_slot_table() {
        let (db, main, wal) = new_db(16);
        drop(db);

        let bytes = main.to_vec();
        let truncated = MemStore::from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            UtxoDb::load(truncated, wal),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_commit_tag_must_advance() {
        let (db, _, _) = new_db(4);
        db.commit(5).unwrap();
        assert!(matches!(
            db.commit(5),
            Err(Error::CommitTagNotAdvancing {
                current: 5,
                requested: 5
            })
        ));
        assert!(db.commit(4).is_err());
        db.commit(6).unwrap();
    }

    #[test]
    fn test_value_too_large_is_rejected_without_side_effects() {
        let (db, _, _) = new_db(4);
        let huge = vec![0u8; crate::MAX_VALUE_LEN + 1];
        assert!(matches!(
            db.add(b"key", &huge),
            Err(Error::ValueTooLarge { .. })
        ));
        assert!(!db.has_pending());
    }

    #[test]
    fn test_collisions_keep_every_value() {
        let db = db_with_hasher(8, Arc::new(ConstantHasher));

        db.add(b"first", b"v1").unwrap();
        db.add(b"second", b"v2").unwrap();
        db.add(b"third", b"v3").unwrap();
        assert_eq!(db.stats().live, 3);

        // The first key is anonymous inside the record.
        assert_eq!(db.get(b"first").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(db.get(b"second").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(db.get(b"third").unwrap(), Some(b"v3".to_vec()));

        // Replacing a listed key does not add a record.
        db.add(b"second", b"v2'").unwrap();
        assert_eq!(db.stats().live, 3);
        assert_eq!(db.get(b"second").unwrap(), Some(b"v2'".to_vec()));

        assert!(db.remove(b"second").unwrap());
        assert_eq!(db.get(b"third").unwrap(), Some(b"v3".to_vec()));
        assert_eq!(db.get(b"first").unwrap(), Some(b"v1".to_vec()));

        assert!(db.remove(b"third").unwrap());
        assert!(db.remove(b"first").unwrap());
        assert_eq!(db.get(b"first").unwrap(), None);
        assert_eq!(db.stats().live, 0);
        assert!(db.verify().unwrap().is_consistent());
    }

    #[test]
    fn test_remove_leaves_tombstone_inside_a_chain() {
        let db = db_with_hasher(4, Arc::new(IdentityHasher));

        // Both default to slot 1 of 8.
        db.add(&[1], b"a").unwrap();
        db.add(&[9], b"b").unwrap();

        assert!(db.remove(&[1]).unwrap());
        assert_eq!(db.stats().tombstones, 1);
        assert_eq!(db.get(&[9]).unwrap(), Some(b"b".to_vec()));

        // Removing the chain's tail reclaims it and the tombstone before it.
        assert!(db.remove(&[9]).unwrap());
        assert_eq!(db.stats().tombstones, 0);

        let report = db.verify().unwrap();
        assert_eq!(report.occupied_slots, 0);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_add_reuses_first_tombstone() {
        let db = db_with_hasher(4, Arc::new(IdentityHasher));
        db.add(&[2], b"a").unwrap();
        db.add(&[10], b"b").unwrap();
        assert!(db.remove(&[2]).unwrap());
        assert_eq!(db.stats().tombstones, 1);

        db.add(&[18], b"c").unwrap();
        assert_eq!(db.stats().tombstones, 0);
        assert_eq!(db.get(&[18]).unwrap(), Some(b"c".to_vec()));
        assert_eq!(db.get(&[10]).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_table_exhaustion() {
        let db = db_with_hasher(1, Arc::new(IdentityHasher));
        db.add(&[0], b"a").unwrap();
        db.add(&[1], b"b").unwrap();
        assert!(matches!(
            db.add(&[2], b"c"),
            Err(Error::TableExhausted { slots: 2 })
        ));
        assert!(matches!(db.get(&[3]), Err(Error::TableExhausted { .. })));
    }

    #[test]
    fn test_failed_commit_keeps_pending() {
        #[derive(Clone)]
        struct ReadOnlyAfterFormat {
            inner: MemStore,
            locked: Arc<parking_lot::Mutex<bool>>,
        }

        impl ByteStore for ReadOnlyAfterFormat {
            fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
                self.inner.read_at(offset, buf)
            }

            fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
                if *self.locked.lock() {
                    return Err(std::io::Error::other("read-only"));
                }
                self.inner.write_at(offset, buf)
            }

            fn sync(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let locked = Arc::new(parking_lot::Mutex::new(false));
        let store = |inner: MemStore| ReadOnlyAfterFormat {
            inner,
            locked: locked.clone(),
        };
        let db = UtxoDb::new(4, store(MemStore::new()), store(MemStore::new())).unwrap();

        db.add(b"key", b"value").unwrap();
        *locked.lock() = true;
        assert!(matches!(db.commit(1), Err(Error::StorageIo(_))));
        assert!(db.has_pending());
        assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));

        *locked.lock() = false;
        db.commit(1).unwrap();
        assert_eq!(db.tag().unwrap(), 1);
        assert!(!db.has_pending());
    }

    #[test]
    fn test_for_each_record_in_storage_order() {
        let db = db_with_hasher(4, Arc::new(IdentityHasher));
        db.add(&[5], b"five").unwrap();
        db.add(&[2], b"two").unwrap();
        db.commit(1).unwrap();
        db.add(&[7], b"seven").unwrap();

        let mut seen = Vec::new();
        db.for_each_record(|key, value| {
            seen.push((key.as_bytes()[KEY_LEN - 1], value));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                (2, Value::Plain(b"two".to_vec())),
                (5, Value::Plain(b"five".to_vec())),
                (7, Value::Plain(b"seven".to_vec())),
            ]
        );
    }

    #[test]
    fn test_into_stores_discards_pending() {
        let (db, _, _) = new_db(4);
        db.add(b"kept", b"1").unwrap();
        db.commit(1).unwrap();
        db.add(b"dropped", b"2").unwrap();

        let (main, wal) = db.into_stores();
        let db = UtxoDb::load(main, wal).unwrap();
        assert!(db.contains(b"kept").unwrap());
        assert!(!db.contains(b"dropped").unwrap());
    }
}
