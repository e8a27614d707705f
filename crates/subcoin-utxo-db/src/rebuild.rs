//! Compaction into a fresh table.
//!
//! Occupied slots are copied in storage order into a new engine, which commits
//! after every [`Options::rebuild_commit_interval`](crate::Options) source slots
//! with the number of source slots processed as its tag. An interrupted rebuild
//! therefore resumes from the target's tag.

use crate::db::UtxoDb;
use crate::store::ByteStore;
use crate::{Error, Result};

/// Reported after every rebuild commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildProgress {
    /// Source slots copied so far.
    pub slots_done: u64,
    /// Total source slots.
    pub slot_count: u64,
    /// Records in the target so far.
    pub records: u64,
}

impl<S: ByteStore> UtxoDb<S> {
    /// Copies every record into a new table of `capacity` records formatted on
    /// `main` and `wal`, dropping tombstones and dead values.
    ///
    /// Uncommitted writes of this engine are included.
    pub fn rebuild<T: ByteStore>(&self, capacity: u64, main: T, wal: T) -> Result<UtxoDb<T>> {
        self.rebuild_with_progress(capacity, main, wal, |_| {})
    }

    /// Same as [`Self::rebuild`], calling `progress` after every commit.
    pub fn rebuild_with_progress<T, F>(
        &self,
        capacity: u64,
        main: T,
        wal: T,
        progress: F,
    ) -> Result<UtxoDb<T>>
    where
        T: ByteStore,
        F: FnMut(RebuildProgress),
    {
        let target = UtxoDb::with_options(capacity, main, wal, self.options().clone())?;

        tracing::info!(
            "Rebuilding {} records from {} slots into a table of capacity {capacity}",
            self.stats().live,
            self.slot_count()
        );

        self.resume_rebuild_with_progress(target, progress)
    }

    /// Continues a rebuild into `target` from the progress recorded in its tag.
    pub fn resume_rebuild<T: ByteStore>(&self, target: UtxoDb<T>) -> Result<UtxoDb<T>> {
        self.resume_rebuild_with_progress(target, |_| {})
    }

    /// Same as [`Self::resume_rebuild`], calling `progress` after every commit.
    pub fn resume_rebuild_with_progress<T, F>(
        &self,
        target: UtxoDb<T>,
        mut progress: F,
    ) -> Result<UtxoDb<T>>
    where
        T: ByteStore,
        F: FnMut(RebuildProgress),
    {
        let slot_count = self.slot_count();
        let mut slots_done = target.tag()?;

        if slots_done > slot_count {
            return Err(Error::RebuildOutOfRange {
                tag: slots_done,
                slots: slot_count,
            });
        }

        if slots_done > 0 {
            tracing::info!("Resuming rebuild at slot {slots_done} of {slot_count}");
        }

        let interval = self.options().rebuild_commit_interval.max(1);

        while slots_done < slot_count {
            let end = (slots_done + interval).min(slot_count);

            self.for_each_entry(slots_done, end - slots_done, |_, key, value| {
                target.insert_record(key, &value)
            })?;
            target.commit(end)?;
            slots_done = end;

            progress(RebuildProgress {
                slots_done,
                slot_count,
                records: target.stats().live,
            });
        }

        tracing::info!(
            "Rebuild complete: {} records in {} slots",
            target.stats().live,
            target.slot_count()
        );

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use crate::store::MemStore;

    fn source(records: u32) -> UtxoDb<MemStore> {
        let options = Options::builder().rebuild_commit_interval(16).build();
        let db = UtxoDb::with_options(64, MemStore::new(), MemStore::new(), options).unwrap();
        for i in 0..records {
            db.add(&i.to_le_bytes(), format!("value-{i}").as_bytes())
                .unwrap();
        }
        db.commit(1).unwrap();
        for i in (0..records).step_by(3) {
            assert!(db.remove(&i.to_le_bytes()).unwrap());
        }
        db.commit(2).unwrap();
        db
    }

    #[test]
    fn test_rebuild_drops_garbage_and_keeps_records() {
        let source = source(40);
        let mut reports = Vec::new();

        let target = source
            .rebuild_with_progress(32, MemStore::new(), MemStore::new(), |p| reports.push(p))
            .unwrap();

        let stats = target.stats();
        assert_eq!(stats.live, source.stats().live);
        assert_eq!(stats.tombstones, 0);
        assert_eq!(stats.dead_values, 0);
        assert_eq!(target.tag().unwrap(), source.slot_count());

        // 128 source slots in steps of 16.
        assert_eq!(reports.len(), 8);
        assert_eq!(reports.last().map(|p| p.slots_done), Some(128));
        assert_eq!(reports.last().map(|p| p.records), Some(stats.live));

        for i in 0u32..40 {
            let expected = (i % 3 != 0).then(|| format!("value-{i}").into_bytes());
            assert_eq!(target.get(&i.to_le_bytes()).unwrap(), expected);
        }
    }

    #[test]
    fn test_resume_rejects_foreign_progress() {
        let source = source(4);
        let target = UtxoDb::new(8, MemStore::new(), MemStore::new()).unwrap();
        target.commit(source.slot_count() + 1).unwrap();

        assert!(matches!(
            source.resume_rebuild(target),
            Err(Error::RebuildOutOfRange { tag: 129, slots: 128 })
        ));
    }
}
