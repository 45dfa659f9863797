//! Metadata store using RocksDB
//!
//! Stores:
//! - Versioned entries (value + version + revisions, bincode encoded)
//! - The store revision counter
//!
//! Transactions are applied as one atomic `WriteBatch` under a process-wide
//! write lock. Watches are in-process only.

use super::{Commit, EventKind, Listing, MetaStore, Op, Revision, StoreEvent, StoreWatch, Versioned};
use crate::common::{Error, Result};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CF_ENTRIES: &str = "entries";
const CF_META: &str = "meta";
const REVISION_KEY: &[u8] = b"revision";

pub struct RocksStore {
    db: DB,
    /// Guards the revision counter and serialises transactions.
    revision: Mutex<Revision>,
    events: broadcast::Sender<StoreEvent>,
}

impl RocksStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>, watch_buffer: usize) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_ENTRIES, CF_META])?;

        let revision = {
            let meta = cf(&db, CF_META)?;
            match db.get_cf(meta, REVISION_KEY)? {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        Error::MetadataCorrupted("revision counter has bad length".into())
                    })?;
                    u64::from_le_bytes(raw)
                }
                None => 0,
            }
        };

        let (events, _) = broadcast::channel(watch_buffer.max(1));
        Ok(Self {
            db,
            revision: Mutex::new(revision),
            events,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Revision> {
        self.revision.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get_entry(&self, key: &str) -> Result<Option<Versioned>> {
        let entries = cf(&self.db, CF_ENTRIES)?;
        match self.db.get_cf(entries, key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| Error::Internal(format!("missing column family {}", name)))
}

fn decode(bytes: &[u8]) -> Result<Versioned> {
    bincode::deserialize(bytes).map_err(|e| Error::MetadataCorrupted(e.to_string()))
}

fn encode(value: &Versioned) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Internal(format!("Serialize error: {}", e)))
}

impl MetaStore for RocksStore {
    fn read(&self, key: &str) -> Result<Option<Versioned>> {
        self.get_entry(key)
    }

    fn list(&self, prefix: &str) -> Result<Listing> {
        let revision = self.lock();
        let entries_cf = cf(&self.db, CF_ENTRIES)?;
        let iter = self.db.iterator_cf(
            entries_cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (key_bytes, value_bytes) = item?;
            if !key_bytes.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| Error::MetadataCorrupted("Invalid UTF-8".into()))?;
            entries.push((key, decode(&value_bytes)?));
        }

        Ok(Listing {
            entries,
            revision: *revision,
        })
    }

    fn transact(&self, ops: Vec<Op>) -> Result<Commit> {
        let mut revision = self.lock();

        let mut current = Vec::with_capacity(ops.len());
        for op in &ops {
            let existing = self.get_entry(op.key())?;
            let version = existing.as_ref().map_or(0, |v| v.version);
            if version != op.expected() {
                return Ok(Commit::Conflict {
                    key: op.key().to_string(),
                    current: version,
                });
            }
            current.push(existing);
        }

        let next = *revision + 1;
        let entries_cf = cf(&self.db, CF_ENTRIES)?;
        let mut batch = WriteBatch::default();
        let mut events = Vec::with_capacity(ops.len());

        for (op, existing) in ops.into_iter().zip(current) {
            match op {
                Op::Put {
                    key,
                    value,
                    expected,
                } => {
                    let entry = Versioned {
                        value,
                        version: expected + 1,
                        create_revision: existing.map_or(next, |v| v.create_revision),
                        mod_revision: next,
                    };
                    batch.put_cf(entries_cf, key.as_bytes(), encode(&entry)?);
                    events.push(StoreEvent {
                        key,
                        kind: EventKind::Put,
                        version: entry.version,
                        revision: next,
                    });
                }
                Op::Delete { key, .. } => {
                    if existing.is_some() {
                        batch.delete_cf(entries_cf, key.as_bytes());
                        events.push(StoreEvent {
                            key,
                            kind: EventKind::Delete,
                            version: 0,
                            revision: next,
                        });
                    }
                }
                Op::Check { .. } => {}
            }
        }

        batch.put_cf(cf(&self.db, CF_META)?, REVISION_KEY, next.to_le_bytes());
        self.db.write(batch)?;
        *revision = next;

        for event in events {
            let _ = self.events.send(event);
        }

        Ok(Commit::Committed { revision: next })
    }

    fn watch(&self, prefix: &str) -> StoreWatch {
        let _revision = self.lock();
        StoreWatch::new(prefix, self.events.subscribe())
    }

    fn revision(&self) -> Revision {
        *self.lock()
    }
}
