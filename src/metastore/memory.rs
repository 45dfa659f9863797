//! In-memory metadata store
//!
//! Linearizable by construction: every read, listing and transaction runs
//! under one mutex, and events are published before the mutex is released so
//! watchers observe commits in revision order.

use super::{Commit, EventKind, Listing, MetaStore, Op, Revision, StoreEvent, StoreWatch, Versioned};
use crate::common::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

struct Inner {
    data: BTreeMap<String, Versioned>,
    revision: Revision,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new(watch_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(watch_buffer.max(1));
        Self {
            inner: Mutex::new(Inner {
                data: BTreeMap::new(),
                revision: 0,
            }),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MetaStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Versioned>> {
        Ok(self.lock().data.get(key).cloned())
    }

    fn list(&self, prefix: &str) -> Result<Listing> {
        let inner = self.lock();
        let entries = inner
            .data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Listing {
            entries,
            revision: inner.revision,
        })
    }

    fn transact(&self, ops: Vec<Op>) -> Result<Commit> {
        let mut inner = self.lock();

        for op in &ops {
            let current = inner.data.get(op.key()).map_or(0, |v| v.version);
            if current != op.expected() {
                return Ok(Commit::Conflict {
                    key: op.key().to_string(),
                    current,
                });
            }
        }

        inner.revision += 1;
        let revision = inner.revision;
        let mut events = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                Op::Put {
                    key,
                    value,
                    expected,
                } => {
                    let create_revision = inner
                        .data
                        .get(&key)
                        .map_or(revision, |v| v.create_revision);
                    let version = expected + 1;
                    inner.data.insert(
                        key.clone(),
                        Versioned {
                            value,
                            version,
                            create_revision,
                            mod_revision: revision,
                        },
                    );
                    events.push(StoreEvent {
                        key,
                        kind: EventKind::Put,
                        version,
                        revision,
                    });
                }
                Op::Delete { key, .. } => {
                    if inner.data.remove(&key).is_some() {
                        events.push(StoreEvent {
                            key,
                            kind: EventKind::Delete,
                            version: 0,
                            revision,
                        });
                    }
                }
                Op::Check { .. } => {}
            }
        }

        for event in events {
            // No receivers is fine
            let _ = self.events.send(event);
        }

        Ok(Commit::Committed { revision })
    }

    fn watch(&self, prefix: &str) -> StoreWatch {
        // Subscribe under the lock so no commit slips between subscription and
        // any listing the caller takes next.
        let _inner = self.lock();
        StoreWatch::new(prefix, self.events.subscribe())
    }

    fn revision(&self) -> Revision {
        self.lock().revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::WatchEvent;

    fn put(key: &str, value: &str, expected: u64) -> Op {
        Op::Put {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
            expected,
        }
    }

    #[test]
    fn test_conditional_write() {
        let store = MemoryStore::default();

        let commit = store.conditional_write("/a", b"1".to_vec(), 0).unwrap();
        assert_eq!(commit, Commit::Committed { revision: 1 });

        // Creating again must fail
        let commit = store.conditional_write("/a", b"2".to_vec(), 0).unwrap();
        assert_eq!(
            commit,
            Commit::Conflict {
                key: "/a".into(),
                current: 1
            }
        );

        store.conditional_write("/a", b"2".to_vec(), 1).unwrap();
        let value = store.read("/a").unwrap().unwrap();
        assert_eq!(value.value, b"2");
        assert_eq!(value.version, 2);
        assert_eq!(value.create_revision, 1);
        assert_eq!(value.mod_revision, 2);
    }

    #[test]
    fn test_transaction_is_all_or_nothing() {
        let store = MemoryStore::default();
        store.transact(vec![put("/a", "x", 0)]).unwrap();

        let commit = store
            .transact(vec![put("/b", "y", 0), put("/a", "z", 7)])
            .unwrap();
        assert!(!commit.is_committed());
        assert!(store.read("/b").unwrap().is_none());
        assert_eq!(store.revision(), 1);

        let commit = store
            .transact(vec![
                put("/b", "y", 0),
                Op::Delete {
                    key: "/a".into(),
                    expected: 1,
                },
            ])
            .unwrap();
        assert!(commit.is_committed());
        assert!(store.read("/a").unwrap().is_none());
        assert!(store.read("/b").unwrap().is_some());
    }

    #[test]
    fn test_check_op_guards_without_writing() {
        let store = MemoryStore::default();
        store.transact(vec![put("/guard", "g", 0)]).unwrap();

        let stale = store
            .transact(vec![
                Op::Check {
                    key: "/guard".into(),
                    expected: 0,
                },
                put("/x", "1", 0),
            ])
            .unwrap();
        assert!(!stale.is_committed());

        let ok = store
            .transact(vec![
                Op::Check {
                    key: "/guard".into(),
                    expected: 1,
                },
                put("/x", "1", 0),
            ])
            .unwrap();
        assert!(ok.is_committed());
        assert_eq!(store.read("/guard").unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_list_prefix() {
        let store = MemoryStore::default();
        store
            .transact(vec![
                put("/collections/a/collection", "a", 0),
                put("/collections/a/shards/shard1", "s", 0),
                put("/collections/ab/collection", "ab", 0),
                put("/live_nodes/n1", "n", 0),
            ])
            .unwrap();

        let listing = store.list("/collections/a/").unwrap();
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.revision, 1);
        assert_eq!(store.list("/collections/").unwrap().entries.len(), 3);
    }

    #[tokio::test]
    async fn test_watch_sees_commits_in_order() {
        let store = MemoryStore::default();
        let mut watch = store.watch("/collections/");

        store.transact(vec![put("/collections/a/x", "1", 0)]).unwrap();
        store.transact(vec![put("/live_nodes/n1", "1", 0)]).unwrap();
        store
            .transact(vec![Op::Delete {
                key: "/collections/a/x".into(),
                expected: 1,
            }])
            .unwrap();

        let first = watch.recv().await.unwrap();
        let second = watch.recv().await.unwrap();
        match (first, second) {
            (WatchEvent::Changed(a), WatchEvent::Changed(b)) => {
                assert_eq!(a.kind, EventKind::Put);
                assert_eq!(b.kind, EventKind::Delete);
                assert_eq!(b.revision, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
