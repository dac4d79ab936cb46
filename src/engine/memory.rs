//! Default in-process MVCC key-value engine.
//!
//! Grounded on the version-stamped-value design described in
//! `examples/other_examples/9364a208_rust-us-kv-rs__kv-src-mvcc-mvcc.rs.rs`:
//! every key holds a history of `(version, Option<value>)` entries (`None`
//! is a tombstone), a monotonic counter hands out the next version, and a
//! read-write transaction takes a snapshot version at `Begin` and is
//! rejected at `commit` if any key it read has since been overwritten by a
//! transaction that committed at a higher version.
//!
//! Simplification versus the referenced design: rather than an explicit
//! active-transaction set, conflict detection directly compares each read
//! key's latest committed version against the reader's snapshot version at
//! commit time. This is sufficient for the single-process, single-engine
//! scope here and keeps the implementation small.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{Engine, Sequence, Txn};
use crate::error::{Result, StrataError};

type VersionHistory = Vec<(u64, Option<Vec<u8>>)>;

#[derive(Default)]
struct Store {
    data: BTreeMap<Vec<u8>, VersionHistory>,
}

impl Store {
    fn latest_at(&self, key: &[u8], snapshot: u64) -> Option<&Vec<u8>> {
        let history = self.data.get(key)?;
        history
            .iter()
            .rev()
            .find(|(v, _)| *v <= snapshot)
            .and_then(|(_, val)| val.as_ref())
    }

    fn latest_version(&self, key: &[u8]) -> Option<u64> {
        self.data.get(key).and_then(|h| h.last()).map(|(v, _)| *v)
    }
}

struct AtomicSequence {
    value: AtomicU64,
}

impl Sequence for AtomicSequence {
    fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }
}

/// The default ordered key-value engine: an in-memory `BTreeMap` guarded by
/// a single `RwLock`, with MVCC snapshot isolation layered on top.
pub struct MemoryEngine {
    store: RwLock<Store>,
    next_version: AtomicU64,
    sequences: RwLock<HashMap<Vec<u8>, Arc<AtomicSequence>>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine {
            store: RwLock::new(Store::default()),
            // Version 0 is reserved as "before anything committed".
            next_version: AtomicU64::new(1),
            sequences: RwLock::new(HashMap::new()),
        }
    }
}

impl Engine for MemoryEngine {
    fn new_transaction(&self, update: bool) -> Box<dyn Txn + '_> {
        let snapshot = self.next_version.load(Ordering::SeqCst) - 1;
        Box::new(MemoryTxn {
            engine: self,
            update,
            snapshot,
            pending: BTreeMap::new(),
            read_keys: Mutex::new(HashSet::new()),
            discarded: false,
        })
    }

    fn drop_prefix(&self, prefix: &[u8]) {
        let mut store = self.store.write();
        let keys: Vec<Vec<u8>> = store
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            store.data.remove(&key);
        }
    }

    fn new_sequence(&self, key: &[u8]) -> Arc<dyn Sequence> {
        let mut sequences = self.sequences.write();
        sequences
            .entry(key.to_vec())
            .or_insert_with(|| {
                Arc::new(AtomicSequence {
                    value: AtomicU64::new(1),
                })
            })
            .clone()
    }
}

/// A transaction handle over `MemoryEngine`. Holds a raw pointer-free shared
/// reference to the engine for the duration of the transaction's lifetime.
///
/// `read_keys` is behind a `Mutex` rather than a plain `HashSet` because
/// `get`/`iterate_prefix` only borrow `&self` (the `Txn` trait lets callers
/// hold a transaction across concurrent reads), but still need to record
/// every key they consult so `commit` can detect read-write conflicts.
struct MemoryTxn<'e> {
    engine: &'e MemoryEngine,
    update: bool,
    snapshot: u64,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    read_keys: Mutex<HashSet<Vec<u8>>>,
    discarded: bool,
}

impl<'e> Txn for MemoryTxn<'e> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.discarded {
            return Err(StrataError::DiscardedTxn);
        }
        self.read_keys.lock().insert(key.to_vec());
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        let store = self.engine.store.read();
        Ok(store.latest_at(key, self.snapshot).cloned())
    }

    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if self.discarded {
            return Err(StrataError::DiscardedTxn);
        }
        let store = self.engine.store.read();
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();

        {
            let mut read_keys = self.read_keys.lock();
            for (key, history) in store
                .data
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
            {
                read_keys.insert(key.clone());
                if let Some((_, val)) = history.iter().rev().find(|(v, _)| *v <= self.snapshot) {
                    merged.insert(key.clone(), val.clone());
                }
            }
        }
        for (key, val) in self.pending.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                continue;
            }
            merged.insert(key.clone(), val.clone());
        }

        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if self.discarded {
            return Err(StrataError::DiscardedTxn);
        }
        if !self.update {
            return Err(StrataError::QueryInvalid(
                "write on a read-only transaction".into(),
            ));
        }
        self.pending.insert(key, Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        if self.discarded {
            return Err(StrataError::DiscardedTxn);
        }
        if !self.update {
            return Err(StrataError::QueryInvalid(
                "write on a read-only transaction".into(),
            ));
        }
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.discarded {
            return Err(StrataError::DiscardedTxn);
        }
        if !self.update {
            return Ok(());
        }
        let mut store = self.engine.store.write();
        let read_keys = self.read_keys.into_inner();
        for key in self.pending.keys().chain(read_keys.iter()) {
            if let Some(latest) = store.latest_version(key) {
                if latest > self.snapshot {
                    return Err(StrataError::Conflict);
                }
            }
        }
        if self.pending.is_empty() {
            return Ok(());
        }
        let commit_version = self.engine.next_version.fetch_add(1, Ordering::SeqCst);
        for (key, value) in self.pending {
            store
                .data
                .entry(key)
                .or_default()
                .push((commit_version, value));
        }
        Ok(())
    }

    fn discard(self: Box<Self>) {
        // Pending writes are simply dropped; nothing was ever made visible.
    }
}
