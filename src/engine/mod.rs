//! The ordered key-value engine contract the rest of the store is built on
//! top of: `get/set/delete/iterate/commit/discard`, plus
//! `new_transaction`, `drop_prefix`, and `new_sequence`. The core treats any
//! implementation of these traits as an opaque dependency; `memory` ships
//! the default in-process implementation so the crate is usable standalone.

mod memory;

pub use memory::MemoryEngine;

use std::sync::Arc;

use crate::error::Result;

/// A read or read-write handle into the engine's MVCC snapshot.
pub trait Txn: Send {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Ascending-order scan of every key with the given prefix.
    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Fails with `TxnTooBig`/etc. only at `commit` time, per the engine
    /// contract — writes are staged locally until then.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Consumes the transaction. Conflicting writers get `Conflict` here.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Idempotent; safe to call even after `commit`.
    fn discard(self: Box<Self>);
}

/// A monotonically increasing counter, independent of transactional state
/// (mirrors the original's `badger.Sequence`).
pub trait Sequence: Send + Sync {
    fn next(&self) -> u64;
}

/// The abstract ordered key-value store the rest of `strata` is built on.
pub trait Engine: Send + Sync {
    /// The returned handle borrows the engine for its lifetime — it must be
    /// committed or discarded before the engine itself is dropped.
    fn new_transaction(&self, update: bool) -> Box<dyn Txn + '_>;

    /// Non-transactional: removes every key under `prefix` immediately.
    fn drop_prefix(&self, prefix: &[u8]);

    fn new_sequence(&self, key: &[u8]) -> Arc<dyn Sequence>;
}
