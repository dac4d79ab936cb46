//! The public API surface: `Database` owns the schema registry and
//! the engine handle, exposes the auto-commit operations, and hands out
//! explicit `Transaction`s for callers that want to batch several operations
//! atomically themselves.
//!
//! Auto-commit retry: engine-level `Conflict` is
//! retried with a capped, jittered backoff (see `backoff`) rather than the
//! original's unbounded recursive retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::codec;
use crate::config::Config;
use crate::condition::Condition;
use crate::engine::{Engine, Txn};
use crate::error::{Result, StrataError};
use crate::index;
use crate::query;
use crate::row::{IndexKind, Row};
use crate::schema::{SchemaRegistry, TableMeta};
use crate::value::Value;

/// Per-index-kind row counts returned by `Snoop`.
#[derive(Debug, Clone, Default)]
pub struct SnoopReport {
    pub total_count: usize,
    pub union_index_count: usize,
    pub normal_index: HashMap<String, usize>,
    pub unique_index: HashMap<String, usize>,
}

/// The embedded store handle. Cheap to clone (wraps `Arc`s); typically one
/// lives for the process lifetime.
#[derive(Clone)]
pub struct Database {
    engine: Arc<dyn Engine>,
    schema: Arc<SchemaRegistry>,
    config: Config,
}

impl Database {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_config(engine, Config::default())
    }

    pub fn with_config(engine: Arc<dyn Engine>, config: Config) -> Self {
        Database {
            engine,
            schema: Arc::new(SchemaRegistry::new()),
            config,
        }
    }

    pub fn create_table(&self, prototype: &dyn Row) -> Result<()> {
        self.schema.register_table(prototype)?;
        Ok(())
    }

    pub fn insert(&self, row: &mut dyn Row) -> Result<()> {
        self.with_retry(true, |txn| self.tx_insert(txn, row))
    }

    pub fn batch_insert(&self, rows: &mut [Box<dyn Row>]) -> Result<()> {
        self.with_retry(true, |txn| {
            for row in rows.iter_mut() {
                self.tx_insert(txn, row.as_mut())?;
            }
            Ok(())
        })
    }

    pub fn update(&self, old_row: &dyn Row, new_row: &mut dyn Row) -> Result<()> {
        self.with_retry(true, |txn| self.tx_update(txn, old_row, new_row))
    }

    pub fn delete(&self, row: &dyn Row) -> Result<()> {
        self.with_retry(true, |txn| self.tx_delete(txn, row))
    }

    pub fn truncate(&self, prototype: &dyn Row) -> Result<()> {
        let table_id = self.schema.table_id(prototype.table_name())?;
        self.engine.drop_prefix(&codec::encode_table_prefix(table_id));
        self.engine.drop_prefix(&codec::unique_prefix_table(table_id));
        self.engine.drop_prefix(&codec::normal_prefix_table(table_id));
        self.engine.drop_prefix(&codec::union_prefix(table_id));
        Ok(())
    }

    pub fn count(&self, prototype: &dyn Row) -> Result<usize> {
        self.with_retry(false, |txn| self.tx_count(txn, prototype))
    }

    pub fn foreach(&self, prototype: &dyn Row, mut visitor: impl FnMut(&dyn Row) -> Result<()>) -> Result<()> {
        self.with_retry(false, |txn| self.tx_foreach(txn, prototype, &mut visitor))
    }

    pub fn dump(&self, prototype: &dyn Row) -> Result<Vec<Box<dyn Row>>> {
        let mut rows = Vec::new();
        self.foreach(prototype, |row| {
            let mut copy = row.clone_empty();
            copy.unmarshal(&row.marshal()?)?;
            rows.push(copy);
            Ok(())
        })?;
        Ok(rows)
    }

    pub fn find(&self, condition: &Condition) -> Result<Vec<Box<dyn Row>>> {
        self.with_retry(false, |txn| self.tx_find(txn, condition))
    }

    pub fn first(&self, condition: Condition) -> Result<Box<dyn Row>> {
        let limited = condition.limit(1).offset(0);
        self.find(&limited)?.into_iter().next().ok_or(StrataError::KeyNotFound)
    }

    pub fn last(&self, condition: Condition) -> Result<Box<dyn Row>> {
        let sorted = if condition.sort.is_none() {
            condition.sort_by(Vec::<String>::new(), true)
        } else {
            condition
        };
        let limited = sorted.limit(1).offset(0);
        self.find(&limited)?.into_iter().next().ok_or(StrataError::KeyNotFound)
    }

    pub fn count_cond(&self, condition: &Condition) -> Result<usize> {
        self.with_retry(false, |txn| self.tx_count_cond(txn, condition))
    }

    pub fn snoop(&self, prototype: &dyn Row) -> Result<SnoopReport> {
        let table_id = self.schema.table_id(prototype.table_name())?;
        let meta = self.schema.meta(table_id)?;
        self.with_retry(false, |txn| self.tx_snoop(txn, &meta))
    }

    /// Begin an explicit transaction. Unlike the auto-commit methods above,
    /// `Transaction::commit`/`discard` never retry — conflicts are surfaced
    /// directly to the caller rather than retried.
    pub fn begin(&self, update: bool) -> Transaction<'_> {
        Transaction {
            db: self,
            txn: self.engine.new_transaction(update),
        }
    }

    fn with_retry<T>(&self, update: bool, mut f: impl FnMut(&mut dyn Txn) -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            let mut txn = self.engine.new_transaction(update);
            match f(txn.as_mut()) {
                Ok(value) => match txn.commit() {
                    Ok(()) => return Ok(value),
                    Err(StrataError::Conflict) => {
                        attempt += 1;
                        if attempt >= self.config.max_commit_retries {
                            warn!(attempt, "exceeded max commit retries, surfacing conflict");
                            return Err(StrataError::Conflict);
                        }
                        backoff(attempt);
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    txn.discard();
                    return Err(e);
                }
            }
        }
    }

    // --- Tx* primitives, shared by both auto-commit and explicit-txn paths ---

    fn tx_insert(&self, txn: &mut dyn Txn, row: &mut dyn Row) -> Result<()> {
        let table_id = self.schema.table_id(row.table_name())?;
        let meta = self.schema.meta(table_id)?;

        if row.row_id() == 0 {
            row.set_row_id(self.schema.next_row_id(table_id)?);
        }
        let row_id = row.row_id();

        let field_values = read_field_values(row, &meta);
        index::check_conflicts(txn, &meta, row_id, &field_values)?;

        let bytes = row.marshal()?;
        txn.set(codec::encode_primary(table_id, row_id), bytes)?;
        index::insert_indexes(txn, &meta, row_id, &field_values)?;
        Ok(())
    }

    fn tx_update(&self, txn: &mut dyn Txn, old_row: &dyn Row, new_row: &mut dyn Row) -> Result<()> {
        self.tx_delete(txn, old_row)?;
        if new_row.row_id() == 0 {
            new_row.set_row_id(old_row.row_id());
        }
        self.tx_insert(txn, new_row)
    }

    fn tx_delete(&self, txn: &mut dyn Txn, row: &dyn Row) -> Result<()> {
        let row_id = row.row_id();
        if row_id == 0 {
            return Err(StrataError::RowIdIllegal);
        }
        let table_id = self.schema.table_id(row.table_name())?;
        let meta = self.schema.meta(table_id)?;

        let key = codec::encode_primary(table_id, row_id);
        let bytes = txn.get(&key)?.ok_or(StrataError::KeyNotFound)?;
        let mut live = row.clone_empty();
        live.unmarshal(&bytes)?;

        let field_values = read_field_values(live.as_ref(), &meta);
        index::delete_indexes(txn, &meta, row_id, &field_values)?;
        txn.delete(&key)?;
        Ok(())
    }

    fn tx_count(&self, txn: &dyn Txn, prototype: &dyn Row) -> Result<usize> {
        let table_id = self.schema.table_id(prototype.table_name())?;
        let prefix = codec::encode_table_prefix(table_id);
        Ok(txn.iterate_prefix(&prefix)?.len())
    }

    fn tx_foreach(
        &self,
        txn: &dyn Txn,
        prototype: &dyn Row,
        visitor: &mut dyn FnMut(&dyn Row) -> Result<()>,
    ) -> Result<()> {
        let table_id = self.schema.table_id(prototype.table_name())?;
        let prefix = codec::encode_table_prefix(table_id);
        for (_, value) in txn.iterate_prefix(&prefix)? {
            let mut row = prototype.clone_empty();
            row.unmarshal(&value)?;
            visitor(row.as_ref())?;
        }
        Ok(())
    }

    fn tx_find(&self, txn: &dyn Txn, condition: &Condition) -> Result<Vec<Box<dyn Row>>> {
        let table_id = self.schema.table_id(condition.prototype.table_name())?;
        let meta = self.schema.meta(table_id)?;
        let ids = query::plan_and_execute(
            txn,
            &meta,
            condition,
            |id| self.fetch_field_values(txn, &meta, condition.prototype.as_ref(), id),
            self.config.query_analyzer_enabled,
        )?;

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let key = codec::encode_primary(table_id, id);
            let bytes = txn.get(&key)?.ok_or(StrataError::KeyNotFound)?;
            let mut row = condition.prototype.clone_empty();
            row.unmarshal(&bytes)?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn tx_count_cond(&self, txn: &dyn Txn, condition: &Condition) -> Result<usize> {
        let table_id = self.schema.table_id(condition.prototype.table_name())?;
        let meta = self.schema.meta(table_id)?;
        let ids = query::plan_and_execute(
            txn,
            &meta,
            condition,
            |id| self.fetch_field_values(txn, &meta, condition.prototype.as_ref(), id),
            self.config.query_analyzer_enabled,
        )?;
        Ok(ids.len())
    }

    fn fetch_field_values(
        &self,
        txn: &dyn Txn,
        meta: &TableMeta,
        prototype: &dyn Row,
        row_id: u64,
    ) -> Result<Vec<Value>> {
        let key = codec::encode_primary(meta.id, row_id);
        let bytes = txn.get(&key)?.ok_or(StrataError::KeyNotFound)?;
        let mut row = prototype.clone_empty();
        row.unmarshal(&bytes)?;
        Ok(read_field_values(row.as_ref(), meta))
    }

    fn tx_snoop(&self, txn: &dyn Txn, meta: &TableMeta) -> Result<SnoopReport> {
        let mut report = SnoopReport::default();
        report.total_count = txn.iterate_prefix(&codec::encode_table_prefix(meta.id))?.len();
        if !meta.union_fields.is_empty() {
            report.union_index_count =
                txn.iterate_prefix(&codec::union_prefix(meta.id))?.len();
        }
        for field in &meta.fields {
            match field.index_kind {
                IndexKind::Unique => {
                    let count = txn
                        .iterate_prefix(&codec::unique_prefix(meta.id, field.position))?
                        .len();
                    report.unique_index.insert(field.name.to_string(), count);
                }
                IndexKind::Normal | IndexKind::Union => {
                    let count = txn
                        .iterate_prefix(&codec::normal_field_prefix(meta.id, field.position))?
                        .len();
                    report.normal_index.insert(field.name.to_string(), count);
                }
                IndexKind::None => {}
            }
        }
        Ok(report)
    }
}

/// Explicit, caller-owned transaction. `Tx*` operations never retry on
/// conflict — the caller decides what to do with `StrataError::Conflict`.
pub struct Transaction<'db> {
    db: &'db Database,
    txn: Box<dyn Txn + 'db>,
}

impl<'db> Transaction<'db> {
    pub fn insert(&mut self, row: &mut dyn Row) -> Result<()> {
        self.db.tx_insert(self.txn.as_mut(), row)
    }

    pub fn update(&mut self, old_row: &dyn Row, new_row: &mut dyn Row) -> Result<()> {
        self.db.tx_update(self.txn.as_mut(), old_row, new_row)
    }

    pub fn delete(&mut self, row: &dyn Row) -> Result<()> {
        self.db.tx_delete(self.txn.as_mut(), row)
    }

    pub fn count(&self, prototype: &dyn Row) -> Result<usize> {
        self.db.tx_count(self.txn.as_ref(), prototype)
    }

    pub fn foreach(&self, prototype: &dyn Row, mut visitor: impl FnMut(&dyn Row) -> Result<()>) -> Result<()> {
        self.db.tx_foreach(self.txn.as_ref(), prototype, &mut visitor)
    }

    pub fn find(&self, condition: &Condition) -> Result<Vec<Box<dyn Row>>> {
        self.db.tx_find(self.txn.as_ref(), condition)
    }

    pub fn count_cond(&self, condition: &Condition) -> Result<usize> {
        self.db.tx_count_cond(self.txn.as_ref(), condition)
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit()
    }

    pub fn discard(self) {
        self.txn.discard();
    }
}

fn read_field_values(row: &dyn Row, meta: &TableMeta) -> Vec<Value> {
    meta.fields.iter().map(|f| row.field_value(f.position)).collect()
}

/// Bounded exponential backoff with jitter, capped low enough to stay
/// responsive under contention: `attempt` 1 waits ~0-1ms, growing to a
/// ceiling of ~8ms so `max_commit_retries` retries never stalls a caller for
/// more than tens of milliseconds total.
fn backoff(attempt: u32) {
    let ceiling_ms = 8u64.min(1u64 << attempt.min(3));
    let jittered = rand::thread_rng().gen_range(0..=ceiling_ms);
    if jittered > 0 {
        std::thread::sleep(Duration::from_millis(jittered));
    }
    debug!(attempt, jittered, "retrying after commit conflict");
}
