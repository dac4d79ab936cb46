//! Index maintenance (C4): translating a row's field values into the
//! unique/normal/union index entries that mirror it, and keeping those
//! entries consistent with inserts, updates, and deletes.
//!
//! Grounded on the original's `index.go`/`table.go` `createIndex`/`delIndex`
//! pair: unique index entries carry the row's primary key as their value,
//! normal index entries fold the row-id into the key itself (so duplicates
//! coexist and scans come back pre-ordered by value then id), and a union
//! field is indexed *both* as part of the single composite union entry and
//! as its own ordinary normal-index entry.

use crate::codec;
use crate::engine::Txn;
use crate::error::{Result, StrataError};
use crate::row::IndexKind;
use crate::schema::TableMeta;
use crate::value::Value;

/// Check that writing `row` would not collide with an existing unique or
/// union entry, without mutating anything. Must be called before
/// `insert_indexes` inside the same transaction so the check observes a
/// consistent snapshot.
pub fn check_conflicts(
    txn: &dyn Txn,
    meta: &TableMeta,
    row_id: u64,
    field_values: &[Value],
) -> Result<()> {
    for field in &meta.fields {
        if field.index_kind == IndexKind::Unique {
            let key = codec::encode_unique(meta.id, field.position, &field_values[field.position]);
            if let Some(existing) = txn.get(&key)? {
                if codec::decode_u64(&existing) != Some(row_id) {
                    return Err(StrataError::IdxUniqueConflict {
                        table: meta.name.clone(),
                        field: field.name.to_string(),
                    });
                }
            }
        }
    }

    if !meta.union_fields.is_empty() {
        let key = union_key(meta, field_values);
        if let Some(existing) = txn.get(&key)? {
            if codec::decode_u64(&existing) != Some(row_id) {
                return Err(StrataError::IdxUniqueConflict {
                    table: meta.name.clone(),
                    field: "<union>".to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Write every index entry implied by `field_values` for `row_id`. Callers
/// must have already run `check_conflicts` in the same transaction.
pub fn insert_indexes(
    txn: &mut dyn Txn,
    meta: &TableMeta,
    row_id: u64,
    field_values: &[Value],
) -> Result<()> {
    let row_id_bytes = codec::encode_u64(row_id);

    for field in &meta.fields {
        match field.index_kind {
            IndexKind::Unique => {
                let key =
                    codec::encode_unique(meta.id, field.position, &field_values[field.position]);
                txn.set(key, row_id_bytes.clone())?;
            }
            IndexKind::Normal | IndexKind::Union => {
                let key = codec::encode_normal(
                    meta.id,
                    field.position,
                    &field_values[field.position],
                    row_id,
                );
                txn.set(key, row_id_bytes.clone())?;
            }
            IndexKind::None => {}
        }
    }

    if !meta.union_fields.is_empty() {
        let key = union_key(meta, field_values);
        txn.set(key, row_id_bytes)?;
    }

    Ok(())
}

/// Remove every index entry implied by `field_values` for `row_id`. Used by
/// delete and by update's delete-then-reinsert sequence.
pub fn delete_indexes(
    txn: &mut dyn Txn,
    meta: &TableMeta,
    row_id: u64,
    field_values: &[Value],
) -> Result<()> {
    for field in &meta.fields {
        match field.index_kind {
            IndexKind::Unique => {
                let key =
                    codec::encode_unique(meta.id, field.position, &field_values[field.position]);
                txn.delete(&key)?;
            }
            IndexKind::Normal | IndexKind::Union => {
                let key = codec::encode_normal(
                    meta.id,
                    field.position,
                    &field_values[field.position],
                    row_id,
                );
                txn.delete(&key)?;
            }
            IndexKind::None => {}
        }
    }

    if !meta.union_fields.is_empty() {
        let key = union_key(meta, field_values);
        txn.delete(&key)?;
    }

    Ok(())
}

/// Build the composite union-index key for `field_values`, in field-index
/// order as required by `codec::encode_union`.
fn union_key(meta: &TableMeta, field_values: &[Value]) -> Vec<u8> {
    let components: Vec<(usize, &Value)> = meta
        .union_fields
        .iter()
        .map(|&pos| (pos, &field_values[pos]))
        .collect();
    codec::encode_union(meta.id, &components)
}
