//! Query planner and executor (C7): turns a `Condition` into a minimal set
//! of index scans, intersects them, applies any predicates that couldn't be
//! answered by an index as post-filters, then sorts and paginates.
//!
//! Grounded on the original's `borm.go`/`condition.go` query path, with the
//! planning steps laid out below:
//!
//! 1. Partition predicates by whether the field carries a usable index.
//! 2. If the table's union fields are *all* constrained by `Eq` predicates,
//!    answer them in one union-index lookup instead of per-field scans —
//!    union fields also carry an individual normal-index entry (mirroring
//!    the original's `getIndex`), so an incomplete union falls back to that.
//! 3. Each `In` entry's value tuples are each treated as their own set of
//!    equality predicates, recursively run through steps 1-2 and the
//!    resulting id sets unioned within the entry.
//! 4. Intersect every predicate's candidate id set (the top-level equality
//!    map and each `In` entry), or fall back to a full table scan when no
//!    predicate is index-backed.
//! 5. Fetch candidate rows, apply predicates on non-indexed fields as exact
//!    post-filters.
//! 6. Deterministic pre-sort by primary key, then `SortBy` if present —
//!    lexicographic over its ordered key list, with a single reverse flag
//!    applied to the whole ordering.
//! 7. Apply `offset`/`limit`.

use std::collections::HashSet;

use tracing::debug;

use crate::codec;
use crate::condition::{Condition, Predicate};
use crate::engine::Txn;
use crate::error::{Result, StrataError};
use crate::row::{FieldDescriptor, IndexKind};
use crate::schema::TableMeta;
use crate::value::{compare, values_equal, Value};

/// Stats surfaced to the analyzer event, accumulated across the top-level
/// equality set and every `In`-entry's recursive resolution.
#[derive(Default)]
struct ResolveReport {
    used_union: bool,
    index_backed_fields: usize,
    post_filters: usize,
}

/// Resolve `condition` against `meta` over `txn`, returning matching row ids
/// in final (sorted, paginated) order. Row fetch/unmarshal is the caller's
/// job; the planner only ever deals in ids and raw field-value predicates.
pub fn plan_and_execute(
    txn: &dyn Txn,
    meta: &TableMeta,
    condition: &Condition,
    row_fields: impl Fn(u64) -> Result<Vec<Value>>,
    analyzer_enabled: bool,
) -> Result<Vec<u64>> {
    condition.validate()?;

    let mut eq_pairs: Vec<(&str, &Value)> = Vec::new();
    let mut in_entries: Vec<(&[String], &[Vec<Value>])> = Vec::new();
    for pred in &condition.predicates {
        match &pred.predicate {
            Predicate::Eq(value) => eq_pairs.push((pred.fields[0].as_str(), value)),
            Predicate::In(tuples) => in_entries.push((&pred.fields, tuples)),
        }
    }

    let (candidate_from_eq, mut report) = resolve_eq_set(txn, meta, &eq_pairs, &row_fields)?;
    let mut candidate = Some(candidate_from_eq);

    for (fields, tuples) in in_entries {
        let mut entry_ids: HashSet<u64> = HashSet::new();
        for tuple in tuples {
            let pairs: Vec<(&str, &Value)> =
                fields.iter().map(String::as_str).zip(tuple.iter()).collect();
            let (ids, sub_report) = resolve_eq_set(txn, meta, &pairs, &row_fields)?;
            entry_ids.extend(ids);
            report.used_union |= sub_report.used_union;
            report.index_backed_fields += sub_report.index_backed_fields;
            report.post_filters += sub_report.post_filters;
        }
        candidate = Some(match candidate {
            Some(existing) => existing.intersection(&entry_ids).copied().collect(),
            None => entry_ids,
        });
    }

    let mut ids: Vec<u64> = candidate.unwrap_or_default().into_iter().collect();
    ids.sort_unstable();

    if let Some(sort) = &condition.sort {
        let positions: Vec<usize> = if sort.fields.is_empty() {
            vec![0]
        } else {
            sort.fields
                .iter()
                .map(|name| {
                    find_field(&meta.fields, name)
                        .map(|f| f.position)
                        .ok_or_else(|| StrataError::IdxNotSupport {
                            table: meta.name.clone(),
                            field: name.clone(),
                        })
                })
                .collect::<Result<_>>()?
        };

        let mut keyed: Vec<(u64, Vec<Value>)> = ids
            .into_iter()
            .map(|id| {
                row_fields(id).map(|vals| {
                    let key = positions.iter().map(|&p| vals[p].clone()).collect();
                    (id, key)
                })
            })
            .collect::<Result<_>>()?;

        if keyed
            .iter()
            .any(|(_, key)| key.iter().any(|v| !v.is_sortable()))
        {
            return Err(StrataError::TypeNotBeSort);
        }

        keyed.sort_by(|a, b| {
            let mut ord = std::cmp::Ordering::Equal;
            for (va, vb) in a.1.iter().zip(b.1.iter()) {
                ord = compare(va, vb).unwrap_or(std::cmp::Ordering::Equal);
                if ord != std::cmp::Ordering::Equal {
                    break;
                }
            }
            if sort.reverse {
                ord.reverse()
            } else {
                ord
            }
        });
        ids = keyed.into_iter().map(|(id, _)| id).collect();
    }

    if analyzer_enabled {
        debug!(
            table = meta.name.as_str(),
            used_union = report.used_union,
            index_backed_fields = report.index_backed_fields,
            post_filters = report.post_filters,
            matched = ids.len(),
            "query plan"
        );
    }

    let start = condition.offset.min(ids.len());
    let end = match condition.limit {
        Some(limit) => (start + limit).min(ids.len()),
        None => ids.len(),
    };
    Ok(ids[start..end].to_vec())
}

/// Steps 1-2 plus post-filtering, over a flat list of named equality
/// predicates. Used both for the top-level equality set and, recursively,
/// for each `In`-entry's value tuples (step 3). An empty `eqs` resolves to
/// every row in the table (a full scan with no post-filters).
fn resolve_eq_set(
    txn: &dyn Txn,
    meta: &TableMeta,
    eqs: &[(&str, &Value)],
    row_fields: &impl Fn(u64) -> Result<Vec<Value>>,
) -> Result<(HashSet<u64>, ResolveReport)> {
    for (name, _) in eqs {
        match find_field(&meta.fields, name) {
            Some(field) if field.position == 0 || field.index_kind != IndexKind::None => {}
            _ => {
                return Err(StrataError::IdxNotSupport {
                    table: meta.name.clone(),
                    field: (*name).to_string(),
                })
            }
        }
    }

    let mut report = ResolveReport::default();

    let union_complete = !meta.union_fields.is_empty()
        && meta.union_fields.iter().all(|&pos| {
            eqs.iter()
                .any(|(name, _)| field_position(&meta.fields, name) == Some(pos))
        });

    let mut index_backed_fields: HashSet<usize> = HashSet::new();
    let mut candidate: Option<HashSet<u64>> = None;

    if union_complete {
        let mut components = Vec::with_capacity(meta.union_fields.len());
        for &pos in &meta.union_fields {
            let (_, value) = eqs
                .iter()
                .find(|(name, _)| field_position(&meta.fields, name) == Some(pos))
                .expect("union_complete guarantees presence");
            components.push((pos, *value));
            index_backed_fields.insert(pos);
        }
        let key = codec::encode_union(meta.id, &components);
        let ids: HashSet<u64> = txn
            .get(&key)?
            .and_then(|v| codec::decode_u64(&v))
            .into_iter()
            .collect();
        candidate = Some(ids);
        report.used_union = true;
    }

    for (name, value) in eqs {
        let Some(field) = find_field(&meta.fields, name) else {
            continue;
        };
        if report.used_union && index_backed_fields.contains(&field.position) {
            continue;
        }
        if field.position != 0 && field.index_kind == IndexKind::None {
            continue;
        }

        let ids = eq_ids_for_field(txn, meta, field, value)?;
        index_backed_fields.insert(field.position);
        candidate = Some(match candidate {
            Some(existing) => existing.intersection(&ids).copied().collect(),
            None => ids,
        });
    }
    report.index_backed_fields = index_backed_fields.len();

    let mut ids: Vec<u64> = match candidate {
        Some(set) => set.into_iter().collect(),
        None => full_table_scan(txn, meta)?,
    };

    let post_filters: Vec<(&str, &Value)> = eqs
        .iter()
        .copied()
        .filter(|(name, _)| {
            find_field(&meta.fields, name)
                .map(|f| !index_backed_fields.contains(&f.position))
                .unwrap_or(true)
        })
        .collect();
    report.post_filters = post_filters.len();

    if !post_filters.is_empty() {
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            let values = row_fields(id)?;
            let matches = post_filters.iter().all(|(name, value)| {
                match find_field(&meta.fields, name) {
                    Some(f) => values_equal(&values[f.position], value),
                    None => false,
                }
            });
            if matches {
                kept.push(id);
            }
        }
        ids = kept;
    }

    Ok((ids.into_iter().collect(), report))
}

fn eq_ids_for_field(
    txn: &dyn Txn,
    meta: &TableMeta,
    field: &FieldDescriptor,
    value: &Value,
) -> Result<HashSet<u64>> {
    if field.position == 0 {
        let Value::U64(id) = value else {
            return Ok(HashSet::new());
        };
        let key = codec::encode_primary(meta.id, *id);
        return Ok(if txn.get(&key)?.is_some() {
            HashSet::from([*id])
        } else {
            HashSet::new()
        });
    }
    match field.index_kind {
        IndexKind::Unique => {
            let key = codec::encode_unique(meta.id, field.position, value);
            Ok(txn
                .get(&key)?
                .and_then(|v| codec::decode_u64(&v))
                .into_iter()
                .collect())
        }
        IndexKind::Normal | IndexKind::Union => {
            let prefix = codec::normal_value_prefix(meta.id, field.position, value);
            let entries = txn.iterate_prefix(&prefix)?;
            Ok(entries
                .iter()
                .filter_map(|(k, _)| codec::decode_trailing_id(k))
                .collect())
        }
        IndexKind::None => Ok(HashSet::new()),
    }
}

fn full_table_scan(txn: &dyn Txn, meta: &TableMeta) -> Result<Vec<u64>> {
    let prefix = codec::encode_table_prefix(meta.id);
    let entries = txn.iterate_prefix(&prefix)?;
    Ok(entries
        .iter()
        .filter_map(|(k, _)| codec::decode_trailing_id(k))
        .collect())
}

fn find_field<'a>(fields: &'a [FieldDescriptor], name: &str) -> Option<&'a FieldDescriptor> {
    fields.iter().find(|f| f.name == name)
}

fn field_position(fields: &[FieldDescriptor], name: &str) -> Option<usize> {
    find_field(fields, name).map(|f| f.position)
}
