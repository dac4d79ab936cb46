//! The fluent condition builder (C6): `Eq`/`In` predicates, `SortBy`, and
//! `Limit`, accumulated into a `Condition` that the planner consumes.
//!
//! Mirrors the original's `condition.go` behavior: a second `Eq`/`In` on a
//! field already constrained invalidates the whole condition rather than
//! silently overwriting it, surfaced as `QueryInvalid` the first time the
//! condition is used rather than at build time (building is infallible and
//! chainable, matching the original's method-chaining ergonomics). `In` is
//! multi-column (`condition.go:582 In(fieldNames []string, values [][]any)`):
//! a list of value tuples, each matching the field-name tuple's arity.

use std::collections::HashSet;

use crate::error::{Result, StrataError};
use crate::row::Row;
use crate::value::Value;

/// One equality or membership predicate. `In`'s tuples must each have the
/// same arity as the predicate's field list.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Value),
    In(Vec<Vec<Value>>),
}

#[derive(Debug, Clone)]
pub(crate) struct FieldPredicate {
    pub fields: Vec<String>,
    pub predicate: Predicate,
}

/// Ordered sort-key list plus a single reverse flag applied to the whole
/// ordering, applied after the scan and any post-filters, before pagination.
/// An empty field list means "sort by primary key"
/// (`condition.go:590 SortBy(reversed bool, sortKey ...string)`).
#[derive(Debug, Clone)]
pub struct SortBy {
    pub fields: Vec<String>,
    pub reverse: bool,
}

/// An accumulated set of predicates plus optional sort/pagination, built by
/// chaining `.eq()`/`.in_list()`/`.sort_by()`/`.limit()` and consumed by a
/// single `Find`/`Count`/`First`/`Last`/`Update`/`Delete` call.
///
/// Bound to one table via `prototype`, the same way the original's builder
/// carries the `IRow` it was constructed `WithAnd`/`WithOr`-style against —
/// it's what supplies `table_name()` and `clone_empty()` unmarshal targets
/// to the executor.
pub struct Condition {
    pub(crate) prototype: Box<dyn Row>,
    pub(crate) predicates: Vec<FieldPredicate>,
    pub(crate) sort: Option<SortBy>,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
    pub(crate) invalid: bool,
}

impl Condition {
    pub fn new(prototype: &dyn Row) -> Self {
        Condition {
            prototype: prototype.clone_empty(),
            predicates: Vec::new(),
            sort: None,
            offset: 0,
            limit: None,
            invalid: false,
        }
    }

    /// Constrain `field` to equal `value`. A second constraint on the same
    /// field (via `eq` or `in_list`) invalidates the condition.
    pub fn eq(self, field: impl Into<String>, value: Value) -> Self {
        self.add(vec![field.into()], Predicate::Eq(value))
    }

    /// Constrain the tuple `field_names` to match one of `value_tuples`
    /// (each tuple an ordered list of values, one per field name). An empty
    /// tuple list is valid and simply matches nothing. A tuple whose arity
    /// doesn't match `field_names` is caught at use time as `QueryInvalid`.
    pub fn in_list<S: Into<String>>(self, field_names: Vec<S>, value_tuples: Vec<Vec<Value>>) -> Self {
        let fields = field_names.into_iter().map(Into::into).collect();
        self.add(fields, Predicate::In(value_tuples))
    }

    fn add(mut self, fields: Vec<String>, predicate: Predicate) -> Self {
        if fields
            .iter()
            .any(|f| self.predicates.iter().any(|p| p.fields.iter().any(|pf| pf == f)))
        {
            self.invalid = true;
        }
        self.predicates.push(FieldPredicate { fields, predicate });
        self
    }

    /// `reverse` applies to the whole ordering; `fields` is the ordered
    /// sort-key list (empty means "sort by primary key").
    pub fn sort_by<S: Into<String>>(mut self, fields: Vec<S>, reverse: bool) -> Self {
        self.sort = Some(SortBy {
            fields: fields.into_iter().map(Into::into).collect(),
            reverse,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.invalid {
            return Err(StrataError::QueryInvalid(
                "field constrained more than once".into(),
            ));
        }
        let mut seen = HashSet::new();
        for p in &self.predicates {
            for field in &p.fields {
                if !seen.insert(field.as_str()) {
                    return Err(StrataError::QueryInvalid(
                        "field constrained more than once".into(),
                    ));
                }
            }
            if let Predicate::In(tuples) = &p.predicate {
                for tuple in tuples {
                    if tuple.len() != p.fields.len() {
                        return Err(StrataError::QueryInvalid(
                            "IN value tuple arity does not match field-name tuple".into(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
