//! The row contract and the per-field descriptor table each row type
//! publishes once, which is what lets the registry and query planner read
//! typed values without runtime reflection (see `clone_empty`/`fields` below
//! — the "visitor trait implemented by each row type" option).

use crate::value::{FieldType, Value};

/// How a field participates in the table's secondary indexes. `Union`
/// carries normal-index semantics on its own field *in addition to*
/// contributing to the table's single composite union entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    None,
    Unique,
    Normal,
    Union,
}

impl IndexKind {
    /// Union fields get an individual normal-index entry as well as their
    /// composite union entry, so both kinds answer yes here.
    pub fn is_normal_like(self) -> bool {
        matches!(self, IndexKind::Normal | IndexKind::Union)
    }
}

/// Static metadata for one field of a row type: name, position, scalar type,
/// and index kind. Built once per row type and cached by the registry at
/// `register_table` time.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub position: usize,
    pub field_type: FieldType,
    pub index_kind: IndexKind,
}

/// The contract every row type implements. Row instances are owned
/// exclusively by the caller; the store borrows them briefly to marshal,
/// unmarshal, or read field values.
pub trait Row: Send + Sync + std::fmt::Debug {
    /// Table name this row belongs to.
    fn table_name(&self) -> &'static str;

    /// Serialize the row to its wire/storage representation.
    fn marshal(&self) -> crate::Result<Vec<u8>>;

    /// Deserialize into this instance, overwriting its current contents.
    fn unmarshal(&mut self, bytes: &[u8]) -> crate::Result<()>;

    /// A fresh, zero-valued instance of the same row type, used as an
    /// unmarshal target by the query path.
    fn clone_empty(&self) -> Box<dyn Row>;

    /// Static field descriptor table for this row type, in declaration
    /// order. Field 0 MUST be named `Id` with `FieldType::U64`.
    fn fields(&self) -> &'static [FieldDescriptor];

    /// Read the current value of the field at `position`.
    fn field_value(&self, position: usize) -> Value;

    /// Convenience accessor for the primary key (field 0).
    fn row_id(&self) -> u64 {
        match self.field_value(0) {
            Value::U64(id) => id,
            _ => 0,
        }
    }

    /// Overwrite the primary key (field 0). Implementors back this with
    /// whatever storage backs their `Id` field.
    fn set_row_id(&mut self, id: u64);
}
