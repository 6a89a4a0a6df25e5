//! Host tables.

use super::value::{HostRef, HostValue};
use crate::heap::ObjectId;
use indexmap::IndexMap;

/// Normalized table key.
///
/// Integral numbers collapse to `Integer` so that `t[1]` and `t[1.0]` are
/// the same slot. NaN and nil are not valid keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Boolean key
    Boolean(bool),
    /// Integral number key
    Integer(i64),
    /// Non-integral number key (bit pattern)
    Float(u64),
    /// String key
    String(String),
    /// Object key (by identity)
    Object(HostRef),
}

impl TableKey {
    /// Normalize a value into a key
    pub fn from_value(value: &HostValue) -> Option<TableKey> {
        match value {
            HostValue::Nil => None,
            HostValue::Boolean(b) => Some(TableKey::Boolean(*b)),
            HostValue::Number(n) if n.is_nan() => None,
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                Some(TableKey::Integer(*n as i64))
            }
            HostValue::Number(n) => Some(TableKey::Float(n.to_bits())),
            HostValue::String(s) => Some(TableKey::String(s.clone())),
            HostValue::Object(r) => Some(TableKey::Object(*r)),
        }
    }

    /// Convert back into a value
    pub fn to_value(&self) -> HostValue {
        match self {
            TableKey::Boolean(b) => HostValue::Boolean(*b),
            TableKey::Integer(i) => HostValue::Number(*i as f64),
            TableKey::Float(bits) => HostValue::Number(f64::from_bits(*bits)),
            TableKey::String(s) => HostValue::String(s.clone()),
            TableKey::Object(r) => HostValue::Object(*r),
        }
    }
}

impl From<&str> for TableKey {
    fn from(s: &str) -> Self {
        TableKey::String(s.to_string())
    }
}

impl From<i64> for TableKey {
    fn from(i: i64) -> Self {
        TableKey::Integer(i)
    }
}

/// Insertion-ordered host table
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: IndexMap<TableKey, HostValue>,
    frozen: bool,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw read
    pub fn get(&self, key: &TableKey) -> HostValue {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Raw write; assigning nil removes the entry.
    pub fn set(&mut self, key: TableKey, value: HostValue) -> Result<(), String> {
        if self.frozen {
            return Err("attempt to modify a frozen table".to_string());
        }
        if value.is_nil() {
            self.entries.shift_remove(&key);
        } else {
            self.entries.insert(key, value);
        }
        Ok(())
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &TableKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &TableKey> {
        self.entries.keys()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &HostValue)> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the array part: the count of consecutive integer keys from 1
    pub fn border(&self) -> usize {
        let mut n = 0;
        while self.entries.contains_key(&TableKey::Integer(n as i64 + 1)) {
            n += 1;
        }
        n
    }

    /// Reject all further writes
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether writes are rejected
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(ObjectId)) {
        for (key, value) in &self.entries {
            if let TableKey::Object(r) = key {
                tracer(r.0);
            }
            if let HostValue::Object(r) = value {
                tracer(r.0);
            }
        }
    }
}
