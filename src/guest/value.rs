//! Guest engine values and property keys.

use crate::heap::ObjectId;
use std::fmt;

/// Handle to an object living in the guest heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestRef(pub(crate) ObjectId);

impl GuestRef {
    /// Underlying heap id
    pub fn id(self) -> ObjectId {
        self.0
    }
}

impl fmt::Display for GuestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A guest engine value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GuestValue {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean value
    Boolean(bool),
    /// Numeric value
    Number(f64),
    /// String value
    String(String),
    /// Any object, including functions and arrays
    Object(GuestRef),
}

impl GuestValue {
    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, GuestValue::Undefined | GuestValue::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GuestValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            GuestValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GuestValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as object handle
    pub fn as_object(&self) -> Option<GuestRef> {
        match self {
            GuestValue::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// Primitive string conversion (objects print as `[object]`)
    pub fn to_display_string(&self) -> String {
        match self {
            GuestValue::Undefined => "undefined".into(),
            GuestValue::Null => "null".into(),
            GuestValue::Boolean(b) => b.to_string(),
            GuestValue::Number(n) => crate::host::format_number(*n),
            GuestValue::String(s) => s.clone(),
            GuestValue::Object(_) => "[object]".into(),
        }
    }
}

impl From<bool> for GuestValue {
    fn from(b: bool) -> Self {
        GuestValue::Boolean(b)
    }
}

impl From<f64> for GuestValue {
    fn from(n: f64) -> Self {
        GuestValue::Number(n)
    }
}

impl From<i32> for GuestValue {
    fn from(n: i32) -> Self {
        GuestValue::Number(n as f64)
    }
}

impl From<String> for GuestValue {
    fn from(s: String) -> Self {
        GuestValue::String(s)
    }
}

impl From<&str> for GuestValue {
    fn from(s: &str) -> Self {
        GuestValue::String(s.to_string())
    }
}

impl From<GuestRef> for GuestValue {
    fn from(r: GuestRef) -> Self {
        GuestValue::Object(r)
    }
}

/// Property key, split into indexed and named properties like the engine's
/// interceptor callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Array index
    Index(u32),
    /// Named property
    Name(String),
}

impl PropertyKey {
    /// Canonical form: numeric names become indices
    pub fn canonical(name: &str) -> PropertyKey {
        match name.parse::<u32>() {
            Ok(i) if i.to_string() == name => PropertyKey::Index(i),
            _ => PropertyKey::Name(name.to_string()),
        }
    }

    /// Key as it is stored in named storage
    pub fn to_name(&self) -> String {
        match self {
            PropertyKey::Index(i) => i.to_string(),
            PropertyKey::Name(n) => n.clone(),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::canonical(name)
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::canonical(&name)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        PropertyKey::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Index(i) => write!(f, "{}", i),
            PropertyKey::Name(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_keys() {
        assert_eq!(PropertyKey::from("3"), PropertyKey::Index(3));
        assert_eq!(PropertyKey::from("03"), PropertyKey::Name("03".into()));
        assert_eq!(PropertyKey::from("x"), PropertyKey::Name("x".into()));
        assert_eq!(PropertyKey::Index(7).to_name(), "7");
    }

    #[test]
    fn test_nullish() {
        assert!(GuestValue::Undefined.is_nullish());
        assert!(GuestValue::Null.is_nullish());
        assert!(!GuestValue::Boolean(false).is_nullish());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(GuestValue::Number(2.0).to_display_string(), "2");
        assert_eq!(GuestValue::from("a").to_display_string(), "a");
    }
}
