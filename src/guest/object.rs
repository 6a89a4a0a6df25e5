//! Guest heap objects.

use super::value::{GuestRef, GuestValue, PropertyKey};
use crate::bridge::Bridge;
use crate::error::GuestException;
use crate::heap::{ObjectId, Trace};
use crate::wrapper::WrapperId;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// Signature of native guest functions: `(bridge, this, args)`
pub type GuestFn =
    dyn Fn(&mut Bridge, GuestValue, Vec<GuestValue>) -> Result<GuestValue, GuestException>;

/// A native guest function
#[derive(Clone)]
pub struct GuestFunction {
    name: Rc<str>,
    func: Rc<GuestFn>,
}

impl GuestFunction {
    /// Wrap a closure
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Bridge, GuestValue, Vec<GuestValue>) -> Result<GuestValue, GuestException>
            + 'static,
    {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    /// Function name used in stacks and constructor names
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(
        &self,
        bridge: &mut Bridge,
        this: GuestValue,
        args: Vec<GuestValue>,
    ) -> Result<GuestValue, GuestException> {
        (self.func)(bridge, this, args)
    }
}

impl fmt::Debug for GuestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestFunction").field("name", &self.name).finish()
    }
}

/// Bridge data attached to a context global
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalData {
    /// Context or Sandbox wrapper owning this global, while one is registered
    pub wrapper: Option<WrapperId>,
    /// Property access is redirected to a host table
    pub sandbox: bool,
}

/// Internal class of a guest object
#[derive(Debug, Clone)]
pub enum ObjectClass {
    /// Ordinary object
    Plain,
    /// Array; elements live under index keys
    Array,
    /// Native function
    Function(GuestFunction),
    /// Error object
    Error,
    /// Proxy fronting a host object
    HostProxy(WrapperId),
    /// Global object of a context
    Global(GlobalData),
}

/// An object in the guest heap
#[derive(Debug, Clone)]
pub struct GuestObject {
    pub(crate) class: ObjectClass,
    pub(crate) properties: IndexMap<PropertyKey, GuestValue>,
    pub(crate) constructor: Option<Rc<str>>,
    pub(crate) identity: Option<WrapperId>,
    pub(crate) context: Option<GuestRef>,
}

impl GuestObject {
    pub(crate) fn new(class: ObjectClass, context: Option<GuestRef>) -> Self {
        Self {
            class,
            properties: IndexMap::new(),
            constructor: None,
            identity: None,
            context,
        }
    }

    /// Internal class
    pub fn class(&self) -> &ObjectClass {
        &self.class
    }

    /// Global of the context this object was created in
    pub fn creation_context(&self) -> Option<GuestRef> {
        self.context
    }

    /// Whether this is an array
    pub fn is_array(&self) -> bool {
        matches!(self.class, ObjectClass::Array)
    }

    /// Whether this is an error
    pub fn is_error(&self) -> bool {
        matches!(self.class, ObjectClass::Error)
    }

    /// Whether the object can be called
    pub fn is_callable(&self) -> bool {
        matches!(
            self.class,
            ObjectClass::Function(_) | ObjectClass::HostProxy(_)
        )
    }

    /// Constructor name as reported by the engine
    pub fn constructor_name(&self) -> &str {
        if let Some(name) = &self.constructor {
            return name;
        }
        match &self.class {
            ObjectClass::Plain | ObjectClass::HostProxy(_) => "Object",
            ObjectClass::Array => "Array",
            ObjectClass::Function(_) => "Function",
            ObjectClass::Error => "Error",
            ObjectClass::Global(_) => "global",
        }
    }

    /// Array length: one past the highest index
    pub(crate) fn array_length(&self) -> u32 {
        self.properties
            .keys()
            .filter_map(|k| match k {
                PropertyKey::Index(i) => Some(i + 1),
                PropertyKey::Name(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Own keys in engine order: indices ascending, then names in insertion order
    pub(crate) fn own_keys(&self) -> Vec<PropertyKey> {
        let mut indices: Vec<u32> = self
            .properties
            .keys()
            .filter_map(|k| match k {
                PropertyKey::Index(i) => Some(*i),
                PropertyKey::Name(_) => None,
            })
            .collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .map(PropertyKey::Index)
            .chain(
                self.properties
                    .keys()
                    .filter(|k| matches!(k, PropertyKey::Name(_)))
                    .cloned(),
            )
            .collect()
    }
}

impl Trace for GuestObject {
    fn trace(&self, tracer: &mut dyn FnMut(ObjectId)) {
        for value in self.properties.values() {
            if let GuestValue::Object(r) = value {
                tracer(r.0);
            }
        }
        // Objects keep their creation context alive
        if let Some(ctx) = self.context {
            tracer(ctx.0);
        }
    }
}
