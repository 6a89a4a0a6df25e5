//! Host runtime model.
//!
//! A small Lua-shaped runtime: tables, native functions returning multiple
//! values, and bridge-minted userdata, all living in one traced [`Heap`].
//! Values held by embedding code stay alive while rooted with
//! [`HostRuntime::root`].

pub mod table;
pub mod value;

pub use table::{Table, TableKey};
pub use value::{format_number, HostRef, HostValue};

use crate::bridge::Bridge;
use crate::error::HostException;
use crate::heap::{Collection, Heap, HeapStats, ObjectId, Trace};
use crate::wrapper::WrapperId;
use std::fmt;
use std::rc::Rc;

/// Signature of native host functions
pub type HostFn = dyn Fn(&mut Bridge, Vec<HostValue>) -> Result<Vec<HostValue>, HostException>;

/// A native host function
#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    func: Rc<HostFn>,
}

impl HostFunction {
    /// Wrap a closure
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Bridge, Vec<HostValue>) -> Result<Vec<HostValue>, HostException> + 'static,
    {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    /// Function name used in tracebacks
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(
        &self,
        bridge: &mut Bridge,
        args: Vec<HostValue>,
    ) -> Result<Vec<HostValue>, HostException> {
        (self.func)(bridge, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("name", &self.name).finish()
    }
}

/// Objects stored in the host heap
#[derive(Debug)]
pub enum HostObject {
    /// Plain table
    Table(Table),
    /// Native function
    Function(HostFunction),
    /// Bridge-owned wrapper anchoring a guest value
    Userdata(WrapperId),
}

impl HostObject {
    /// Host type name
    pub fn type_name(&self) -> &'static str {
        match self {
            HostObject::Table(_) => "table",
            HostObject::Function(_) => "function",
            HostObject::Userdata(_) => "userdata",
        }
    }
}

impl Trace for HostObject {
    fn trace(&self, tracer: &mut dyn FnMut(ObjectId)) {
        // Closures do not expose captures; functions keep values alive by
        // rooting them.
        if let HostObject::Table(table) = self {
            table.trace(tracer);
        }
    }
}

/// The host runtime state
pub struct HostRuntime {
    heap: Heap<HostObject>,
    frames: Vec<String>,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self {
            heap: Heap::new("host"),
            frames: Vec::new(),
        }
    }

    /// Allocate an empty table
    pub fn new_table(&mut self) -> HostRef {
        HostRef(self.heap.allocate(HostObject::Table(Table::new())))
    }

    /// Allocate a table populated with `entries`
    pub fn new_table_from<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> HostRef
    where
        K: Into<TableKey>,
        V: Into<HostValue>,
    {
        let mut table = Table::new();
        for (k, v) in entries {
            // Fresh tables are never frozen
            let _ = table.set(k.into(), v.into());
        }
        HostRef(self.heap.allocate(HostObject::Table(table)))
    }

    /// Allocate a native function
    pub fn new_function<F>(&mut self, name: &str, func: F) -> HostRef
    where
        F: Fn(&mut Bridge, Vec<HostValue>) -> Result<Vec<HostValue>, HostException> + 'static,
    {
        HostRef(
            self.heap
                .allocate(HostObject::Function(HostFunction::new(name, func))),
        )
    }

    pub(crate) fn new_userdata(&mut self, wrapper: WrapperId) -> HostRef {
        HostRef(self.heap.allocate(HostObject::Userdata(wrapper)))
    }

    /// Borrow an object
    pub fn object(&self, r: HostRef) -> Option<&HostObject> {
        self.heap.get(r.0)
    }

    /// Borrow a table
    pub fn table(&self, r: HostRef) -> Option<&Table> {
        match self.heap.get(r.0) {
            Some(HostObject::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Mutably borrow a table
    pub fn table_mut(&mut self, r: HostRef) -> Option<&mut Table> {
        match self.heap.get_mut(r.0) {
            Some(HostObject::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Wrapper id of a bridge userdata
    pub fn userdata(&self, r: HostRef) -> Option<WrapperId> {
        match self.heap.get(r.0) {
            Some(HostObject::Userdata(w)) => Some(*w),
            _ => None,
        }
    }

    /// Whether `r` still names a live object
    pub fn is_alive(&self, r: HostRef) -> bool {
        self.heap.contains(r.0)
    }

    /// Host type name of a value
    pub fn type_name(&self, value: &HostValue) -> &'static str {
        match value {
            HostValue::Nil => "nil",
            HostValue::Boolean(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Object(r) => self.object(*r).map_or("nil", HostObject::type_name),
        }
    }

    /// Raw table read, bypassing bridge dispatch
    pub fn raw_get(&self, table: HostRef, key: &HostValue) -> Result<HostValue, HostException> {
        let t = self
            .table(table)
            .ok_or_else(|| HostException::new("bad argument (table expected)"))?;
        Ok(TableKey::from_value(key).map_or(HostValue::Nil, |k| t.get(&k)))
    }

    /// Raw table write, bypassing bridge dispatch
    pub fn raw_set(
        &mut self,
        table: HostRef,
        key: &HostValue,
        value: HostValue,
    ) -> Result<(), HostException> {
        let key = match TableKey::from_value(key) {
            Some(k) => k,
            None if key.is_nil() => return Err(HostException::new("table index is nil")),
            None => return Err(HostException::new("table index is NaN")),
        };
        let t = self
            .table_mut(table)
            .ok_or_else(|| HostException::new("bad argument (table expected)"))?;
        t.set(key, value).map_err(HostException::new)
    }

    /// Root a value held by embedding code
    pub fn root(&mut self, value: &HostValue) {
        if let HostValue::Object(r) = value {
            if self.heap.contains(r.0) {
                self.heap.pin(r.0);
            }
        }
    }

    /// Drop a root added by [`HostRuntime::root`]
    pub fn unroot(&mut self, value: &HostValue) {
        if let HostValue::Object(r) = value {
            if self.heap.contains(r.0) {
                self.heap.unpin(r.0);
            }
        }
    }

    /// Run the host collector. Finalization events are returned, not run.
    pub fn collect(&mut self) -> Collection {
        self.heap.collect()
    }

    /// Live object count
    pub fn object_count(&self) -> usize {
        self.heap.len()
    }

    /// Collector counters
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Build a traceback of the active host frames
    pub fn traceback(&self, message: &str) -> String {
        let mut out = String::from(message);
        out.push_str("\nstack traceback:");
        for frame in self.frames.iter().rev() {
            out.push_str(&format!("\n\t[host]: in function '{}'", frame));
        }
        if self.frames.is_empty() {
            out.push_str("\n\t[host]: in main chunk");
        }
        out
    }

    pub(crate) fn heap(&self) -> &Heap<HostObject> {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap<HostObject> {
        &mut self.heap
    }

    pub(crate) fn push_frame(&mut self, name: &str) {
        self.frames.push(name.to_string());
    }

    pub(crate) fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Active call depth
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }
}
