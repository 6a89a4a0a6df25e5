//! Guest engine model.
//!
//! A V8-shaped object engine: plain objects, arrays, native functions,
//! errors, host proxies and context globals in one traced [`Heap`]. Every
//! object remembers the context it was created in, and contexts are entered
//! and exited on an explicit stack. Property access through this type is
//! native storage only; trapped objects are dispatched by the bridge.

pub mod object;
pub mod value;

pub use object::{GlobalData, GuestFn, GuestFunction, GuestObject, ObjectClass};
pub use value::{GuestRef, GuestValue, PropertyKey};

use crate::bridge::Bridge;
use crate::error::GuestException;
use crate::heap::{Collection, Heap, HeapStats};
use crate::wrapper::WrapperId;
use std::rc::Rc;

/// The guest engine state
pub struct GuestEngine {
    heap: Heap<GuestObject>,
    entered: Vec<GuestRef>,
    frames: Vec<String>,
}

impl Default for GuestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self {
            heap: Heap::new("guest"),
            entered: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Allocate a fresh context and return its global object
    pub fn new_context(&mut self, sandbox: bool) -> GuestRef {
        let global = GuestRef(self.heap.allocate(GuestObject::new(
            ObjectClass::Global(GlobalData {
                wrapper: None,
                sandbox,
            }),
            None,
        )));
        if let Some(obj) = self.heap.get_mut(global.0) {
            obj.context = Some(global);
        }
        global
    }

    /// Innermost entered context
    pub fn current_context(&self) -> Option<GuestRef> {
        self.entered.last().copied()
    }

    /// Make `context` current
    pub fn enter(&mut self, context: GuestRef) {
        self.entered.push(context);
    }

    /// Leave `context`, which must be the innermost entered context
    pub fn exit(&mut self, context: GuestRef) {
        assert_eq!(
            self.entered.last(),
            Some(&context),
            "exiting context {context} that is not the innermost scope"
        );
        self.entered.pop();
    }

    /// Number of entered contexts
    pub fn scope_depth(&self) -> usize {
        self.entered.len()
    }

    fn allocate(&mut self, class: ObjectClass) -> GuestRef {
        let context = self.current_context();
        GuestRef(self.heap.allocate(GuestObject::new(class, context)))
    }

    pub(crate) fn allocate_in(&mut self, class: ObjectClass, context: Option<GuestRef>) -> GuestRef {
        GuestRef(self.heap.allocate(GuestObject::new(class, context)))
    }

    /// Allocate an empty object in the current context
    pub fn new_object(&mut self) -> GuestRef {
        self.allocate(ObjectClass::Plain)
    }

    /// Allocate an array holding `values`
    pub fn new_array(&mut self, values: Vec<GuestValue>) -> GuestRef {
        let array = self.allocate(ObjectClass::Array);
        if let Some(obj) = self.heap.get_mut(array.0) {
            for (i, value) in values.into_iter().enumerate() {
                obj.properties.insert(PropertyKey::Index(i as u32), value);
            }
        }
        array
    }

    /// Allocate a native function
    pub fn new_function<F>(&mut self, name: &str, func: F) -> GuestRef
    where
        F: Fn(&mut Bridge, GuestValue, Vec<GuestValue>) -> Result<GuestValue, GuestException>
            + 'static,
    {
        self.allocate(ObjectClass::Function(GuestFunction::new(name, func)))
    }

    /// Allocate an `Error` carrying `message` and the current stack
    pub fn new_error(&mut self, message: &str) -> GuestRef {
        let error = self.allocate(ObjectClass::Error);
        let stack = self.stack_trace(message);
        if let Some(obj) = self.heap.get_mut(error.0) {
            obj.properties
                .insert(PropertyKey::from("name"), GuestValue::from("Error"));
            obj.properties
                .insert(PropertyKey::from("message"), GuestValue::from(message));
            obj.properties
                .insert(PropertyKey::from("stack"), GuestValue::String(stack));
        }
        error
    }

    /// Render a stack description for an error raised now
    pub fn stack_trace(&self, message: &str) -> String {
        let mut out = format!("Error: {}", message);
        for frame in self.frames.iter().rev() {
            out.push_str(&format!("\n    at {}", frame));
        }
        if self.frames.is_empty() {
            out.push_str("\n    at <anonymous>");
        }
        out
    }

    /// Borrow an object
    pub fn object(&self, r: GuestRef) -> Option<&GuestObject> {
        self.heap.get(r.0)
    }

    /// Mutably borrow an object
    pub fn object_mut(&mut self, r: GuestRef) -> Option<&mut GuestObject> {
        self.heap.get_mut(r.0)
    }

    /// Whether `r` still names a live object
    pub fn is_alive(&self, r: GuestRef) -> bool {
        self.heap.contains(r.0)
    }

    /// Native property read. Arrays expose a virtual `length`.
    pub fn get_own(&self, r: GuestRef, key: &PropertyKey) -> GuestValue {
        let Some(obj) = self.object(r) else {
            return GuestValue::Undefined;
        };
        if obj.is_array() && matches!(key, PropertyKey::Name(n) if n == "length") {
            return GuestValue::Number(obj.array_length() as f64);
        }
        obj.properties.get(key).cloned().unwrap_or_default()
    }

    /// Native property write. Assigning an array `length` truncates it.
    pub fn set_own(&mut self, r: GuestRef, key: PropertyKey, value: GuestValue) {
        let Some(obj) = self.object_mut(r) else {
            return;
        };
        if obj.is_array() && matches!(&key, PropertyKey::Name(n) if n == "length") {
            if let Some(len) = value.as_number() {
                let len = len.max(0.0) as u32;
                obj.properties
                    .retain(|k, _| !matches!(k, PropertyKey::Index(i) if *i >= len));
            }
            return;
        }
        obj.properties.insert(key, value);
    }

    /// Native property delete
    pub fn delete_own(&mut self, r: GuestRef, key: &PropertyKey) -> bool {
        self.object_mut(r)
            .map(|obj| obj.properties.shift_remove(key).is_some())
            .unwrap_or(false)
    }

    /// Native own keys, indices first
    pub fn own_keys(&self, r: GuestRef) -> Vec<PropertyKey> {
        self.object(r).map(GuestObject::own_keys).unwrap_or_default()
    }

    /// Record the constructor name of an instance
    pub fn set_constructor_name(&mut self, r: GuestRef, name: &str) {
        if let Some(obj) = self.object_mut(r) {
            obj.constructor = Some(Rc::from(name));
        }
    }

    /// Hidden identity tag
    pub fn identity(&self, r: GuestRef) -> Option<WrapperId> {
        self.object(r).and_then(|obj| obj.identity)
    }

    pub(crate) fn set_identity(&mut self, r: GuestRef, tag: Option<WrapperId>) {
        if let Some(obj) = self.object_mut(r) {
            obj.identity = tag;
        }
    }

    /// Bridge data of a context global
    pub fn global_data(&self, r: GuestRef) -> Option<GlobalData> {
        match self.object(r).map(GuestObject::class) {
            Some(ObjectClass::Global(data)) => Some(*data),
            _ => None,
        }
    }

    pub(crate) fn set_global_wrapper(&mut self, r: GuestRef, wrapper: Option<WrapperId>) {
        if let Some(GuestObject {
            class: ObjectClass::Global(data),
            ..
        }) = self.object_mut(r)
        {
            data.wrapper = wrapper;
        }
    }

    /// Root a value held by embedding code
    pub fn root(&mut self, value: &GuestValue) {
        if let GuestValue::Object(r) = value {
            if self.heap.contains(r.0) {
                self.heap.pin(r.0);
            }
        }
    }

    /// Drop a root added by [`GuestEngine::root`]
    pub fn unroot(&mut self, value: &GuestValue) {
        if let GuestValue::Object(r) = value {
            if self.heap.contains(r.0) {
                self.heap.unpin(r.0);
            }
        }
    }

    /// Run the guest collector. Weak callbacks are returned, not run.
    pub fn collect(&mut self) -> Collection {
        // Entered contexts are on the native stack
        for ctx in &self.entered {
            self.heap.pin(ctx.0);
        }
        let result = self.heap.collect();
        for ctx in &self.entered {
            self.heap.unpin(ctx.0);
        }
        result
    }

    /// Live object count
    pub fn object_count(&self) -> usize {
        self.heap.len()
    }

    /// Collector counters
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub(crate) fn heap(&self) -> &Heap<GuestObject> {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap<GuestObject> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_record_creation_context() {
        let mut guest = GuestEngine::new();
        let ctx = guest.new_context(false);
        guest.enter(ctx);
        let obj = guest.new_object();
        guest.exit(ctx);

        assert_eq!(guest.object(obj).unwrap().creation_context(), Some(ctx));
        assert_eq!(guest.object(ctx).unwrap().creation_context(), Some(ctx));
        assert_eq!(guest.scope_depth(), 0);
    }

    #[test]
    #[should_panic(expected = "not the innermost scope")]
    fn test_exit_out_of_order_panics() {
        let mut guest = GuestEngine::new();
        let a = guest.new_context(false);
        let b = guest.new_context(false);
        guest.enter(a);
        guest.enter(b);
        guest.exit(a);
    }

    #[test]
    fn test_array_length_and_truncation() {
        let mut guest = GuestEngine::new();
        let arr = guest.new_array(vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(guest.get_own(arr, &"length".into()), GuestValue::Number(3.0));

        guest.set_own(arr, "length".into(), 1.into());
        assert_eq!(guest.get_own(arr, &"length".into()), GuestValue::Number(1.0));
        assert_eq!(guest.get_own(arr, &PropertyKey::Index(1)), GuestValue::Undefined);
    }

    #[test]
    fn test_own_keys_order() {
        let mut guest = GuestEngine::new();
        let obj = guest.new_object();
        guest.set_own(obj, "b".into(), 1.into());
        guest.set_own(obj, PropertyKey::Index(2), 1.into());
        guest.set_own(obj, "a".into(), 1.into());
        guest.set_own(obj, PropertyKey::Index(0), 1.into());

        assert_eq!(
            guest.own_keys(obj),
            vec![
                PropertyKey::Index(0),
                PropertyKey::Index(2),
                PropertyKey::from("b"),
                PropertyKey::from("a"),
            ]
        );
        assert!(guest.delete_own(obj, &"b".into()));
        assert!(!guest.delete_own(obj, &"b".into()));
    }

    #[test]
    fn test_error_carries_stack() {
        let mut guest = GuestEngine::new();
        guest.push_frame("thrower");
        let err = guest.new_error("boom");
        guest.pop_frame();

        let stack = guest.get_own(err, &"stack".into());
        assert_eq!(
            stack.as_str(),
            Some("Error: boom\n    at thrower")
        );
        assert!(guest.object(err).unwrap().is_error());
    }

    #[test]
    fn test_context_keeps_alive_while_entered() {
        let mut guest = GuestEngine::new();
        let ctx = guest.new_context(false);
        guest.enter(ctx);
        let obj = guest.new_object();
        guest.root(&GuestValue::Object(obj));
        guest.collect();
        assert!(guest.is_alive(ctx));
        guest.exit(ctx);

        guest.unroot(&GuestValue::Object(obj));
        guest.collect();
        assert_eq!(guest.object_count(), 0);
    }

    #[test]
    fn test_global_wrapper_slot() {
        let mut guest = GuestEngine::new();
        let ctx = guest.new_context(true);
        assert_eq!(
            guest.global_data(ctx),
            Some(GlobalData {
                wrapper: None,
                sandbox: true
            })
        );
        let obj = guest.new_object();
        assert!(guest.global_data(obj).is_none());
    }
}
