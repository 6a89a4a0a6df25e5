//! The flat function table exposed to guest code.
//!
//! Every context global gets one namespace object (named by
//! `BridgeConfig::binding_name`) holding the registered native functions,
//! a handful of process constants, and the bridge-core `context` and
//! `sandbox` constructors. Native functions report failure with negative
//! error codes; the trampoline turns those into guest exceptions carrying
//! `errcode`, `errsym` and `syscall`.

pub mod env;
pub mod logging;
pub mod vm;

use crate::bridge::Bridge;
use crate::error::{error_codes, GuestException};
use crate::guest::{GuestEngine, GuestFunction, GuestRef, GuestValue, ObjectClass};
use indexmap::IndexMap;
use std::rc::Rc;

/// Result type for flat table functions
pub type HostResult<T> = std::result::Result<T, i32>;

/// Signature of a flat table function
pub type NativeFn = dyn Fn(&mut GuestEngine, &[GuestValue]) -> HostResult<GuestValue>;

/// Named native functions installed into each new context
#[derive(Clone, Default)]
pub struct FlatFunctionTable {
    functions: IndexMap<String, Rc<NativeFn>>,
}

impl FlatFunctionTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in functions
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register("getcwd", env::getcwd);
        table.register("log", logging::log);
        table.register("now", logging::now);
        table
    }

    /// Register (or replace) a function
    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&mut GuestEngine, &[GuestValue]) -> HostResult<GuestValue> + 'static,
    {
        self.functions.insert(name.into(), Rc::new(func));
    }

    /// Look up a function
    pub fn get(&self, name: &str) -> Option<Rc<NativeFn>> {
        self.functions.get(name).cloned()
    }

    /// Call a function directly, without the guest trampoline
    pub fn call(
        &self,
        name: &str,
        engine: &mut GuestEngine,
        args: &[GuestValue],
    ) -> HostResult<GuestValue> {
        let func = self.get(name).ok_or(error_codes::NOT_FOUND)?;
        func(engine, args)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FlatFunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

/// Guest exception for a failed flat table call
fn syscall_error(bridge: &mut Bridge, syscall: &str, code: i32) -> GuestException {
    let errsym = error_codes::symbol(code);
    let message = format!("{}, {}", errsym, syscall);
    let exception = bridge.guest_error(&message);
    if let Some(error) = exception.value.as_object() {
        bridge
            .guest
            .set_own(error, "errcode".into(), GuestValue::Number(code as f64));
        bridge.guest.set_own(error, "errsym".into(), errsym.into());
        bridge.guest.set_own(error, "syscall".into(), syscall.into());
    }
    exception
}

/// Build the namespace object and attach it to `global`.
pub(crate) fn install(bridge: &mut Bridge, global: GuestRef) {
    let binding = bridge.guest.allocate_in(ObjectClass::Plain, Some(global));

    let entries: Vec<(String, Rc<NativeFn>)> = bridge
        .natives
        .functions
        .iter()
        .map(|(name, func)| (name.clone(), Rc::clone(func)))
        .collect();

    for (name, func) in entries {
        let syscall = name.clone();
        let trampoline = GuestFunction::new(&name, move |bridge, _this, args| {
            bridge.metrics.record_native_call(&syscall);
            func(&mut bridge.guest, &args).map_err(|code| syscall_error(bridge, &syscall, code))
        });
        let trampoline = bridge
            .guest
            .allocate_in(ObjectClass::Function(trampoline), Some(global));
        bridge
            .guest
            .set_own(binding, name.into(), GuestValue::Object(trampoline));
    }

    env::install(&mut bridge.guest, binding, global);
    vm::install(bridge, binding, global);

    let name = bridge.config.binding_name.clone();
    bridge
        .guest
        .set_own(global, name.into(), GuestValue::Object(binding));
}
