//! Context construction from guest code.
//!
//! `context(init?)` and `sandbox(init?)` mint new execution scopes and return
//! their global objects. The host handle minted alongside is unreferenced;
//! the wrapper stays alive through finalizer resurrection for as long as the
//! guest keeps the global.

use crate::bridge::Bridge;
use crate::codec::property_to_host_key;
use crate::error::{GuestException, RuntimeError};
use crate::guest::{GuestFunction, GuestRef, GuestValue, ObjectClass};
use crate::host::{HostRef, HostValue};

fn runtime_error_to_guest(bridge: &mut Bridge, err: RuntimeError) -> GuestException {
    match err {
        RuntimeError::Guest(exc) => exc,
        RuntimeError::Host(exc) => bridge.host_exception_to_guest(exc),
        other => bridge.guest_error(&other.to_string()),
    }
}

fn global_of(bridge: &mut Bridge, handle: HostRef) -> Result<GuestValue, GuestException> {
    match bridge.context_global(&HostValue::Object(handle)) {
        Ok(global) => Ok(GuestValue::Object(global)),
        Err(err) => Err(runtime_error_to_guest(bridge, err)),
    }
}

/// `context(init?)`: a fresh context seeded from `init`'s own properties
fn new_context(bridge: &mut Bridge, args: Vec<GuestValue>) -> Result<GuestValue, GuestException> {
    let init = match args.into_iter().next() {
        Some(init @ GuestValue::Object(_)) => Some(bridge.to_host(&init)),
        _ => None,
    };
    let handle = bridge
        .create_context(init.as_ref())
        .map_err(|err| runtime_error_to_guest(bridge, err))?;
    global_of(bridge, handle)
}

/// `sandbox(init?)`: a sandbox over a fresh host table seeded from `init`
fn new_sandbox(bridge: &mut Bridge, args: Vec<GuestValue>) -> Result<GuestValue, GuestException> {
    let table = bridge.host.new_table();
    if let Some(GuestValue::Object(source)) = args.into_iter().next() {
        for key in bridge.own_keys(source)? {
            let value = bridge.get(source, key.clone())?;
            let value = bridge.to_host(&value);
            bridge
                .host
                .raw_set(table, &property_to_host_key(&key), value)
                .map_err(|err| bridge.host_exception_to_guest(err))?;
        }
    }
    let handle = bridge
        .create_sandbox(table)
        .map_err(|err| runtime_error_to_guest(bridge, err))?;
    global_of(bridge, handle)
}

/// Add `context` and `sandbox` to `binding`.
pub(crate) fn install(bridge: &mut Bridge, binding: GuestRef, global: GuestRef) {
    let context = GuestFunction::new("context", |bridge, _this, args| new_context(bridge, args));
    let sandbox = GuestFunction::new("sandbox", |bridge, _this, args| new_sandbox(bridge, args));
    for (name, func) in [("context", context), ("sandbox", sandbox)] {
        let func = bridge
            .guest
            .allocate_in(ObjectClass::Function(func), Some(global));
        bridge
            .guest
            .set_own(binding, name.into(), GuestValue::Object(func));
    }
}
