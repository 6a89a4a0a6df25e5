//! The bridge: runtimes, wrapper bookkeeping and the module surface.
//!
//! [`Bridge::open`] plays the part of the host module loader's entry point:
//! it builds a default context and the module table host code calls into
//! (`newContext`, `newSandbox`, `newInstance`, `setEngineFlags`, `forceGC`).
//! [`Bridge::close`] releases what `open` retained.

use crate::codec::table_key_to_property;
use crate::config::{set_engine_flags, BridgeConfig};
use crate::error::{HostException, Result, RuntimeError};
use crate::guest::{GuestEngine, GuestRef, ObjectClass};
use crate::host::{HostObject, HostRef, HostRuntime, HostValue};
use crate::host_functions::{self, FlatFunctionTable};
use crate::lifecycle::FinalizerEvent;
use crate::metrics::BridgeMetrics;
use crate::reftable::ReferenceTable;
use crate::scope::ContextScope;
use crate::wrapper::{BridgedObject, LifecycleState, WrapperId, WrapperKind, WrapperRegistry};
use std::collections::VecDeque;
use tracing::{debug, info};

/// A bridge between one host runtime and one guest engine
pub struct Bridge {
    pub(crate) config: BridgeConfig,
    pub(crate) host: HostRuntime,
    pub(crate) guest: GuestEngine,
    pub(crate) registry: WrapperRegistry,
    pub(crate) refs: ReferenceTable,
    pub(crate) pending: VecDeque<FinalizerEvent>,
    pub(crate) metrics: BridgeMetrics,
    pub(crate) natives: FlatFunctionTable,
    default_context: Option<HostRef>,
    module: Option<HostRef>,
    closed: bool,
}

impl Bridge {
    /// Open the bridge with the default flat function table
    pub fn open(config: BridgeConfig) -> Result<Self> {
        Self::open_with_natives(config, FlatFunctionTable::with_defaults())
    }

    /// Open the bridge with a custom flat function table
    pub fn open_with_natives(config: BridgeConfig, natives: FlatFunctionTable) -> Result<Self> {
        config.validate()?;
        for flags in &config.engine_flags {
            set_engine_flags(flags)?;
        }

        let mut bridge = Self {
            config,
            host: HostRuntime::new(),
            guest: GuestEngine::new(),
            registry: WrapperRegistry::new(),
            refs: ReferenceTable::new(),
            pending: VecDeque::new(),
            metrics: BridgeMetrics::new(),
            natives,
            default_context: None,
            module: None,
            closed: false,
        };

        let context = bridge.create_context(None)?;
        bridge.host.root(&HostValue::Object(context));
        bridge.default_context = Some(context);

        let module = bridge.build_module();
        bridge.host.root(&HostValue::Object(module));
        bridge.module = Some(module);

        info!(
            identity_cache = bridge.config.identity_cache,
            binding = bridge.config.install_binding,
            natives = bridge.natives.len(),
            "bridge opened"
        );
        Ok(bridge)
    }

    /// Release the module table and the default context.
    ///
    /// Surface calls made afterwards fail with [`RuntimeError::Closed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(module) = self.module.take() {
            self.host.unroot(&HostValue::Object(module));
        }
        if let Some(context) = self.default_context.take() {
            self.host.unroot(&HostValue::Object(context));
        }
        self.closed = true;
        info!(wrappers = self.registry.len(), "bridge closed");
    }

    /// Whether [`Bridge::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(RuntimeError::Closed)
        } else {
            Ok(())
        }
    }

    /// The module table exposed to host code
    pub fn module(&self) -> Result<HostRef> {
        self.module.ok_or(RuntimeError::Closed)
    }

    /// Handle of the context used when no scope is entered
    pub fn default_context(&self) -> Option<HostRef> {
        self.default_context
    }

    /// Global of the innermost entered context, or of the default context
    pub fn current_global(&self) -> Option<GuestRef> {
        self.guest.current_context().or_else(|| {
            self.default_context
                .and_then(|handle| self.host.userdata(handle))
                .and_then(|id| self.registry.get(id))
                .map(|w| w.guest)
        })
    }

    /// Create a context, optionally seeded from a host table or a bridged
    /// guest object (shallow copy of own enumerable properties).
    ///
    /// Returns the Context handle.
    pub fn create_context(&mut self, init: Option<&HostValue>) -> Result<HostRef> {
        self.ensure_open()?;
        let global = self.guest.new_context(false);
        self.guest.root(&global.into());
        let seeded = {
            let mut scope = ContextScope::enter(self, Some(global));
            let seeded = scope.seed_global(global, init);
            if seeded.is_ok() && scope.config.install_binding {
                host_functions::install(&mut scope, global);
            }
            seeded
        };
        self.guest.unroot(&global.into());
        seeded?;

        let id = self.registry.issue();
        let handle = self.host.new_userdata(id);
        self.guest.set_global_wrapper(global, Some(id));
        self.install(BridgedObject::new(
            id,
            WrapperKind::Context,
            global,
            handle,
            None,
        ));
        debug!(wrapper = %id, global = %global, "context created");
        Ok(handle)
    }

    fn seed_global(&mut self, global: GuestRef, init: Option<&HostValue>) -> Result<()> {
        let Some(init) = init else {
            return Ok(());
        };
        match init {
            HostValue::Nil => Ok(()),
            HostValue::Object(r) => match self.host.object(*r) {
                Some(HostObject::Table(table)) => {
                    let entries: Vec<_> = table
                        .iter()
                        .map(|(k, v)| (table_key_to_property(k), v.clone()))
                        .collect();
                    for (key, value) in entries {
                        let value = self.to_guest(&value);
                        self.guest.set_own(global, key, value);
                    }
                    Ok(())
                }
                Some(HostObject::Userdata(id)) => {
                    let source = self
                        .registry
                        .get(*id)
                        .map(|w| w.guest)
                        .ok_or_else(|| RuntimeError::InvalidArgument("initializer was collected".into()))?;
                    for key in self.own_keys(source)? {
                        let value = self.get(source, key.clone())?;
                        self.guest.set_own(global, key, value);
                    }
                    Ok(())
                }
                _ => Err(self.initializer_error(init)),
            },
            other => Err(self.initializer_error(other)),
        }
    }

    fn initializer_error(&self, init: &HostValue) -> RuntimeError {
        RuntimeError::InvalidArgument(format!(
            "context initializer must be a table or a bridged guest object, got {}",
            self.host.type_name(init)
        ))
    }

    /// Create a sandbox whose global forwards every property operation to
    /// `table`. A table that already backs a sandbox returns its handle.
    pub fn create_sandbox(&mut self, table: HostRef) -> Result<HostRef> {
        self.ensure_open()?;
        if !matches!(self.host.object(table), Some(HostObject::Table(_))) {
            return Err(RuntimeError::InvalidArgument(format!(
                "sandbox storage must be a table, got {}",
                self.host.type_name(&HostValue::Object(table))
            )));
        }

        if let Some(id) = self.refs.lookup_by_host(table) {
            let existing = self.registry.get(id).map(|w| (w.kind, w.host_handle()));
            return match existing {
                Some((WrapperKind::Sandbox, handle)) => {
                    self.observe(id);
                    Ok(handle)
                }
                _ => Err(RuntimeError::InvalidArgument(
                    "table is already bridged as a host proxy".into(),
                )),
            };
        }

        let global = self.guest.new_context(true);
        let id = self.registry.issue();
        let handle = self.host.new_userdata(id);
        self.guest.set_global_wrapper(global, Some(id));
        self.install(BridgedObject::new(
            id,
            WrapperKind::Sandbox,
            global,
            table,
            Some(handle),
        ));
        debug!(wrapper = %id, global = %global, "sandbox created");
        Ok(handle)
    }

    /// Global object behind a Context or Sandbox handle
    pub fn context_global(&mut self, handle: &HostValue) -> Result<GuestRef> {
        let wrapper = handle
            .as_object()
            .and_then(|r| self.host.userdata(r))
            .and_then(|id| self.registry.get(id))
            .filter(|w| matches!(w.kind, WrapperKind::Context | WrapperKind::Sandbox))
            .map(|w| (w.id, w.guest));
        match wrapper {
            Some((id, global)) => {
                self.observe(id);
                Ok(global)
            }
            None => Err(RuntimeError::InvalidArgument(format!(
                "expected a context or sandbox, got {}",
                self.host.type_name(handle)
            ))),
        }
    }

    fn build_module(&mut self) -> HostRef {
        let new_context = self.host.new_function("newContext", |bridge, args| {
            let handle = bridge
                .create_context(args.first())
                .map_err(RuntimeError::into_host_exception)?;
            Ok(vec![HostValue::Object(handle)])
        });
        let new_sandbox = self.host.new_function("newSandbox", |bridge, args| {
            let table = match args.first() {
                Some(HostValue::Object(r)) => *r,
                other => {
                    let got = bridge.host.type_name(other.unwrap_or(&HostValue::Nil));
                    return Err(HostException::new(format!(
                        "bad argument #1 to 'newSandbox' (table expected, got {})",
                        got
                    )));
                }
            };
            let handle = bridge
                .create_sandbox(table)
                .map_err(RuntimeError::into_host_exception)?;
            Ok(vec![HostValue::Object(handle)])
        });
        let new_instance = self.host.new_function("newInstance", |bridge, args| {
            let Some((ctor, rest)) = args.split_first() else {
                return Err(HostException::new(
                    "bad argument #1 to 'newInstance' (constructor expected)",
                ));
            };
            bridge
                .new_instance(ctor, rest)
                .map(|v| vec![v])
                .map_err(RuntimeError::into_host_exception)
        });
        let engine_flags = self.host.new_function("setEngineFlags", |bridge, args| {
            bridge
                .ensure_open()
                .map_err(RuntimeError::into_host_exception)?;
            for flag in &args {
                let Some(flag) = flag.as_str() else {
                    return Err(HostException::new("engine flags must be strings"));
                };
                set_engine_flags(flag)
                    .map_err(|e| RuntimeError::from(e).into_host_exception())?;
            }
            Ok(vec![])
        });
        let force_gc = self.host.new_function("forceGC", |bridge, _| {
            bridge
                .ensure_open()
                .map_err(RuntimeError::into_host_exception)?;
            bridge.force_gc();
            Ok(vec![])
        });

        self.host.new_table_from([
            ("newContext", new_context),
            ("newSandbox", new_sandbox),
            ("newInstance", new_instance),
            ("setEngineFlags", engine_flags),
            ("forceGC", force_gc),
        ])
    }

    /// Wrapper bridging a host object, or behind a bridge userdata
    pub fn wrapper_of_host(&self, object: HostRef) -> Option<WrapperId> {
        self.host
            .userdata(object)
            .filter(|id| self.registry.get(*id).is_some())
            .or_else(|| self.refs.lookup_by_host(object))
    }

    /// Wrapper bridging a guest object (proxy, context global or cache)
    pub fn wrapper_of_guest(&self, object: GuestRef) -> Option<WrapperId> {
        match self.guest.object(object).map(|o| o.class()) {
            Some(ObjectClass::HostProxy(id)) => Some(*id).filter(|id| self.registry.get(*id).is_some()),
            Some(ObjectClass::Global(data)) if data.wrapper.is_some() => data.wrapper,
            Some(_) => self.registry.find_guest_cache(object).map(|w| w.id),
            None => None,
        }
    }

    /// Lifecycle state of a wrapper
    pub fn wrapper_state(&self, id: WrapperId) -> LifecycleState {
        self.registry.state(id)
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Host runtime
    pub fn host(&self) -> &HostRuntime {
        &self.host
    }

    /// Host runtime, mutably
    pub fn host_mut(&mut self) -> &mut HostRuntime {
        &mut self.host
    }

    /// Guest engine
    pub fn guest(&self) -> &GuestEngine {
        &self.guest
    }

    /// Guest engine, mutably
    pub fn guest_mut(&mut self) -> &mut GuestEngine {
        &mut self.guest
    }

    /// Live wrappers
    pub fn registry(&self) -> &WrapperRegistry {
        &self.registry
    }

    /// The reference table
    pub fn refs(&self) -> &ReferenceTable {
        &self.refs
    }

    /// Bridge metrics
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Flat function table installed into new contexts
    pub fn natives(&self) -> &FlatFunctionTable {
        &self.natives
    }

    /// Mutable flat function table; changes apply to contexts created later
    pub fn natives_mut(&mut self) -> &mut FlatFunctionTable {
        &mut self.natives
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("wrappers", &self.registry.len())
            .field("refs", &self.refs.len())
            .field("pending_finalizers", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::GuestValue;

    fn bridge() -> Bridge {
        Bridge::open(BridgeConfig::default()).unwrap()
    }

    fn module_fn(bridge: &mut Bridge, name: &str) -> HostValue {
        let module = HostValue::Object(bridge.module().unwrap());
        bridge.host_index(&module, &name.into()).unwrap()
    }

    #[test]
    fn test_open_builds_module_and_default_context() {
        let mut bridge = bridge();
        assert!(bridge.default_context().is_some());
        assert!(bridge.current_global().is_some());
        for name in ["newContext", "newSandbox", "newInstance", "setEngineFlags", "forceGC"] {
            let f = module_fn(&mut bridge, name);
            assert_eq!(bridge.host().type_name(&f), "function");
        }
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let err = Bridge::open(BridgeConfig::default().with_max_gc_passes(0)).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ConfigError);
    }

    #[test]
    fn test_context_seeded_from_table() {
        let mut bridge = bridge();
        let init = bridge.host_mut().new_table_from([("a", 1), ("b", 2)]);
        let handle = bridge.create_context(Some(&init.into())).unwrap();
        let global = bridge.context_global(&handle.into()).unwrap();

        assert_eq!(bridge.get(global, "a").unwrap(), GuestValue::Number(1.0));
        assert_eq!(bridge.get(global, "b").unwrap(), GuestValue::Number(2.0));
        // The copy is shallow and detached
        bridge.host_mut().raw_set(init, &"a".into(), 9.into()).unwrap();
        assert_eq!(bridge.get(global, "a").unwrap(), GuestValue::Number(1.0));
    }

    #[test]
    fn test_seeded_proxies_belong_to_the_new_context() {
        let mut bridge = bridge();
        let inner = bridge.host_mut().new_table();
        let init = bridge
            .host_mut()
            .new_table_from([("t", HostValue::Object(inner))]);
        let handle = bridge.create_context(Some(&init.into())).unwrap();
        let global = bridge.context_global(&handle.into()).unwrap();

        let proxy = bridge.get(global, "t").unwrap().as_object().unwrap();
        let owner = bridge.guest().object(proxy).unwrap().creation_context();
        assert_eq!(owner, Some(global));
        assert_ne!(Some(global), bridge.current_global());
        assert_eq!(bridge.scope_depth(), 0);
    }

    #[test]
    fn test_context_seeded_from_bridged_object() {
        let mut bridge = bridge();
        let source = bridge.guest_mut().new_object();
        bridge.guest_mut().set_own(source, "x".into(), "y".into());
        let init = bridge.to_host(&GuestValue::Object(source));

        let handle = bridge.create_context(Some(&init)).unwrap();
        let global = bridge.context_global(&handle.into()).unwrap();
        assert_eq!(bridge.get(global, "x").unwrap(), GuestValue::from("y"));
    }

    #[test]
    fn test_context_rejects_bad_initializer() {
        let mut bridge = bridge();
        let err = bridge.create_context(Some(&HostValue::from(1))).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_binding_installed_in_contexts() {
        let mut bridge = bridge();
        let handle = bridge.create_context(None).unwrap();
        let global = bridge.context_global(&handle.into()).unwrap();
        let binding = bridge.get(global, "__native").unwrap();
        assert!(binding.as_object().is_some());

        let mut plain = Bridge::open(BridgeConfig::default().with_binding(false)).unwrap();
        let handle = plain.create_context(None).unwrap();
        let global = plain.context_global(&handle.into()).unwrap();
        assert_eq!(plain.get(global, "__native").unwrap(), GuestValue::Undefined);
    }

    #[test]
    fn test_sandbox_over_sandboxed_table_returns_same_handle() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        let first = bridge.create_sandbox(table).unwrap();
        let second = bridge.create_sandbox(table).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sandbox_over_proxied_table_is_rejected() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        bridge.wrap_host_object(table);
        let err = bridge.create_sandbox(table).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidArgument);

        let f = bridge.host_mut().new_function("f", |_, _| Ok(vec![]));
        assert!(bridge.create_sandbox(f).is_err());
    }

    #[test]
    fn test_module_functions() {
        let mut bridge = bridge();
        let new_context = module_fn(&mut bridge, "newContext");
        let ctx = bridge.host_call(&new_context, &[]).unwrap();
        assert_eq!(bridge.host_tostring(&ctx[0]).split(':').next(), Some("guest<*context>"));

        let set_flags = module_fn(&mut bridge, "setEngineFlags");
        bridge
            .host_call(&set_flags, &["--module_fn_flag".into()])
            .unwrap();
        assert!(crate::config::engine_flags().is_enabled("module_fn_flag"));
        assert!(bridge.host_call(&set_flags, &["nope".into()]).is_err());
    }

    #[test]
    fn test_close_disables_surface() {
        let mut bridge = bridge();
        let new_context = module_fn(&mut bridge, "newContext");
        bridge.host_mut().root(&new_context);
        bridge.close();
        assert!(bridge.is_closed());

        assert!(matches!(bridge.module(), Err(RuntimeError::Closed)));
        assert!(matches!(bridge.create_context(None), Err(RuntimeError::Closed)));
        let err = bridge.host_call(&new_context, &[]).unwrap_err();
        assert!(err.message.contains("closed"));
    }

    #[test]
    fn test_close_releases_default_context() {
        let mut bridge = bridge();
        let handle = bridge.default_context().unwrap();
        let id = bridge.wrapper_of_host(handle).unwrap();
        bridge.close();
        bridge.force_gc();
        assert_eq!(bridge.wrapper_state(id), LifecycleState::Collected);
        assert!(bridge.registry().is_empty());
        assert!(bridge.refs().is_empty());
    }
}
