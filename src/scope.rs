//! Scoped context entry.
//!
//! [`ContextScope`] enters a guest context on creation and exits it on drop,
//! so every exit path (success, error or early return) leaves the context
//! stack as it found it.

use crate::bridge::Bridge;
use crate::guest::GuestRef;
use std::ops::{Deref, DerefMut};

/// RAII guard for an entered guest context.
///
/// Derefs to the bridge so work inside the scope uses the guard directly.
pub struct ContextScope<'b> {
    bridge: &'b mut Bridge,
    context: Option<GuestRef>,
    depth: usize,
}

impl<'b> ContextScope<'b> {
    pub(crate) fn enter(bridge: &'b mut Bridge, context: Option<GuestRef>) -> Self {
        let depth = bridge.guest.scope_depth();
        if let Some(ctx) = context {
            bridge.guest.enter(ctx);
        }
        Self {
            bridge,
            context,
            depth,
        }
    }

    /// Context this scope entered, if any
    pub fn context(&self) -> Option<GuestRef> {
        self.context
    }
}

impl Deref for ContextScope<'_> {
    type Target = Bridge;

    fn deref(&self) -> &Bridge {
        self.bridge
    }
}

impl DerefMut for ContextScope<'_> {
    fn deref_mut(&mut self) -> &mut Bridge {
        self.bridge
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.context {
            self.bridge.guest.exit(ctx);
        }
        debug_assert_eq!(
            self.bridge.guest.scope_depth(),
            self.depth,
            "context scope left entries behind"
        );
    }
}

impl Bridge {
    /// Enter the context owning `handle`, a Context or Sandbox handle.
    pub fn enter_scope(&mut self, handle: &crate::host::HostValue) -> crate::Result<ContextScope<'_>> {
        let global = self.context_global(handle)?;
        Ok(ContextScope::enter(self, Some(global)))
    }

    /// Number of currently entered contexts
    pub fn scope_depth(&self) -> usize {
        self.guest.scope_depth()
    }

    /// Enter the creation context of a guest object
    pub(crate) fn scope_for(&mut self, object: GuestRef) -> ContextScope<'_> {
        let context = self
            .guest
            .object(object)
            .and_then(|o| o.creation_context())
            .filter(|ctx| self.guest.is_alive(*ctx));
        ContextScope::enter(self, context)
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::Bridge;
    use crate::config::BridgeConfig;
    use crate::host::HostValue;

    #[test]
    fn test_scope_restores_depth() {
        let mut bridge = Bridge::open(BridgeConfig::default()).unwrap();
        let ctx = HostValue::Object(bridge.create_context(None).unwrap());
        assert_eq!(bridge.scope_depth(), 0);
        {
            let mut scope = bridge.enter_scope(&ctx).unwrap();
            assert_eq!(scope.scope_depth(), 1);
            let obj = scope.guest_mut().new_object();
            let owner = scope.guest().object(obj).unwrap().creation_context();
            assert_eq!(owner, scope.context());
        }
        assert_eq!(bridge.scope_depth(), 0);
    }

    #[test]
    fn test_enter_scope_rejects_non_context() {
        let mut bridge = Bridge::open(BridgeConfig::default()).unwrap();
        let table = HostValue::Object(bridge.host_mut().new_table());
        assert!(bridge.enter_scope(&table).is_err());
        assert!(bridge.enter_scope(&HostValue::Nil).is_err());
    }
}
