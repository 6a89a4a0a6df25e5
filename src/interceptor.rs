//! Property access dispatch for guest objects.
//!
//! Most objects keep their properties in native guest storage. Host proxies
//! and sandbox globals trap every property operation and forward it to the
//! host object they front. Errors raised by the host during a trapped access
//! surface as guest exceptions.

use crate::bridge::Bridge;
use crate::codec::{property_to_host_key, table_key_to_property};
use crate::error::{GuestException, HostException};
use crate::guest::{GuestRef, GuestValue, ObjectClass, PropertyKey};
use crate::host::{HostObject, HostRef, HostValue};

/// The four property operations of a guest object
pub trait PropertyInterceptor {
    /// Read a property
    fn get(&self, bridge: &mut Bridge, key: &PropertyKey) -> Result<GuestValue, GuestException>;

    /// Write a property
    fn set(
        &self,
        bridge: &mut Bridge,
        key: &PropertyKey,
        value: GuestValue,
    ) -> Result<(), GuestException>;

    /// Delete a property, reporting whether it was handled
    fn delete(&self, bridge: &mut Bridge, key: &PropertyKey) -> Result<bool, GuestException>;

    /// List own enumerable keys
    fn enumerate(&self, bridge: &mut Bridge) -> Result<Vec<PropertyKey>, GuestException>;
}

/// Ordinary guest storage
#[derive(Debug, Clone, Copy)]
pub struct NativeProperties {
    object: GuestRef,
}

impl PropertyInterceptor for NativeProperties {
    fn get(&self, bridge: &mut Bridge, key: &PropertyKey) -> Result<GuestValue, GuestException> {
        Ok(bridge.guest.get_own(self.object, key))
    }

    fn set(
        &self,
        bridge: &mut Bridge,
        key: &PropertyKey,
        value: GuestValue,
    ) -> Result<(), GuestException> {
        bridge.guest.set_own(self.object, key.clone(), value);
        Ok(())
    }

    fn delete(&self, bridge: &mut Bridge, key: &PropertyKey) -> Result<bool, GuestException> {
        bridge.guest.delete_own(self.object, key);
        Ok(true)
    }

    fn enumerate(&self, bridge: &mut Bridge) -> Result<Vec<PropertyKey>, GuestException> {
        Ok(bridge.guest.own_keys(self.object))
    }
}

/// Traps forwarding to a host table (or failing like the host would for
/// other host objects)
#[derive(Debug, Clone, Copy)]
pub struct HostObjectInterceptor {
    target: HostRef,
}

impl HostObjectInterceptor {
    /// Interceptor forwarding to `target`
    pub fn new(target: HostRef) -> Self {
        Self { target }
    }
}

impl PropertyInterceptor for HostObjectInterceptor {
    fn get(&self, bridge: &mut Bridge, key: &PropertyKey) -> Result<GuestValue, GuestException> {
        match bridge.host_get(self.target, &property_to_host_key(key)) {
            Ok(value) => Ok(bridge.to_guest(&value)),
            Err(err) => Err(bridge.host_exception_to_guest(err)),
        }
    }

    fn set(
        &self,
        bridge: &mut Bridge,
        key: &PropertyKey,
        value: GuestValue,
    ) -> Result<(), GuestException> {
        let value = bridge.to_host(&value);
        bridge
            .host_set(self.target, &property_to_host_key(key), value)
            .map_err(|err| bridge.host_exception_to_guest(err))
    }

    fn delete(&self, bridge: &mut Bridge, key: &PropertyKey) -> Result<bool, GuestException> {
        bridge
            .host_set(self.target, &property_to_host_key(key), HostValue::Nil)
            .map(|_| true)
            .map_err(|err| bridge.host_exception_to_guest(err))
    }

    fn enumerate(&self, bridge: &mut Bridge) -> Result<Vec<PropertyKey>, GuestException> {
        match bridge.host.table(self.target) {
            Some(table) => Ok(table.keys().map(table_key_to_property).collect()),
            None => {
                let err = bridge.index_error(self.target);
                Err(bridge.host_exception_to_guest(err))
            }
        }
    }
}

impl Bridge {
    /// Property dispatch for a guest object
    pub fn interceptor_for(
        &mut self,
        object: GuestRef,
    ) -> Result<Box<dyn PropertyInterceptor>, GuestException> {
        let forwarded = match self.guest.object(object).map(|o| o.class()) {
            Some(ObjectClass::HostProxy(id)) => Some(*id),
            Some(ObjectClass::Global(data)) if data.sandbox => data.wrapper,
            _ => None,
        };
        let Some(id) = forwarded else {
            return Ok(Box::new(NativeProperties { object }));
        };
        match self.registry.get(id).map(|w| w.host) {
            Some(target) => Ok(Box::new(HostObjectInterceptor::new(target))),
            None => Err(self.guest_error("host object was collected")),
        }
    }

    /// Guest `object[key]`
    pub fn get(
        &mut self,
        object: GuestRef,
        key: impl Into<PropertyKey>,
    ) -> Result<GuestValue, GuestException> {
        let key = key.into();
        let mut scope = self.scope_for(object);
        let interceptor = scope.interceptor_for(object)?;
        interceptor.get(&mut scope, &key)
    }

    /// Guest `object[key] = value`
    pub fn set(
        &mut self,
        object: GuestRef,
        key: impl Into<PropertyKey>,
        value: impl Into<GuestValue>,
    ) -> Result<(), GuestException> {
        let key = key.into();
        let value = value.into();
        let mut scope = self.scope_for(object);
        let interceptor = scope.interceptor_for(object)?;
        interceptor.set(&mut scope, &key, value)
    }

    /// Guest `delete object[key]`
    pub fn delete(
        &mut self,
        object: GuestRef,
        key: impl Into<PropertyKey>,
    ) -> Result<bool, GuestException> {
        let key = key.into();
        let mut scope = self.scope_for(object);
        let interceptor = scope.interceptor_for(object)?;
        interceptor.delete(&mut scope, &key)
    }

    /// Guest own enumerable keys
    pub fn own_keys(&mut self, object: GuestRef) -> Result<Vec<PropertyKey>, GuestException> {
        let mut scope = self.scope_for(object);
        let interceptor = scope.interceptor_for(object)?;
        interceptor.enumerate(&mut scope)
    }

    /// Host `t[k]` on a table or function
    pub(crate) fn host_get(&self, target: HostRef, key: &HostValue) -> Result<HostValue, HostException> {
        match self.host.object(target) {
            Some(HostObject::Table(_)) => self.host.raw_get(target, key),
            _ => Err(self.index_error(target)),
        }
    }

    /// Host `t[k] = v` on a table or function
    pub(crate) fn host_set(
        &mut self,
        target: HostRef,
        key: &HostValue,
        value: HostValue,
    ) -> Result<(), HostException> {
        match self.host.object(target) {
            Some(HostObject::Table(_)) => self.host.raw_set(target, key, value),
            _ => Err(self.index_error(target)),
        }
    }

    pub(crate) fn index_error(&self, target: HostRef) -> HostException {
        let type_name = self.host.type_name(&HostValue::Object(target));
        HostException::new(format!("attempt to index a {} value", type_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    fn bridge() -> Bridge {
        Bridge::open(BridgeConfig::default().with_binding(false)).unwrap()
    }

    #[test]
    fn test_native_properties() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        bridge.set(obj, "a", 1).unwrap();
        assert_eq!(bridge.get(obj, "a").unwrap(), GuestValue::Number(1.0));
        assert_eq!(bridge.own_keys(obj).unwrap(), vec![PropertyKey::from("a")]);
        assert!(bridge.delete(obj, "a").unwrap());
        assert_eq!(bridge.get(obj, "a").unwrap(), GuestValue::Undefined);
    }

    #[test]
    fn test_proxy_traps_forward_to_host_table() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table_from([("x", 1)]);
        let proxy = bridge.wrap_host_object(table);

        assert_eq!(bridge.get(proxy, "x").unwrap(), GuestValue::Number(1.0));
        bridge.set(proxy, 0u32, "zero").unwrap();
        assert_eq!(
            bridge.host().raw_get(table, &0.into()).unwrap(),
            HostValue::from("zero")
        );
        assert_eq!(
            bridge.own_keys(proxy).unwrap(),
            vec![PropertyKey::from("x"), PropertyKey::Index(0)]
        );
    }

    #[test]
    fn test_indexing_function_proxy_throws() {
        let mut bridge = bridge();
        let f = bridge.host_mut().new_function("f", |_, _| Ok(vec![]));
        let proxy = bridge.wrap_host_object(f);

        let err = bridge.get(proxy, "x").unwrap_err();
        assert!(err.message.contains("attempt to index a function value"));
        assert!(bridge.own_keys(proxy).is_err());
        assert_eq!(bridge.scope_depth(), 0);
    }

    #[test]
    fn test_frozen_table_write_throws() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        bridge.host_mut().table_mut(table).unwrap().freeze();
        let proxy = bridge.wrap_host_object(table);

        let err = bridge.set(proxy, "y", 2).unwrap_err();
        assert!(err.message.contains("frozen"));
        assert!(err.value.as_object().is_some());
    }
}
