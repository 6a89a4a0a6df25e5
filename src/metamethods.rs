//! Host-side operations on bridged guest values.
//!
//! Host code indexes, calls, measures and iterates bridged guest objects
//! through these entry points. Plain host values get the host's own
//! behavior, so callers can use them on any value.

use crate::bridge::Bridge;
use crate::codec::{host_key_to_property, property_to_host_key};
use crate::error::HostException;
use crate::guest::{GuestRef, GuestValue};
use crate::host::{format_number, HostObject, HostValue, TableKey};
use crate::wrapper::{WrapperId, WrapperKind};

impl Bridge {
    /// Wrapper and guest object behind a bridge userdata
    fn bridged_guest(&self, value: &HostValue) -> Option<(WrapperId, GuestRef)> {
        let id = self.host.userdata(value.as_object()?)?;
        self.registry.get(id).map(|w| (id, w.guest))
    }

    /// Host `object[key]`
    pub fn host_index(
        &mut self,
        object: &HostValue,
        key: &HostValue,
    ) -> Result<HostValue, HostException> {
        if let Some((_, guest)) = self.bridged_guest(object) {
            return match self.get(guest, host_key_to_property(key)) {
                Ok(value) => Ok(self.to_host(&value)),
                Err(exc) => Err(self.guest_exception_to_host(exc)),
            };
        }
        match object {
            HostValue::Object(r) => self.host_get(*r, key),
            other => Err(HostException::new(format!(
                "attempt to index a {} value",
                self.host.type_name(other)
            ))),
        }
    }

    /// Host `object[key] = value`
    pub fn host_set_index(
        &mut self,
        object: &HostValue,
        key: &HostValue,
        value: HostValue,
    ) -> Result<(), HostException> {
        if let Some((_, guest)) = self.bridged_guest(object) {
            let value = self.to_guest(&value);
            return self
                .set(guest, host_key_to_property(key), value)
                .map_err(|exc| self.guest_exception_to_host(exc));
        }
        match object {
            HostValue::Object(r) => self.host_set(*r, key, value),
            other => Err(HostException::new(format!(
                "attempt to index a {} value",
                self.host.type_name(other)
            ))),
        }
    }

    /// Host `callee(...)`
    pub fn host_call(
        &mut self,
        callee: &HostValue,
        args: &[HostValue],
    ) -> Result<Vec<HostValue>, HostException> {
        if let Some((_, guest)) = self.bridged_guest(callee) {
            return self
                .call_guest_from_host(guest, None, args)
                .map(|value| vec![value]);
        }
        match callee {
            HostValue::Object(r) if matches!(self.host.object(*r), Some(HostObject::Function(_))) => {
                self.invoke_host(*r, args.to_vec())
            }
            other => Err(self.call_error(other)),
        }
    }

    /// Host `#value`
    pub fn host_len(&mut self, value: &HostValue) -> Result<HostValue, HostException> {
        if let Some((_, guest)) = self.bridged_guest(value) {
            return match self.get(guest, "length") {
                Ok(length) => Ok(self.to_host(&length)),
                Err(exc) => Err(self.guest_exception_to_host(exc)),
            };
        }
        match value {
            HostValue::String(s) => Ok(HostValue::Number(s.len() as f64)),
            HostValue::Object(r) => match self.host.table(*r) {
                Some(table) => Ok(HostValue::Number(table.border() as f64)),
                None => Err(self.length_error(value)),
            },
            other => Err(self.length_error(other)),
        }
    }

    fn length_error(&self, value: &HostValue) -> HostException {
        HostException::new(format!(
            "attempt to get length of a {} value",
            self.host.type_name(value)
        ))
    }

    /// Host `pairs(value)`: every own key with its value
    pub fn host_pairs(
        &mut self,
        value: &HostValue,
    ) -> Result<Vec<(HostValue, HostValue)>, HostException> {
        if let Some((_, guest)) = self.bridged_guest(value) {
            let keys = self
                .own_keys(guest)
                .map_err(|exc| self.guest_exception_to_host(exc))?;
            let mut pairs = Vec::with_capacity(keys.len());
            for key in keys {
                let item = self
                    .get(guest, key.clone())
                    .map_err(|exc| self.guest_exception_to_host(exc))?;
                let item = self.to_host(&item);
                pairs.push((property_to_host_key(&key), item));
            }
            return Ok(pairs);
        }
        match value.as_object().and_then(|r| self.host.table(r)) {
            Some(table) => Ok(table
                .iter()
                .map(|(k, v)| (k.to_value(), v.clone()))
                .collect()),
            None => Err(HostException::new(format!(
                "bad argument #1 to 'pairs' (table expected, got {})",
                self.host.type_name(value)
            ))),
        }
    }

    /// Host `ipairs(value)`: guest arrays from index 0, host tables from 1
    pub fn host_ipairs(
        &mut self,
        value: &HostValue,
    ) -> Result<Vec<(HostValue, HostValue)>, HostException> {
        if let Some((_, guest)) = self.bridged_guest(value) {
            let length = match self.guest.object(guest) {
                Some(obj) if obj.is_array() => obj.array_length(),
                _ => {
                    return Err(HostException::new(
                        "Only guest Array() can be used with ipairs()",
                    ))
                }
            };
            let mut pairs = Vec::with_capacity(length as usize);
            for i in 0..length {
                let item = self
                    .get(guest, i)
                    .map_err(|exc| self.guest_exception_to_host(exc))?;
                let item = self.to_host(&item);
                pairs.push((HostValue::Number(i as f64), item));
            }
            return Ok(pairs);
        }
        match value.as_object().and_then(|r| self.host.table(r)) {
            Some(table) => Ok((1..=table.border() as i64)
                .map(|i| (HostValue::from(i), table.get(&TableKey::Integer(i))))
                .collect()),
            None => Err(HostException::new(format!(
                "bad argument #1 to 'ipairs' (table expected, got {})",
                self.host.type_name(value)
            ))),
        }
    }

    /// Host `tostring(value)`
    pub fn host_tostring(&self, value: &HostValue) -> String {
        if let Some((id, guest)) = self.bridged_guest(value) {
            return self.describe_guest(id, guest);
        }
        match value {
            HostValue::Nil => "nil".to_string(),
            HostValue::Boolean(b) => b.to_string(),
            HostValue::Number(n) => format_number(*n),
            HostValue::String(s) => s.clone(),
            HostValue::Object(r) => format!("{}: {}", self.host.type_name(value), r),
        }
    }

    fn describe_guest(&self, id: WrapperId, guest: GuestRef) -> String {
        let kind = self.registry.get(id).map(|w| w.kind);
        match kind {
            Some(WrapperKind::Context) => format!("guest<*context>: {}", guest),
            Some(WrapperKind::Sandbox) => format!("guest<*sandbox>: {}", guest),
            _ => {
                let Some(obj) = self.guest.object(guest) else {
                    return format!("guest<?>: {}", guest);
                };
                if obj.is_error() {
                    if let GuestValue::String(traceback) =
                        self.guest.get_own(guest, &"traceback".into())
                    {
                        return traceback;
                    }
                }
                format!("guest<{}>: {}", obj.constructor_name(), guest)
            }
        }
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
    fn test_index_and_set_index_on_guest_object() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        let value = bridge.to_host(&GuestValue::Object(obj));

        bridge.host_set_index(&value, &"k".into(), "v".into()).unwrap();
        assert_eq!(
            bridge.host_index(&value, &"k".into()).unwrap(),
            HostValue::from("v")
        );
        assert_eq!(bridge.guest().get_own(obj, &"k".into()), GuestValue::from("v"));
    }

    #[test]
    fn test_index_errors() {
        let mut bridge = bridge();
        let err = bridge.host_index(&HostValue::Nil, &"k".into()).unwrap_err();
        assert_eq!(err.message, "attempt to index a nil value");

        let f = HostValue::Object(bridge.host_mut().new_function("f", |_, _| Ok(vec![])));
        let err = bridge.host_index(&f, &"k".into()).unwrap_err();
        assert_eq!(err.message, "attempt to index a function value");
    }

    #[test]
    fn test_len_and_ipairs_on_array() {
        let mut bridge = bridge();
        let array = bridge.guest_mut().new_array(vec!["a".into(), "b".into()]);
        let value = bridge.to_host(&GuestValue::Object(array));

        assert_eq!(bridge.host_len(&value).unwrap(), HostValue::Number(2.0));
        assert_eq!(
            bridge.host_ipairs(&value).unwrap(),
            vec![
                (HostValue::Number(0.0), HostValue::from("a")),
                (HostValue::Number(1.0), HostValue::from("b")),
            ]
        );
    }

    #[test]
    fn test_ipairs_rejects_non_arrays() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        let value = bridge.to_host(&GuestValue::Object(obj));
        let err = bridge.host_ipairs(&value).unwrap_err();
        assert_eq!(err.message, "Only guest Array() can be used with ipairs()");
    }

    #[test]
    fn test_pairs_lists_own_properties() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        bridge.guest_mut().set_own(obj, "a".into(), 1.into());
        bridge.guest_mut().set_own(obj, "b".into(), true.into());
        let value = bridge.to_host(&GuestValue::Object(obj));

        assert_eq!(
            bridge.host_pairs(&value).unwrap(),
            vec![
                (HostValue::from("a"), HostValue::Number(1.0)),
                (HostValue::from("b"), HostValue::Boolean(true)),
            ]
        );
    }

    #[test]
    fn test_host_call_on_guest_function() {
        let mut bridge = bridge();
        let add = bridge.guest_mut().new_function("add", |_, _, args| {
            let sum: f64 = args.iter().filter_map(GuestValue::as_number).sum();
            Ok(GuestValue::Number(sum))
        });
        let value = bridge.to_host(&GuestValue::Object(add));

        let results = bridge.host_call(&value, &[1.into(), 2.into()]).unwrap();
        assert_eq!(results, vec![HostValue::Number(3.0)]);

        let err = bridge.host_call(&HostValue::from(1), &[]).unwrap_err();
        assert_eq!(err.message, "attempt to call a number value");
    }

    #[test]
    fn test_tostring() {
        let mut bridge = bridge();
        let array = bridge.guest_mut().new_array(vec![]);
        let value = bridge.to_host(&GuestValue::Object(array));
        assert!(bridge.host_tostring(&value).starts_with("guest<Array>: "));

        let ctx = HostValue::Object(bridge.create_context(None).unwrap());
        assert!(bridge.host_tostring(&ctx).starts_with("guest<*context>: "));

        let table = bridge.host_mut().new_table();
        let sandbox = HostValue::Object(bridge.create_sandbox(table).unwrap());
        assert!(bridge.host_tostring(&sandbox).starts_with("guest<*sandbox>: "));

        assert_eq!(bridge.host_tostring(&HostValue::Number(2.0)), "2");
    }
}
