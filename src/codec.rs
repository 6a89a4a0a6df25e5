//! Value conversion between the host runtime and the guest engine.
//!
//! Primitives are copied by value. Objects go through the wrapper layer so
//! that identity survives round trips. Invalid references convert to the
//! absent value instead of failing.

use crate::bridge::Bridge;
use crate::guest::{GuestRef, GuestValue, ObjectClass, PropertyKey};
use crate::host::{format_number, HostObject, HostRef, HostValue, TableKey};
use crate::wrapper::WrapperId;
use tracing::warn;

enum GuestTarget {
    Proxy(WrapperId),
    Global(WrapperId),
    Plain,
}

impl Bridge {
    /// Convert a host value for use in the guest engine
    pub fn to_guest(&mut self, value: &HostValue) -> GuestValue {
        match value {
            HostValue::Nil => GuestValue::Undefined,
            HostValue::Boolean(b) => GuestValue::Boolean(*b),
            HostValue::Number(n) => GuestValue::Number(*n),
            HostValue::String(s) => GuestValue::String(s.clone()),
            HostValue::Object(r) => self.host_object_to_guest(*r),
        }
    }

    fn host_object_to_guest(&mut self, object: HostRef) -> GuestValue {
        let userdata = match self.host.object(object) {
            None => {
                warn!(object = %object, "stale host reference converted to undefined");
                return GuestValue::Undefined;
            }
            Some(HostObject::Userdata(id)) => Some(*id),
            Some(HostObject::Table(_) | HostObject::Function(_)) => None,
        };

        match userdata {
            Some(id) => match self.registry.get(id).map(|w| w.guest) {
                Some(guest) => {
                    self.observe(id);
                    GuestValue::Object(guest)
                }
                None => {
                    warn!(wrapper = %id, "userdata of a collected wrapper converted to undefined");
                    GuestValue::Undefined
                }
            },
            None => GuestValue::Object(self.wrap_host_object(object)),
        }
    }

    /// Convert a guest value for use in the host runtime
    pub fn to_host(&mut self, value: &GuestValue) -> HostValue {
        match value {
            GuestValue::Undefined | GuestValue::Null => HostValue::Nil,
            GuestValue::Boolean(b) => HostValue::Boolean(*b),
            GuestValue::Number(n) => HostValue::Number(*n),
            GuestValue::String(s) => HostValue::String(s.clone()),
            GuestValue::Object(r) => self.guest_object_to_host(*r),
        }
    }

    fn guest_object_to_host(&mut self, object: GuestRef) -> HostValue {
        let target = match self.guest.object(object).map(|o| o.class()) {
            None => {
                warn!(object = %object, "stale guest reference converted to nil");
                return HostValue::Nil;
            }
            Some(ObjectClass::HostProxy(id)) => GuestTarget::Proxy(*id),
            Some(ObjectClass::Global(data)) => match data.wrapper {
                Some(id) => GuestTarget::Global(id),
                None => GuestTarget::Plain,
            },
            Some(_) => GuestTarget::Plain,
        };

        match target {
            GuestTarget::Proxy(id) | GuestTarget::Global(id) => {
                match self.registry.get(id).map(|w| w.host) {
                    Some(host) => {
                        self.observe(id);
                        HostValue::Object(host)
                    }
                    None => {
                        warn!(wrapper = %id, "proxy of a collected host object converted to nil");
                        HostValue::Nil
                    }
                }
            }
            GuestTarget::Plain => HostValue::Object(self.wrap_guest_object(object)),
        }
    }

    /// Convert a list of host values
    pub fn to_guest_all(&mut self, values: &[HostValue]) -> Vec<GuestValue> {
        values.iter().map(|v| self.to_guest(v)).collect()
    }

    /// Convert a list of guest values
    pub fn to_host_all(&mut self, values: &[GuestValue]) -> Vec<HostValue> {
        values.iter().map(|v| self.to_host(v)).collect()
    }
}

/// Host key to guest property key: non-negative integers index, everything
/// else is named by its string form.
pub fn host_key_to_property(key: &HostValue) -> PropertyKey {
    match key {
        HostValue::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 => {
            PropertyKey::Index(*n as u32)
        }
        HostValue::Number(n) => PropertyKey::canonical(&format_number(*n)),
        HostValue::String(s) => PropertyKey::canonical(s),
        HostValue::Boolean(b) => PropertyKey::Name(b.to_string()),
        HostValue::Nil => PropertyKey::Name("nil".to_string()),
        HostValue::Object(r) => PropertyKey::Name(r.to_string()),
    }
}

/// Guest property key to host key
pub fn property_to_host_key(key: &PropertyKey) -> HostValue {
    match key {
        PropertyKey::Index(i) => HostValue::Number(*i as f64),
        PropertyKey::Name(n) => HostValue::String(n.clone()),
    }
}

/// Host table key to guest property key
pub fn table_key_to_property(key: &TableKey) -> PropertyKey {
    host_key_to_property(&key.to_value())
}
