//! Cross-runtime calls and exception translation.
//!
//! Calls in either direction enter the callee's creation context, convert
//! and pin the arguments for the duration of the call, and translate an
//! exception exactly once at the crossing.

use crate::bridge::Bridge;
use crate::error::{GuestException, HostException};
use crate::guest::{GuestRef, GuestValue, ObjectClass};
use crate::host::{HostObject, HostRef, HostValue};
use crate::wrapper::{WrapperId, WrapperKind};
use tracing::instrument;

impl Bridge {
    /// Create a guest `Error` and wrap it as a thrown exception
    pub fn guest_error(&mut self, message: &str) -> GuestException {
        let error = self.guest.new_error(message);
        let stack = self.guest.get_own(error, &"stack".into());
        let exception = GuestException::new(GuestValue::Object(error), message);
        match stack {
            GuestValue::String(stack) => exception.with_stack(stack),
            _ => exception,
        }
    }

    /// Translate a host exception into the guest's exception type.
    ///
    /// A bridged guest value travelling back is rethrown as the original
    /// object. A string message becomes a new `Error` carrying the host
    /// traceback as its stack.
    pub fn host_exception_to_guest(&mut self, err: HostException) -> GuestException {
        self.metrics.record_exception();

        if let HostValue::Object(r) = &err.value {
            if self.host.object(*r).is_some() {
                let value = self.to_guest(&err.value);
                let stack = match &value {
                    GuestValue::Object(obj) => self.guest.get_own(*obj, &"stack".into()),
                    _ => GuestValue::Undefined,
                };
                let exception = GuestException::new(value, err.message);
                return match stack {
                    GuestValue::String(stack) => exception.with_stack(stack),
                    _ => exception,
                };
            }
        }

        let traceback = match err.traceback {
            Some(traceback) => traceback,
            None => self.host.traceback(&err.message),
        };
        let error = self.guest.new_error(&err.message);
        self.guest
            .set_own(error, "stack".into(), GuestValue::String(traceback.clone()));
        GuestException::new(GuestValue::Object(error), err.message).with_stack(traceback)
    }

    /// Translate a guest exception into the host's exception type.
    ///
    /// The guest stack is prefixed to the host traceback and recorded on
    /// thrown errors as `traceback`.
    pub fn guest_exception_to_host(&mut self, exc: GuestException) -> HostException {
        self.metrics.record_exception();

        let host_traceback = self.host.traceback(&exc.message);
        let thrown_error = exc
            .value
            .as_object()
            .filter(|obj| self.guest.object(*obj).is_some_and(|o| o.is_error()));

        let guest_stack = match thrown_error {
            Some(obj) => self
                .guest
                .get_own(obj, &"stack".into())
                .as_str()
                .map(str::to_string),
            None => None,
        }
        .or(exc.stack);

        let traceback = match guest_stack {
            Some(stack) => format!("{}\n{}", stack, host_traceback),
            None => host_traceback,
        };
        if let Some(obj) = thrown_error {
            self.guest
                .set_own(obj, "traceback".into(), GuestValue::String(traceback.clone()));
        }

        let value = self.to_host(&exc.value);
        HostException::with_value(value, exc.message).with_traceback(traceback)
    }

    /// Call a guest function
    pub fn call(
        &mut self,
        callee: GuestRef,
        this: GuestValue,
        args: Vec<GuestValue>,
    ) -> Result<GuestValue, GuestException> {
        let class = self.guest.object(callee).map(|o| o.class().clone());
        match class {
            Some(ObjectClass::Function(func)) => {
                let mut scope = self.scope_for(callee);
                scope.guest.root(&this);
                for arg in &args {
                    scope.guest.root(arg);
                }
                scope.guest.push_frame(func.name());

                let result = func.invoke(&mut scope, this.clone(), args.clone());

                scope.guest.pop_frame();
                for arg in &args {
                    scope.guest.unroot(arg);
                }
                scope.guest.unroot(&this);
                result
            }
            Some(ObjectClass::HostProxy(id)) => self.call_host_from_guest(id, args),
            Some(_) => {
                let name = self
                    .guest
                    .object(callee)
                    .map(|o| o.constructor_name().to_string())
                    .unwrap_or_default();
                Err(self.guest_error(&format!("{} is not a function", name)))
            }
            None => Err(self.guest_error("called an object that was collected")),
        }
    }

    /// Guest `new ctor(...args)`: a fresh receiver unless the function
    /// returns an object of its own
    pub fn construct(
        &mut self,
        ctor: GuestRef,
        args: Vec<GuestValue>,
    ) -> Result<GuestValue, GuestException> {
        let class = self.guest.object(ctor).map(|o| o.class().clone());
        match class {
            Some(ObjectClass::Function(func)) => {
                let mut scope = self.scope_for(ctor);
                let receiver = scope.guest.new_object();
                scope.guest.set_constructor_name(receiver, func.name());
                let result = scope.call(ctor, GuestValue::Object(receiver), args)?;
                Ok(match result {
                    GuestValue::Object(_) => result,
                    _ => GuestValue::Object(receiver),
                })
            }
            Some(ObjectClass::HostProxy(id)) => self.call_host_from_guest(id, args),
            _ => Err(self.guest_error("value is not a constructor")),
        }
    }

    /// Invoke the host function behind a guest proxy.
    ///
    /// Host results are packed: none is `undefined`, one is itself, several
    /// become an array.
    #[instrument(level = "trace", skip(self, args), fields(args = args.len()))]
    pub fn call_host_from_guest(
        &mut self,
        proxy: WrapperId,
        args: Vec<GuestValue>,
    ) -> Result<GuestValue, GuestException> {
        let target = self
            .registry
            .get(proxy)
            .filter(|w| w.kind == WrapperKind::HostProxy)
            .map(|w| (w.guest, w.host));
        let Some((guest, host)) = target else {
            return Err(self.guest_error("host object was collected"));
        };
        self.metrics.record_host_call();

        let mut scope = self.scope_for(guest);
        for arg in &args {
            scope.guest.root(arg);
        }
        let host_args = scope.to_host_all(&args);
        for arg in &host_args {
            scope.host.root(arg);
        }

        let outcome = scope.invoke_host(host, host_args.clone());

        for arg in &host_args {
            scope.host.unroot(arg);
        }
        for arg in &args {
            scope.guest.unroot(arg);
        }

        match outcome {
            Ok(results) => Ok(scope.pack_results(&results)),
            Err(err) => Err(scope.host_exception_to_guest(err)),
        }
    }

    /// Call a guest function from host code.
    ///
    /// The receiver defaults to the function itself.
    #[instrument(level = "trace", skip(self, receiver, args), fields(args = args.len()))]
    pub fn call_guest_from_host(
        &mut self,
        func: GuestRef,
        receiver: Option<&HostValue>,
        args: &[HostValue],
    ) -> Result<HostValue, HostException> {
        self.metrics.record_guest_call();
        let mut scope = self.scope_for(func);
        let this = match receiver {
            Some(receiver) => scope.to_guest(receiver),
            None => GuestValue::Object(func),
        };
        let guest_args = scope.to_guest_all(args);
        match scope.call(func, this, guest_args) {
            Ok(value) => Ok(scope.to_host(&value)),
            Err(exc) => Err(scope.guest_exception_to_host(exc)),
        }
    }

    /// Host-side `new`: construct a bridged guest function with host arguments
    pub fn new_instance(
        &mut self,
        ctor: &HostValue,
        args: &[HostValue],
    ) -> crate::Result<HostValue> {
        self.ensure_open()?;
        let callee = match self.to_guest(ctor) {
            GuestValue::Object(r) => r,
            _ => {
                return Err(crate::RuntimeError::InvalidArgument(format!(
                    "cannot construct a {} value",
                    self.host.type_name(ctor)
                )))
            }
        };
        self.metrics.record_guest_call();

        let mut scope = self.scope_for(callee);
        let guest_args = scope.to_guest_all(args);
        match scope.construct(callee, guest_args) {
            Ok(value) => Ok(scope.to_host(&value)),
            Err(exc) => Err(scope.guest_exception_to_host(exc).into()),
        }
    }

    /// Run a host function with a host frame pushed
    pub(crate) fn invoke_host(
        &mut self,
        target: HostRef,
        args: Vec<HostValue>,
    ) -> Result<Vec<HostValue>, HostException> {
        let func = match self.host.object(target) {
            Some(HostObject::Function(func)) => func.clone(),
            _ => return Err(self.call_error(&HostValue::Object(target))),
        };
        self.host.push_frame(func.name());
        let result = func.invoke(self, args).map_err(|err| {
            if err.traceback.is_some() {
                err
            } else {
                let traceback = self.host.traceback(&err.message);
                err.with_traceback(traceback)
            }
        });
        self.host.pop_frame();
        result
    }

    pub(crate) fn call_error(&self, value: &HostValue) -> HostException {
        HostException::new(format!(
            "attempt to call a {} value",
            self.host.type_name(value)
        ))
    }

    fn pack_results(&mut self, results: &[HostValue]) -> GuestValue {
        match results {
            [] => GuestValue::Undefined,
            [single] => self.to_guest(single),
            many => {
                let values = self.to_guest_all(many);
                GuestValue::Object(self.guest.new_array(values))
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
    fn test_host_call_receives_converted_arguments() {
        let mut bridge = bridge();
        let f = bridge.host_mut().new_function("echo", |_, args| {
            assert_eq!(args, vec![HostValue::Number(1.0), HostValue::from("a")]);
            Ok(vec![HostValue::Boolean(true), HostValue::from("ok")])
        });
        let proxy = bridge.wrap_host_object(f);

        let result = bridge
            .call(proxy, GuestValue::Undefined, vec![1.into(), "a".into()])
            .unwrap();
        let array = result.as_object().unwrap();
        assert!(bridge.guest().object(array).unwrap().is_array());
        assert_eq!(bridge.get(array, 0u32).unwrap(), GuestValue::Boolean(true));
        assert_eq!(bridge.get(array, 1u32).unwrap(), GuestValue::from("ok"));
    }

    #[test]
    fn test_result_packing() {
        let mut bridge = bridge();
        let none = bridge.host_mut().new_function("none", |_, _| Ok(vec![]));
        let one = bridge.host_mut().new_function("one", |_, _| Ok(vec![7.into()]));
        let none = bridge.wrap_host_object(none);
        let one = bridge.wrap_host_object(one);

        assert_eq!(
            bridge.call(none, GuestValue::Undefined, vec![]).unwrap(),
            GuestValue::Undefined
        );
        assert_eq!(
            bridge.call(one, GuestValue::Undefined, vec![]).unwrap(),
            GuestValue::Number(7.0)
        );
    }

    #[test]
    fn test_guest_exception_reaches_host_with_traceback() {
        let mut bridge = bridge();
        let thrower = bridge
            .guest_mut()
            .new_function("thrower", |bridge, _, _| Err(bridge.guest_error("boom")));

        let err = bridge.call_guest_from_host(thrower, None, &[]).unwrap_err();
        assert!(err.message.contains("boom"));
        let traceback = err.traceback.unwrap();
        assert!(traceback.starts_with("Error: boom\n    at thrower"));
        assert!(traceback.contains("stack traceback:"));
        assert_eq!(bridge.host_tostring(&err.value), traceback);
    }

    #[test]
    fn test_host_error_becomes_guest_error() {
        let mut bridge = bridge();
        let f = bridge
            .host_mut()
            .new_function("fail", |_, _| Err(HostException::new("bad input")));
        let proxy = bridge.wrap_host_object(f);

        let exc = bridge.call(proxy, GuestValue::Undefined, vec![]).unwrap_err();
        assert_eq!(exc.message, "bad input");
        let error = exc.value.as_object().unwrap();
        assert!(bridge.guest().object(error).unwrap().is_error());
        let stack = exc.stack.unwrap();
        assert!(stack.contains("in function 'fail'"));
    }

    #[test]
    fn test_rethrown_guest_error_is_not_double_wrapped() {
        let mut bridge = bridge();
        let thrower = bridge
            .guest_mut()
            .new_function("thrower", |bridge, _, _| Err(bridge.guest_error("inner")));
        let relay = bridge.host_mut().new_function("relay", move |bridge, _| {
            bridge
                .call_guest_from_host(thrower, None, &[])
                .map(|v| vec![v])
        });
        let relay = bridge.wrap_host_object(relay);

        let exc = bridge.call(relay, GuestValue::Undefined, vec![]).unwrap_err();
        assert_eq!(exc.message, "inner");
        let error = exc.value.as_object().unwrap();
        assert_eq!(
            bridge.guest().get_own(error, &"message".into()),
            GuestValue::from("inner")
        );
        // Only the original error picked up a traceback on its way out
        assert!(bridge
            .guest()
            .get_own(error, &"traceback".into())
            .as_str()
            .is_some());
    }

    #[test]
    fn test_receiver_defaults_to_function() {
        let mut bridge = bridge();
        let f = bridge
            .guest_mut()
            .new_function("self", |_, this, _| Ok(this));
        let result = bridge.call_guest_from_host(f, None, &[]).unwrap();
        assert_eq!(bridge.to_guest(&result), GuestValue::Object(f));

        let receiver = HostValue::from(5);
        let result = bridge.call_guest_from_host(f, Some(&receiver), &[]).unwrap();
        assert_eq!(result, receiver);
    }

    #[test]
    fn test_new_instance() {
        let mut bridge = bridge();
        let point = bridge.guest_mut().new_function("Point", |bridge, this, args| {
            let obj = this.as_object().unwrap();
            bridge.set(obj, "x", args.first().cloned().unwrap_or_default())?;
            Ok(GuestValue::Undefined)
        });
        let ctor = bridge.to_host(&GuestValue::Object(point));

        let instance = bridge.new_instance(&ctor, &[3.into()]).unwrap();
        assert_eq!(
            bridge.host_index(&instance, &"x".into()).unwrap(),
            HostValue::Number(3.0)
        );
        assert!(bridge.host_tostring(&instance).starts_with("guest<Point>: "));
    }

    #[test]
    fn test_calling_non_function_throws() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        let exc = bridge.call(obj, GuestValue::Undefined, vec![]).unwrap_err();
        assert!(exc.message.contains("is not a function"));

        let table = bridge.host_mut().new_table();
        let proxy = bridge.wrap_host_object(table);
        let exc = bridge.call(proxy, GuestValue::Undefined, vec![]).unwrap_err();
        assert!(exc.message.contains("attempt to call a table value"));
    }
}
