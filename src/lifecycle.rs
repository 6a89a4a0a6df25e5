//! Garbage collection coordination between the two runtimes.
//!
//! Every wrapper has a minting-side artifact (the guest proxy for host
//! objects, the host userdata otherwise) and an anchor on the other side.
//! While anchored, the other side is pinned and the minting side carries a
//! finalizer. When that finalizer fires the roles swap: the minting side is
//! pinned again and the other side gets the finalizer, so the object lives
//! until both collectors agree it is dead. Re-observing the wrapper in
//! between swaps the roles back.
//!
//! Collectors only queue finalizer events; they are processed by
//! [`Bridge::run_finalizers`] between bridge operations.

use crate::bridge::Bridge;
use crate::guest::{GuestRef, ObjectClass};
use crate::heap::ObjectId;
use crate::host::HostRef;
use crate::wrapper::{BridgedObject, LifecycleState, WrapperId, WrapperKind};
use tracing::{debug, trace};

/// Runtime a heap object lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Host runtime heap
    Host,
    /// Guest engine heap
    Guest,
}

/// A finalizer that fired during a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizerEvent {
    /// Heap the object lives in
    pub side: Side,
    /// The unreachable object
    pub object: ObjectId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Anchors {
    minted: (Side, ObjectId),
    other: (Side, ObjectId),
}

impl Anchors {
    fn of(wrapper: &BridgedObject) -> Self {
        match wrapper.kind {
            WrapperKind::HostProxy => Anchors {
                minted: (Side::Guest, wrapper.guest.id()),
                other: (Side::Host, wrapper.host.id()),
            },
            WrapperKind::GuestCache | WrapperKind::Context | WrapperKind::Sandbox => Anchors {
                minted: (Side::Host, wrapper.host_handle().id()),
                other: (Side::Guest, wrapper.guest.id()),
            },
        }
    }
}

impl Bridge {
    fn pin_on(&mut self, (side, id): (Side, ObjectId)) {
        match side {
            Side::Host => self.host.heap_mut().pin(id),
            Side::Guest => self.guest.heap_mut().pin(id),
        }
    }

    fn unpin_on(&mut self, (side, id): (Side, ObjectId)) {
        match side {
            Side::Host => self.host.heap_mut().unpin(id),
            Side::Guest => self.guest.heap_mut().unpin(id),
        }
    }

    fn arm_on(&mut self, (side, id): (Side, ObjectId)) {
        match side {
            Side::Host => self.host.heap_mut().arm_finalizer(id),
            Side::Guest => self.guest.heap_mut().arm_finalizer(id),
        }
    }

    fn settle_on(&mut self, (side, id): (Side, ObjectId)) {
        match side {
            Side::Host => self.host.heap_mut().settle(id),
            Side::Guest => self.guest.heap_mut().settle(id),
        }
    }

    fn is_finalizing_on(&self, (side, id): (Side, ObjectId)) -> bool {
        match side {
            Side::Host => self.host.heap().is_finalizing(id),
            Side::Guest => self.guest.heap().is_finalizing(id),
        }
    }

    /// Cancel a weak registration, whether or not it already fired.
    fn clear_weak_on(&mut self, target: (Side, ObjectId)) {
        if self.is_finalizing_on(target) {
            self.settle_on(target);
        } else {
            match target.0 {
                Side::Host => self.host.heap_mut().disarm_finalizer(target.1),
                Side::Guest => self.guest.heap_mut().disarm_finalizer(target.1),
            };
        }
    }

    /// Apply the anchored configuration to a freshly registered wrapper.
    pub(crate) fn anchor(&mut self, id: WrapperId) {
        let wrapper = self.wrapper(id);
        let anchors = Anchors::of(&wrapper);
        self.pin_on(anchors.other);
        self.arm_on(anchors.minted);
        if wrapper.kind == WrapperKind::Sandbox {
            self.host.heap_mut().pin(wrapper.host.id());
        }
    }

    fn wrapper(&self, id: WrapperId) -> BridgedObject {
        match self.registry.get(id) {
            Some(wrapper) => wrapper.clone(),
            None => panic!("wrapper {id} is not registered"),
        }
    }

    fn set_state(&mut self, id: WrapperId, state: LifecycleState) {
        if let Some(wrapper) = self.registry.get_mut(id) {
            debug!(wrapper = %id, kind = %wrapper.kind, from = %wrapper.state, to = %state, "lifecycle transition");
            wrapper.state = state;
            if state == LifecycleState::Resurrected {
                wrapper.resurrections += 1;
            }
        }
    }

    /// Report that `id` was handed across the boundary.
    ///
    /// A wrapper waiting on the other side's collector is brought back into
    /// service. An anchored wrapper whose local finalizer is already queued
    /// gets that finalizer re-armed, which turns the queued event stale.
    pub(crate) fn observe(&mut self, id: WrapperId) {
        let wrapper = match self.registry.get(id) {
            Some(wrapper) => wrapper.clone(),
            None => panic!("resurrection of collected wrapper {id}"),
        };
        let anchors = Anchors::of(&wrapper);

        if wrapper.state.is_anchored() {
            if self.is_finalizing_on(anchors.minted) {
                trace!(wrapper = %id, "re-observed with a queued local finalizer");
                self.settle_on(anchors.minted);
                self.arm_on(anchors.minted);
            }
            return;
        }

        self.clear_weak_on(anchors.other);
        self.pin_on(anchors.other);
        self.unpin_on(anchors.minted);
        self.arm_on(anchors.minted);
        self.set_state(id, LifecycleState::Resurrected);
        self.metrics.record_resurrection();
    }

    /// Run both collectors once and queue the finalizers that fired.
    ///
    /// Returns the number of queued events.
    pub fn collect_garbage(&mut self) -> usize {
        let host = self.host.collect();
        let guest = self.guest.collect();
        let queued = host.finalized.len() + guest.finalized.len();

        self.pending.extend(host.finalized.into_iter().map(|object| FinalizerEvent {
            side: Side::Host,
            object,
        }));
        self.pending.extend(guest.finalized.into_iter().map(|object| FinalizerEvent {
            side: Side::Guest,
            object,
        }));
        self.metrics.record_gc_pass();
        trace!(
            host_freed = host.freed,
            guest_freed = guest.freed,
            queued,
            "garbage collected"
        );
        queued
    }

    /// Finalizer events waiting to run
    pub fn pending_finalizers(&self) -> usize {
        self.pending.len()
    }

    /// Process all queued finalizer events. Returns how many were processed.
    pub fn run_finalizers(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.pending.pop_front() {
            self.run_finalizer(event);
            processed += 1;
        }
        processed
    }

    /// Collect and finalize until nothing fires or the pass limit is reached.
    ///
    /// Returns the number of passes run.
    pub fn force_gc(&mut self) -> usize {
        let limit = self.config.max_gc_passes;
        for pass in 1..=limit {
            let queued = self.collect_garbage();
            self.run_finalizers();
            if queued == 0 && self.pending.is_empty() {
                return pass;
            }
        }
        limit
    }

    fn wrapper_for_event(&self, event: FinalizerEvent) -> Option<WrapperId> {
        match event.side {
            Side::Host => {
                let object = HostRef(event.object);
                self.host
                    .userdata(object)
                    .or_else(|| self.refs.lookup_by_host(object))
            }
            Side::Guest => match self.guest.object(GuestRef(event.object)).map(|o| o.class()) {
                Some(ObjectClass::HostProxy(id)) => Some(*id),
                Some(ObjectClass::Global(data)) => data.wrapper,
                _ => None,
            },
        }
    }

    fn run_finalizer(&mut self, event: FinalizerEvent) {
        let target = (event.side, event.object);
        if !self.is_finalizing_on(target) {
            trace!(?event, "skipping stale finalizer");
            self.metrics.record_finalizer(true);
            return;
        }

        let wrapper = self
            .wrapper_for_event(event)
            .and_then(|id| self.registry.get(id).cloned());
        let Some(wrapper) = wrapper else {
            self.settle_on(target);
            self.metrics.record_finalizer(true);
            return;
        };

        let anchors = Anchors::of(&wrapper);
        if target == anchors.minted {
            self.local_finalizer(wrapper, anchors);
        } else if target == anchors.other && wrapper.state == LifecycleState::PendingRelease {
            self.remote_finalizer(wrapper, anchors);
        } else {
            trace!(wrapper = %wrapper.id, state = %wrapper.state, "finalizer does not apply");
            self.settle_on(target);
            self.metrics.record_finalizer(true);
            return;
        }
        self.metrics.record_finalizer(false);
    }

    /// The minting side dropped its last reference.
    fn local_finalizer(&mut self, wrapper: BridgedObject, anchors: Anchors) {
        assert!(
            wrapper.state.is_anchored(),
            "local finalizer on wrapper {} in state {}",
            wrapper.id,
            wrapper.state
        );
        self.settle_on(anchors.minted);

        if !wrapper.kind.defers_release() {
            // Re-import simply re-wraps, so the cache goes right away
            self.unpin_on(anchors.other);
            if self.guest.identity(wrapper.guest) == Some(wrapper.id) {
                self.guest.set_identity(wrapper.guest, None);
            }
            self.release(&wrapper);
            return;
        }

        self.pin_on(anchors.minted);
        self.unpin_on(anchors.other);
        self.arm_on(anchors.other);
        self.set_state(wrapper.id, LifecycleState::PendingRelease);
        self.metrics.record_pending_release();
    }

    /// The other side agreed the object is dead.
    fn remote_finalizer(&mut self, wrapper: BridgedObject, anchors: Anchors) {
        self.settle_on(anchors.other);
        self.unpin_on(anchors.minted);
        if wrapper.kind == WrapperKind::Sandbox {
            self.host.heap_mut().unpin(wrapper.host.id());
        }
        if matches!(wrapper.kind, WrapperKind::Context | WrapperKind::Sandbox) {
            self.guest.set_global_wrapper(wrapper.guest, None);
        }
        self.release(&wrapper);
    }

    fn release(&mut self, wrapper: &BridgedObject) {
        self.refs.remove(wrapper.host, wrapper.id);
        self.registry.unregister(wrapper.id);
        self.metrics.record_collected();
        debug!(wrapper = %wrapper.id, kind = %wrapper.kind, from = %wrapper.state, "wrapper collected");
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::Bridge;
    use crate::config::BridgeConfig;
    use crate::host::HostValue;
    use crate::wrapper::LifecycleState;

    fn bridge() -> Bridge {
        Bridge::open(BridgeConfig::default().with_binding(false)).unwrap()
    }

    #[test]
    fn test_unreferenced_guest_cache_is_collected() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        let userdata = bridge.wrap_guest_object(obj);
        let id = bridge.host().userdata(userdata).unwrap();

        bridge.force_gc();
        assert_eq!(bridge.registry().state(id), LifecycleState::Collected);
        assert!(!bridge.guest().is_alive(obj));
        assert!(!bridge.host().is_alive(userdata));
    }

    #[test]
    fn test_guest_cache_collection_clears_identity_tag() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        bridge.guest_mut().root(&obj.into());
        bridge.wrap_guest_object(obj);
        assert!(bridge.guest().identity(obj).is_some());

        bridge.force_gc();
        assert!(bridge.guest().is_alive(obj));
        assert_eq!(bridge.guest().identity(obj), None);
    }

    #[test]
    fn test_host_proxy_round_trip_through_pending_release() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        bridge.host_mut().root(&HostValue::Object(table));
        let proxy = bridge.wrap_host_object(table);
        let id = bridge.wrapper_of_host(table).unwrap();

        // Guest drops the proxy: the host object is still pinned by the host root
        bridge.collect_garbage();
        bridge.run_finalizers();
        assert_eq!(bridge.registry().state(id), LifecycleState::PendingRelease);
        assert!(bridge.guest().is_alive(proxy));

        // Handing the table back resurrects the same proxy
        let again = bridge.wrap_host_object(table);
        assert_eq!(again, proxy);
        assert_eq!(bridge.registry().state(id), LifecycleState::Resurrected);
        assert_eq!(bridge.registry().get(id).unwrap().resurrections, 1);
    }

    #[test]
    fn test_host_proxy_collected_when_both_sides_drop() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        bridge.wrap_host_object(table);
        let id = bridge.wrapper_of_host(table).unwrap();

        bridge.force_gc();
        assert_eq!(bridge.registry().state(id), LifecycleState::Collected);
        assert_eq!(bridge.wrapper_of_host(table), None);
        assert!(!bridge.host().is_alive(table));
    }

    #[test]
    fn test_stale_remote_event_is_skipped() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        bridge.wrap_host_object(table);
        let id = bridge.wrapper_of_host(table).unwrap();

        bridge.collect_garbage();
        bridge.run_finalizers();
        assert_eq!(bridge.registry().state(id), LifecycleState::PendingRelease);

        // The host collector queues the remote finalizer...
        assert_eq!(bridge.collect_garbage(), 1);
        // ...but the table crosses again before it runs
        bridge.wrap_host_object(table);
        bridge.run_finalizers();

        assert_eq!(bridge.registry().state(id), LifecycleState::Resurrected);
        assert_eq!(bridge.metrics().snapshot().finalizers_skipped, 1);
    }

    #[test]
    fn test_queued_local_event_on_host_proxy_goes_stale() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        bridge.host_mut().root(&HostValue::Object(table));
        let proxy = bridge.wrap_host_object(table);
        let id = bridge.wrapper_of_host(table).unwrap();

        // The guest collector queues the proxy's finalizer...
        assert_eq!(bridge.collect_garbage(), 1);
        // ...and the table crosses again before it runs
        assert_eq!(bridge.wrap_host_object(table), proxy);
        bridge.guest_mut().root(&proxy.into());
        bridge.run_finalizers();

        assert_eq!(bridge.registry().state(id), LifecycleState::Anchored);
        assert_eq!(bridge.metrics().snapshot().finalizers_skipped, 1);
        assert!(bridge.guest().heap().finalizer_armed(proxy.id()));

        bridge.host_mut().unroot(&HostValue::Object(table));
        bridge.force_gc();
        assert_eq!(bridge.registry().state(id), LifecycleState::Anchored);
        assert!(bridge.host().is_alive(table));
    }

    #[test]
    fn test_queued_local_event_on_guest_cache_goes_stale() {
        let mut bridge = bridge();
        let obj = bridge.guest_mut().new_object();
        let userdata = bridge.wrap_guest_object(obj);
        let id = bridge.host().userdata(userdata).unwrap();

        assert_eq!(bridge.collect_garbage(), 1);
        assert_eq!(bridge.wrap_guest_object(obj), userdata);
        bridge.host_mut().root(&HostValue::Object(userdata));
        bridge.run_finalizers();

        assert_eq!(bridge.registry().state(id), LifecycleState::Anchored);
        bridge.force_gc();
        assert_eq!(bridge.registry().state(id), LifecycleState::Anchored);
        assert!(bridge.guest().is_alive(obj));
        assert!(bridge.host().is_alive(userdata));
    }

    #[test]
    #[should_panic(expected = "resurrection of collected wrapper")]
    fn test_observing_collected_wrapper_panics() {
        let mut bridge = bridge();
        let table = bridge.host_mut().new_table();
        bridge.wrap_host_object(table);
        let id = bridge.wrapper_of_host(table).unwrap();
        bridge.force_gc();
        bridge.observe(id);
    }
}
