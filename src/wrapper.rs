//! Bridged objects and wrapper minting.
//!
//! A [`BridgedObject`] is the bridge-owned record for a value that has
//! crossed the boundary at least once. Wrappers are minted lazily by the
//! codec and cached through the [`ReferenceTable`](crate::reftable::ReferenceTable),
//! so wrapping the same object twice yields the same wrapper.

use crate::bridge::Bridge;
use crate::guest::{GuestRef, ObjectClass};
use crate::host::HostRef;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable bridge-managed wrapper identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WrapperId(u64);

impl WrapperId {
    /// Raw integer identifier
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WrapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// What a wrapper anchors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperKind {
    /// Guest-visible proxy for a host table or function
    HostProxy,
    /// Host userdata caching a guest object
    GuestCache,
    /// Host handle for a guest context
    Context,
    /// Host handle for a context whose global is backed by a host table
    Sandbox,
}

impl WrapperKind {
    /// Whether the host side mints this kind (the guest side mints proxies)
    pub fn minted_by_host(self) -> bool {
        !matches!(self, WrapperKind::HostProxy)
    }

    /// Whether a local finalization defers to the other side
    pub fn defers_release(self) -> bool {
        !matches!(self, WrapperKind::GuestCache)
    }
}

impl fmt::Display for WrapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrapperKind::HostProxy => write!(f, "host_proxy"),
            WrapperKind::GuestCache => write!(f, "guest_cache"),
            WrapperKind::Context => write!(f, "context"),
            WrapperKind::Sandbox => write!(f, "sandbox"),
        }
    }
}

/// Lifecycle of a bridged object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Reachable from both runtimes
    Anchored,
    /// Minting side dropped it; the other side decides its fate
    PendingRelease,
    /// Re-observed while pending; behaves like `Anchored`
    Resurrected,
    /// Released on both sides (terminal)
    Collected,
}

impl LifecycleState {
    /// `Anchored` or `Resurrected`
    pub fn is_anchored(self) -> bool {
        matches!(self, LifecycleState::Anchored | LifecycleState::Resurrected)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Anchored => write!(f, "anchored"),
            LifecycleState::PendingRelease => write!(f, "pending_release"),
            LifecycleState::Resurrected => write!(f, "resurrected"),
            LifecycleState::Collected => write!(f, "collected"),
        }
    }
}

/// Bridge record for an object that crossed the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedObject {
    /// Wrapper id
    pub id: WrapperId,
    /// What this wrapper anchors
    pub kind: WrapperKind,
    /// Current lifecycle state
    pub state: LifecycleState,
    /// Guest side: the proxy, the cached object, or the context global
    pub guest: GuestRef,
    /// Reference table key: the proxied host object, the cache userdata,
    /// the context handle, or the sandboxed table
    pub host: HostRef,
    /// Sandbox handle userdata
    pub handle: Option<HostRef>,
    /// Times the wrapper was brought back from `PendingRelease`
    pub resurrections: u32,
}

impl BridgedObject {
    pub(crate) fn new(
        id: WrapperId,
        kind: WrapperKind,
        guest: GuestRef,
        host: HostRef,
        handle: Option<HostRef>,
    ) -> Self {
        Self {
            id,
            kind,
            state: LifecycleState::Anchored,
            guest,
            host,
            handle,
            resurrections: 0,
        }
    }

    /// The userdata host code holds: the handle for sandboxes, the key otherwise
    pub fn host_handle(&self) -> HostRef {
        self.handle.unwrap_or(self.host)
    }
}

/// Registry of live wrappers
#[derive(Debug, Default)]
pub struct WrapperRegistry {
    entries: FxHashMap<WrapperId, BridgedObject>,
    next: u64,
}

impl WrapperRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh id
    pub(crate) fn issue(&mut self) -> WrapperId {
        self.next += 1;
        WrapperId(self.next)
    }

    pub(crate) fn register(&mut self, object: BridgedObject) {
        let previous = self.entries.insert(object.id, object);
        assert!(previous.is_none(), "wrapper id registered twice");
    }

    pub(crate) fn unregister(&mut self, id: WrapperId) -> BridgedObject {
        match self.entries.remove(&id) {
            Some(object) => object,
            None => panic!("unregistering unknown wrapper {id}"),
        }
    }

    /// Look up a live wrapper
    pub fn get(&self, id: WrapperId) -> Option<&BridgedObject> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: WrapperId) -> Option<&mut BridgedObject> {
        self.entries.get_mut(&id)
    }

    /// Lifecycle state; ids that were issued and are gone are `Collected`
    pub fn state(&self, id: WrapperId) -> LifecycleState {
        match self.entries.get(&id) {
            Some(object) => object.state,
            None => {
                debug_assert!(id.0 <= self.next, "wrapper {id} was never issued");
                LifecycleState::Collected
            }
        }
    }

    /// Full scan for the cache wrapper of a guest object
    pub fn find_guest_cache(&self, guest: GuestRef) -> Option<&BridgedObject> {
        self.entries
            .values()
            .find(|o| o.kind == WrapperKind::GuestCache && o.guest == guest)
    }

    /// Live wrappers
    pub fn iter(&self) -> impl Iterator<Item = &BridgedObject> {
        self.entries.values()
    }

    /// Number of live wrappers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no wrappers are live
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live wrappers of one kind
    pub fn count(&self, kind: WrapperKind) -> usize {
        self.entries.values().filter(|o| o.kind == kind).count()
    }
}

impl Bridge {
    /// Guest-visible wrapper for a host table or function.
    ///
    /// Returns the cached wrapper when the object is already bridged.
    pub fn wrap_host_object(&mut self, object: HostRef) -> GuestRef {
        if let Some(id) = self.refs.lookup_by_host(object) {
            self.observe(id);
            if let Some(existing) = self.registry.get(id) {
                return existing.guest;
            }
        }

        let id = self.registry.issue();
        let context = self.current_global();
        let proxy = self.guest.allocate_in(ObjectClass::HostProxy(id), context);
        self.install(BridgedObject::new(
            id,
            WrapperKind::HostProxy,
            proxy,
            object,
            None,
        ));
        proxy
    }

    /// Host-side wrapper for a guest object.
    ///
    /// The hidden identity tag is consulted first when enabled; a registry
    /// scan is the authoritative fallback.
    pub fn wrap_guest_object(&mut self, object: GuestRef) -> HostRef {
        if self.config.identity_cache {
            if let Some(tag) = self.guest.identity(object) {
                let hit = self
                    .registry
                    .get(tag)
                    .filter(|w| w.kind == WrapperKind::GuestCache && w.guest == object)
                    .map(|w| (w.id, w.host));
                if let Some((id, userdata)) = hit {
                    self.metrics.record_identity_hit();
                    self.observe(id);
                    return userdata;
                }
            }
        }

        if let Some((id, userdata)) = self
            .registry
            .find_guest_cache(object)
            .map(|w| (w.id, w.host))
        {
            self.metrics.record_identity_miss();
            self.observe(id);
            if self.config.identity_cache {
                self.guest.set_identity(object, Some(id));
            }
            return userdata;
        }

        let id = self.registry.issue();
        let userdata = self.host.new_userdata(id);
        self.install(BridgedObject::new(
            id,
            WrapperKind::GuestCache,
            object,
            userdata,
            None,
        ));
        if self.config.identity_cache {
            self.guest.set_identity(object, Some(id));
        }
        userdata
    }

    /// Register a freshly minted wrapper and anchor it.
    pub(crate) fn install(&mut self, object: BridgedObject) {
        let (id, kind, key) = (object.id, object.kind, object.host);
        self.registry.register(object);
        self.refs.insert(key, id);
        self.anchor(id);
        self.metrics.record_minted(kind);
        tracing::debug!(wrapper = %id, %kind, "wrapper minted");
    }
}
