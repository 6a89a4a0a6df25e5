//! Bidirectional map between host identities and wrappers.
//!
//! The table is the authority on whether an object is bridged. Both
//! directions are always updated together.

use crate::host::HostRef;
use crate::wrapper::WrapperId;
use rustc_hash::FxHashMap;

/// `HostRef <-> WrapperId` map with O(1) lookup both ways
#[derive(Debug, Default)]
pub struct ReferenceTable {
    forward: FxHashMap<HostRef, WrapperId>,
    backward: FxHashMap<WrapperId, HostRef>,
}

impl ReferenceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair. Neither key may already be mapped.
    pub fn insert(&mut self, host: HostRef, wrapper: WrapperId) {
        assert!(
            !self.forward.contains_key(&host),
            "duplicate reference table insert for host object {host}"
        );
        assert!(
            !self.backward.contains_key(&wrapper),
            "duplicate reference table insert for wrapper {wrapper}"
        );
        self.forward.insert(host, wrapper);
        self.backward.insert(wrapper, host);
    }

    /// Remove a pair. The exact pair must exist.
    pub fn remove(&mut self, host: HostRef, wrapper: WrapperId) {
        assert_eq!(
            self.forward.get(&host),
            Some(&wrapper),
            "removing unknown reference table entry {host} -> {wrapper}"
        );
        self.forward.remove(&host);
        let back = self.backward.remove(&wrapper);
        debug_assert_eq!(back, Some(host));
    }

    /// Wrapper bridging `host`
    pub fn lookup_by_host(&self, host: HostRef) -> Option<WrapperId> {
        self.forward.get(&host).copied()
    }

    /// Host key of `wrapper`
    pub fn lookup_by_wrapper(&self, wrapper: WrapperId) -> Option<HostRef> {
        self.backward.get(&wrapper).copied()
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.forward.len(), self.backward.len());
        self.forward.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All pairs, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (HostRef, WrapperId)> + '_ {
        self.forward.iter().map(|(h, w)| (*h, *w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRuntime;
    use crate::wrapper::WrapperRegistry;

    fn keys(n: usize) -> (Vec<HostRef>, Vec<WrapperId>) {
        let mut host = HostRuntime::new();
        let mut registry = WrapperRegistry::new();
        (0..n)
            .map(|_| (host.new_table(), registry.issue()))
            .unzip()
    }

    #[test]
    fn test_insert_and_lookup_both_ways() {
        let (hosts, wrappers) = keys(2);
        let mut table = ReferenceTable::new();
        table.insert(hosts[0], wrappers[0]);
        table.insert(hosts[1], wrappers[1]);

        assert_eq!(table.lookup_by_host(hosts[1]), Some(wrappers[1]));
        assert_eq!(table.lookup_by_wrapper(wrappers[0]), Some(hosts[0]));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let (hosts, wrappers) = keys(1);
        let mut table = ReferenceTable::new();
        table.insert(hosts[0], wrappers[0]);
        table.remove(hosts[0], wrappers[0]);

        assert_eq!(table.lookup_by_host(hosts[0]), None);
        assert_eq!(table.lookup_by_wrapper(wrappers[0]), None);
        assert!(table.is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate reference table insert")]
    fn test_duplicate_host_insert_panics() {
        let (hosts, wrappers) = keys(2);
        let mut table = ReferenceTable::new();
        table.insert(hosts[0], wrappers[0]);
        table.insert(hosts[0], wrappers[1]);
    }

    #[test]
    #[should_panic(expected = "duplicate reference table insert")]
    fn test_duplicate_wrapper_insert_panics() {
        let (hosts, wrappers) = keys(2);
        let mut table = ReferenceTable::new();
        table.insert(hosts[0], wrappers[0]);
        table.insert(hosts[1], wrappers[0]);
    }

    #[test]
    #[should_panic(expected = "removing unknown")]
    fn test_remove_missing_panics() {
        let (hosts, wrappers) = keys(1);
        let mut table = ReferenceTable::new();
        table.remove(hosts[0], wrappers[0]);
    }
}
