//! Tracing collector shared by the host and guest runtime models.
//!
//! Each runtime owns an independent [`Heap`]. A collection marks from pinned
//! roots, hands unreachable objects with an armed finalizer back to the
//! caller instead of freeing them, and sweeps everything else. Finalization
//! is never run from inside [`Heap::collect`]; the bridge drains the returned
//! events between operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generational slot handle into a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    /// Slot index
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at allocation time
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", ((self.generation as u64) << 32) | self.index as u64)
    }
}

/// Objects stored in a [`Heap`] report their outgoing strong edges.
pub trait Trace {
    /// Call `tracer` once for every object this value keeps alive.
    fn trace(&self, tracer: &mut dyn FnMut(ObjectId));
}

struct Entry<T> {
    value: T,
    pins: u32,
    finalizer_armed: bool,
    finalizing: bool,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Outcome of a single collection
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Collection {
    /// Objects freed by the sweep
    pub freed: usize,
    /// Objects whose finalizer fired, in discovery order
    pub finalized: Vec<ObjectId>,
}

/// Cumulative collector counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapStats {
    /// Completed collections
    pub collections: u64,
    /// Objects allocated
    pub allocated: u64,
    /// Objects freed
    pub freed: u64,
    /// Finalizers fired
    pub finalized: u64,
}

/// Arena with mark/sweep collection and finalizer queueing.
pub struct Heap<T> {
    name: &'static str,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    stats: HeapStats,
}

/// Index of the next slot; ids are `u32`, so a heap this large cannot grow.
fn slot_index(len: usize) -> u32 {
    match u32::try_from(len) {
        Ok(index) => index,
        Err(_) => panic!("heap slot index {len} does not fit in an object id"),
    }
}

impl<T: Trace> Heap<T> {
    /// Create an empty heap; `name` only appears in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            stats: HeapStats::default(),
        }
    }

    /// Allocate a new, unpinned object.
    pub fn allocate(&mut self, value: T) -> ObjectId {
        let entry = Entry {
            value,
            pins: 0,
            finalizer_armed: false,
            finalizing: false,
        };
        self.live += 1;
        self.stats.allocated += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ObjectId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = slot_index(self.slots.len());
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ObjectId {
                index,
                generation: 0,
            }
        }
    }

    fn entry(&self, id: ObjectId) -> Option<&Entry<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: ObjectId) -> Option<&mut Entry<T>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn live_entry_mut(&mut self, id: ObjectId, op: &str) -> &mut Entry<T> {
        let name = self.name;
        match self.entry_mut(id) {
            Some(entry) => entry,
            None => panic!("{name} heap: {op} on freed object {id}"),
        }
    }

    /// Whether `id` still names a live object
    pub fn contains(&self, id: ObjectId) -> bool {
        self.entry(id).is_some()
    }

    /// Borrow an object
    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.entry(id).map(|e| &e.value)
    }

    /// Mutably borrow an object
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.entry_mut(id).map(|e| &mut e.value)
    }

    /// Add a strong root.
    pub fn pin(&mut self, id: ObjectId) {
        self.live_entry_mut(id, "pin").pins += 1;
    }

    /// Drop a strong root added by [`Heap::pin`].
    pub fn unpin(&mut self, id: ObjectId) {
        let entry = self.live_entry_mut(id, "unpin");
        assert!(entry.pins > 0, "unbalanced unpin of {id}");
        entry.pins -= 1;
    }

    /// Current strong root count (0 for freed objects)
    pub fn pins(&self, id: ObjectId) -> u32 {
        self.entry(id).map_or(0, |e| e.pins)
    }

    /// Request a finalization event the next time `id` is found unreachable.
    pub fn arm_finalizer(&mut self, id: ObjectId) {
        let entry = self.live_entry_mut(id, "arm_finalizer");
        assert!(!entry.finalizing, "arming finalizer on {id} while it is finalizing");
        entry.finalizer_armed = true;
    }

    /// Cancel an armed finalizer. Returns whether one was armed.
    pub fn disarm_finalizer(&mut self, id: ObjectId) -> bool {
        let entry = self.live_entry_mut(id, "disarm_finalizer");
        std::mem::replace(&mut entry.finalizer_armed, false)
    }

    /// Whether a finalizer is armed on `id`
    pub fn finalizer_armed(&self, id: ObjectId) -> bool {
        self.entry(id).is_some_and(|e| e.finalizer_armed)
    }

    /// Whether `id` has a fired finalizer that has not been settled yet
    pub fn is_finalizing(&self, id: ObjectId) -> bool {
        self.entry(id).is_some_and(|e| e.finalizing)
    }

    /// Mark a fired finalizer as handled. The object is freed by a later
    /// collection unless it was pinned or re-armed in the meantime.
    pub fn settle(&mut self, id: ObjectId) {
        self.live_entry_mut(id, "settle").finalizing = false;
    }

    /// Live object count
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the heap holds no objects
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Cumulative counters
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Run one full collection.
    pub fn collect(&mut self) -> Collection {
        let mut marked = vec![false; self.slots.len()];
        let mut worklist: Vec<ObjectId> = Vec::new();

        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = &slot.entry {
                // Unsettled finalizers keep their object (and its children)
                // alive until the owner decides its fate.
                if entry.pins > 0 || entry.finalizing {
                    worklist.push(ObjectId {
                        index: index as u32,
                        generation: slot.generation,
                    });
                }
            }
        }
        self.mark(&mut marked, &mut worklist);

        let mut finalized = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if marked[index] {
                continue;
            }
            if let Some(entry) = slot.entry.as_mut() {
                if entry.finalizer_armed {
                    entry.finalizer_armed = false;
                    entry.finalizing = true;
                    let id = ObjectId {
                        index: index as u32,
                        generation: slot.generation,
                    };
                    finalized.push(id);
                    worklist.push(id);
                }
            }
        }
        self.mark(&mut marked, &mut worklist);

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if marked[index] || slot.entry.is_none() {
                continue;
            }
            slot.entry = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            freed += 1;
        }

        self.live -= freed;
        self.stats.collections += 1;
        self.stats.freed += freed as u64;
        self.stats.finalized += finalized.len() as u64;

        tracing::trace!(
            heap = self.name,
            freed,
            finalized = finalized.len(),
            live = self.live,
            "collection finished"
        );

        Collection { freed, finalized }
    }

    fn mark(&self, marked: &mut [bool], worklist: &mut Vec<ObjectId>) {
        while let Some(id) = worklist.pop() {
            let Some(entry) = self.entry(id) else {
                continue;
            };
            let index = id.index as usize;
            if marked[index] {
                continue;
            }
            marked[index] = true;
            entry.value.trace(&mut |child| {
                if !marked.get(child.index as usize).copied().unwrap_or(true) {
                    worklist.push(child);
                }
            });
        }
    }
}
