//! Stop-the-world mark-sweep collection.
//!
//! Marking is a breadth-first traversal from the root set (plus every
//! interned string) following each object's [`HeapObject::trace`]. The
//! visited check on the per-object mark flag makes cycles harmless. Sweep
//! drops unmarked objects and clears the flag on survivors, so no separate
//! reset pass is needed.
//!
//! [`HeapObject::trace`]: crate::HeapObject::trace

use crate::heap::Heap;
use core_types::{Reference, Value};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// References the collector treats as always reachable
#[derive(Debug, Default, Clone)]
pub struct RootSet {
    roots: Vec<Reference>,
}

impl RootSet {
    /// Create an empty root set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root; null is ignored
    pub fn add(&mut self, reference: Reference) {
        if !reference.is_null() {
            self.roots.push(reference);
        }
    }

    /// Add a value if it is a non-null reference
    pub fn add_value(&mut self, value: Value) {
        if let Value::Reference(reference) = value {
            self.add(reference);
        }
    }

    /// Number of recorded roots (duplicates included)
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if no roots were recorded
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Iterate over the roots
    pub fn iter(&self) -> impl Iterator<Item = Reference> + '_ {
        self.roots.iter().copied()
    }
}

impl Extend<Reference> for RootSet {
    fn extend<I: IntoIterator<Item = Reference>>(&mut self, iter: I) {
        for reference in iter {
            self.add(reference);
        }
    }
}

/// Result of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcOutcome {
    /// Objects found reachable
    pub marked: usize,
    /// Objects removed from the heap
    pub freed: usize,
}

impl Heap {
    /// Run a full collection against `roots`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::ClassId;
    /// use core_types::Value;
    /// use memory_manager::{Heap, RootSet};
    ///
    /// let mut heap = Heap::new();
    /// let kept = heap.allocate_instance(ClassId(0), vec![]).unwrap();
    /// let holder = heap
    ///     .allocate_instance(ClassId(0), vec![Value::Reference(kept)])
    ///     .unwrap();
    /// let garbage = heap.allocate_instance(ClassId(0), vec![]).unwrap();
    ///
    /// let mut roots = RootSet::new();
    /// roots.add(holder);
    /// let outcome = heap.collect_garbage(&roots);
    ///
    /// assert_eq!(outcome.freed, 1);
    /// assert!(heap.contains(kept));
    /// assert!(!heap.contains(garbage));
    /// ```
    pub fn collect_garbage(&mut self, roots: &RootSet) -> GcOutcome {
        let marked = self.mark(roots);
        let freed = self.sweep();

        self.stats.collections += 1;
        self.stats.last_freed = freed;
        self.stats.total_freed += freed as u64;
        self.clear_request();
        trace!(marked, freed, live = self.objects.len(), "collected garbage");
        GcOutcome { marked, freed }
    }

    fn mark(&mut self, roots: &RootSet) -> usize {
        let mut queue: VecDeque<Reference> = roots.iter().collect();
        queue.extend(self.interned.values().copied());
        let mut scratch = Vec::new();
        let mut marked = 0;

        while let Some(reference) = queue.pop_front() {
            let Some(object) = self.objects.get_mut(&reference) else {
                warn!(%reference, "root or field refers to a collected object");
                continue;
            };
            if object.marked {
                continue;
            }
            object.marked = true;
            marked += 1;
            object.trace(&mut scratch);
            queue.extend(scratch.drain(..));
        }
        marked
    }

    fn sweep(&mut self) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, object| std::mem::take(&mut object.marked));
        before - self.objects.len()
    }
}
