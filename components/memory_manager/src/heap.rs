//! Handle-indexed object heap.
//!
//! Objects live in a map keyed by [`Reference`]. Handles come from a
//! monotonically increasing counter and are never reused, so a handle that
//! is absent from the map was collected. Handle 0 is `null`.

use crate::object::{ArrayData, HeapObject, HostObject, Payload};
use bytecode_system::ClassId;
use core_types::{Reference, Value, VmError};
use std::collections::HashMap;
use tracing::trace;

/// Default number of allocations between automatic collections
pub const DEFAULT_GC_THRESHOLD: usize = 4096;

/// Garbage collection statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Completed collections
    pub collections: u64,
    /// Objects allocated over the heap's lifetime
    pub allocations: u64,
    /// Objects freed by the most recent collection
    pub last_freed: usize,
    /// Objects freed over the heap's lifetime
    pub total_freed: u64,
    /// Objects currently in the heap
    pub live_objects: usize,
}

/// The object heap
///
/// # Examples
///
/// ```
/// use bytecode_system::ClassId;
/// use core_types::Value;
/// use memory_manager::Heap;
///
/// let mut heap = Heap::new();
/// let obj = heap.allocate_instance(ClassId(3), vec![Value::Int(0)]).unwrap();
///
/// assert!(!obj.is_null());
/// assert_eq!(heap.get(obj).unwrap().class, ClassId(3));
/// ```
#[derive(Debug)]
pub struct Heap {
    pub(crate) objects: HashMap<Reference, HeapObject>,
    next_handle: u32,
    pub(crate) interned: HashMap<String, Reference>,
    allocations_since_gc: usize,
    gc_threshold: usize,
    collection_requested: bool,
    pub(crate) stats: GcStats,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Create an empty heap with the default collection threshold
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_GC_THRESHOLD)
    }

    /// Create an empty heap that requests a collection every `gc_threshold`
    /// allocations (0 disables automatic collection)
    pub fn with_threshold(gc_threshold: usize) -> Self {
        Heap {
            objects: HashMap::new(),
            next_handle: 1,
            interned: HashMap::new(),
            allocations_since_gc: 0,
            gc_threshold,
            collection_requested: false,
            stats: GcStats::default(),
        }
    }

    /// Store `object` under a fresh handle.
    ///
    /// Every `gc_threshold` allocations a collection is requested; the
    /// owner services it at its next safe point via
    /// [`Heap::collection_requested`].
    pub fn allocate(&mut self, object: HeapObject) -> Result<Reference, VmError> {
        let handle = self.next_handle;
        self.next_handle = handle.checked_add(1).ok_or(VmError::HandlesExhausted)?;
        let reference = Reference::new(handle);
        self.objects.insert(reference, object);

        self.stats.allocations += 1;
        self.allocations_since_gc += 1;
        if self.gc_threshold > 0 && self.allocations_since_gc >= self.gc_threshold {
            self.allocations_since_gc = 0;
            if !self.collection_requested {
                trace!(live = self.objects.len(), "allocation threshold reached");
            }
            self.collection_requested = true;
        }
        Ok(reference)
    }

    /// Allocate a plain instance
    pub fn allocate_instance(&mut self, class: ClassId, fields: Vec<Value>) -> Result<Reference, VmError> {
        self.allocate(HeapObject::instance(class, fields))
    }

    /// Allocate an array
    pub fn allocate_array(&mut self, class: ClassId, data: ArrayData) -> Result<Reference, VmError> {
        self.allocate(HeapObject::array(class, data))
    }

    /// Allocate a (non-interned) string
    pub fn allocate_string(&mut self, class: ClassId, text: &str) -> Result<Reference, VmError> {
        self.allocate(HeapObject::string(class, text))
    }

    /// Allocate an object backed by a host payload
    pub fn allocate_host(
        &mut self,
        class: ClassId,
        fields: Vec<Value>,
        host: Box<dyn HostObject>,
    ) -> Result<Reference, VmError> {
        self.allocate(HeapObject::with_payload(class, fields, Payload::Host(host)))
    }

    /// Canonical string object for `text`.
    ///
    /// Equal text always yields the same handle; interned strings stay
    /// reachable for the heap's lifetime.
    pub fn intern(&mut self, string_class: ClassId, text: &str) -> Result<Reference, VmError> {
        if let Some(&existing) = self.interned.get(text) {
            return Ok(existing);
        }
        let reference = self.allocate_string(string_class, text)?;
        self.interned.insert(text.to_string(), reference);
        Ok(reference)
    }

    /// Interned handle for `text`, if any
    pub fn interned(&self, text: &str) -> Option<Reference> {
        self.interned.get(text).copied()
    }

    /// Every interned string handle
    pub fn interned_references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.interned.values().copied()
    }

    /// Object behind `reference`; `None` for null and collected handles
    pub fn get(&self, reference: Reference) -> Option<&HeapObject> {
        self.objects.get(&reference)
    }

    /// Mutable object behind `reference`
    pub fn get_mut(&mut self, reference: Reference) -> Option<&mut HeapObject> {
        self.objects.get_mut(&reference)
    }

    /// Check if `reference` denotes a live object
    pub fn contains(&self, reference: Reference) -> bool {
        self.objects.contains_key(&reference)
    }

    /// Every live object, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (Reference, &HeapObject)> {
        self.objects.iter().map(|(&r, object)| (r, object))
    }

    /// Every live object, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Reference, &mut HeapObject)> {
        self.objects.iter_mut().map(|(&r, object)| (r, object))
    }

    /// Contents of a string object
    pub fn string_value(&self, reference: Reference) -> Option<String> {
        self.get(reference)
            .and_then(HeapObject::as_utf16)
            .map(String::from_utf16_lossy)
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the heap holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Check if an automatic collection is pending
    pub fn collection_requested(&self) -> bool {
        self.collection_requested
    }

    /// Ask for a collection at the next safe point
    pub fn request_collection(&mut self) {
        self.collection_requested = true;
    }

    pub(crate) fn clear_request(&mut self) {
        self.collection_requested = false;
        self.allocations_since_gc = 0;
    }

    /// Allocations between automatic collections
    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold
    }

    /// Change the automatic collection threshold
    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.gc_threshold = threshold;
    }

    /// Collection statistics
    pub fn stats(&self) -> GcStats {
        GcStats {
            live_objects: self.objects.len(),
            ..self.stats
        }
    }

    /// The handle the next allocation will receive
    pub fn next_handle(&self) -> Reference {
        Reference::new(self.next_handle)
    }
}
