//! Virtual pointers and per-class dispatch tables

use crate::registry::MethodId;
use std::collections::HashMap;
use std::fmt;

/// Stable id of a `(name, descriptor)` signature, independent of any class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPointer(pub u32);

impl fmt::Display for VirtualPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vp#{}", self.0)
    }
}

/// Signature to virtual pointer numbering, owned by the class registry
///
/// # Examples
///
/// ```
/// use bytecode_system::VirtualPointers;
///
/// let mut vptrs = VirtualPointers::new();
/// let run = vptrs.intern("run", "()V");
/// assert_eq!(vptrs.intern("run", "()V"), run);
/// assert_ne!(vptrs.intern("run", "(I)V"), run);
/// assert_eq!(vptrs.signature(run), Some(("run", "()V")));
/// ```
#[derive(Debug, Default, Clone)]
pub struct VirtualPointers {
    ids: HashMap<(String, String), VirtualPointer>,
    signatures: Vec<(String, String)>,
}

impl VirtualPointers {
    /// Create an empty numbering
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a signature, assigned on first request
    pub fn intern(&mut self, name: &str, descriptor: &str) -> VirtualPointer {
        if let Some(&vp) = self.ids.get(&(name.to_string(), descriptor.to_string())) {
            return vp;
        }
        let vp = VirtualPointer(self.signatures.len() as u32);
        self.signatures
            .push((name.to_string(), descriptor.to_string()));
        self.ids
            .insert((name.to_string(), descriptor.to_string()), vp);
        vp
    }

    /// Id for a signature, if one was assigned
    pub fn get(&self, name: &str, descriptor: &str) -> Option<VirtualPointer> {
        self.ids
            .get(&(name.to_string(), descriptor.to_string()))
            .copied()
    }

    /// Signature behind an id
    pub fn signature(&self, vp: VirtualPointer) -> Option<(&str, &str)> {
        self.signatures
            .get(vp.0 as usize)
            .map(|(n, d)| (n.as_str(), d.as_str()))
    }

    /// Number of assigned ids
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Check if no id was assigned yet
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

/// Virtual pointer to concrete method mapping of one class
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchTable {
    entries: HashMap<VirtualPointer, MethodId>,
}

impl DispatchTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete method for `vp`
    pub fn get(&self, vp: VirtualPointer) -> Option<MethodId> {
        self.entries.get(&vp).copied()
    }

    /// Bind `vp`, replacing an inherited binding
    pub fn insert(&mut self, vp: VirtualPointer, method: MethodId) {
        self.entries.insert(vp, method);
    }

    /// Number of bound signatures
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is bound
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
