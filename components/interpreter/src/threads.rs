//! Thread pools
//!
//! Every live thread sits in exactly one of two pools: the runnable list,
//! stepped round-robin in insertion order, or the waiting map, keyed by id
//! with an optional absolute wake-up time. Threads blocked in
//! `Object.wait` are also queued in the wait set of their monitor.

use crate::thread::{Thread, ThreadId};
use core_types::{Reference, VmError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Why a thread is in the waiting pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiting {
    /// Absolute wake-up time in milliseconds, `None` to wait for an attach
    pub wake_at: Option<u64>,
    /// Monitor whose wait set holds the thread
    pub monitor: Option<Reference>,
}

/// All threads of one VM
#[derive(Debug)]
pub struct ThreadTable {
    threads: HashMap<ThreadId, Thread>,
    runnable: Vec<ThreadId>,
    waiting: BTreeMap<ThreadId, Waiting>,
    wait_sets: HashMap<Reference, VecDeque<ThreadId>>,
    free_ids: VecDeque<ThreadId>,
    next_id: u32,
    generations: HashMap<ThreadId, u64>,
    next_generation: u64,
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTable {
    /// Create an empty table
    pub fn new() -> Self {
        ThreadTable {
            threads: HashMap::new(),
            runnable: Vec::new(),
            waiting: BTreeMap::new(),
            wait_sets: HashMap::new(),
            free_ids: VecDeque::new(),
            next_id: 1,
            generations: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Reserve an id; ids of finished threads are reused oldest first
    pub fn allocate_id(&mut self) -> Result<ThreadId, VmError> {
        if let Some(id) = self.free_ids.pop_front() {
            return Ok(id);
        }
        let id = ThreadId::try_from(self.next_id).map_err(|_| VmError::ThreadIdsExhausted)?;
        self.next_id += 1;
        Ok(id)
    }

    /// Add a thread to the end of the runnable list
    pub fn register(&mut self, thread: Thread) {
        let id = thread.id();
        debug!(thread = id, "registered thread");
        self.threads.insert(id, thread);
        self.runnable.push(id);
        self.generations.insert(id, self.next_generation);
        self.next_generation += 1;
    }

    /// Registration count at the time `id` was registered. A recycled id
    /// gets a new generation.
    pub fn generation(&self, id: ThreadId) -> Option<u64> {
        self.generations.get(&id).copied()
    }

    /// Add a thread that is not scheduled (for synchronous calls)
    pub fn insert_unscheduled(&mut self, thread: Thread) {
        self.threads.insert(thread.id(), thread);
    }

    /// Remove a thread entirely and recycle its id
    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        let thread = self.threads.remove(&id)?;
        self.runnable.retain(|&t| t != id);
        self.generations.remove(&id);
        if let Some(waiting) = self.waiting.remove(&id) {
            self.leave_wait_set(id, waiting.monitor);
        }
        self.free_ids.push_back(id);
        debug!(thread = id, "removed thread");
        Some(thread)
    }

    /// Take a thread out for execution; pair with [`ThreadTable::put_back`]
    pub(crate) fn take(&mut self, id: ThreadId) -> Result<Thread, VmError> {
        self.threads
            .remove(&id)
            .ok_or(VmError::UnknownThread(id as u32))
    }

    pub(crate) fn put_back(&mut self, thread: Thread) {
        self.threads.insert(thread.id(), thread);
    }

    /// Thread by id
    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    /// Mutable thread by id
    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&id)
    }

    /// Check if `id` denotes a registered thread
    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains_key(&id)
    }

    /// Number of threads in either pool
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Check if no thread is registered
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Every thread, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    /// Runnable ids in scheduling order
    pub fn runnable(&self) -> &[ThreadId] {
        &self.runnable
    }

    /// Check if `id` is in the runnable list
    pub fn is_runnable(&self, id: ThreadId) -> bool {
        self.runnable.contains(&id)
    }

    /// Waiting record of `id`
    pub fn waiting(&self, id: ThreadId) -> Option<Waiting> {
        self.waiting.get(&id).copied()
    }

    /// Number of threads in the waiting pool
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Move a thread to the waiting pool.
    ///
    /// With `wake_at` set, [`ThreadTable::wake_due`] reattaches it once
    /// that time has passed; otherwise only an explicit attach (or notify)
    /// brings it back.
    pub fn detach(&mut self, id: ThreadId, wake_at: Option<u64>) {
        self.detach_on(id, wake_at, None);
    }

    /// Detach into the wait set of `monitor`
    pub(crate) fn detach_on(&mut self, id: ThreadId, wake_at: Option<u64>, monitor: Option<Reference>) {
        self.runnable.retain(|&t| t != id);
        if let Some(monitor) = monitor {
            self.wait_sets.entry(monitor).or_default().push_back(id);
        }
        self.waiting.insert(id, Waiting { wake_at, monitor });
    }

    /// Move a waiting thread back to the end of the runnable list.
    /// Returns false if it was not waiting.
    pub fn attach(&mut self, id: ThreadId) -> bool {
        match self.waiting.remove(&id) {
            Some(waiting) => {
                self.leave_wait_set(id, waiting.monitor);
                self.runnable.push(id);
                true
            }
            None => false,
        }
    }

    /// Send a runnable thread to the end of the runnable list
    pub fn yield_now(&mut self, id: ThreadId) {
        if let Some(position) = self.runnable.iter().position(|&t| t == id) {
            self.runnable.remove(position);
            self.runnable.push(id);
        }
    }

    fn leave_wait_set(&mut self, id: ThreadId, monitor: Option<Reference>) {
        if let Some(monitor) = monitor {
            if let Some(set) = self.wait_sets.get_mut(&monitor) {
                set.retain(|&t| t != id);
                if set.is_empty() {
                    self.wait_sets.remove(&monitor);
                }
            }
        }
    }

    /// Attach the longest-waiting thread of `monitor`'s wait set
    pub fn notify_one(&mut self, monitor: Reference) -> Option<ThreadId> {
        let id = self.wait_sets.get(&monitor)?.front().copied()?;
        self.attach(id);
        Some(id)
    }

    /// Attach every thread in `monitor`'s wait set, oldest first
    pub fn notify_all(&mut self, monitor: Reference) -> Vec<ThreadId> {
        let ids: Vec<_> = self
            .wait_sets
            .get(&monitor)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for &id in &ids {
            self.attach(id);
        }
        ids
    }

    /// Attach every waiting thread whose wake-up time is at or before
    /// `now`, earliest first. Returns how many were attached.
    pub fn wake_due(&mut self, now: u64) -> usize {
        let mut due: Vec<(u64, ThreadId)> = self
            .waiting
            .iter()
            .filter_map(|(&id, w)| w.wake_at.filter(|&at| at <= now).map(|at| (at, id)))
            .collect();
        due.sort_unstable();
        for &(_, id) in &due {
            self.attach(id);
        }
        due.len()
    }

    /// Earliest pending wake-up time
    pub fn next_wakeup(&self) -> Option<u64> {
        self.waiting.values().filter_map(|w| w.wake_at).min()
    }
}
