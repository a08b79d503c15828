//! Packed per-object monitor state.
//!
//! The owner thread id sits in the high 16 bits and the reentrancy count in
//! the low 16 bits of one 32-bit word. Thread id 0 is never handed out, so
//! a zero owner means the monitor is free.

use thiserror::Error;

/// Monitor misuse reported to the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// Exit, wait or notify by a thread that does not own the monitor
    #[error("current thread does not own the monitor")]
    NotOwner,
    /// Reentrancy count would exceed 16 bits
    #[error("monitor reentrancy count overflow")]
    Overflow,
}

/// Outcome of an enter attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEnter {
    /// The calling thread now holds the monitor
    Acquired,
    /// Another thread holds it; retry later
    Contended,
}

/// Owner + count packed into 32 bits
///
/// # Examples
///
/// ```
/// use memory_manager::{MonitorEnter, MonitorWord};
///
/// let mut word = MonitorWord::FREE;
/// assert_eq!(word.enter(1), Ok(MonitorEnter::Acquired));
/// assert_eq!(word.enter(1), Ok(MonitorEnter::Acquired));
/// assert_eq!(word.enter(2), Ok(MonitorEnter::Contended));
/// assert_eq!(word.count(), 2);
///
/// assert_eq!(word.exit(1), Ok(false));
/// assert_eq!(word.exit(1), Ok(true));
/// assert!(word.is_free());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorWord(u32);

impl MonitorWord {
    /// An unowned monitor
    pub const FREE: MonitorWord = MonitorWord(0);

    fn pack(owner: u16, count: u16) -> Self {
        MonitorWord(((owner as u32) << 16) | count as u32)
    }

    /// Raw packed word
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Owning thread, if any
    pub fn owner(self) -> Option<u16> {
        match (self.0 >> 16) as u16 {
            0 => None,
            id => Some(id),
        }
    }

    /// Reentrancy count (0 when free)
    pub fn count(self) -> u16 {
        self.0 as u16
    }

    /// Check if no thread holds the monitor
    pub fn is_free(self) -> bool {
        self.owner().is_none()
    }

    /// Check if `thread` holds the monitor
    pub fn is_owned_by(self, thread: u16) -> bool {
        self.owner() == Some(thread)
    }

    /// Acquire or re-enter. Never blocks: contention is reported instead.
    pub fn enter(&mut self, thread: u16) -> Result<MonitorEnter, MonitorError> {
        match self.owner() {
            None => {
                *self = Self::pack(thread, 1);
                Ok(MonitorEnter::Acquired)
            }
            Some(owner) if owner == thread => {
                let count = self.count().checked_add(1).ok_or(MonitorError::Overflow)?;
                *self = Self::pack(thread, count);
                Ok(MonitorEnter::Acquired)
            }
            Some(_) => Ok(MonitorEnter::Contended),
        }
    }

    /// Release one level; returns true when the monitor became free
    pub fn exit(&mut self, thread: u16) -> Result<bool, MonitorError> {
        if !self.is_owned_by(thread) {
            return Err(MonitorError::NotOwner);
        }
        let count = self.count() - 1;
        *self = if count == 0 {
            Self::FREE
        } else {
            Self::pack(thread, count)
        };
        Ok(count == 0)
    }

    /// Release every level at once and return the count that was held
    pub fn release_all(&mut self, thread: u16) -> Result<u16, MonitorError> {
        if !self.is_owned_by(thread) {
            return Err(MonitorError::NotOwner);
        }
        let count = self.count();
        *self = Self::FREE;
        Ok(count)
    }

    /// Reacquire with a saved count; false while another thread holds it.
    /// The owner is left with exactly `count` levels.
    pub fn restore(&mut self, thread: u16, count: u16) -> bool {
        match self.owner() {
            Some(owner) if owner != thread => false,
            _ => {
                *self = Self::pack(thread, count.max(1));
                true
            }
        }
    }
}
