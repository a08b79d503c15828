//! Interpreter configuration

use memory_manager::DEFAULT_GC_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Default limit on frames per thread
pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;

/// Tunables for one [`Vm`](crate::Vm)
///
/// Missing fields fall back to their defaults when deserialized.
///
/// # Examples
///
/// ```
/// use interpreter::VmConfig;
///
/// let config: VmConfig = serde_json::from_str(r#"{ "gc_threshold": 128 }"#).unwrap();
/// assert_eq!(config.gc_threshold, 128);
/// assert_eq!(config.max_call_depth, VmConfig::default().max_call_depth);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Allocations between automatic collections (0 disables them)
    pub gc_threshold: usize,
    /// Frames a thread may hold before `StackOverflowError` is thrown
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}
