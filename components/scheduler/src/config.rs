//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default scheduler turns per bunch
pub const DEFAULT_BUNCH_SIZE: usize = 4096;

/// Default wall-clock budget per bunch, roughly one 60 Hz frame
pub const DEFAULT_BUNCH_BUDGET_MS: u64 = 16;

/// Default granularity of [`Pacing::Sleep`]
pub const DEFAULT_SLEEP_INCREMENT_MS: u64 = 1;

/// How the time between bunches is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    /// Start the next bunch immediately
    #[default]
    Unlimited,
    /// Spin until the bunch budget has elapsed
    BusyWait,
    /// Sleep in small increments until the bunch budget has elapsed
    Sleep,
}

impl Pacing {
    /// Name used in configuration files and on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Pacing::Unlimited => "unlimited",
            Pacing::BusyWait => "busy_wait",
            Pacing::Sleep => "sleep",
        }
    }
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized pacing name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pacing '{0}' (expected unlimited, busy_wait or sleep)")]
pub struct ParsePacingError(pub String);

impl FromStr for Pacing {
    type Err = ParsePacingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "unlimited" | "none" => Ok(Pacing::Unlimited),
            "busy_wait" | "busy" => Ok(Pacing::BusyWait),
            "sleep" => Ok(Pacing::Sleep),
            _ => Err(ParsePacingError(s.to_string())),
        }
    }
}

/// Tunables for a [`Scheduler`](crate::Scheduler)
///
/// # Examples
///
/// ```
/// use scheduler::{Pacing, SchedulerConfig};
///
/// let config: SchedulerConfig =
///     serde_json::from_str(r#"{ "pacing": "busy_wait", "bunch_size": 100 }"#).unwrap();
/// assert_eq!(config.pacing, Pacing::BusyWait);
/// assert_eq!(config.bunch_size, 100);
/// assert_eq!(config.bunch_budget_ms, 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scheduler turns (interpreter steps) per bunch
    pub bunch_size: usize,
    /// Wall-clock budget per bunch for the pacing strategies
    pub bunch_budget_ms: u64,
    /// What to do once a bunch is done
    pub pacing: Pacing,
    /// Sleep granularity for [`Pacing::Sleep`]
    pub sleep_increment_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bunch_size: DEFAULT_BUNCH_SIZE,
            bunch_budget_ms: DEFAULT_BUNCH_BUDGET_MS,
            pacing: Pacing::default(),
            sleep_increment_ms: DEFAULT_SLEEP_INCREMENT_MS,
        }
    }
}
