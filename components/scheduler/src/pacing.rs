//! Real-time pacing between bunches
//!
//! Pacing works on the host's monotonic clock, not on the VM clock: it
//! throttles how fast guest time is consumed, it does not define it.

use crate::config::{Pacing, SchedulerConfig};
use std::thread;
use std::time::{Duration, Instant};

/// Applies one [`Pacing`] strategy after each bunch
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    pacing: Pacing,
    budget: Duration,
    increment: Duration,
}

impl Pacer {
    /// Build the pacer described by `config`
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            pacing: config.pacing,
            budget: Duration::from_millis(config.bunch_budget_ms),
            increment: Duration::from_millis(config.sleep_increment_ms.max(1)),
        }
    }

    /// The strategy in use
    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Wall-clock budget of one bunch
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Fill the rest of the budget of a bunch that began at `started`.
    /// Returns the time spent pacing.
    pub fn pace(&self, started: Instant) -> Duration {
        let paced_from = Instant::now();
        match self.pacing {
            Pacing::Unlimited => {}
            Pacing::BusyWait => {
                while started.elapsed() < self.budget {
                    std::hint::spin_loop();
                }
            }
            Pacing::Sleep => {
                while started.elapsed() < self.budget {
                    thread::sleep(self.increment);
                }
            }
        }
        paced_from.elapsed()
    }

    /// Pause while no thread is runnable, for at most `limit`
    pub fn idle(&self, limit: Duration) {
        let pause = limit.min(self.budget).max(self.increment);
        match self.pacing {
            Pacing::BusyWait => {
                let until = Instant::now() + pause;
                while Instant::now() < until {
                    std::hint::spin_loop();
                }
            }
            Pacing::Unlimited | Pacing::Sleep => thread::sleep(pause),
        }
    }
}
