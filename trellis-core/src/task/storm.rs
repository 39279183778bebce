//! Storm Budgets
//!
//! Per-session rate limiting for work that can multiply: query starts,
//! command starts, and generic background spawns. Each kind gets its own
//! sliding window; exhausting one kind never affects another. A separate
//! per-loop-iteration cap on effect executions lives in the reactive
//! runtime (`Runtime::flush_effects`); the session loop wires both into
//! the same breaker.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

/// Which window an admission charges. Query and command cells charge
/// their own kinds; `Background` is for application-spawned work,
/// admitted through `SessionCx::admit_background`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    Query,
    Command,
    Background,
}

impl BudgetKind {
    fn index(self) -> usize {
        match self {
            BudgetKind::Query => 0,
            BudgetKind::Command => 1,
            BudgetKind::Background => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BudgetKind::Query => "query",
            BudgetKind::Command => "command",
            BudgetKind::Background => "background",
        }
    }
}

/// What happens when a window is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StormPolicy {
    /// Reject the one operation; the session survives.
    Throttle,
    /// Latch the breaker; the session loop destroys the session.
    TripBreaker,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StormError {
    #[error("{} budget exhausted, operation throttled", kind.as_str())]
    Throttled { kind: BudgetKind },

    #[error("{} budget exhausted, breaker tripped", kind.as_str())]
    BreakerTripped { kind: BudgetKind },
}

#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    /// Maximum starts inside one window.
    pub max_starts: usize,
    pub window: Duration,
    pub policy: StormPolicy,
}

impl BudgetConfig {
    pub fn new(max_starts: usize, window: Duration, policy: StormPolicy) -> Self {
        BudgetConfig {
            max_starts,
            window,
            policy,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StormConfig {
    pub query: BudgetConfig,
    pub command: BudgetConfig,
    pub background: BudgetConfig,
}

impl Default for StormConfig {
    fn default() -> Self {
        let window = Duration::from_secs(1);
        StormConfig {
            query: BudgetConfig::new(64, window, StormPolicy::Throttle),
            command: BudgetConfig::new(32, window, StormPolicy::Throttle),
            background: BudgetConfig::new(128, window, StormPolicy::TripBreaker),
        }
    }
}

/// Sliding-window admission control, one window per [`BudgetKind`].
#[derive(Debug)]
pub struct StormBudget {
    config: StormConfig,
    windows: [VecDeque<Instant>; 3],
    tripped: Option<BudgetKind>,
}

impl StormBudget {
    pub fn new(config: StormConfig) -> Self {
        StormBudget {
            config,
            windows: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            tripped: None,
        }
    }

    fn budget(&self, kind: BudgetKind) -> BudgetConfig {
        match kind {
            BudgetKind::Query => self.config.query,
            BudgetKind::Command => self.config.command,
            BudgetKind::Background => self.config.background,
        }
    }

    /// Admit one start of `kind` at time `now`.
    pub fn admit_at(&mut self, kind: BudgetKind, now: Instant) -> Result<(), StormError> {
        let budget = self.budget(kind);
        let window = &mut self.windows[kind.index()];
        while let Some(&front) = window.front() {
            if now.duration_since(front) >= budget.window {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= budget.max_starts {
            return match budget.policy {
                StormPolicy::Throttle => {
                    warn!(kind = kind.as_str(), "storm budget throttled");
                    Err(StormError::Throttled { kind })
                }
                StormPolicy::TripBreaker => {
                    warn!(kind = kind.as_str(), "storm breaker tripped");
                    self.tripped = Some(kind);
                    Err(StormError::BreakerTripped { kind })
                }
            };
        }
        window.push_back(now);
        Ok(())
    }

    pub fn admit(&mut self, kind: BudgetKind) -> Result<(), StormError> {
        self.admit_at(kind, Instant::now())
    }

    /// Latched once a `TripBreaker` budget overflows; the session loop
    /// checks this after every unit of work.
    pub fn tripped(&self) -> Option<BudgetKind> {
        self.tripped
    }
}

// ----------- Tests -----------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, policy: StormPolicy) -> StormConfig {
        let budget = BudgetConfig::new(max, Duration::from_secs(1), policy);
        StormConfig {
            query: budget,
            command: budget,
            background: budget,
        }
    }

    #[test]
    fn throttles_at_capacity_and_recovers() {
        let mut budget = StormBudget::new(config(2, StormPolicy::Throttle));
        let t0 = Instant::now();

        assert!(budget.admit_at(BudgetKind::Query, t0).is_ok());
        assert!(budget.admit_at(BudgetKind::Query, t0).is_ok());
        assert_eq!(
            budget.admit_at(BudgetKind::Query, t0),
            Err(StormError::Throttled {
                kind: BudgetKind::Query
            })
        );
        assert!(budget.tripped().is_none());

        // Window slides; capacity returns.
        let later = t0 + Duration::from_secs(2);
        assert!(budget.admit_at(BudgetKind::Query, later).is_ok());
    }

    #[test]
    fn kinds_are_isolated() {
        let mut budget = StormBudget::new(config(1, StormPolicy::Throttle));
        let t0 = Instant::now();

        assert!(budget.admit_at(BudgetKind::Query, t0).is_ok());
        assert!(budget.admit_at(BudgetKind::Query, t0).is_err());

        // Query exhaustion leaves command and background untouched.
        assert!(budget.admit_at(BudgetKind::Command, t0).is_ok());
        assert!(budget.admit_at(BudgetKind::Background, t0).is_ok());
    }

    #[test]
    fn breaker_latches() {
        let mut budget = StormBudget::new(config(1, StormPolicy::TripBreaker));
        let t0 = Instant::now();

        assert!(budget.admit_at(BudgetKind::Command, t0).is_ok());
        assert_eq!(
            budget.admit_at(BudgetKind::Command, t0),
            Err(StormError::BreakerTripped {
                kind: BudgetKind::Command
            })
        );
        assert_eq!(budget.tripped(), Some(BudgetKind::Command));
    }
}
