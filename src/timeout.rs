//! Timeout bookkeeping for a single transfer-engine session.
//!
//! Corresponds to spec.md §3 "Timeout tracker" and §4.7 "Timeouts". The
//! tracker is pure state (no I/O, no sleeping) so the engine's core loop can
//! query it before every multiplexer `wait` without owning a timer thread.

use std::time::{Duration, Instant};

/// Outcome of [`TimeoutTracker::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    None,
    ExecutionExceeded,
    IdleExceeded,
    ConnectionExceeded,
}

/// Tracks the three independent budgets a session is subject to: total
/// execution time, idle time since the last byte moved, and time since the
/// connection was established (distinct from execution, which may start
/// counting before the connection completes — e.g. during a slow handshake).
#[derive(Debug)]
pub struct TimeoutTracker {
    start: Instant,
    last_activity: Instant,
    execution_budget: Option<Duration>,
    idle_budget: Option<Duration>,
    connection_budget: Option<Duration>,
    connection_established: bool,
}

impl TimeoutTracker {
    pub fn new(
        execution_budget: Option<Duration>,
        idle_budget: Option<Duration>,
        connection_budget: Option<Duration>,
    ) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_activity: now,
            execution_budget,
            idle_budget,
            connection_budget,
            connection_established: false,
        }
    }

    /// Record activity on either direction: resets the idle clock and
    /// marks the connection as established.
    pub fn mark_activity(&mut self) {
        self.last_activity = Instant::now();
        self.connection_established = true;
    }

    pub fn mark_connection_established(&mut self) {
        self.connection_established = true;
    }

    pub fn connection_established(&self) -> bool {
        self.connection_established
    }

    /// Evaluate all three budgets against `now`, in priority order:
    /// execution, then idle, then connection. Only one event fires per
    /// call even if multiple budgets are exceeded simultaneously.
    pub fn check(&self) -> TimeoutEvent {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> TimeoutEvent {
        if let Some(budget) = self.execution_budget {
            if now.duration_since(self.start) >= budget {
                return TimeoutEvent::ExecutionExceeded;
            }
        }
        if let Some(budget) = self.idle_budget {
            if now.duration_since(self.last_activity) >= budget {
                return TimeoutEvent::IdleExceeded;
            }
        }
        if self.connection_established {
            if let Some(budget) = self.connection_budget {
                if now.duration_since(self.start) >= budget {
                    return TimeoutEvent::ConnectionExceeded;
                }
            }
        }
        TimeoutEvent::None
    }

    /// The minimum of a caller-supplied base poll timeout and the time
    /// remaining on every active budget. Used as the multiplexer `wait`
    /// argument so the engine wakes up in time to notice an expiry even if
    /// no socket ever becomes ready.
    pub fn next_wait(&self, base: Duration) -> Duration {
        self.next_wait_at(Instant::now(), base)
    }

    fn next_wait_at(&self, now: Instant, base: Duration) -> Duration {
        let mut min = base;
        let remaining = |budget: Option<Duration>, since: Instant| -> Option<Duration> {
            budget.map(|b| b.saturating_sub(now.duration_since(since)))
        };
        if let Some(r) = remaining(self.execution_budget, self.start) {
            min = min.min(r);
        }
        if let Some(r) = remaining(self.idle_budget, self.last_activity) {
            min = min.min(r);
        }
        if self.connection_established {
            if let Some(r) = remaining(self.connection_budget, self.start) {
                min = min.min(r);
            }
        }
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_budgets_never_times_out() {
        let tracker = TimeoutTracker::new(None, None, None);
        assert_eq!(tracker.check(), TimeoutEvent::None);
    }

    #[test]
    fn idle_budget_trips_after_inactivity() {
        let mut tracker = TimeoutTracker::new(None, Some(Duration::from_millis(1)), None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.check(), TimeoutEvent::IdleExceeded);
        tracker.mark_activity();
        assert_eq!(tracker.check(), TimeoutEvent::None);
    }

    #[test]
    fn activity_resets_idle_clock() {
        let now = Instant::now();
        let mut tracker = TimeoutTracker {
            start: now,
            last_activity: now,
            execution_budget: None,
            idle_budget: Some(Duration::from_secs(10)),
            connection_budget: None,
            connection_established: false,
        };
        let later = now + Duration::from_secs(20);
        assert_eq!(tracker.check_at(later), TimeoutEvent::IdleExceeded);
        tracker.last_activity = later;
        assert_eq!(tracker.check_at(later), TimeoutEvent::None);
    }

    #[test]
    fn connection_budget_requires_established_flag() {
        let now = Instant::now();
        let tracker = TimeoutTracker {
            start: now,
            last_activity: now,
            execution_budget: None,
            idle_budget: None,
            connection_budget: Some(Duration::from_secs(1)),
            connection_established: false,
        };
        let later = now + Duration::from_secs(5);
        // Never established, so connection-exceeded never fires.
        assert_eq!(tracker.check_at(later), TimeoutEvent::None);
    }

    #[test]
    fn execution_budget_takes_priority_over_idle() {
        let now = Instant::now();
        let tracker = TimeoutTracker {
            start: now,
            last_activity: now,
            execution_budget: Some(Duration::from_secs(1)),
            idle_budget: Some(Duration::from_secs(1)),
            connection_budget: None,
            connection_established: false,
        };
        let later = now + Duration::from_secs(5);
        assert_eq!(tracker.check_at(later), TimeoutEvent::ExecutionExceeded);
    }

    #[test]
    fn next_wait_clamps_to_soonest_budget() {
        let tracker = TimeoutTracker::new(
            Some(Duration::from_secs(10)),
            Some(Duration::from_millis(50)),
            None,
        );
        let wait = tracker.next_wait(Duration::from_secs(30));
        assert!(wait <= Duration::from_millis(50));
    }
}
