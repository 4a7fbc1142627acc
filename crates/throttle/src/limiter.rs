use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use libris_kernel::SharedClock;

use crate::policy::Scope;
use crate::rate::Rate;
use crate::violations::ViolationLog;

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Time until the current window closes. Zero when allowed.
    pub retry_after: Duration,
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
}

impl Decision {
    /// Decision for scopes that are not throttled at all.
    pub const fn unlimited() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
            limit: u32::MAX,
            remaining: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ThrottleKey {
    identity: String,
    scope: String,
}

#[derive(Debug, Clone, Copy)]
struct ThrottleState {
    window_start: DateTime<Utc>,
    count: u32,
    limit: u32,
    period: Duration,
}

impl ThrottleState {
    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        // A clock that stepped backwards counts as no time passing.
        (now - self.window_start).to_std().unwrap_or(Duration::ZERO)
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now) >= self.period
    }
}

/// Fixed-window counters keyed by `(identity, scope)`.
///
/// Each key's state is updated under its map entry lock, so checks for one
/// key are serialized while different keys proceed independently.
#[derive(Debug)]
pub struct RateLimiter {
    states: DashMap<ThrottleKey, ThrottleState>,
    violations: ViolationLog,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            states: DashMap::new(),
            violations: ViolationLog::new(),
            clock,
        }
    }

    /// Count one request for `identity` in `scope` and decide whether it may
    /// proceed.
    ///
    /// The window opens on the first request and resets once `period` has
    /// elapsed since it opened. Denied requests still count. Never fails.
    pub fn allow(&self, identity: &str, scope: &str, limit: u32, period: Duration) -> Decision {
        let now = self.clock.now();
        let key = ThrottleKey {
            identity: identity.to_string(),
            scope: scope.to_string(),
        };

        let decision = {
            let mut state = self.states.entry(key).or_insert(ThrottleState {
                window_start: now,
                count: 0,
                limit,
                period,
            });

            if state.expired(now) || state.period != period || state.limit != limit {
                *state = ThrottleState {
                    window_start: now,
                    count: 0,
                    limit,
                    period,
                };
            }

            state.count = state.count.saturating_add(1);
            if state.count > limit {
                Decision {
                    allowed: false,
                    retry_after: period.saturating_sub(state.elapsed(now)),
                    limit,
                    remaining: 0,
                }
            } else {
                Decision {
                    allowed: true,
                    retry_after: Duration::ZERO,
                    limit,
                    remaining: limit - state.count,
                }
            }
        };

        if !decision.allowed {
            self.record_violation(identity, scope, now, decision.retry_after);
        }
        decision
    }

    /// [`allow`](Self::allow) with a parsed rate.
    pub fn allow_rate(&self, identity: &str, scope: &str, rate: Rate) -> Decision {
        self.allow(identity, scope, rate.limit, rate.period)
    }

    /// Drop windows that have fully elapsed and stale violation counters.
    /// Returns the number of evicted windows.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.states.len();
        self.states.retain(|_, state| !state.expired(now));
        let evicted = before.saturating_sub(self.states.len());
        let pruned = self.violations.prune(now);
        tracing::debug!(evicted, pruned, "throttle sweep complete");
        evicted
    }

    /// Number of live windows.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn violations(&self) -> &ViolationLog {
        &self.violations
    }

    fn record_violation(&self, identity: &str, scope: &str, now: DateTime<Utc>, wait: Duration) {
        let today = self.violations.record(scope, now);
        if scope == Scope::Monitored.as_str() {
            tracing::warn!(
                identity,
                scope,
                retry_after_secs = wait.as_secs(),
                violations_today = today,
                "throttle violation on monitored scope"
            );
        } else {
            tracing::debug!(
                identity,
                scope,
                retry_after_secs = wait.as_secs(),
                violations_today = today,
                "request throttled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use libris_kernel::{Clock, ManualClock};
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::default();
        (RateLimiter::new(clock.shared()), clock)
    }

    #[test]
    fn three_per_minute_then_denied_then_reset() {
        let (limiter, clock) = limiter();

        for _ in 0..3 {
            assert!(limiter.allow("user:1", "borrow", 3, MINUTE).allowed);
        }

        clock.advance(ChronoDuration::seconds(20));
        let denied = limiter.allow("user:1", "borrow", 3, MINUTE);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(40));
        assert_eq!(denied.remaining, 0);

        clock.advance(ChronoDuration::seconds(40));
        let fresh = limiter.allow("user:1", "borrow", 3, MINUTE);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[test]
    fn keys_are_independent_per_identity_and_scope() {
        let (limiter, _) = limiter();

        assert!(limiter.allow("user:1", "borrow", 1, MINUTE).allowed);
        assert!(!limiter.allow("user:1", "borrow", 1, MINUTE).allowed);

        assert!(limiter.allow("user:2", "borrow", 1, MINUTE).allowed);
        assert!(limiter.allow("user:1", "search", 1, MINUTE).allowed);
        assert_eq!(limiter.tracked(), 3);
    }

    #[test]
    fn burst_across_window_edge_admits_twice_the_limit() {
        let (limiter, clock) = limiter();

        // Window opens at t=0 with one request spent.
        assert!(limiter.allow("ip:10.0.0.1", "search", 3, MINUTE).allowed);
        clock.advance(ChronoDuration::seconds(59));
        assert!(limiter.allow("ip:10.0.0.1", "search", 3, MINUTE).allowed);
        assert!(limiter.allow("ip:10.0.0.1", "search", 3, MINUTE).allowed);

        // One second later a new window opens with a full allowance.
        clock.advance(ChronoDuration::seconds(1));
        let granted = (0..4)
            .filter(|_| limiter.allow("ip:10.0.0.1", "search", 3, MINUTE).allowed)
            .count();
        assert_eq!(granted, 3);
        // Five requests passed within two seconds of wall time.
    }

    #[test]
    fn denials_keep_counting_but_do_not_extend_window() {
        let (limiter, clock) = limiter();
        assert!(limiter.allow("u", "monitored", 1, MINUTE).allowed);
        for _ in 0..5 {
            assert!(!limiter.allow("u", "monitored", 1, MINUTE).allowed);
        }
        let today = clock.now().date_naive();
        assert_eq!(limiter.violations().count("monitored", today), 5);

        clock.advance(ChronoDuration::seconds(60));
        assert!(limiter.allow("u", "monitored", 1, MINUTE).allowed);
    }

    #[test]
    fn zero_limit_denies_everything() {
        let (limiter, _) = limiter();
        let decision = limiter.allow("u", "borrow", 0, MINUTE);
        assert!(!decision.allowed);
        assert!(decision.retry_after > Duration::ZERO);
    }

    #[test]
    fn changed_policy_restarts_window() {
        let (limiter, _) = limiter();
        assert!(limiter.allow("u", "membership", 1, MINUTE).allowed);
        assert!(!limiter.allow("u", "membership", 1, MINUTE).allowed);
        // Caller upgraded tier: new limit, new window.
        assert!(limiter.allow("u", "membership", 5, MINUTE).allowed);
    }

    #[test]
    fn sweep_evicts_elapsed_windows() {
        let (limiter, clock) = limiter();
        limiter.allow("a", "search", 5, MINUTE);
        limiter.allow("b", "borrow", 5, Duration::from_secs(86_400));

        clock.advance(ChronoDuration::minutes(2));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn concurrent_callers_share_one_window() {
        let limiter = Arc::new(RateLimiter::new(ManualClock::default().shared()));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.allow("user:7", "borrow", 25, MINUTE).allowed)
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 25);
    }
}
