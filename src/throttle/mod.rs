//! Per-actor attempt throttling with exponential backoff.
//!
//! Counters are keyed by `(actor, action)` so a login storm never throttles
//! signups. Increment and threshold check happen under a single lock
//! acquisition, so two parallel requests cannot both slip past the limit.
//! Stale windows are reset lazily on next access; [`ThrottleLedger::sweep`]
//! reclaims idle entries when run periodically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Signup,
    Login,
    VerifyEmail,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Signup => "signup",
            ActionKind::Login => "login",
            ActionKind::VerifyEmail => "verify_email",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    /// Attempts allowed per window, per key.
    pub max_attempts: u32,
    pub window: Duration,
    /// Backoff for the first violation; doubles per repeat violation.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::from_secs(60),
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl ThrottlePolicy {
    /// `base * 2^(violations-1)`, capped.
    fn backoff_for(&self, violations: u32) -> Duration {
        let exponent = violations.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent));
        backoff.min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Throttled { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug)]
struct Counter {
    count: u32,
    window_start: Instant,
    violations: u32,
    locked_until: Option<Instant>,
}

pub struct ThrottleLedger {
    policy: ThrottlePolicy,
    counters: Mutex<HashMap<(String, ActionKind), Counter>>,
}

impl ThrottleLedger {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_policy() -> Self {
        Self::new(ThrottlePolicy::default())
    }

    /// Record an attempt and decide in one atomic step.
    pub fn check_and_increment(&self, actor: &str, kind: ActionKind) -> Decision {
        let now = Instant::now();
        let mut counters = self.counters.lock().expect("throttle lock poisoned");
        let counter = counters
            .entry((actor.to_string(), kind))
            .or_insert_with(|| Counter {
                count: 0,
                window_start: now,
                violations: 0,
                locked_until: None,
            });

        if let Some(until) = counter.locked_until {
            if now < until {
                return Decision::Throttled {
                    retry_after: until - now,
                };
            }
            counter.locked_until = None;
        }

        // Lazy window reset; violations persist so repeat offenders keep
        // escalating until the entry goes idle and is swept.
        if now.duration_since(counter.window_start) >= self.policy.window {
            counter.count = 0;
            counter.window_start = now;
        }

        counter.count += 1;
        if counter.count > self.policy.max_attempts {
            counter.violations = counter.violations.saturating_add(1);
            let backoff = self.policy.backoff_for(counter.violations);
            counter.locked_until = Some(now + backoff);
            warn!(
                actor = actor,
                action = kind.as_str(),
                violations = counter.violations,
                backoff_secs = backoff.as_secs(),
                "throttle tripped"
            );
            return Decision::Throttled {
                retry_after: backoff,
            };
        }

        Decision::Allowed {
            remaining: self.policy.max_attempts - counter.count,
        }
    }

    /// Forget a key, e.g. after a successful login.
    pub fn reset(&self, actor: &str, kind: ActionKind) {
        let mut counters = self.counters.lock().expect("throttle lock poisoned");
        counters.remove(&(actor.to_string(), kind));
    }

    /// Drop entries whose window elapsed and whose lockout is over.
    pub fn sweep(&self) {
        let now = Instant::now();
        let window = self.policy.window;
        let mut counters = self.counters.lock().expect("throttle lock poisoned");
        let before = counters.len();
        counters.retain(|_, counter| {
            let locked = counter.locked_until.is_some_and(|until| now < until);
            locked || now.duration_since(counter.window_start) < window
        });
        let removed = before - counters.len();
        if removed > 0 {
            debug!(removed, "swept stale throttle counters");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_policy() -> ThrottlePolicy {
        ThrottlePolicy {
            max_attempts: 5,
            window: Duration::from_millis(80),
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(80),
        }
    }

    #[test]
    fn sixth_call_in_window_is_throttled() {
        let ledger = ThrottleLedger::new(quick_policy());
        for _ in 0..5 {
            assert!(ledger.check_and_increment("1.2.3.4", ActionKind::Login).is_allowed());
        }
        let decision = ledger.check_and_increment("1.2.3.4", ActionKind::Login);
        assert!(matches!(decision, Decision::Throttled { .. }));
    }

    #[test]
    fn window_elapse_readmits() {
        let ledger = ThrottleLedger::new(ThrottlePolicy {
            max_attempts: 2,
            window: Duration::from_millis(40),
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        });
        assert!(ledger.check_and_increment("a", ActionKind::Login).is_allowed());
        assert!(ledger.check_and_increment("a", ActionKind::Login).is_allowed());
        assert!(!ledger.check_and_increment("a", ActionKind::Login).is_allowed());

        // Outlast both the window and the first backoff.
        std::thread::sleep(Duration::from_millis(60));
        assert!(ledger.check_and_increment("a", ActionKind::Login).is_allowed());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let ledger = ThrottleLedger::new(ThrottlePolicy {
            max_attempts: 1,
            window: Duration::from_secs(10),
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        });
        assert!(ledger.check_and_increment("a", ActionKind::Login).is_allowed());

        let mut backoffs = Vec::new();
        for _ in 0..4 {
            match ledger.check_and_increment("a", ActionKind::Login) {
                Decision::Throttled { retry_after } => {
                    backoffs.push(retry_after);
                    std::thread::sleep(retry_after + Duration::from_millis(5));
                }
                Decision::Allowed { .. } => panic!("expected throttle"),
            }
        }
        // 10ms, 20ms, 40ms, capped at 40ms.
        assert!(backoffs[1] > backoffs[0]);
        assert!(backoffs[2] > backoffs[1]);
        assert_eq!(backoffs[3], Duration::from_millis(40));
        assert!(backoffs.iter().all(|b| *b <= Duration::from_millis(40)));
    }

    #[test]
    fn locked_out_calls_report_remaining_time() {
        let ledger = ThrottleLedger::new(ThrottlePolicy {
            max_attempts: 1,
            window: Duration::from_secs(10),
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(10),
        });
        assert!(ledger.check_and_increment("a", ActionKind::Login).is_allowed());
        let first = match ledger.check_and_increment("a", ActionKind::Login) {
            Decision::Throttled { retry_after } => retry_after,
            _ => panic!("expected throttle"),
        };
        let second = match ledger.check_and_increment("a", ActionKind::Login) {
            Decision::Throttled { retry_after } => retry_after,
            _ => panic!("expected throttle"),
        };
        // Still the same lockout, counting down.
        assert!(second <= first);
    }

    #[test]
    fn action_kinds_are_independent() {
        let ledger = ThrottleLedger::new(quick_policy());
        for _ in 0..6 {
            ledger.check_and_increment("a", ActionKind::Login);
        }
        assert!(!ledger.check_and_increment("a", ActionKind::Login).is_allowed());
        assert!(ledger.check_and_increment("a", ActionKind::Signup).is_allowed());
    }

    #[test]
    fn actors_are_independent() {
        let ledger = ThrottleLedger::new(quick_policy());
        for _ in 0..6 {
            ledger.check_and_increment("a", ActionKind::Login);
        }
        assert!(ledger.check_and_increment("b", ActionKind::Login).is_allowed());
    }

    #[test]
    fn reset_clears_the_counter() {
        let ledger = ThrottleLedger::new(quick_policy());
        for _ in 0..6 {
            ledger.check_and_increment("a", ActionKind::Login);
        }
        assert!(!ledger.check_and_increment("a", ActionKind::Login).is_allowed());
        ledger.reset("a", ActionKind::Login);
        assert!(ledger.check_and_increment("a", ActionKind::Login).is_allowed());
    }

    #[test]
    fn sweep_reclaims_idle_entries_only() {
        let ledger = ThrottleLedger::new(ThrottlePolicy {
            max_attempts: 1,
            window: Duration::from_millis(20),
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(10),
        });
        ledger.check_and_increment("idle", ActionKind::Login);
        ledger.check_and_increment("locked", ActionKind::Login);
        ledger.check_and_increment("locked", ActionKind::Login); // trips, long lockout

        std::thread::sleep(Duration::from_millis(30));
        ledger.sweep();

        let counters = ledger.counters.lock().expect("throttle lock poisoned");
        assert!(!counters.contains_key(&("idle".to_string(), ActionKind::Login)));
        assert!(counters.contains_key(&("locked".to_string(), ActionKind::Login)));
    }
}
