//! Guardrails — the rate-limit and circuit-breaker policy hook.
//!
//! The engine calls `check` once before the first model call of a run,
//! `record_success` on a successful terminal, and `record_failure` on a
//! provider failure. The default implementation is permissive;
//! [`WindowGuardrails`] provides a per-user sliding window plus a
//! consecutive-failure circuit breaker.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use teller_domain::config::GuardrailConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of a guardrail check.
#[derive(Debug, Clone)]
pub struct GuardrailVerdict {
    pub allowed: bool,
    /// Denial reason; set when `allowed` is false.
    pub reason: Option<String>,
    /// Advisory message forwarded even when allowed.
    pub warning: Option<String>,
    pub circuit: CircuitState,
    /// Requests left in the current window, when the policy tracks one.
    pub remaining: Option<u32>,
    pub retry_after: Option<Duration>,
}

impl GuardrailVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            warning: None,
            circuit: CircuitState::Closed,
            remaining: None,
            retry_after: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warning: None,
            circuit: CircuitState::Closed,
            remaining: None,
            retry_after: None,
        }
    }
}

pub trait Guardrails: Send + Sync {
    fn check(&self, user_id: &str) -> GuardrailVerdict;
    fn record_success(&self, user_id: &str);
    fn record_failure(&self, user_id: &str);
}

/// The default policy: everything is allowed, nothing is recorded.
pub struct PermissiveGuardrails;

impl Guardrails for PermissiveGuardrails {
    fn check(&self, _user_id: &str) -> GuardrailVerdict {
        GuardrailVerdict::allow()
    }
    fn record_success(&self, _user_id: &str) {}
    fn record_failure(&self, _user_id: &str) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WindowGuardrails
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct UserState {
    hits: VecDeque<Instant>,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    /// Set while the circuit is half-open and one probe is in flight.
    probing: bool,
}

/// Per-user sliding-window rate limiter with a circuit breaker.
///
/// The window admits `requests_per_window` checks per `window_seconds`.
/// `failure_threshold` consecutive provider failures open the circuit for
/// `cooldown_seconds`; the first check after the cooldown is a half-open
/// probe whose outcome closes or re-opens it.
pub struct WindowGuardrails {
    config: GuardrailConfig,
    users: RwLock<HashMap<String, UserState>>,
}

impl WindowGuardrails {
    pub fn new(config: GuardrailConfig) -> Self {
        Self {
            config,
            users: RwLock::new(HashMap::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_seconds)
    }
}

impl Guardrails for WindowGuardrails {
    fn check(&self, user_id: &str) -> GuardrailVerdict {
        let now = Instant::now();
        let window = self.window();
        let mut users = self.users.write();
        let state = users.entry(user_id.to_string()).or_default();

        if let Some(until) = state.open_until {
            if now < until {
                let mut verdict = GuardrailVerdict::deny("service temporarily unavailable");
                verdict.circuit = CircuitState::Open;
                verdict.retry_after = Some(until - now);
                return verdict;
            }
            // Cooldown elapsed: admit one probe.
            state.open_until = None;
            state.probing = true;
            let mut verdict = GuardrailVerdict::allow();
            verdict.circuit = CircuitState::HalfOpen;
            verdict.warning = Some("circuit half-open; probing".into());
            return verdict;
        }

        while let Some(front) = state.hits.front() {
            if now.duration_since(*front) >= window {
                state.hits.pop_front();
            } else {
                break;
            }
        }

        if state.hits.len() as u32 >= self.config.requests_per_window {
            let mut verdict = GuardrailVerdict::deny("rate limit exceeded");
            verdict.remaining = Some(0);
            verdict.retry_after = state
                .hits
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)));
            return verdict;
        }

        state.hits.push_back(now);
        let remaining = self.config.requests_per_window - state.hits.len() as u32;
        let mut verdict = GuardrailVerdict::allow();
        verdict.remaining = Some(remaining);
        if remaining * 5 <= self.config.requests_per_window {
            verdict.warning = Some(format!("{remaining} requests left in this window"));
        }
        verdict
    }

    fn record_success(&self, user_id: &str) {
        let mut users = self.users.write();
        if let Some(state) = users.get_mut(user_id) {
            state.consecutive_failures = 0;
            state.probing = false;
        }
    }

    fn record_failure(&self, user_id: &str) {
        let cooldown = Duration::from_secs(self.config.cooldown_seconds);
        let mut users = self.users.write();
        let state = users.entry(user_id.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.probing || state.consecutive_failures >= self.config.failure_threshold {
            state.open_until = Some(Instant::now() + cooldown);
            state.probing = false;
            state.consecutive_failures = 0;
            tracing::warn!(user_id, "circuit opened");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(requests: u32, failures: u32) -> GuardrailConfig {
        GuardrailConfig {
            requests_per_window: requests,
            window_seconds: 60,
            failure_threshold: failures,
            cooldown_seconds: 30,
        }
    }

    #[test]
    fn permissive_always_allows() {
        let guardrails = PermissiveGuardrails;
        let verdict = guardrails.check("u1");
        assert!(verdict.allowed);
        assert_eq!(verdict.circuit, CircuitState::Closed);
    }

    #[test]
    fn window_admits_up_to_limit() {
        let guardrails = WindowGuardrails::new(config(3, 5));
        assert!(guardrails.check("u1").allowed);
        assert!(guardrails.check("u1").allowed);
        let third = guardrails.check("u1");
        assert!(third.allowed);
        assert_eq!(third.remaining, Some(0));

        let fourth = guardrails.check("u1");
        assert!(!fourth.allowed);
        assert_eq!(fourth.reason.as_deref(), Some("rate limit exceeded"));
        assert!(fourth.retry_after.is_some());
    }

    #[test]
    fn users_are_isolated() {
        let guardrails = WindowGuardrails::new(config(1, 5));
        assert!(guardrails.check("u1").allowed);
        assert!(!guardrails.check("u1").allowed);
        assert!(guardrails.check("u2").allowed);
    }

    #[test]
    fn failures_open_the_circuit() {
        let guardrails = WindowGuardrails::new(config(100, 2));
        guardrails.record_failure("u1");
        assert!(guardrails.check("u1").allowed);
        guardrails.record_failure("u1");

        let verdict = guardrails.check("u1");
        assert!(!verdict.allowed);
        assert_eq!(verdict.circuit, CircuitState::Open);
        assert!(verdict.retry_after.is_some());
    }

    #[test]
    fn success_resets_failure_streak() {
        let guardrails = WindowGuardrails::new(config(100, 2));
        guardrails.record_failure("u1");
        guardrails.record_success("u1");
        guardrails.record_failure("u1");
        // Streak was reset, so the circuit stays closed.
        assert!(guardrails.check("u1").allowed);
    }

    #[test]
    fn half_open_probe_after_cooldown() {
        let mut cfg = config(100, 1);
        cfg.cooldown_seconds = 0;
        let guardrails = WindowGuardrails::new(cfg);
        guardrails.record_failure("u1");

        // Zero cooldown: next check is the half-open probe.
        let probe = guardrails.check("u1");
        assert!(probe.allowed);
        assert_eq!(probe.circuit, CircuitState::HalfOpen);

        // A failed probe re-opens; with a zero cooldown the next check is
        // another probe rather than a closed circuit.
        guardrails.record_failure("u1");
        let verdict = guardrails.check("u1");
        assert_eq!(verdict.circuit, CircuitState::HalfOpen);

        // A successful probe closes the circuit for good.
        guardrails.record_success("u1");
        assert_eq!(guardrails.check("u1").circuit, CircuitState::Closed);
    }

    #[test]
    fn warning_near_exhaustion() {
        let guardrails = WindowGuardrails::new(config(5, 5));
        for _ in 0..3 {
            assert!(guardrails.check("u1").warning.is_none());
        }
        let fourth = guardrails.check("u1");
        assert!(fourth.allowed);
        assert!(fourth.warning.is_some());
    }
}
