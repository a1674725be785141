use crate::helper::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    pub lockout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_attempts: 5,
            window: Duration::minutes(15),
            lockout: Duration::minutes(30),
        }
    }
}

/// What `record_attempt` did with an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Success: history and lockout for the key were wiped.
    Cleared,
    /// Failure counted; this many more failures are allowed inside the window.
    Counted { remaining_attempts: u32 },
    /// Failure counted and it tripped the lockout.
    LockedOut { until: DateTime<Utc> },
    /// Failure arrived while the key was already locked and was not counted.
    IgnoredWhileLocked,
}

#[derive(Debug, Default)]
struct RateLimitState {
    attempts: VecDeque<DateTime<Utc>>,
    lockout_until: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Expires a finished lockout and drops attempts that fell out of the window.
    fn refresh(&mut self, now: DateTime<Utc>, window: Duration) {
        if let Some(until) = self.lockout_until {
            if now >= until {
                self.lockout_until = None;
                self.attempts.clear();
            }
        }
        let cutoff = now - window;
        while self.attempts.front().map_or(false, |t| *t <= cutoff) {
            self.attempts.pop_front();
        }
    }

    fn remaining_lockout(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.lockout_until.filter(|until| now < *until).map(|until| until - now)
    }

    fn is_empty(&self) -> bool {
        self.attempts.is_empty() && self.lockout_until.is_none()
    }
}

#[derive(Debug)]
struct Tracked {
    keys: HashMap<String, RateLimitState>,
    swept_at: DateTime<Utc>,
}

impl Tracked {
    /// Drops every key whose attempts and lockout have all run out.
    fn sweep(&mut self, now: DateTime<Utc>, window: Duration) {
        let before = self.keys.len();
        self.keys.retain(|_, state| {
            state.refresh(now, window);
            !state.is_empty()
        });
        self.swept_at = now;
        if before != self.keys.len() {
            log::debug!("Rate limiter dropped {} idle key(s).", before - self.keys.len());
        }
    }
}

/// Sliding-window failed-login counter with temporary lockout, keyed by identity.
///
/// Every public method takes the internal lock once, so the
/// lock-check / count / threshold-check sequence for a key is atomic within the process.
/// Idle keys are swept at most once per window, so the map stays bounded by recent traffic.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    states: Mutex<Tracked>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let swept_at = clock.now();
        RateLimiter {
            config,
            clock,
            states: Mutex::new(Tracked {
                keys: HashMap::new(),
                swept_at,
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn normalize_key(key: &str) -> String {
        key.trim().to_lowercase()
    }

    fn lock_states(&self) -> MutexGuard<'_, Tracked> {
        self.states.lock().unwrap_or_else(|poisoned| {
            log::error!("Rate limiter state lock was poisoned! Recovering lock.");
            poisoned.into_inner()
        })
    }

    /// Runs `f` on the refreshed state for `key`, dropping the entry afterwards if it holds nothing.
    fn with_state<T>(&self, key: &str, f: impl FnOnce(&mut RateLimitState, DateTime<Utc>) -> T) -> T {
        let now = self.clock.now();
        let key = Self::normalize_key(key);
        let mut tracked = self.lock_states();
        if now - tracked.swept_at >= self.config.window {
            tracked.sweep(now, self.config.window);
        }
        let state = tracked.keys.entry(key.clone()).or_default();
        state.refresh(now, self.config.window);
        let result = f(state, now);
        if state.is_empty() {
            tracked.keys.remove(&key);
        }
        result
    }

    /// Remaining lockout for `key`, or `None` when the key may attempt a login.
    pub fn lockout_remaining(&self, key: &str) -> Option<Duration> {
        self.with_state(key, |state, now| state.remaining_lockout(now))
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.lockout_remaining(key).is_some()
    }

    /// Zero when not locked.
    pub fn remaining_lockout_ms(&self, key: &str) -> i64 {
        self.lockout_remaining(key)
            .map(|d| d.num_milliseconds())
            .unwrap_or(0)
    }

    /// Failed attempts currently inside the window for `key`.
    pub fn failed_attempts(&self, key: &str) -> usize {
        self.with_state(key, |state, _| state.attempts.len())
    }

    pub fn record_attempt(&self, key: &str, success: bool) -> AttemptOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let lockout = self.config.lockout;
        let outcome = self.with_state(key, |state, now| {
            if success {
                state.attempts.clear();
                state.lockout_until = None;
                return AttemptOutcome::Cleared;
            }
            if state.remaining_lockout(now).is_some() {
                return AttemptOutcome::IgnoredWhileLocked;
            }
            state.attempts.push_back(now);
            let count = state.attempts.len() as u32;
            if count >= max_attempts {
                let until = now + lockout;
                state.lockout_until = Some(until);
                AttemptOutcome::LockedOut { until }
            } else {
                AttemptOutcome::Counted { remaining_attempts: max_attempts - count }
            }
        });

        if let AttemptOutcome::LockedOut { until } = outcome {
            log::warn!("Login for '{}' locked until {} after repeated failures.", Self::normalize_key(key), until);
        }
        outcome
    }
}
