//! Sliding-window request budgets per caller key

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// A request budget: at most `requests` per `window`, optionally followed by a
/// block once exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub requests: usize,
    pub window: Duration,
    pub block_duration: Duration,
}

impl RateLimitRule {
    pub fn new(requests: usize, window: Duration) -> Self {
        Self {
            requests,
            window,
            block_duration: Duration::ZERO,
        }
    }

    pub fn with_block(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }
}

/// Built-in rules, keyed by name
pub fn default_rules() -> HashMap<String, RateLimitRule> {
    let minute = Duration::from_secs(60);
    let hour = Duration::from_secs(3600);
    HashMap::from([
        (
            "login".to_string(),
            RateLimitRule::new(5, minute).with_block(Duration::from_secs(300)),
        ),
        ("register".to_string(), RateLimitRule::new(3, hour)),
        ("refresh".to_string(), RateLimitRule::new(10, minute)),
        ("password_reset".to_string(), RateLimitRule::new(3, hour)),
        ("default".to_string(), RateLimitRule::new(100, minute)),
    ])
}

/// Budget left after an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: usize,
    pub limit: usize,
    /// Until the oldest counted request leaves the window
    pub reset_after: Duration,
}

#[derive(Debug, Default)]
struct Window {
    hits: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

struct LimiterState {
    windows: HashMap<(String, String), Window>,
    last_cleanup: Instant,
}

pub struct RateLimiter {
    rules: HashMap<String, RateLimitRule>,
    cleanup_interval: Duration,
    state: Mutex<LimiterState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl RateLimiter {
    /// `rules` override or extend [`default_rules`]
    pub fn new(rules: HashMap<String, RateLimitRule>) -> Self {
        let mut all = default_rules();
        all.extend(rules);
        Self {
            rules: all,
            cleanup_interval: Duration::from_secs(300),
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// The rule used for `name`; unknown names fall back to `default`
    pub fn rule(&self, name: &str) -> RateLimitRule {
        self.rules
            .get(name)
            .or_else(|| self.rules.get("default"))
            .copied()
            .unwrap_or_else(|| RateLimitRule::new(100, Duration::from_secs(60)))
    }

    /// Count one request by `key` against rule `rule`
    pub fn check(&self, rule: &str, key: &str) -> Result<RateLimitInfo> {
        self.check_at(rule, key, Instant::now())
    }

    pub(crate) fn check_at(&self, rule_name: &str, key: &str, now: Instant) -> Result<RateLimitInfo> {
        let rule = self.rule(rule_name);
        let mut state = self.state.lock();
        self.maybe_cleanup(&mut state, now);

        let window = state
            .windows
            .entry((rule_name.to_string(), key.to_string()))
            .or_default();

        if let Some(until) = window.blocked_until {
            if until > now {
                return Err(limited(
                    "Too many requests",
                    until.saturating_duration_since(now),
                ));
            }
            window.blocked_until = None;
        }

        while let Some(&oldest) = window.hits.front() {
            if now.saturating_duration_since(oldest) >= rule.window {
                window.hits.pop_front();
            } else {
                break;
            }
        }

        if window.hits.len() >= rule.requests {
            let retry_after = if rule.block_duration > Duration::ZERO {
                window.blocked_until = Some(now + rule.block_duration);
                rule.block_duration
            } else {
                window
                    .hits
                    .front()
                    .map(|&oldest| (oldest + rule.window).saturating_duration_since(now))
                    .unwrap_or(rule.window)
            };
            warn!(rule = rule_name, key, "Rate limit exceeded");
            return Err(limited(
                &format!(
                    "Maximum {} requests per {} seconds",
                    rule.requests,
                    rule.window.as_secs()
                ),
                retry_after,
            ));
        }

        window.hits.push_back(now);
        let reset_after = window
            .hits
            .front()
            .map(|&oldest| (oldest + rule.window).saturating_duration_since(now))
            .unwrap_or(rule.window);

        Ok(RateLimitInfo {
            remaining: rule.requests - window.hits.len(),
            limit: rule.requests,
            reset_after,
        })
    }

    /// Forget every window of `key`
    pub fn reset(&self, key: &str) {
        self.state.lock().windows.retain(|(_, k), _| k != key);
    }

    pub fn reset_all(&self) {
        self.state.lock().windows.clear();
    }

    /// Tracked (rule, key) windows
    pub fn tracked(&self) -> usize {
        self.state.lock().windows.len()
    }

    fn maybe_cleanup(&self, state: &mut LimiterState, now: Instant) {
        if now.saturating_duration_since(state.last_cleanup) < self.cleanup_interval {
            return;
        }
        state.last_cleanup = now;
        let before = state.windows.len();
        state.windows.retain(|(rule_name, _), window| {
            let rule = self.rule(rule_name);
            let recent = window
                .hits
                .back()
                .is_some_and(|&last| now.saturating_duration_since(last) < rule.window);
            let blocked = window.blocked_until.is_some_and(|until| until > now);
            recent || blocked
        });
        debug!(removed = before - state.windows.len(), "Rate limiter cleanup");
    }
}

fn limited(message: &str, retry_after: Duration) -> StoreError {
    StoreError::RateLimited {
        message: message.to_string(),
        retry_after: retry_after.max(Duration::from_secs(1)),
    }
}
