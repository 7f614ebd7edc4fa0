//! Throttle & Retry Policy
//!
//! Two independent guards around outbound inference requests:
//!
//! - a minimum gap between dispatches, checked and stamped atomically
//!   against a shared [`ThrottleState`]; calls inside the gap are rejected,
//!   never queued
//! - an exponential back-off loop for rate-limited (HTTP 429) attempts,
//!   honoring a server wait hint when one is given

use crate::domain::settings::InferenceSettings;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Timestamp of the last dispatch, shared by every policy that must be
/// throttled together. Starts as "never dispatched".
#[derive(Debug, Default)]
pub struct ThrottleState {
    last_dispatch: Mutex<Option<Instant>>,
}

impl ThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        *self.lock()
    }

    /// Check-and-stamp under a single lock.
    fn try_admit(&self, now: Instant, min_gap: Duration) -> bool {
        let mut last = self.lock();
        if let Some(previous) = *last {
            if now.saturating_duration_since(previous) < min_gap {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    fn stamp(&self, now: Instant) {
        *self.lock() = Some(now);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        // The guarded value is a plain timestamp; a poisoned lock still holds a valid one
        self.last_dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub min_gap: Duration,
    /// Total attempts, the first one included
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::from(&InferenceSettings::default())
    }
}

impl From<&InferenceSettings> for ThrottleConfig {
    fn from(settings: &InferenceSettings) -> Self {
        Self {
            min_gap: Duration::from_millis(settings.min_gap_ms),
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
        }
    }
}

/// Result of one dispatch attempt as seen by the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    RateLimited { retry_after: Option<Duration> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// Every attempt was rate limited
    Exhausted { attempts: u32 },
}

pub struct ThrottlePolicy {
    config: ThrottleConfig,
    state: Arc<ThrottleState>,
    clock: Arc<dyn Clock>,
}

impl ThrottlePolicy {
    pub fn new(config: ThrottleConfig, state: Arc<ThrottleState>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state,
            clock,
        }
    }

    pub fn with_system_clock(config: ThrottleConfig, state: Arc<ThrottleState>) -> Self {
        Self::new(config, state, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ThrottleState> {
        &self.state
    }

    /// Admit a new request if the minimum gap has elapsed. An admitted call
    /// stamps the shared timestamp before returning; a rejected one leaves it.
    pub fn admit(&self) -> bool {
        let admitted = self.state.try_admit(self.clock.now(), self.config.min_gap);
        if !admitted {
            debug!("Request rejected: inside the {:?} minimum gap", self.config.min_gap);
        }
        admitted
    }

    /// Drive `attempt` until it completes, fails, or every attempt is rate
    /// limited. Errors from `attempt` are returned at once, without retry.
    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Attempt<T>, E>>,
    {
        let max_attempts = self.config.max_retries.max(1);
        let mut backoff = self.config.initial_backoff;

        for n in 1..=max_attempts {
            if n > 1 {
                self.state.stamp(self.clock.now());
            }

            match attempt(n).await? {
                Attempt::Done(value) => return Ok(RetryOutcome::Completed(value)),
                Attempt::RateLimited { retry_after } => {
                    if n == max_attempts {
                        break;
                    }
                    let wait = retry_delay(retry_after, backoff);
                    warn!(
                        "429 -> waiting {:.1}s (attempt {}/{})",
                        wait.as_secs_f64(),
                        n,
                        max_attempts
                    );
                    tokio::time::sleep(wait).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }

        warn!("Rate limit persisted for {} attempts", max_attempts);
        Ok(RetryOutcome::Exhausted {
            attempts: max_attempts,
        })
    }
}

/// The server hint wins when it is a positive duration.
pub fn retry_delay(retry_after: Option<Duration>, backoff: Duration) -> Duration {
    match retry_after {
        Some(hint) if !hint.is_zero() => hint,
        _ => backoff,
    }
}

/// Longest server wait hint honored; larger hints are capped to this.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Parse a `retry-after` header value given in (possibly fractional) seconds.
/// Values a `Duration` cannot hold are ignored so the back-off applies.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if seconds.is_nan() || seconds <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds)
        .ok()
        .map(|hint| hint.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Clock advanced by hand
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn config(min_gap_ms: u64, max_retries: u32, initial_backoff_ms: u64) -> ThrottleConfig {
        ThrottleConfig {
            min_gap: Duration::from_millis(min_gap_ms),
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
        }
    }

    fn policy(clock: Arc<ManualClock>, state: Arc<ThrottleState>) -> ThrottlePolicy {
        ThrottlePolicy::new(config(3000, 3, 1), state, clock)
    }

    #[test]
    fn test_admit_respects_min_gap() {
        let clock = Arc::new(ManualClock::new());
        let throttle = policy(clock.clone(), Arc::new(ThrottleState::new()));

        assert!(throttle.admit());
        assert!(!throttle.admit());

        clock.advance(Duration::from_millis(2999));
        assert!(!throttle.admit());

        clock.advance(Duration::from_millis(1));
        assert!(throttle.admit());
    }

    #[test]
    fn test_rejection_leaves_timestamp_untouched() {
        let clock = Arc::new(ManualClock::new());
        let state = Arc::new(ThrottleState::new());
        let throttle = policy(clock.clone(), state.clone());

        assert_eq!(state.last_dispatch(), None);
        assert!(throttle.admit());
        let first = state.last_dispatch();

        clock.advance(Duration::from_millis(1000));
        assert!(!throttle.admit());
        assert_eq!(state.last_dispatch(), first);

        // Measured from the first admission, not the rejected call
        clock.advance(Duration::from_millis(2000));
        assert!(throttle.admit());
    }

    #[test]
    fn test_shared_state_throttles_all_holders() {
        let clock = Arc::new(ManualClock::new());
        let state = Arc::new(ThrottleState::new());
        let a = policy(clock.clone(), state.clone());
        let b = policy(clock.clone(), state);

        assert!(a.admit());
        assert!(!b.admit());

        // Independent state, independent gate
        let c = policy(clock, Arc::new(ThrottleState::new()));
        assert!(c.admit());
    }

    #[test]
    fn test_retry_delay_prefers_positive_hint() {
        let backoff = Duration::from_millis(1500);
        assert_eq!(retry_delay(None, backoff), backoff);
        assert_eq!(retry_delay(Some(Duration::ZERO), backoff), backoff);
        assert_eq!(
            retry_delay(Some(Duration::from_secs(2)), backoff),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("0"), None);
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("inf"), None);
        assert_eq!(parse_retry_after("1e30"), None);
        assert_eq!(parse_retry_after("3600"), Some(MAX_RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_run_returns_first_success() {
        let throttle = policy(Arc::new(ManualClock::new()), Arc::new(ThrottleState::new()));
        let calls = AtomicU32::new(0);

        let outcome: Result<_, ()> = throttle
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Attempt::Done("ok")) }
            })
            .await;

        assert_eq!(outcome, Ok(RetryOutcome::Completed("ok")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_retries_rate_limits_then_succeeds() {
        let throttle = policy(Arc::new(ManualClock::new()), Arc::new(ThrottleState::new()));

        let outcome: Result<_, ()> = throttle
            .run(|n| async move {
                if n < 3 {
                    Ok(Attempt::RateLimited { retry_after: None })
                } else {
                    Ok(Attempt::Done(n))
                }
            })
            .await;

        assert_eq!(outcome, Ok(RetryOutcome::Completed(3)));
    }

    #[tokio::test]
    async fn test_run_exhausts_after_max_attempts_with_doubling_backoff() {
        let throttle = ThrottlePolicy::new(
            config(0, 3, 20),
            Arc::new(ThrottleState::new()),
            Arc::new(ManualClock::new()),
        );
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let outcome: Result<RetryOutcome<()>, ()> = throttle
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Attempt::RateLimited { retry_after: None }) }
            })
            .await;

        assert_eq!(outcome, Ok(RetryOutcome::Exhausted { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 20ms then 40ms; no wait after the final attempt
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_run_does_not_retry_hard_errors() {
        let throttle = policy(Arc::new(ManualClock::new()), Arc::new(ThrottleState::new()));
        let calls = AtomicU32::new(0);

        let outcome: Result<RetryOutcome<()>, &str> = throttle
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            })
            .await;

        assert_eq!(outcome, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_restamp_shared_timestamp() {
        let clock = Arc::new(ManualClock::new());
        let state = Arc::new(ThrottleState::new());
        let throttle = policy(clock.clone(), state.clone());

        assert!(throttle.admit());
        let admitted_at = state.last_dispatch().unwrap();

        let outcome: Result<_, ()> = throttle
            .run(|n| {
                clock.advance(Duration::from_secs(5));
                async move {
                    if n == 1 {
                        Ok(Attempt::RateLimited { retry_after: None })
                    } else {
                        Ok(Attempt::Done(()))
                    }
                }
            })
            .await;

        assert_eq!(outcome, Ok(RetryOutcome::Completed(())));
        // Stamped before the second dispatch, after the first advance
        assert_eq!(
            state.last_dispatch(),
            Some(admitted_at + Duration::from_secs(5))
        );
    }
}
