use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use smartquery_common::{LimitsConfig, ResolutionError};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

type Gate<C> = governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Timestamp of the most recent outbound request. Written only by
/// [`RateLimiter`], just before the call goes out.
#[derive(Debug, Default)]
pub struct RateLimitState {
    last_request: Option<Instant>,
}

impl RateLimitState {
    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }
}

/// Enforces a minimum spacing between outbound requests: a one-slot
/// `governor` quota replenished every `min_interval`. Clones share the
/// quota and the [`RateLimitState`]. A zero interval disables the gate.
#[derive(Clone)]
pub struct RateLimiter<C: Clock = DefaultClock> {
    gate: Option<Arc<Gate<C>>>,
    clock: C,
    state: Arc<Mutex<RateLimitState>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, DefaultClock::default())
    }

    /// Wait until the quota has a free slot, then stamp the request time.
    /// Returns how long this caller waited.
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        if let Some(gate) = &self.gate {
            gate.until_ready().await;
        }
        let waited = start.elapsed();
        if waited >= Duration::from_millis(1) {
            debug!(wait_ms = waited.as_millis() as u64, "rate limited request");
        }
        self.stamp();
        waited
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        let gate = Quota::with_period(min_interval).map(|quota| {
            Arc::new(governor::RateLimiter::direct_with_clock(quota.allow_burst(NonZeroU32::MIN), &clock))
        });
        Self {
            gate,
            clock,
            state: Arc::new(Mutex::new(RateLimitState::default())),
        }
    }

    /// Claim a slot without waiting. A refusal carries the time until the
    /// next slot frees up, and leaves the state untouched.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if let Some(gate) = &self.gate {
            gate.check().map_err(|not_until| not_until.wait_time_from(self.clock.now()))?;
        }
        self.stamp();
        Ok(())
    }

    pub fn last_request(&self) -> Option<Instant> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last_request()
    }

    fn stamp(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last_request = Some(Instant::now());
    }
}

/// Bounded retry with linear backoff (`attempt × backoff_step`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    is_retryable: fn(&ResolutionError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
            is_retryable: ResolutionError::is_rate_limited,
        }
    }

    pub fn with_predicate(mut self, is_retryable: fn(&ResolutionError) -> bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Run `op` through `limiter` until it succeeds, fails with a
    /// non-retryable error, or attempts run out.
    pub async fn run<T, F, Fut>(&self, limiter: &RateLimiter, op: F) -> Result<T, ResolutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResolutionError>>,
    {
        self.run_until(limiter, || true, op).await
    }

    /// Like [`run`](Self::run), but `keep_going` is consulted after every
    /// retryable failure, before the backoff sleep and again before the next
    /// attempt. Once it returns false the loop stops and hands back the
    /// failure it was holding, without another request or another stamp.
    pub async fn run_until<T, F, Fut>(
        &self,
        limiter: &RateLimiter,
        keep_going: impl Fn() -> bool,
        mut op: F,
    ) -> Result<T, ResolutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResolutionError>>,
    {
        let mut pending: Option<ResolutionError> = None;
        for attempt in 1..=self.max_attempts {
            if let Some(e) = pending.take() {
                if !keep_going() {
                    debug!(attempt, "retry abandoned before the next attempt");
                    return Err(e);
                }
            }
            limiter.acquire().await;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if (self.is_retryable)(&e) => {
                    if !keep_going() {
                        debug!(attempt, "retry abandoned before backoff");
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable provider failure"
                    );
                    sleep(delay).await;
                    pending = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(ResolutionError::RateLimitExceeded { attempts: self.max_attempts })
    }
}

impl From<&LimitsConfig> for RetryPolicy {
    fn from(cfg: &LimitsConfig) -> Self {
        Self::new(cfg.max_attempts, Duration::from_millis(cfg.backoff_step_ms))
    }
}

impl From<&LimitsConfig> for RateLimiter {
    fn from(cfg: &LimitsConfig) -> Self {
        Self::new(Duration::from_millis(cfg.min_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const INTERVAL: Duration = Duration::from_millis(2000);

    // Spacing is exercised on a fake clock; the retry tests below run on
    // paused tokio time with an ungated limiter.
    fn unthrottled() -> RateLimiter {
        RateLimiter::new(Duration::ZERO)
    }

    #[test]
    fn second_request_waits_out_the_interval() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(INTERVAL, clock.clone());
        assert_eq!(limiter.try_acquire(), Ok(()));
        clock.advance(Duration::from_millis(500));
        assert_eq!(limiter.try_acquire(), Err(Duration::from_millis(1500)));
        clock.advance(Duration::from_millis(1500));
        assert_eq!(limiter.try_acquire(), Ok(()));
    }

    #[test]
    fn refusal_leaves_state_alone() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(INTERVAL, clock.clone());
        assert!(limiter.last_request().is_none());
        limiter.try_acquire().unwrap();
        let stamped = limiter.last_request();
        assert!(stamped.is_some());
        assert!(limiter.try_acquire().is_err());
        assert_eq!(limiter.last_request(), stamped);
    }

    #[test]
    fn clones_share_the_quota() {
        let clock = FakeRelativeClock::default();
        let a = RateLimiter::with_clock(INTERVAL, clock.clone());
        let b = a.clone();
        a.try_acquire().unwrap();
        assert!(b.try_acquire().is_err());
        clock.advance(INTERVAL);
        assert!(b.try_acquire().is_ok());
    }

    #[test]
    fn zero_interval_never_refuses() {
        let limiter = RateLimiter::with_clock(Duration::ZERO, FakeRelativeClock::default());
        for _ in 0..5 {
            assert_eq!(limiter.try_acquire(), Ok(()));
        }
    }

    #[tokio::test]
    async fn acquire_blocks_until_the_slot_frees() {
        let limiter = RateLimiter::new(Duration::from_millis(60));
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(limiter.last_request().is_some_and(|t| t >= start));
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();
        let out = policy
            .run(&unthrottled(), move || async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(ResolutionError::RateLimited("429".into())),
                    _ => Ok("done"),
                }
            })
            .await;
        assert_eq!(out, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn always_limited_gives_up_after_three() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();
        let out: Result<(), _> = policy
            .run(&unthrottled(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ResolutionError::RateLimited("quota".into()))
            })
            .await;
        assert_eq!(out, Err(ResolutionError::RateLimitExceeded { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s + 4s + 6s of backoff
        assert!(start.elapsed() >= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: Result<(), _> = RetryPolicy::default()
            .run(&unthrottled(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ResolutionError::MalformedResponse("prose".into()))
            })
            .await;
        assert!(matches!(out, Err(ResolutionError::MalformedResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_retries_provider_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(2, Duration::from_millis(10))
            .with_predicate(|e| matches!(e, ResolutionError::Provider(_)));
        let out: Result<(), _> = policy
            .run(&unthrottled(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ResolutionError::Provider("503".into()))
            })
            .await;
        assert_eq!(out, Err(ResolutionError::RateLimitExceeded { attempts: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_retry_makes_no_further_calls() {
        let calls = AtomicU32::new(0);
        let live = AtomicBool::new(true);
        let (counter, flag) = (&calls, &live);
        let start = tokio::time::Instant::now();
        let out: Result<(), _> = RetryPolicy::default()
            .run_until(
                &unthrottled(),
                || live.load(Ordering::SeqCst),
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    flag.store(false, Ordering::SeqCst);
                    Err(ResolutionError::RateLimited("429".into()))
                },
            )
            .await;
        assert_eq!(out, Err(ResolutionError::RateLimited("429".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // no backoff sleep once abandoned
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_during_backoff_skips_the_next_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let out: Result<(), _> = RetryPolicy::default()
            .run_until(
                &unthrottled(),
                || tokio::time::Instant::now() < deadline,
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ResolutionError::RateLimited("429".into()))
                },
            )
            .await;
        assert!(matches!(out, Err(ResolutionError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::from(&LimitsConfig::default());
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(6));
    }
}
