use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use tokio_util::sync::CancellationToken;

/// Time source for rate limiting.
///
/// `now` is measured from an arbitrary fixed origin. `sleep` must not hold
/// any limiter state.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Tokio-backed clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self { Self::new() }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration { self.origin.elapsed() }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock: time only moves through [`ManualClock::advance`] or a
/// `sleep`, which completes immediately after advancing.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self { Self::default() }

    pub fn advance(&self, duration: Duration) { self.state().now += duration; }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> { self.state().sleeps.clone() }

    pub fn total_slept(&self) -> Duration { self.state().sleeps.iter().sum() }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration { self.state().now }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let mut state = self.state();
        state.now += duration;
        state.sleeps.push(duration);
        Box::pin(future::ready(()))
    }
}

// Longest single wait; the acquire loop re-checks afterwards.
const MAX_WAIT: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Duration,
}

/// Token bucket limiting request rate per resolver.
///
/// Starts full. Refills continuously at `refill_rate` tokens per second up to
/// `capacity`. Requests for more than `capacity` tokens are clamped to it.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish_non_exhaustive()
    }
}

impl TokenBucket {
    /// Create a new TokenBucket with the specified capacity and refill rate.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::with_clock(capacity, refill_rate, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(capacity: u32, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        let capacity = f64::from(capacity.max(1));
        let refill_rate = if refill_rate.is_finite() && refill_rate > 0.0 {
            refill_rate
        } else {
            f64::MIN_POSITIVE
        };
        let now = clock.now();
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
            clock,
        }
    }

    pub fn capacity(&self) -> f64 { self.capacity }

    pub fn refill_rate(&self) -> f64 { self.refill_rate }

    /// Tokens currently available, after refilling.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Take `tokens` if they are available right now.
    pub fn try_acquire(&self, tokens: u32) -> bool { self.reserve(self.clamp(tokens)).is_ok() }

    /// Take `tokens`, waiting for refill as needed. Returns the seconds waited.
    pub async fn acquire(&self, tokens: u32) -> f64 {
        let want = self.clamp(tokens);
        let mut waited = Duration::ZERO;
        loop {
            match self.reserve(want) {
                Ok(()) => return waited.as_secs_f64(),
                Err(wait) => {
                    self.clock.sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up with `None` once `stop` fires.
    pub async fn acquire_cancellable(&self, tokens: u32, stop: &CancellationToken) -> Option<f64> {
        let want = self.clamp(tokens);
        let mut waited = Duration::ZERO;
        loop {
            if stop.is_cancelled() {
                return None;
            }
            match self.reserve(want) {
                Ok(()) => return Some(waited.as_secs_f64()),
                Err(wait) => {
                    tokio::select! {
                        _ = stop.cancelled() => return None,
                        _ = self.clock.sleep(wait) => waited += wait,
                    }
                }
            }
        }
    }

    fn clamp(&self, tokens: u32) -> f64 { f64::from(tokens).min(self.capacity) }

    // Takes the tokens or reports how long until enough have accumulated.
    fn reserve(&self, want: f64) -> Result<(), Duration> {
        let mut state = self.lock();
        self.refill(&mut state);
        if state.tokens >= want {
            state.tokens -= want;
            return Ok(());
        }
        let secs = (want - state.tokens) / self.refill_rate;
        let wait = Duration::try_from_secs_f64(secs).unwrap_or(MAX_WAIT).min(MAX_WAIT);
        // never spin on a zero-length wait
        Err(wait.max(Duration::from_micros(1)))
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_sub(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
