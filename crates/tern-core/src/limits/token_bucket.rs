//! Token buckets
//!
//! Token counts are stored multiplied by [`TOKEN_BUCKET_CAPACITY_SCALE`] so
//! that a rate of N tokens per second can be refilled by N every tick. A
//! single manager thread updates every live bucket once per
//! [`TOKEN_BUCKET_TICK_INTERVAL`].

use super::DecrementFn;
use crate::config::{TOKEN_BUCKET_CAPACITY_SCALE, TOKEN_BUCKET_TICK_INTERVAL};
use crate::context::Context;
use crate::error::{CancellationCause, LimitError};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

// =============================================================================
// Manager
// =============================================================================

static MANAGER: Lazy<BucketManager> = Lazy::new(BucketManager::start);

struct BucketManager {
    buckets: Arc<DashMap<u64, Weak<TokenBucket>>>,
    next_id: AtomicU64,
}

impl BucketManager {
    fn start() -> Self {
        let buckets: Arc<DashMap<u64, Weak<TokenBucket>>> = Arc::new(DashMap::new());
        let ticked = buckets.clone();
        let spawned = thread::Builder::new()
            .name("token-bucket-manager".to_string())
            .spawn(move || loop {
                thread::sleep(TOKEN_BUCKET_TICK_INTERVAL);
                Self::tick(&ticked);
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start the token bucket manager");
        }
        Self {
            buckets,
            next_id: AtomicU64::new(1),
        }
    }

    fn tick(buckets: &DashMap<u64, Weak<TokenBucket>>) {
        let live: Vec<(u64, Option<Arc<TokenBucket>>)> = buckets
            .iter()
            .map(|entry| (*entry.key(), entry.value().upgrade()))
            .collect();

        for (id, bucket) in live {
            let remove = match bucket {
                Some(bucket) => bucket.update(),
                None => true,
            };
            if remove {
                buckets.remove(&id);
            }
        }
    }

    fn register(&self, bucket: &Arc<TokenBucket>) {
        self.buckets.insert(bucket.id, Arc::downgrade(bucket));
    }
}

// =============================================================================
// Bucket
// =============================================================================

/// Parameters of a new bucket, in real (unscaled) token counts
#[derive(Clone, Default)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens
    pub capacity: i64,
    /// Initial number of tokens, the capacity if `None`
    pub initial_available: Option<i64>,
    /// Tokens added per second
    pub fill_rate: i64,
    /// Depletion function, replaces the refill
    pub decrement: Option<DecrementFn>,
    /// Cancel the attached context once the count goes negative
    pub cancel_context_on_negative_count: bool,
}

struct Waiter {
    id: u64,
    need: i64,
    take: i64,
    wake: Sender<()>,
}

struct BucketState {
    available: i64,
    last_decrement: Instant,
    context: Option<Weak<Context>>,
    waiters: VecDeque<Waiter>,
    should_be_destroyed: bool,
    destroyed: bool,
    cancellation_requested: bool,
}

/// A token bucket, shared by the limiters of a context tree
pub struct TokenBucket {
    id: u64,
    name: String,
    capacity: i64,
    increment: i64,
    decrement: Option<DecrementFn>,
    cancel_context_on_negative_count: bool,
    decrementing_states: AtomicI64,
    next_waiter: AtomicU64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket and hand it to the manager
    pub fn new(name: impl Into<String>, config: TokenBucketConfig) -> Arc<Self> {
        let capacity = config.capacity.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE);
        let available = config
            .initial_available
            .unwrap_or(config.capacity)
            .saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE);

        let bucket = Arc::new(Self {
            id: MANAGER.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            capacity,
            increment: config.fill_rate,
            decrement: config.decrement,
            cancel_context_on_negative_count: config.cancel_context_on_negative_count,
            decrementing_states: AtomicI64::new(0),
            next_waiter: AtomicU64::new(0),
            state: Mutex::new(BucketState {
                available,
                last_decrement: Instant::now(),
                context: None,
                waiters: VecDeque::new(),
                should_be_destroyed: false,
                destroyed: false,
                cancellation_requested: false,
            }),
        });
        MANAGER.register(&bucket);
        bucket
    }

    /// Name of the limit the bucket enforces
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity in tokens
    pub fn capacity(&self) -> i64 {
        self.capacity / TOKEN_BUCKET_CAPACITY_SCALE
    }

    /// Available tokens
    pub fn available(&self) -> i64 {
        self.state.lock().available / TOKEN_BUCKET_CAPACITY_SCALE
    }

    /// Whether the bucket has been destroyed by the manager
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Context cancelled when the count goes negative
    pub fn set_context(&self, ctx: &Arc<Context>) {
        self.state.lock().context = Some(Arc::downgrade(ctx));
    }

    /// Number of states currently depleting the bucket
    pub fn decrementing_state_count(&self) -> i64 {
        self.decrementing_states.load(Ordering::Acquire)
    }

    /// Add a state depleting the bucket
    pub fn resume_one_state_decrementation(&self) {
        self.decrementing_states.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove a state depleting the bucket
    pub fn pause_one_state_decrementation(&self) {
        self.decrementing_states.fetch_sub(1, Ordering::AcqRel);
    }

    /// Ask the manager to destroy the bucket at its next tick
    pub fn destroy(&self) {
        self.state.lock().should_be_destroyed = true;
    }

    /// Take `count` tokens if available, without waiting
    pub fn try_take(&self, count: i64) -> Result<bool, LimitError> {
        let scaled = self.check_count(count)?;
        self.try_take_scaled(scaled, scaled)
    }

    /// Take `count` tokens, waiting for them if needed
    pub fn take(&self, count: i64) -> Result<(), LimitError> {
        let scaled = self.check_count(count)?;
        self.wait_and_take(scaled, scaled, None, None).map(|_| ())
    }

    /// Take `count` tokens, giving up after `max` or once `abort` is
    /// disconnected. Returns whether the tokens were taken.
    pub fn take_until(
        &self,
        count: i64,
        max: Option<Duration>,
        abort: Option<&Receiver<()>>,
    ) -> Result<bool, LimitError> {
        let scaled = self.check_count(count)?;
        let deadline = max.map(|max| Instant::now() + max);
        self.wait_and_take(scaled, scaled, deadline, abort)
    }

    /// Take `count` tokens, waiting at most `max`
    pub fn take_max_duration(&self, count: i64, max: Duration) -> Result<bool, LimitError> {
        self.take_until(count, Some(max), None)
    }

    /// Wait until `count` tokens are available, without taking them
    pub fn wait(&self, count: i64) -> Result<(), LimitError> {
        let scaled = self.check_count(count)?;
        self.wait_and_take(scaled, 0, None, None).map(|_| ())
    }

    /// Put tokens back, up to the capacity
    pub fn give_back(&self, count: i64) {
        let scaled = count.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE);
        let mut state = self.state.lock();
        state.available = state.available.saturating_add(scaled).min(self.capacity);
    }

    fn check_count(&self, count: i64) -> Result<i64, LimitError> {
        let scaled = count.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE);
        if count < 0 || scaled > self.capacity {
            return Err(LimitError::CountAboveCapacity {
                count,
                capacity: self.capacity(),
            });
        }
        Ok(scaled)
    }

    fn try_take_scaled(&self, need: i64, take: i64) -> Result<bool, LimitError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(LimitError::Destroyed);
        }
        if state.waiters.is_empty() && need <= state.available {
            state.available -= take;
            return Ok(true);
        }
        Ok(false)
    }

    fn wait_and_take(
        &self,
        need: i64,
        take: i64,
        deadline: Option<Instant>,
        abort: Option<&Receiver<()>>,
    ) -> Result<bool, LimitError> {
        if self.try_take_scaled(need, take)? {
            return Ok(true);
        }

        let (wake, woken) = channel::bounded(1);
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        self.state.lock().waiters.push_back(Waiter { id, need, take, wake });
        trace!(bucket = %self.name, need, "waiting for tokens");

        let abort = abort.cloned().unwrap_or_else(channel::never);
        let timeout = deadline.map(channel::at).unwrap_or_else(channel::never);
        let served = select! {
            recv(woken) -> _ => true,
            recv(abort) -> _ => false,
            recv(timeout) -> _ => false,
        };

        let mut state = self.state.lock();
        if !served {
            let before = state.waiters.len();
            state.waiters.retain(|waiter| waiter.id != id);
            if state.waiters.len() != before {
                return Ok(false);
            }
        }
        if state.destroyed {
            return Err(LimitError::Destroyed);
        }
        Ok(true)
    }

    /// One manager tick. Returns whether the bucket must be forgotten.
    fn update(&self) -> bool {
        let mut state = self.state.lock();
        if state.destroyed {
            return true;
        }

        match &self.decrement {
            None => {
                if state.available < self.capacity {
                    state.available = state.available.saturating_add(self.increment).min(self.capacity);
                }
            }
            Some(decrement) => {
                let states = self.decrementing_states.load(Ordering::Acquire);
                if states > 0 {
                    let count = u32::try_from(states).unwrap_or(u32::MAX);
                    let removed = decrement(state.last_decrement, count);
                    state.available = state
                        .available
                        .saturating_sub(removed.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE));
                }
            }
        }

        if state.available < 0 && self.cancel_context_on_negative_count && !state.cancellation_requested {
            state.cancellation_requested = true;
            self.request_cancellation(state.context.as_ref());
        }

        state.available = state.available.max(0);
        state.last_decrement = Instant::now();

        if state.should_be_destroyed {
            state.destroyed = true;
            for waiter in state.waiters.drain(..) {
                let _ = waiter.wake.try_send(());
            }
            trace!(bucket = %self.name, "token bucket destroyed");
            return true;
        }

        while let Some(waiter) = state.waiters.front() {
            if state.available < waiter.need {
                break;
            }
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.available -= waiter.take;
            if waiter.wake.try_send(()).is_err() {
                state.available += waiter.take;
            }
        }
        false
    }

    fn request_cancellation(&self, context: Option<&Weak<Context>>) {
        let Some(ctx) = context.and_then(Weak::upgrade) else {
            warn!(bucket = %self.name, "token bucket depleted but its context is gone");
            return;
        };
        trace!(bucket = %self.name, context = ctx.id().as_u64(), "token bucket depleted");

        // Teardown tasks may block: cancellation runs outside of the manager thread.
        let cause = CancellationCause::LimitReached(self.name.clone());
        let spawned = thread::Builder::new()
            .name("limit-cancellation".to_string())
            .spawn(move || ctx.cancel_gracefully_with(cause));
        if let Err(err) = spawned {
            warn!(bucket = %self.name, error = %err, "failed to cancel context of depleted bucket");
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_bucket(capacity: i64, available: i64) -> Arc<TokenBucket> {
        TokenBucket::new(
            "test/rate",
            TokenBucketConfig {
                capacity,
                initial_available: Some(available),
                fill_rate: capacity,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_try_take() {
        let bucket = TokenBucket::new(
            "test/total",
            TokenBucketConfig {
                capacity: 10,
                ..Default::default()
            },
        );
        assert!(bucket.try_take(4).unwrap());
        assert_eq!(bucket.available(), 6);
        assert!(!bucket.try_take(7).unwrap());
        assert!(matches!(
            bucket.try_take(11),
            Err(LimitError::CountAboveCapacity { count: 11, capacity: 10 })
        ));
        assert!(bucket.try_take(-1).is_err());
    }

    #[test]
    fn test_give_back_is_capped() {
        let bucket = rate_bucket(10, 5);
        bucket.give_back(100);
        assert_eq!(bucket.available(), 10);
    }

    #[test]
    fn test_rate_refill_wakes_waiter() {
        // 1000 tokens per second: one token per tick.
        let bucket = rate_bucket(1_000, 0);
        let start = Instant::now();
        bucket.take(20).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_take_max_duration_gives_up() {
        let bucket = TokenBucket::new(
            "test/total",
            TokenBucketConfig {
                capacity: 10,
                initial_available: Some(0),
                ..Default::default()
            },
        );
        assert!(!bucket.take_max_duration(1, Duration::from_millis(10)).unwrap());
        assert_eq!(bucket.state.lock().waiters.len(), 0);
    }

    #[test]
    fn test_waiters_are_served_in_order() {
        let bucket = rate_bucket(1_000, 0);
        let (done, finished) = channel::unbounded();
        let mut handles = Vec::new();
        for i in 0..3 {
            let bucket = bucket.clone();
            let done = done.clone();
            handles.push(thread::spawn(move || {
                bucket.take(100).unwrap();
                done.send(i).unwrap();
            }));
            thread::sleep(Duration::from_millis(5));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let order: Vec<i32> = finished.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_abort_channel_stops_waiting() {
        let bucket = rate_bucket(10, 0);
        let (abort_sender, abort) = channel::bounded::<()>(0);
        drop(abort_sender);
        assert!(!bucket.take_until(5, None, Some(&abort)).unwrap());
    }

    #[test]
    fn test_decrement_fn_depletes() {
        let decrement: DecrementFn = Arc::new(|_, states| i64::from(states) * 1_000);
        let bucket = TokenBucket::new(
            "test/depleted",
            TokenBucketConfig {
                capacity: 1_000_000,
                decrement: Some(decrement),
                ..Default::default()
            },
        );
        thread::sleep(Duration::from_millis(10));
        assert_eq!(bucket.available(), 1_000_000);

        bucket.resume_one_state_decrementation();
        thread::sleep(Duration::from_millis(20));
        let available = bucket.available();
        assert!(available < 1_000_000);

        bucket.pause_one_state_decrementation();
        thread::sleep(Duration::from_millis(5));
        let paused = bucket.available();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(bucket.available(), paused);
    }

    #[test]
    fn test_destroy_wakes_waiters_with_error() {
        let bucket = rate_bucket(10, 0);
        let waiter = {
            let bucket = bucket.clone();
            thread::spawn(move || bucket.take(10))
        };
        thread::sleep(Duration::from_millis(2));
        bucket.destroy();
        let result = waiter.join().unwrap();
        assert!(result.is_ok() || result == Err(LimitError::Destroyed));
        thread::sleep(Duration::from_millis(5));
        assert!(bucket.is_destroyed());
        assert_eq!(bucket.try_take(1), Err(LimitError::Destroyed));
    }
}
