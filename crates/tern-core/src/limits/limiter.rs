//! Per-context view of a limit

use super::token_bucket::{TokenBucket, TokenBucketConfig};
use super::{Limit, LimitKind};
use crate::context::Context;
use crate::error::LimitError;
use crate::state::StateId;
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct DecrementationState {
    state_id: Option<StateId>,
    paused: bool,
    stopped: bool,
}

/// Enforces a [`Limit`] for a context.
///
/// The limiters of a child context share the bucket of the parent's
/// limiter. For limits with a decrement function, each state associated
/// with a limiter counts as one consumer of the bucket until its
/// decrementation is paused.
#[derive(Debug)]
pub struct Limiter {
    limit: Limit,
    bucket: Arc<TokenBucket>,
    is_child: bool,
    decrementation: Mutex<DecrementationState>,
}

impl Limiter {
    /// Create a root limiter. `tokens` overrides the initial token count.
    pub fn new(limit: Limit, tokens: Option<i64>) -> Self {
        let fill_rate = match limit.kind {
            LimitKind::SimpleRate | LimitKind::ByteRate => limit.value,
            LimitKind::Total => 0,
        };
        let config = TokenBucketConfig {
            capacity: limit.value,
            initial_available: tokens,
            fill_rate,
            decrement: limit.decrement_fn().cloned(),
            cancel_context_on_negative_count: limit.kind == LimitKind::Total,
        };
        Self {
            bucket: TokenBucket::new(limit.name.clone(), config),
            limit,
            is_child: false,
            decrementation: Mutex::new(DecrementationState::default()),
        }
    }

    /// Limiter of a child context sharing this limiter's bucket
    pub fn child(&self) -> Self {
        self.child_with_limit(self.limit.clone())
    }

    /// Child limiter enforcing a more restrictive value on the same bucket
    pub fn child_with_limit(&self, limit: Limit) -> Self {
        Self {
            limit,
            bucket: self.bucket.clone(),
            is_child: true,
            decrementation: Mutex::new(DecrementationState::default()),
        }
    }

    /// The enforced limit
    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    /// Whether the bucket belongs to an ancestor's limiter
    pub fn is_child(&self) -> bool {
        self.is_child
    }

    /// The underlying bucket
    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    /// Attach the context to cancel on depletion. Ignored by child limiters.
    pub fn set_context_if_not_child(&self, ctx: &Arc<Context>) {
        if !self.is_child {
            self.bucket.set_context(ctx);
        }
    }

    /// Associate the limiter with a state; starts decrementation for
    /// limits with a decrement function. Later calls are ignored.
    pub fn set_state_once(&self, state: StateId) {
        let mut decrementation = self.decrementation.lock();
        if decrementation.state_id.is_some() {
            return;
        }
        decrementation.state_id = Some(state);
        if self.limit.decrement_fn().is_some() {
            self.bucket.resume_one_state_decrementation();
        }
    }

    /// Available tokens
    pub fn available(&self) -> i64 {
        self.bucket.available()
    }

    /// Take `count` tokens. Total limits fail when not enough tokens are
    /// left, rates wait until `abort` is disconnected. Returns whether
    /// the tokens were taken.
    pub fn take(&self, count: i64, abort: Option<&Receiver<()>>) -> Result<bool, LimitError> {
        if self.limit.kind == LimitKind::Total && self.limit.value != 0 {
            let available = self.bucket.available();
            if available < count {
                return Err(LimitError::NotEnoughTokens {
                    name: self.limit.name.clone(),
                    requested: count,
                    available,
                });
            }
        }
        self.bucket.take_until(count, None, abort)
    }

    /// Put tokens back
    pub fn give_back(&self, count: i64) {
        self.bucket.give_back(count);
    }

    /// Whether decrementation is paused for this limiter's state
    pub fn is_paused(&self) -> bool {
        self.decrementation.lock().paused
    }

    /// Stop counting this limiter's state as a consumer of the bucket
    pub fn pause_decrementation(&self) -> Result<(), LimitError> {
        let mut decrementation = self.decrementation.lock();
        if decrementation.stopped || decrementation.state_id.is_none() {
            return Ok(());
        }
        if decrementation.paused {
            return Err(LimitError::AlreadyPaused);
        }
        self.pause(&mut decrementation);
        Ok(())
    }

    /// Pause decrementation unless already paused. Returns whether this
    /// call paused it.
    pub fn pause_decrementation_if_not_paused(&self) -> bool {
        let mut decrementation = self.decrementation.lock();
        if decrementation.stopped || decrementation.paused || decrementation.state_id.is_none() {
            return false;
        }
        self.pause(&mut decrementation);
        true
    }

    /// Count this limiter's state as a consumer of the bucket again
    pub fn resume_decrementation(&self) -> Result<(), LimitError> {
        let mut decrementation = self.decrementation.lock();
        if decrementation.stopped || decrementation.state_id.is_none() {
            return Ok(());
        }
        if !decrementation.paused {
            return Err(LimitError::NotPaused);
        }
        decrementation.paused = false;
        if self.limit.decrement_fn().is_some() {
            self.bucket.resume_one_state_decrementation();
        }
        Ok(())
    }

    /// Pause decrementation for good; later resumes are ignored
    pub fn definitely_stop_decrementation(&self) {
        let mut decrementation = self.decrementation.lock();
        if decrementation.stopped {
            return;
        }
        if !decrementation.paused && decrementation.state_id.is_some() {
            self.pause(&mut decrementation);
        }
        decrementation.stopped = true;
    }

    fn pause(&self, decrementation: &mut DecrementationState) {
        decrementation.paused = true;
        if self.limit.decrement_fn().is_some() {
            self.bucket.pause_one_state_decrementation();
        }
    }

    /// Release the limiter: root limiters destroy their bucket, child
    /// limiters stop their state's decrementation.
    pub fn destroy(&self) {
        if self.is_child {
            self.definitely_stop_decrementation();
        } else {
            self.bucket.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::DecrementFn;
    use std::time::Duration;

    fn decrementing_limit() -> Limit {
        let decrement: DecrementFn = Arc::new(|_, states| i64::from(states));
        Limit::new("test/decrementing", LimitKind::Total, 1_000_000).with_decrement_fn(decrement)
    }

    #[test]
    fn test_total_limit_fails_without_waiting() {
        let limiter = Limiter::new(Limit::new("test/total", LimitKind::Total, 3), None);
        assert!(limiter.take(2, None).unwrap());
        assert_eq!(
            limiter.take(2, None),
            Err(LimitError::NotEnoughTokens {
                name: "test/total".to_string(),
                requested: 2,
                available: 1,
            })
        );
    }

    #[test]
    fn test_initial_tokens() {
        let limiter = Limiter::new(Limit::new("test/total", LimitKind::Total, 10), Some(4));
        assert_eq!(limiter.available(), 4);
    }

    #[test]
    fn test_child_shares_bucket() {
        let parent = Limiter::new(Limit::new("test/total", LimitKind::Total, 10), None);
        let child = parent.child();
        assert!(child.is_child());
        child.take(4, None).unwrap();
        assert_eq!(parent.available(), 6);
    }

    #[test]
    fn test_set_state_once_counts_one_consumer() {
        let limiter = Limiter::new(decrementing_limit(), None);
        limiter.set_state_once(StateId::next());
        limiter.set_state_once(StateId::next());
        assert_eq!(limiter.bucket().decrementing_state_count(), 1);

        let child = limiter.child();
        child.set_state_once(StateId::next());
        assert_eq!(limiter.bucket().decrementing_state_count(), 2);

        child.destroy();
        assert_eq!(limiter.bucket().decrementing_state_count(), 1);
        child.destroy();
        assert_eq!(limiter.bucket().decrementing_state_count(), 1);
    }

    #[test]
    fn test_pause_and_resume() {
        let limiter = Limiter::new(decrementing_limit(), None);
        limiter.set_state_once(StateId::next());

        limiter.pause_decrementation().unwrap();
        assert_eq!(limiter.pause_decrementation(), Err(LimitError::AlreadyPaused));
        assert_eq!(limiter.bucket().decrementing_state_count(), 0);
        assert!(!limiter.pause_decrementation_if_not_paused());

        limiter.resume_decrementation().unwrap();
        assert_eq!(limiter.resume_decrementation(), Err(LimitError::NotPaused));
        assert_eq!(limiter.bucket().decrementing_state_count(), 1);
    }

    #[test]
    fn test_stopped_limiter_ignores_resume() {
        let limiter = Limiter::new(decrementing_limit(), None);
        limiter.set_state_once(StateId::next());
        limiter.definitely_stop_decrementation();
        limiter.resume_decrementation().unwrap();
        assert_eq!(limiter.bucket().decrementing_state_count(), 0);
    }

    #[test]
    fn test_root_destroy_destroys_bucket() {
        let limiter = Limiter::new(Limit::new("test/total", LimitKind::Total, 10), None);
        limiter.destroy();
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.bucket().is_destroyed());
    }
}
