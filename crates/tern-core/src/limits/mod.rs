//! Limits
//!
//! A [`Limit`] names a resource budget: a rate (tokens refilled every second)
//! or a total (tokens never refilled, or depleted by a decrement function for
//! time budgets). Each context holds one [`Limiter`] per limit; limiters of
//! child contexts share the token bucket of their parent.

mod limiter;
mod registry;
mod token_bucket;

pub use limiter::Limiter;
pub use registry::{get_limit, registry, LimitRegistry};
pub use token_bucket::{TokenBucket, TokenBucketConfig};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Kind of a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Operations per second
    SimpleRate,
    /// Bytes per second
    ByteRate,
    /// Total amount, not refilled
    Total,
}

/// Value a limit is declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitValue {
    /// Operations per second
    SimpleRate(i64),
    /// Bytes per second
    ByteRate(i64),
    /// Total count
    Int(i64),
    /// Total duration, counted in nanoseconds
    Duration(Duration),
}

/// Number of tokens to remove from a bucket at a tick, given the time of the
/// previous tick and the number of states consuming the bucket
pub type DecrementFn = Arc<dyn Fn(Instant, u32) -> i64 + Send + Sync>;

/// A named limit bound to a value
#[derive(Clone)]
pub struct Limit {
    /// Registered name
    pub name: String,
    /// Kind
    pub kind: LimitKind,
    /// Capacity (rates: tokens per second)
    pub value: i64,
    decrement: Option<DecrementFn>,
}

impl Limit {
    /// Create a limit without decrement function
    pub fn new(name: impl Into<String>, kind: LimitKind, value: i64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            decrement: None,
        }
    }

    /// Attach a decrement function
    pub fn with_decrement_fn(mut self, decrement: DecrementFn) -> Self {
        self.decrement = Some(decrement);
        self
    }

    /// Decrement function of time budgets
    pub fn decrement_fn(&self) -> Option<&DecrementFn> {
        self.decrement.as_ref()
    }

    /// Whether the limit allows at least as much as `other` (same name and kind)
    pub fn less_restrictive_than(&self, other: &Limit) -> bool {
        self.name == other.name && self.kind == other.kind && self.value >= other.value
    }
}

impl fmt::Debug for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limit")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("decrement", &self.decrement.is_some())
            .finish()
    }
}

impl PartialEq for Limit {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.value == other.value
    }
}
