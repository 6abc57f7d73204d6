//! Process-wide registry of limit names

use super::{DecrementFn, Limit, LimitKind, LimitValue};
use crate::config::{
    EXECUTION_CPU_TIME_LIMIT_NAME, EXECUTION_TOTAL_LIMIT_NAME, MAX_LIMIT_VALUE,
    THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME,
};
use crate::error::LimitError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;

static REGISTRY: Lazy<LimitRegistry> = Lazy::new(LimitRegistry::with_defaults);

/// The process-wide registry
pub fn registry() -> &'static LimitRegistry {
    &REGISTRY
}

/// Resolve a limit against the process-wide registry
pub fn get_limit(name: &str, value: LimitValue) -> Result<Limit, LimitError> {
    REGISTRY.get_limit(name, value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
    kind: LimitKind,
    minimum: i64,
}

/// Registered limit names with their kind and minimum value
#[derive(Debug, Default)]
pub struct LimitRegistry {
    registrations: Mutex<FxHashMap<String, Registration>>,
}

impl LimitRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the execution and lthread limits
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_defaults();
        registry
    }

    fn register_defaults(&self) {
        let mut registrations = self.registrations.lock();
        for name in [
            EXECUTION_TOTAL_LIMIT_NAME,
            EXECUTION_CPU_TIME_LIMIT_NAME,
            THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME,
        ] {
            registrations.insert(
                name.to_string(),
                Registration {
                    kind: LimitKind::Total,
                    minimum: 0,
                },
            );
        }
    }

    /// Register a limit. Registering the same name twice is accepted only
    /// with the same kind and minimum.
    pub fn register(&self, name: &str, kind: LimitKind, minimum: i64) -> Result<(), LimitError> {
        let mut registrations = self.registrations.lock();
        let registration = Registration { kind, minimum };
        match registrations.get(name) {
            Some(existing) if *existing != registration => {
                Err(LimitError::ConflictingRegistration(name.to_string()))
            }
            Some(_) => Ok(()),
            None => {
                registrations.insert(name.to_string(), registration);
                Ok(())
            }
        }
    }

    /// Kind and minimum of a registered limit
    pub fn info(&self, name: &str) -> Option<(LimitKind, i64)> {
        self.registrations
            .lock()
            .get(name)
            .map(|r| (r.kind, r.minimum))
    }

    /// Forget every registration but the default ones
    pub fn reset(&self) {
        self.registrations.lock().clear();
        self.register_defaults();
    }

    /// Build a limit from a declared value.
    ///
    /// Integers and durations declare total limits (durations in
    /// nanoseconds). The execution time limits get their decrement function.
    pub fn get_limit(&self, name: &str, value: LimitValue) -> Result<Limit, LimitError> {
        let (kind, value) = match value {
            LimitValue::SimpleRate(rate) => (LimitKind::SimpleRate, rate),
            LimitValue::ByteRate(rate) => (LimitKind::ByteRate, rate),
            LimitValue::Int(count) => (LimitKind::Total, count),
            LimitValue::Duration(duration) => (
                LimitKind::Total,
                i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX),
            ),
        };

        let (registered_kind, minimum) = self
            .info(name)
            .ok_or_else(|| LimitError::NotRegistered(name.to_string()))?;
        if kind != registered_kind {
            return Err(LimitError::KindMismatch(name.to_string()));
        }
        if minimum > 0 && value < minimum {
            return Err(LimitError::BelowMinimum {
                name: name.to_string(),
                minimum,
            });
        }
        if value > MAX_LIMIT_VALUE {
            return Err(LimitError::AboveMaximum {
                name: name.to_string(),
                maximum: MAX_LIMIT_VALUE,
            });
        }

        let mut limit = Limit::new(name, kind, value);
        match name {
            EXECUTION_TOTAL_LIMIT_NAME | EXECUTION_CPU_TIME_LIMIT_NAME if value == 0 => {
                return Err(LimitError::BelowMinimum {
                    name: name.to_string(),
                    minimum: 1,
                });
            }
            EXECUTION_TOTAL_LIMIT_NAME => {
                let decrement: DecrementFn = Arc::new(|last: Instant, _states: u32| elapsed_nanos(last));
                limit = limit.with_decrement_fn(decrement);
            }
            EXECUTION_CPU_TIME_LIMIT_NAME => {
                let decrement: DecrementFn = Arc::new(|last: Instant, states: u32| {
                    elapsed_nanos(last).saturating_mul(i64::from(states))
                });
                limit = limit.with_decrement_fn(decrement);
            }
            _ => {}
        }
        Ok(limit)
    }
}

fn elapsed_nanos(since: Instant) -> i64 {
    i64::try_from(since.elapsed().as_nanos()).unwrap_or(i64::MAX)
}
