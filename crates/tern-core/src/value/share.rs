//! Sharing of mutable values between lthreads
//!
//! A shared value is guarded by a [`SmartLock`]: a logical lock owned by a
//! global state rather than by an OS thread, reentrant for its owner. Values
//! that cannot be shared are deep-cloned by [`share_or_clone`].

use super::composite::{Dictionary, List, Struct};
use super::Value;
use crate::config::MAX_CLONING_DEPTH;
use crate::error::{ContextError, ValueError};
use crate::state::{GlobalState, StateId};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How often a waiting state re-checks its context while blocked on a lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct Holder {
    state: Option<StateId>,
    depth: usize,
}

/// Logical lock of a shared value
#[derive(Debug, Default)]
pub struct SmartLock {
    shared: AtomicBool,
    holder: Mutex<Holder>,
    released: Condvar,
}

impl SmartLock {
    /// Whether the guarded value has been shared
    pub fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    pub(crate) fn mark_shared(&self) {
        self.shared.store(true, Ordering::Release);
    }

    /// Lock for `state` until the guard is dropped. No-op on unshared values.
    ///
    /// Blocking time is excluded from the CPU time of `state`'s context and the
    /// wait ends with an error if that context is cancelled.
    pub fn lock(&self, state: &GlobalState) -> Result<SmartLockGuard<'_>, ContextError> {
        if !self.is_shared() {
            return Ok(SmartLockGuard { lock: None });
        }
        self.acquire(state)?;
        Ok(SmartLockGuard {
            lock: Some((self, state.id())),
        })
    }

    /// Lock for `state` until [`SmartLock::force_unlock`] is called
    pub fn force_lock(&self, state: &GlobalState) -> Result<(), ContextError> {
        self.acquire(state)
    }

    /// Release the lock whoever holds it and wake every waiter
    pub fn force_unlock(&self) {
        let mut holder = self.holder.lock();
        holder.state = None;
        holder.depth = 0;
        self.released.notify_all();
    }

    /// Release one level of the lock held by `state`
    pub fn unlock(&self, state: StateId) {
        let mut holder = self.holder.lock();
        if holder.state != Some(state) {
            return;
        }
        holder.depth = holder.depth.saturating_sub(1);
        if holder.depth == 0 {
            holder.state = None;
            self.released.notify_all();
        }
    }

    /// Whether `state` currently holds the lock
    pub fn is_held_by(&self, state: StateId) -> bool {
        self.holder.lock().state == Some(state)
    }

    fn acquire(&self, state: &GlobalState) -> Result<(), ContextError> {
        let id = state.id();
        let mut paused = None;
        let mut holder = self.holder.lock();
        loop {
            match holder.state {
                None => {
                    holder.state = Some(id);
                    holder.depth = 1;
                    return Ok(());
                }
                Some(current) if current == id => {
                    holder.depth += 1;
                    return Ok(());
                }
                Some(current) => {
                    if let Some(err) = state.ctx.err() {
                        return Err(err);
                    }
                    if paused.is_none() {
                        trace!(state = id.as_u64(), holder = current.as_u64(), "waiting for smart lock");
                        paused = Some(state.ctx.pause_cpu_accounting());
                    }
                    self.released.wait_for(&mut holder, LOCK_POLL_INTERVAL);
                }
            }
        }
    }
}

/// Releases one level of a [`SmartLock`] on drop
#[must_use]
pub struct SmartLockGuard<'a> {
    lock: Option<(&'a SmartLock, StateId)>,
}

impl Drop for SmartLockGuard<'_> {
    fn drop(&mut self) {
        if let Some((lock, state)) = self.lock.take() {
            lock.unlock(state);
        }
    }
}

/// Prepare a value for use by another lthread.
///
/// Immutable values are returned as is, sharable values are shared in place,
/// clonable values are deep-cloned (aliasing inside the value is preserved).
pub fn share_or_clone(value: &Value, state: &GlobalState) -> Result<Value, ValueError> {
    let mut clones = FxHashMap::default();
    share_or_clone_at_depth(value, state, &mut clones, 0)
}

/// Check that a value can cross an lthread boundary without being copied
pub fn check_shared_or_immutable(value: &Value) -> Result<(), ValueError> {
    match value {
        Value::Object(object) if !object.is_shared() => {
            Err(ValueError::InvalidOperation("object is not shared".to_string()))
        }
        Value::List(_) | Value::Dictionary(_) | Value::Struct(_) | Value::Iterator(_) | Value::Stream(_) => {
            Err(ValueError::CannotLockUnsharableValue(value.type_name()))
        }
        _ => Ok(()),
    }
}

type CloneMap = FxHashMap<usize, Value>;

fn share_or_clone_at_depth(
    value: &Value,
    state: &GlobalState,
    clones: &mut CloneMap,
    depth: usize,
) -> Result<Value, ValueError> {
    if depth > MAX_CLONING_DEPTH {
        return Err(ValueError::MaximumCloningDepthReached);
    }

    match value {
        Value::Object(object) => {
            object.share(state)?;
            Ok(value.clone())
        }
        Value::Function(function) => Ok(Value::Function(function.share(state)?)),
        Value::List(list) => {
            let key = Arc::as_ptr(list) as usize;
            if let Some(clone) = clones.get(&key) {
                return Ok(clone.clone());
            }
            let copy = Arc::new(List::default());
            clones.insert(key, Value::List(copy.clone()));
            for element in list.snapshot() {
                copy.push(share_or_clone_at_depth(&element, state, clones, depth + 1)?);
            }
            Ok(Value::List(copy))
        }
        Value::Dictionary(dict) => {
            let key = Arc::as_ptr(dict) as usize;
            if let Some(clone) = clones.get(&key) {
                return Ok(clone.clone());
            }
            let copy = Arc::new(Dictionary::default());
            clones.insert(key, Value::Dictionary(copy.clone()));
            for (k, v) in dict.entries() {
                copy.set(k, share_or_clone_at_depth(&v, state, clones, depth + 1)?);
            }
            Ok(Value::Dictionary(copy))
        }
        Value::Struct(instance) => {
            let key = Arc::as_ptr(instance) as usize;
            if let Some(clone) = clones.get(&key) {
                return Ok(clone.clone());
            }
            let mut fields = Vec::new();
            for field in instance.fields() {
                fields.push(share_or_clone_at_depth(&field, state, clones, depth + 1)?);
            }
            let copy = Value::Struct(Arc::new(Struct::new(instance.struct_type().clone(), fields)?));
            clones.insert(key, copy.clone());
            Ok(copy)
        }
        Value::Tuple(elements) if elements.iter().any(Value::is_mutable) => {
            let mut copy = Vec::with_capacity(elements.len());
            for element in elements.iter() {
                copy.push(share_or_clone_at_depth(element, state, clones, depth + 1)?);
            }
            Ok(Value::tuple(copy))
        }
        Value::Iterator(_) | Value::Stream(_) => Err(ValueError::NotClonable(value.type_name())),
        _ => Ok(value.clone()),
    }
}
