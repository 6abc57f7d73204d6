//! Global state of a running module
//!
//! Every lthread (and the main module) runs against one [`GlobalState`]: its
//! context, its global variables, the module being executed and the values
//! it currently holds locked.

use crate::bytecode::Module;
use crate::context::Context;
use crate::error::VmError;
use crate::lthread::LThread;
use crate::value::Value;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a global state, unique in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u64);

impl StateId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        StateId(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

// ============================================================================
// Globals
// ============================================================================

#[derive(Debug, Clone)]
struct GlobalEntry {
    value: Value,
    constant: bool,
}

/// Previous binding of a global shadowed by a captured global
#[derive(Debug)]
pub struct ShadowedGlobal {
    name: Arc<str>,
    previous: Option<GlobalEntry>,
}

/// Global variables of a state
#[derive(Debug, Default)]
pub struct Globals {
    entries: RwLock<FxHashMap<Arc<str>, GlobalEntry>>,
}

impl Globals {
    /// Value of a global
    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.read().get(name).map(|e| e.value.clone())
    }

    /// Whether the global exists
    pub fn has(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Whether the global is a constant
    pub fn is_constant(&self, name: &str) -> bool {
        self.entries.read().get(name).map_or(false, |e| e.constant)
    }

    /// Define or update a global. Constants cannot be reassigned.
    pub fn set(&self, name: &str, value: Value) -> Result<(), VmError> {
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry) if entry.constant => Err(VmError::Runtime(format!(
                "attempt to assign the constant global '{}'",
                name
            ))),
            Some(entry) => {
                entry.value = value;
                Ok(())
            }
            None => {
                entries.insert(Arc::from(name), GlobalEntry { value, constant: false });
                Ok(())
            }
        }
    }

    /// Define a constant global, replacing any previous binding
    pub fn set_constant(&self, name: &str, value: Value) {
        self.entries
            .write()
            .insert(Arc::from(name), GlobalEntry { value, constant: true });
    }

    /// Names, values and constness of every global
    pub fn entries(&self) -> Vec<(Arc<str>, Value, bool)> {
        self.entries
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone(), e.constant))
            .collect()
    }

    /// Number of globals
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no global is defined
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind the captured globals of a function for the duration of a call.
    /// The returned entries restore the previous bindings.
    pub fn push_captured(&self, captured: &[(Arc<str>, Value)]) -> Vec<ShadowedGlobal> {
        let mut entries = self.entries.write();
        captured
            .iter()
            .map(|(name, value)| {
                let previous = entries.insert(
                    name.clone(),
                    GlobalEntry {
                        value: value.clone(),
                        constant: true,
                    },
                );
                ShadowedGlobal {
                    name: name.clone(),
                    previous,
                }
            })
            .collect()
    }

    /// Undo [`Globals::push_captured`]
    pub fn pop_captured(&self, shadowed: Vec<ShadowedGlobal>) {
        let mut entries = self.entries.write();
        for ShadowedGlobal { name, previous } in shadowed.into_iter().rev() {
            match previous {
                Some(entry) => {
                    entries.insert(name, entry);
                }
                None => {
                    entries.remove(&name);
                }
            }
        }
    }
}

// ============================================================================
// Global state
// ============================================================================

/// State shared by the VMs running a module
pub struct GlobalState {
    id: StateId,
    /// Context of the state
    pub ctx: Arc<Context>,
    /// Global variables
    pub globals: Globals,
    module: OnceCell<Arc<Module>>,
    lthread: OnceCell<Weak<LThread>>,
    locked_values: Mutex<Vec<Value>>,
    is_test_case: bool,
}

impl GlobalState {
    /// Create a state and make it the closest state of `ctx`
    pub fn new(ctx: Arc<Context>) -> Arc<Self> {
        Self::build(ctx, false)
    }

    /// Create the state of a test case; failed assertions are tagged
    pub fn new_test_case(ctx: Arc<Context>) -> Arc<Self> {
        Self::build(ctx, true)
    }

    fn build(ctx: Arc<Context>, is_test_case: bool) -> Arc<Self> {
        let state = Arc::new(Self {
            id: StateId::next(),
            ctx,
            globals: Globals::default(),
            module: OnceCell::new(),
            lthread: OnceCell::new(),
            locked_values: Mutex::new(Vec::new()),
            is_test_case,
        });
        state.ctx.set_closest_state(&state);
        trace!(state = state.id.as_u64(), context = %state.ctx.id(), "global state created");
        state
    }

    /// Identifier
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Whether the state runs a test case
    pub fn is_test_case(&self) -> bool {
        self.is_test_case
    }

    /// Attach the module run by the state. Later calls are ignored.
    pub fn set_module(&self, module: Arc<Module>) {
        let _ = self.module.set(module);
    }

    /// Module run by the state
    pub fn module(&self) -> Option<&Arc<Module>> {
        self.module.get()
    }

    /// Constant pool of the module, empty before a module is attached
    pub fn constants(&self) -> Arc<[Value]> {
        match self.module.get() {
            Some(module) => module.bytecode.constants.clone(),
            None => Arc::from(Vec::new()),
        }
    }

    pub(crate) fn set_lthread(&self, lthread: &Arc<LThread>) {
        let _ = self.lthread.set(Arc::downgrade(lthread));
    }

    /// LThread running the state, if any
    pub fn lthread(&self) -> Option<Arc<LThread>> {
        self.lthread.get().and_then(Weak::upgrade)
    }

    // ========================================================================
    // Locked values
    // ========================================================================

    pub(crate) fn add_locked_value(&self, value: Value) {
        self.locked_values.lock().push(value);
    }

    pub(crate) fn remove_locked_value(&self, value: &Value) {
        let mut locked = self.locked_values.lock();
        if let Some(index) = locked.iter().rposition(|v| v.same(value)) {
            locked.remove(index);
        }
    }

    /// Number of values currently block-locked by the state
    pub fn locked_value_count(&self) -> usize {
        self.locked_values.lock().len()
    }

    /// Release every value block-locked by the state
    pub(crate) fn force_unlock_all(&self) {
        let locked = std::mem::take(&mut *self.locked_values.lock());
        for value in locked.iter().rev() {
            if let Value::Object(object) = value {
                object.smart_lock().force_unlock();
            }
        }
        if !locked.is_empty() {
            trace!(state = self.id.as_u64(), count = locked.len(), "force-unlocked values");
        }
    }
}

impl fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalState")
            .field("id", &self.id)
            .field("context", &self.ctx.id())
            .field("module", &self.module.get().map(|m| &m.name))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    fn state() -> Arc<GlobalState> {
        GlobalState::new(Context::new(ContextConfig::default()).unwrap())
    }

    #[test]
    fn test_state_ids_are_unique() {
        let a = StateId::next();
        let b = StateId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_state_becomes_closest_state_of_its_context() {
        let state = state();
        let closest = state.ctx.closest_state().unwrap();
        assert_eq!(closest.id(), state.id());
    }

    #[test]
    fn test_constant_globals_cannot_be_assigned() {
        let state = state();
        state.globals.set("a", Value::Int(1)).unwrap();
        state.globals.set("a", Value::Int(2)).unwrap();
        assert_eq!(state.globals.get("a"), Some(Value::Int(2)));

        state.globals.set_constant("c", Value::Int(3));
        assert!(state.globals.is_constant("c"));
        assert!(state.globals.set("c", Value::Int(4)).is_err());
        assert_eq!(state.globals.get("c"), Some(Value::Int(3)));
    }

    #[test]
    fn test_captured_globals_are_restored() {
        let state = state();
        state.globals.set("a", Value::Int(1)).unwrap();

        let shadowed = state.globals.push_captured(&[
            (Arc::from("a"), Value::Int(10)),
            (Arc::from("b"), Value::Int(20)),
        ]);
        assert_eq!(state.globals.get("a"), Some(Value::Int(10)));
        assert_eq!(state.globals.get("b"), Some(Value::Int(20)));

        state.globals.pop_captured(shadowed);
        assert_eq!(state.globals.get("a"), Some(Value::Int(1)));
        assert_eq!(state.globals.get("b"), None);
    }

    #[test]
    fn test_constants_are_empty_without_module() {
        assert!(state().constants().is_empty());
    }

    #[test]
    fn test_force_unlock_all_releases_locked_objects() {
        let state = state();
        let object = Value::object(vec![("a", Value::Int(1))]);
        let Value::Object(inner) = &object else { unreachable!() };
        inner.share(&state).unwrap();
        inner.smart_lock().force_lock(&state).unwrap();
        state.add_locked_value(object.clone());

        state.force_unlock_all();
        assert_eq!(state.locked_value_count(), 0);
        assert!(!inner.smart_lock().is_held_by(state.id()));
    }
}
