//! Function values
//!
//! A [`Function`] pairs compiled code with the values it captured. Sharing a
//! function with another lthread records where it comes from so that calls
//! made by the other lthread run against the original constant pool.

use super::share::share_or_clone;
use super::Value;
use crate::bytecode::CompiledFunction;
use crate::error::{ValueError, VmResult};
use crate::state::{GlobalState, StateId};
use std::fmt;
use std::sync::Arc;

/// State a shared function was created in
#[derive(Debug, Clone)]
pub struct SharedOrigin {
    /// Creator state
    pub state: StateId,
    /// Constant pool the function's code indexes into
    pub constants: Arc<[Value]>,
}

/// A compiled function and its captures
#[derive(Debug, Clone)]
pub struct Function {
    /// Code of the function
    pub compiled: Arc<CompiledFunction>,
    /// Values bound by `BindCapturedLocals`, appended after the arguments
    pub captured_locals: Vec<Value>,
    /// Globals visible during the call in addition to the caller's
    pub captured_globals: Vec<(Arc<str>, Value)>,
    origin: Option<SharedOrigin>,
}

impl Function {
    /// Create a function without captures
    pub fn new(compiled: impl Into<Arc<CompiledFunction>>) -> Self {
        Self {
            compiled: compiled.into(),
            captured_locals: Vec::new(),
            captured_globals: Vec::new(),
            origin: None,
        }
    }

    /// Set the captured globals
    pub fn with_captured_globals(mut self, globals: Vec<(Arc<str>, Value)>) -> Self {
        self.captured_globals = globals;
        self
    }

    /// Where the function was shared from, if it was
    pub fn origin(&self) -> Option<&SharedOrigin> {
        self.origin.as_ref()
    }

    /// Whether the function has been shared
    pub fn is_shared(&self) -> bool {
        self.origin.is_some()
    }

    /// Shared copy of the function; captures go through `share_or_clone`
    pub fn share(self: &Arc<Self>, state: &GlobalState) -> Result<Arc<Function>, ValueError> {
        if self.origin.is_some() {
            return Ok(self.clone());
        }

        let mut captured_locals = Vec::with_capacity(self.captured_locals.len());
        for value in &self.captured_locals {
            captured_locals.push(share_or_clone(value, state)?);
        }
        let mut captured_globals = Vec::with_capacity(self.captured_globals.len());
        for (name, value) in &self.captured_globals {
            captured_globals.push((name.clone(), share_or_clone(value, state)?));
        }

        Ok(Arc::new(Function {
            compiled: self.compiled.clone(),
            captured_locals,
            captured_globals,
            origin: Some(SharedOrigin {
                state: state.id(),
                constants: state.constants(),
            }),
        }))
    }
}

/// Signature of host functions. Returning `None` yields nil.
pub type NativeFn = dyn Fn(&NativeCall<'_>, Vec<Value>) -> VmResult<Option<Value>> + Send + Sync;

/// Arguments of a host function call besides the positional ones
pub struct NativeCall<'a> {
    /// State of the caller
    pub state: &'a Arc<GlobalState>,
    /// Receiver of the call, nil for plain calls
    pub self_value: &'a Value,
}

/// Function implemented by the host
pub struct NativeFunction {
    /// Name used in error messages
    pub name: Arc<str>,
    func: Box<NativeFn>,
}

impl NativeFunction {
    /// Wrap a host closure
    pub fn new<F>(name: impl AsRef<str>, func: F) -> Self
    where
        F: Fn(&NativeCall<'_>, Vec<Value>) -> VmResult<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            func: Box::new(func),
        }
    }

    /// Invoke the function
    pub fn call(&self, call: &NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
        Ok((self.func)(call, args)?.unwrap_or(Value::Nil))
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};

    #[test]
    fn test_sharing_records_origin_and_clones_captures() {
        let state = GlobalState::new(Context::new(ContextConfig::default()).unwrap());
        let captured = Value::list(vec![Value::Int(1)]);
        let mut function = Function::new(CompiledFunction::new("f", vec![]));
        function.captured_locals.push(captured.clone());
        let function = Arc::new(function);

        let shared = function.share(&state).unwrap();
        assert_eq!(shared.origin().map(|o| o.state), Some(state.id()));
        assert!(!shared.captured_locals[0].same(&captured));
        assert!(Arc::ptr_eq(&shared, &shared.share(&state).unwrap()));
    }

    #[test]
    fn test_native_nil_result() {
        let state = GlobalState::new(Context::new(ContextConfig::default()).unwrap());
        let native = NativeFunction::new("noop", |_, _| Ok(None));
        let call = NativeCall {
            state: &state,
            self_value: &Value::Nil,
        };
        assert_eq!(native.call(&call, vec![]).unwrap(), Value::Nil);
    }
}
