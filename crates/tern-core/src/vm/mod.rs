//! Bytecode interpreter
//!
//! A [`Vm`] runs the code of a module (or a single function) against a
//! [`GlobalState`]. Execution is a plain dispatch loop over an operand
//! stack and a stack of call frames; handlers for each opcode category live
//! in the `opcodes` submodules.
//!
//! The loop checks the state's context and the abort flag before every
//! instruction. When a run fails, the error is annotated with the source
//! positions of the live frames and every value block-locked by the state
//! is released.

mod core;
mod frame;
mod opcodes;

use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::state::GlobalState;
use crate::value::{Function, Value};
use frame::{Frame, IncludedChunk};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of executing one opcode
#[derive(Debug)]
pub(crate) enum OpcodeResult {
    /// Continue with the next instruction
    Continue,
    /// The outermost frame returned
    Return(Value),
    /// `SuspendVM`: stop, a later resume continues after the instruction
    Suspend,
}

/// Aborts a running VM from another thread
#[derive(Debug, Clone)]
pub struct AbortHandle {
    aborting: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Make the VM stop with [`VmError::Aborted`] before its next instruction
    pub fn abort(&self) {
        self.aborting.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Ready,
    Suspended,
    Finished,
}

/// The interpreter
pub struct Vm {
    state: Arc<GlobalState>,
    config: VmConfig,

    stack: Vec<Value>,
    current: Frame,
    callers: Vec<Frame>,
    constants: Arc<[Value]>,
    included_chunks: Vec<IncludedChunk>,

    aborting: Arc<AtomicBool>,
    status: RunStatus,
}

impl Vm {
    /// VM running the module attached to `state`
    pub fn new(state: Arc<GlobalState>, config: VmConfig) -> VmResult<Self> {
        let module = state
            .module()
            .cloned()
            .ok_or_else(|| VmError::Runtime("no module attached to the state".to_string()))?;
        let main = module.bytecode.main.clone();
        if main.local_count > config.stack_size {
            return Err(VmError::StackOverflow);
        }

        let mut stack = Vec::with_capacity(config.stack_size);
        stack.resize(main.local_count, Value::Nil);

        Ok(Self {
            current: Frame::new(main, 0, Value::Nil),
            callers: Vec::new(),
            constants: module.bytecode.constants.clone(),
            stack,
            state,
            config,
            included_chunks: Vec::new(),
            aborting: Arc::new(AtomicBool::new(false)),
            status: RunStatus::Ready,
        })
    }

    /// VM running one call of `function`. The call returns from [`Vm::run`]
    /// as a module would.
    pub fn for_function(
        state: Arc<GlobalState>,
        function: Arc<Function>,
        self_value: Value,
        args: Vec<Value>,
        config: VmConfig,
    ) -> VmResult<Self> {
        let constants = match function.origin() {
            Some(origin) => origin.constants.clone(),
            None => state.constants(),
        };
        let mut vm = Self {
            current: Frame::new(function.compiled.clone(), 0, self_value.clone()),
            callers: Vec::new(),
            stack: Vec::with_capacity(config.stack_size),
            constants,
            state,
            config,
            included_chunks: Vec::new(),
            aborting: Arc::new(AtomicBool::new(false)),
            status: RunStatus::Ready,
        };
        let frame = vm.prepare_frame(&function, self_value, args, false)?;
        vm.current = frame;
        Ok(vm)
    }

    /// Set the `self` value of the outermost frame
    pub fn with_self_value(mut self, self_value: Value) -> Self {
        self.current.self_value = self_value;
        self
    }

    /// State the VM runs against
    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }

    /// Handle aborting the VM from another thread
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            aborting: self.aborting.clone(),
        }
    }

    /// Stop the VM before its next instruction
    pub fn abort(&self) {
        self.aborting.store(true, Ordering::Release);
    }

    /// Whether the last run stopped on `SuspendVM`
    pub fn is_suspended(&self) -> bool {
        self.status == RunStatus::Suspended
    }

    /// Run until the outermost frame returns, an error occurs, the context
    /// is done or the VM suspends itself. A suspended run returns nil.
    pub fn run(&mut self) -> VmResult<Value> {
        match self.status {
            RunStatus::Finished => {
                return Err(VmError::Runtime("the VM has already finished".to_string()))
            }
            RunStatus::Ready | RunStatus::Suspended => {}
        }
        self.status = RunStatus::Ready;

        match self.run_loop() {
            Ok(OpcodeResult::Suspend) => {
                self.status = RunStatus::Suspended;
                Ok(Value::Nil)
            }
            Ok(OpcodeResult::Return(value)) => {
                self.status = RunStatus::Finished;
                Ok(value)
            }
            Ok(OpcodeResult::Continue) => {
                self.status = RunStatus::Finished;
                Ok(self.implicit_result())
            }
            Err(err) => {
                self.status = RunStatus::Finished;
                let err = self.locate(err);
                self.release_locks();
                Err(err)
            }
        }
    }

    /// Continue a VM suspended by `SuspendVM`
    pub fn resume(&mut self) -> VmResult<Value> {
        if self.status != RunStatus::Suspended {
            return Err(VmError::Runtime("the VM is not suspended".to_string()));
        }
        self.run()
    }

    /// Result of a module whose code ends without `Return`: the top of the
    /// stack if anything was pushed above the locals
    fn implicit_result(&self) -> Value {
        if self.stack.len() > self.current.floor {
            self.stack.last().cloned().unwrap_or(Value::Nil)
        } else {
            Value::Nil
        }
    }

    fn release_locks(&mut self) {
        for frame in self.callers.iter_mut().chain(std::iter::once(&mut self.current)) {
            frame.locked_values.clear();
            frame.lock_blocks.clear();
        }
        self.state.force_unlock_all();
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("state", &self.state.id())
            .field("function", &self.current.function.name)
            .field("ip", &self.current.ip)
            .field("frames", &(self.callers.len() + 1))
            .field("stack", &self.stack.len())
            .finish_non_exhaustive()
    }
}
