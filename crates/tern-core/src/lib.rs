//! Tern Execution Core
//!
//! This crate provides the runtime of the Tern language:
//! - **Values**: the closed value model, sharing and patterns (`value` module)
//! - **Limits**: the limit registry and token buckets (`limits` module)
//! - **Contexts**: cancellation, permissions and limiters (`context` module)
//! - **VM**: the stack interpreter for compiled bytecode (`vm` module)
//! - **LThreads**: lightweight threads running modules in parallel (`lthread` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use tern_bytecode::{BinaryOperator, BytecodeWriter};
//! use tern_core::{Bytecode, CompiledFunction, Context, ContextConfig, GlobalState, Module, Value, Vm};
//!
//! let mut w = BytecodeWriter::new();
//! w.emit_push_constant(0);
//! w.emit_push_constant(1);
//! w.emit_int_bin(BinaryOperator::Add);
//! w.emit_return(true);
//!
//! let main = CompiledFunction::new("main", w.into_bytes());
//! let module = Module::new("main", Bytecode::new(main, vec![Value::Int(1), Value::Int(2)]));
//!
//! let state = GlobalState::new(Context::new(ContextConfig::default())?);
//! state.set_module(module.into());
//! let mut vm = Vm::new(state, Default::default())?;
//! assert_eq!(vm.run()?, Value::Int(3));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bytecode;
pub mod config;
pub mod context;
pub mod error;
pub mod limits;
pub mod lthread;
pub mod state;
pub mod value;
pub mod vm;

pub use bytecode::{Bytecode, CompiledFunction, Module, ModuleKind, SourcePosition};
pub use config::VmConfig;
pub use context::{Context, ContextConfig, Permission, PermissionKind};
pub use error::{
    AssertionError, CancellationCause, ContextError, LThreadError, LimitError, LocatedError,
    ValueError, VmError, VmResult,
};
pub use limits::{get_limit, registry, Limit, LimitKind, LimitValue, Limiter};
pub use lthread::{ExecutedStep, LThread, LThreadGroup, LThreadSpawnArgs};
pub use state::{GlobalState, StateId};
pub use value::Value;
pub use vm::{AbortHandle, Vm};
