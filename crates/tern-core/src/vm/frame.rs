//! Call frames

use crate::bytecode::{CompiledFunction, SourcePosition};
use crate::state::ShadowedGlobal;
use crate::value::Value;
use std::sync::Arc;

/// One call's window on the operand stack.
///
/// Slots `base..base + local_count` hold the arguments, the captured locals
/// and the other locals; operands live above `floor`.
#[derive(Debug)]
pub(crate) struct Frame {
    pub function: Arc<CompiledFunction>,
    /// Offset of the next byte to read
    pub ip: usize,
    /// Offset of the instruction being executed
    pub instruction_start: usize,
    pub base: usize,
    pub floor: usize,
    pub self_value: Value,

    /// Values block-locked by this frame, innermost block last
    pub locked_values: Vec<Value>,
    /// Start index in `locked_values` of each open block
    pub lock_blocks: Vec<usize>,

    /// Bindings to restore when the frame returns
    pub shadowed_globals: Vec<ShadowedGlobal>,
    /// Caller's constant pool when the callee is a shared function
    pub caller_constants: Option<Arc<[Value]>>,
    /// Share or clone the return value (shared function)
    pub share_result: bool,
    /// Fail on error results (must-call)
    pub must: bool,
}

impl Frame {
    pub fn new(function: Arc<CompiledFunction>, base: usize, self_value: Value) -> Self {
        let floor = base + function.local_count;
        Self {
            function,
            ip: 0,
            instruction_start: 0,
            base,
            floor,
            self_value,
            locked_values: Vec::new(),
            lock_blocks: Vec::new(),
            shadowed_globals: Vec::new(),
            caller_constants: None,
            share_result: false,
            must: false,
        }
    }

    /// Source position of the instruction being executed
    pub fn position(&self) -> Option<SourcePosition> {
        self.function.position_at(self.instruction_start).cloned()
    }
}

/// Chunk included by `PushIncludedChunk`
#[derive(Debug, Clone)]
pub(crate) struct IncludedChunk {
    pub name: Arc<str>,
    /// Number of frames below the including frame
    pub depth: usize,
    /// Position of the inclusion in the including frame
    pub position: Option<SourcePosition>,
}
