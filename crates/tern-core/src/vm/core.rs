//! Dispatch loop and shared helpers of the interpreter

use super::{OpcodeResult, Vm};
use crate::bytecode::SourcePosition;
use crate::error::{CancellationCause, ContextError, LocatedError, ValueError, VmError, VmResult};
use crate::value::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tern_bytecode::{BinaryOperator, Opcode};

impl Vm {
    pub(super) fn run_loop(&mut self) -> VmResult<OpcodeResult> {
        loop {
            if self.aborting.load(Ordering::Acquire) {
                return Err(VmError::Aborted);
            }
            if self.state.ctx.is_done() {
                let err = self
                    .state
                    .ctx
                    .err()
                    .unwrap_or(ContextError::Cancelled(CancellationCause::Explicit));
                return Err(err.into());
            }

            let ip = self.current.ip;
            let Some(&byte) = self.current.function.instructions.get(ip) else {
                // Falling off the end of a function returns nil.
                if self.callers.is_empty() {
                    return Ok(OpcodeResult::Continue);
                }
                match self.leave_frame(Value::Nil)? {
                    OpcodeResult::Continue => continue,
                    other => return Ok(other),
                }
            };
            let opcode = Opcode::from_u8(byte).ok_or(VmError::InvalidOpcode(byte))?;
            self.current.instruction_start = ip;
            self.current.ip = ip + 1;

            match self.execute_opcode(opcode)? {
                OpcodeResult::Continue => {}
                other => return Ok(other),
            }
        }
    }

    fn execute_opcode(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            // =========================================================
            // Stack Manipulation & Constants
            // =========================================================
            Opcode::Nop
            | Opcode::Pop
            | Opcode::CopyTop
            | Opcode::Swap
            | Opcode::MoveThirdTop
            | Opcode::PushConstant
            | Opcode::PushNil
            | Opcode::PushTrue
            | Opcode::PushFalse => self.exec_stack_ops(opcode),

            // =========================================================
            // Locals, Globals, Self & Host Aliases
            // =========================================================
            Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::GetSelf
            | Opcode::ResolveHost
            | Opcode::AddHostAlias => self.exec_variable_ops(opcode),

            // =========================================================
            // Arithmetic
            // =========================================================
            Opcode::IntBin
            | Opcode::FloatBin
            | Opcode::NumBin
            | Opcode::PseudoArith
            | Opcode::Minus
            | Opcode::BooleanNot => self.exec_arithmetic_ops(opcode),

            // =========================================================
            // Comparison & Membership
            // =========================================================
            Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Is
            | Opcode::IsNot
            | Opcode::Less
            | Opcode::LessEqual
            | Opcode::Greater
            | Opcode::GreaterEqual
            | Opcode::Match
            | Opcode::In
            | Opcode::SubstrOf
            | Opcode::KeyOf
            | Opcode::NilCoalesce
            | Opcode::ToBool => self.exec_comparison_ops(opcode),

            // =========================================================
            // Control Flow
            // =========================================================
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::AndJump | Opcode::OrJump => {
                self.exec_control_flow_ops(opcode)
            }

            // =========================================================
            // Strings, Ranges & Resource Names
            // =========================================================
            Opcode::StrConcat
            | Opcode::Concat
            | Opcode::CreateIntRange
            | Opcode::CreateFloatRange
            | Opcode::CreateRuneRange
            | Opcode::CreateUpperBoundRange
            | Opcode::CreatePath
            | Opcode::CreatePathPattern
            | Opcode::CreateHost
            | Opcode::CreateUrl => self.exec_string_ops(opcode),

            // =========================================================
            // Composites
            // =========================================================
            Opcode::CreateList
            | Opcode::CreateTuple
            | Opcode::CreateKeyList
            | Opcode::CreateObject
            | Opcode::CreateRecord
            | Opcode::CreateDict
            | Opcode::CreateStruct
            | Opcode::CreateOption
            | Opcode::CreateXmlElement
            | Opcode::SpreadObject
            | Opcode::SpreadList
            | Opcode::SpreadTuple
            | Opcode::ExtractProps
            | Opcode::Append => self.exec_composite_ops(opcode),

            // =========================================================
            // Patterns
            // =========================================================
            Opcode::CreateListPattern
            | Opcode::CreateObjectPattern
            | Opcode::CreateRecordPattern
            | Opcode::CreateOptionPattern
            | Opcode::CreateUnionPattern
            | Opcode::CreateIntersectionPattern
            | Opcode::CreateStringUnionPattern
            | Opcode::CreateRepeatedPatternElement
            | Opcode::CreateSequenceStringPattern
            | Opcode::CreatePatternNamespace
            | Opcode::CreateOptionalPattern
            | Opcode::ToPattern
            | Opcode::DoSetDifference
            | Opcode::SpreadObjectPattern
            | Opcode::ResolvePattern
            | Opcode::AddPattern
            | Opcode::ResolvePatternNamespace
            | Opcode::AddPatternNamespace
            | Opcode::PatternNamespaceMemb => self.exec_pattern_ops(opcode),

            // =========================================================
            // Member & Index Access
            // =========================================================
            Opcode::Memb
            | Opcode::OptionalMemb
            | Opcode::ComputedMemb
            | Opcode::SetMember
            | Opcode::At
            | Opcode::SafeAt
            | Opcode::SetIndex
            | Opcode::Slice
            | Opcode::SetSlice
            | Opcode::GetStructField
            | Opcode::SetStructField => self.exec_member_ops(opcode),

            // =========================================================
            // Iteration
            // =========================================================
            Opcode::IterInit
            | Opcode::IterNext
            | Opcode::IterNextChunk
            | Opcode::IterKey
            | Opcode::IterValue => self.exec_iteration_ops(opcode),

            // =========================================================
            // Calls & Diagnostics
            // =========================================================
            Opcode::BindCapturedLocals
            | Opcode::Call
            | Opcode::Return
            | Opcode::Yield
            | Opcode::SuspendVM
            | Opcode::Assert
            | Opcode::PushIncludedChunk
            | Opcode::PopIncludedChunk => self.exec_call_ops(opcode),

            // =========================================================
            // Concurrency, Permissions & Messaging
            // =========================================================
            Opcode::DropPerms
            | Opcode::SpawnLThread
            | Opcode::BlockLock
            | Opcode::BlockUnlock
            | Opcode::CreateReceptionHandler
            | Opcode::SendValue => self.exec_concurrency_ops(opcode),
        }
    }

    // =========================================================================
    // Operands
    // =========================================================================

    pub(in crate::vm) fn read_u8(&mut self) -> VmResult<u8> {
        let byte = *self
            .current
            .function
            .instructions
            .get(self.current.ip)
            .ok_or(VmError::UnexpectedEndOfBytecode)?;
        self.current.ip += 1;
        Ok(byte)
    }

    pub(in crate::vm) fn read_u16(&mut self) -> VmResult<u16> {
        let low = self.read_u8()?;
        let high = self.read_u8()?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub(in crate::vm) fn read_flag(&mut self) -> VmResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub(in crate::vm) fn read_operator(&mut self) -> VmResult<BinaryOperator> {
        let byte = self.read_u8()?;
        BinaryOperator::from_u8(byte)
            .ok_or_else(|| VmError::Runtime(format!("invalid binary operator: {:#x}", byte)))
    }

    pub(in crate::vm) fn constant(&self, index: usize) -> VmResult<Value> {
        self.constants
            .get(index)
            .cloned()
            .ok_or(VmError::ConstantOutOfRange(index))
    }

    /// Read a u16 constant index and return the string constant it designates
    pub(in crate::vm) fn read_str_constant(&mut self) -> VmResult<Arc<str>> {
        let index = self.read_u16()? as usize;
        match self.constant(index)? {
            Value::Str(s) => Ok(s),
            other => Err(ValueError::mismatch("string constant", &other).into()),
        }
    }

    // =========================================================================
    // Stack
    // =========================================================================

    pub(in crate::vm) fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.config.stack_size {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    pub(in crate::vm) fn pop(&mut self) -> VmResult<Value> {
        if self.stack.len() <= self.current.floor {
            return Err(VmError::StackUnderflow);
        }
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop the top `count` values, deepest first
    pub(in crate::vm) fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .filter(|start| *start >= self.current.floor)
            .ok_or(VmError::StackUnderflow)?;
        Ok(self.stack.split_off(start))
    }

    /// Value `depth` slots below the top (0 is the top)
    pub(in crate::vm) fn peek(&self, depth: usize) -> VmResult<&Value> {
        let index = self
            .stack
            .len()
            .checked_sub(depth + 1)
            .filter(|index| *index >= self.current.floor)
            .ok_or(VmError::StackUnderflow)?;
        Ok(&self.stack[index])
    }

    pub(in crate::vm) fn replace_top(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() <= self.current.floor {
            return Err(VmError::StackUnderflow);
        }
        if let Some(top) = self.stack.last_mut() {
            *top = value;
        }
        Ok(())
    }

    pub(in crate::vm) fn local_slot(&self, index: usize) -> VmResult<usize> {
        let slot = self.current.base + index;
        if slot >= self.current.floor {
            return Err(VmError::Runtime(format!(
                "local {} out of range in {}",
                index, self.current.function.name
            )));
        }
        Ok(slot)
    }

    // =========================================================================
    // Error locations
    // =========================================================================

    /// Source positions of the live frames and included chunks, innermost first
    pub(super) fn location_stack(&self) -> Vec<SourcePosition> {
        let mut location = Vec::new();
        let frames = self.callers.iter().chain(std::iter::once(&self.current));
        for (depth, frame) in frames.enumerate().collect::<Vec<_>>().into_iter().rev() {
            location.extend(frame.position());
            for chunk in self.included_chunks.iter().rev().filter(|c| c.depth == depth) {
                location.extend(chunk.position.clone());
            }
        }
        location
    }

    pub(super) fn locate(&self, err: VmError) -> VmError {
        if matches!(err, VmError::Located(_)) {
            return err;
        }
        let location = self.location_stack();
        let err = match err {
            VmError::Assertion(mut assertion) => {
                if assertion.location_prefix.is_none() {
                    assertion.location_prefix = location.first().map(|p| p.to_string());
                }
                VmError::Assertion(assertion)
            }
            other => other,
        };
        VmError::Located(LocatedError {
            message: err.to_string(),
            location,
            source: Box::new(err),
        })
    }
}
