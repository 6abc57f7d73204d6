//! Call opcode handlers: BindCapturedLocals, Call, Return, Yield, SuspendVM, Assert,
//! PushIncludedChunk, PopIncludedChunk
//!
//! A call expects `[args..., (spread), self, callee]` on the stack, callee on
//! top. The callee's frame starts where the arguments were: its locals are
//! the arguments, the rest list of a variadic function, the captured locals,
//! then nil for the remaining locals. On return the stack is truncated to the
//! frame base and the result pushed in the caller's frame.

use crate::bytecode::ModuleKind;
use crate::error::{AssertionError, ValueError, VmError, VmResult};
use crate::value::{share_or_clone, Function, NativeCall, Value, ValueIterator};
use crate::vm::frame::{Frame, IncludedChunk};
use crate::vm::{OpcodeResult, Vm};
use std::sync::Arc;
use tern_bytecode::Opcode;
use tracing::trace;

impl Vm {
    pub(in crate::vm) fn exec_call_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::BindCapturedLocals => {
                let count = self.read_u8()? as usize;
                let captured = self.pop_n(count)?;
                let function = match self.pop()? {
                    Value::Function(function) => function,
                    other => return Err(ValueError::mismatch("function", &other).into()),
                };
                let mut bound = Function::clone(&function);
                bound.captured_locals = captured;
                self.push(Value::Function(Arc::new(bound)))?;
            }

            Opcode::Call => {
                let arg_count = self.read_u8()? as usize;
                let spread = self.read_flag()?;
                let must = self.read_flag()?;

                let callee = self.pop()?;
                let self_value = self.pop()?;
                let spread_value = if spread { Some(self.pop()?) } else { None };
                let mut args = self.pop_n(arg_count)?;
                if let Some(spread_value) = spread_value {
                    let iterator = ValueIterator::new(&spread_value)?;
                    while iterator.next() {
                        args.push(iterator.value()?);
                    }
                }
                if matches!(&callee, Value::Function(f) if f.is_shared()) {
                    args = args
                        .iter()
                        .map(|arg| share_or_clone(arg, &self.state))
                        .collect::<Result<_, _>>()?;
                }
                self.call_value(callee, self_value, args, must)?;
            }

            Opcode::Return => {
                let has_value = self.read_flag()?;
                let value = if has_value { self.pop()? } else { Value::Nil };
                return self.leave_frame(value);
            }

            Opcode::Yield => {
                let has_value = self.read_flag()?;
                let value = if has_value { self.pop()? } else { Value::Nil };
                let lthread = self.state.lthread().ok_or(VmError::NoAssociatedLThread)?;
                lthread.yield_value(value)?;
            }

            Opcode::SuspendVM => return Ok(OpcodeResult::Suspend),

            Opcode::Assert => {
                let statement_index = self.read_u16()? as usize;
                let (statement, expressions) = match self.constant(statement_index)? {
                    Value::Str(statement) => (statement.to_string(), Vec::new()),
                    Value::Tuple(elements) => match elements.split_first() {
                        Some((Value::Str(statement), expressions)) => (
                            statement.to_string(),
                            expressions.iter().map(|e| e.to_string()).collect(),
                        ),
                        _ => {
                            return Err(VmError::Runtime(
                                "malformed assertion constant".to_string(),
                            ))
                        }
                    },
                    other => return Err(ValueError::mismatch("assertion statement", &other).into()),
                };

                let ok = self.pop()?.as_bool()?;
                let values = self.pop_n(expressions.len())?;
                if !ok {
                    let in_test = self.state.is_test_case()
                        || self
                            .state
                            .module()
                            .map_or(false, |m| m.kind == ModuleKind::TestCase);
                    return Err(VmError::Assertion(AssertionError {
                        statement,
                        intermediary_values: expressions.into_iter().zip(values).collect(),
                        in_test,
                        location_prefix: None,
                    }));
                }
            }

            Opcode::PushIncludedChunk => {
                let name = self.read_str_constant()?;
                self.included_chunks.push(IncludedChunk {
                    name,
                    depth: self.callers.len(),
                    position: self.current.position(),
                });
            }

            Opcode::PopIncludedChunk => {
                let depth = self.callers.len();
                match self.included_chunks.last() {
                    Some(chunk) if chunk.depth == depth => {
                        self.included_chunks.pop();
                    }
                    _ => return Err(VmError::Runtime("no included chunk to leave".to_string())),
                }
            }

            _ => unreachable!("Not a call opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Call `callee`: compiled functions get a new frame, host functions run
    /// immediately and their result is pushed
    pub(in crate::vm) fn call_value(
        &mut self,
        callee: Value,
        self_value: Value,
        args: Vec<Value>,
        must: bool,
    ) -> VmResult<()> {
        match callee {
            Value::Function(function) => {
                let frame = self.prepare_frame(&function, self_value, args, must)?;
                trace!(function = %frame.function.name, depth = self.callers.len() + 1, "call");
                let caller = std::mem::replace(&mut self.current, frame);
                self.callers.push(caller);
                Ok(())
            }
            Value::NativeFunction(native) => {
                let call = NativeCall {
                    state: &self.state,
                    self_value: &self_value,
                };
                let result = native.call(&call, args)?;
                let result = if must { must_unwrap(result)? } else { result };
                self.push(result)
            }
            other => Err(VmError::NotCallable(other.type_name())),
        }
    }

    /// Lay out the locals of a call to `function` on top of the stack
    pub(in crate::vm) fn prepare_frame(
        &mut self,
        function: &Arc<Function>,
        self_value: Value,
        mut args: Vec<Value>,
        must: bool,
    ) -> VmResult<Frame> {
        if self.callers.len() + 1 >= self.config.max_frames {
            return Err(VmError::StackOverflow);
        }

        let compiled = function.compiled.clone();
        if compiled.is_variadic {
            let fixed = compiled.param_count.saturating_sub(1);
            if args.len() < fixed {
                return Err(VmError::WrongArgumentCount {
                    expected: fixed,
                    got: args.len(),
                    variadic: true,
                });
            }
            let rest = args.split_off(fixed);
            args.push(Value::list(rest));
        } else if args.len() != compiled.param_count {
            return Err(VmError::WrongArgumentCount {
                expected: compiled.param_count,
                got: args.len(),
                variadic: false,
            });
        }

        let used = args.len() + function.captured_locals.len();
        if used > compiled.local_count {
            return Err(VmError::Runtime(format!(
                "function {} declares {} locals but needs {}",
                compiled.name, compiled.local_count, used
            )));
        }
        let base = self.stack.len();
        if base + compiled.local_count > self.config.stack_size {
            return Err(VmError::StackOverflow);
        }
        self.stack.extend(args);
        self.stack.extend(function.captured_locals.iter().cloned());
        self.stack.resize(base + compiled.local_count, Value::Nil);

        let mut frame = Frame::new(compiled, base, self_value);
        frame.must = must;
        if let Some(origin) = function.origin() {
            frame.caller_constants = Some(std::mem::replace(
                &mut self.constants,
                origin.constants.clone(),
            ));
            frame.share_result = true;
        }
        if !function.captured_globals.is_empty() {
            frame.shadowed_globals = self.state.globals.push_captured(&function.captured_globals);
        }
        Ok(frame)
    }

    /// Pop the current frame, `value` being its result
    pub(in crate::vm) fn leave_frame(&mut self, value: Value) -> VmResult<OpcodeResult> {
        self.release_frame_locks();
        let shadowed = std::mem::take(&mut self.current.shadowed_globals);
        if !shadowed.is_empty() {
            self.state.globals.pop_captured(shadowed);
        }
        if let Some(constants) = self.current.caller_constants.take() {
            self.constants = constants;
        }

        let depth = self.callers.len();
        while self.included_chunks.last().map_or(false, |c| c.depth >= depth) {
            self.included_chunks.pop();
        }

        let value = if self.current.share_result {
            share_or_clone(&value, &self.state)?
        } else {
            value
        };
        let value = if self.current.must { must_unwrap(value)? } else { value };

        self.stack.truncate(self.current.base);
        match self.callers.pop() {
            None => Ok(OpcodeResult::Return(value)),
            Some(caller) => {
                self.current = caller;
                self.push(value)?;
                Ok(OpcodeResult::Continue)
            }
        }
    }

    /// Unlock the values a frame still holds from unterminated lock blocks.
    /// One level is released per lock so blocks of the callers keep theirs.
    fn release_frame_locks(&mut self) {
        self.current.lock_blocks.clear();
        let locked = std::mem::take(&mut self.current.locked_values);
        for value in locked.iter().rev() {
            if let Value::Object(object) = value {
                object.smart_lock().unlock(self.state.id());
            }
            self.state.remove_locked_value(value);
        }
    }
}

/// Result of a must-call: errors become VM errors, `(value, nil)` tuples are
/// unwrapped
fn must_unwrap(value: Value) -> VmResult<Value> {
    match value {
        Value::Error(err) => Err(VmError::Runtime(err.text.to_string())),
        Value::Tuple(elements) => match elements.split_last() {
            Some((Value::Error(err), _)) => Err(VmError::Runtime(err.text.to_string())),
            Some((Value::Nil, [single])) => Ok(single.clone()),
            Some((Value::Nil, rest)) => Ok(Value::tuple(rest.to_vec())),
            _ => Ok(Value::Tuple(elements)),
        },
        value => Ok(value),
    }
}
