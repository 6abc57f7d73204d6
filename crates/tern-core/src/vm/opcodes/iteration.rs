//! Iteration opcode handlers: IterInit, IterNext, IterNextChunk, IterKey, IterValue
//!
//! Iterators and streams both live on the operand stack (usually kept in a
//! local by the compiler). A stream has no current element, so `IterNext`
//! and `IterNextChunk` store what they read into the local named by their
//! operand and `IterValue` reads it back from there.

use crate::error::{ValueError, VmError, VmResult};
use crate::value::{FilteredStream, Pattern, ReadableStream, StreamError, Value, ValueIterator};
use crate::vm::{OpcodeResult, Vm};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tern_bytecode::Opcode;

/// Bounds of a chunk read by `IterNextChunk`
const STREAM_CHUNK_SIZE: RangeInclusive<usize> = 2..=10;

impl Vm {
    pub(in crate::vm) fn exec_iteration_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::IterInit => {
                let has_filters = self.read_flag()?;
                let (key_filter, value_filter) = if has_filters {
                    let value_filter = optional_pattern(self.pop()?);
                    let key_filter = optional_pattern(self.pop()?);
                    (key_filter, value_filter)
                } else {
                    (None, None)
                };
                let iterable = self.pop()?;
                let iterator = match iterable {
                    Value::Stream(stream) => match value_filter {
                        Some(filter) => {
                            Value::Stream(Arc::new(FilteredStream::new(stream, filter)))
                        }
                        None => Value::Stream(stream),
                    },
                    Value::Iterator(iterator) if !has_filters => Value::Iterator(iterator),
                    iterable => Value::Iterator(Arc::new(
                        ValueIterator::new(&iterable)?.with_filters(key_filter, value_filter),
                    )),
                };
                self.push(iterator)?;
            }

            Opcode::IterNext => {
                let local = self.read_u8()? as usize;
                let has_next = match self.pop()? {
                    Value::Iterator(iterator) => iterator.next(),
                    Value::Stream(stream) => match self.wait_stream_element(&stream)? {
                        Some(element) => {
                            let slot = self.local_slot(local)?;
                            self.stack[slot] = element;
                            true
                        }
                        None => false,
                    },
                    other => return Err(ValueError::mismatch("iterator or stream", &other).into()),
                };
                self.push(Value::Bool(has_next))?;
            }

            Opcode::IterNextChunk => {
                let local = self.read_u8()? as usize;
                let stream = match self.pop()? {
                    Value::Stream(stream) => stream,
                    other => return Err(ValueError::mismatch("stream", &other).into()),
                };
                let has_next = match self.wait_stream_chunk(&stream)? {
                    Some(chunk) => {
                        let slot = self.local_slot(local)?;
                        self.stack[slot] = Value::list(chunk);
                        true
                    }
                    None => false,
                };
                self.push(Value::Bool(has_next))?;
            }

            Opcode::IterKey => {
                let key = match self.peek(0)? {
                    Value::Iterator(iterator) => iterator.key()?,
                    other => return Err(ValueError::mismatch("iterator", other).into()),
                };
                self.replace_top(key)?;
            }

            Opcode::IterValue => {
                let local = self.read_u8()? as usize;
                let value = match self.peek(0)? {
                    Value::Iterator(iterator) => iterator.value()?,
                    Value::Stream(_) => self.stack[self.local_slot(local)?].clone(),
                    other => return Err(ValueError::mismatch("iterator or stream", other).into()),
                };
                self.replace_top(value)?;
            }

            _ => unreachable!("Not an iteration opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// Next element of a stream, `None` at the end. Timeouts are retried
    /// until the context is done. CPU time is not counted while waiting.
    fn wait_stream_element(&self, stream: &Arc<dyn ReadableStream>) -> VmResult<Option<Value>> {
        let _paused = self.state.ctx.pause_cpu_accounting();
        loop {
            match stream.wait_next(None, self.config.stream_wait_timeout) {
                Ok(element) => return Ok(Some(element)),
                Err(StreamError::EndOfStream) => return Ok(None),
                Err(StreamError::WaitTimeout) => self.check_not_done()?,
            }
        }
    }

    fn wait_stream_chunk(&self, stream: &Arc<dyn ReadableStream>) -> VmResult<Option<Vec<Value>>> {
        let _paused = self.state.ctx.pause_cpu_accounting();
        loop {
            match stream.wait_next_chunk(STREAM_CHUNK_SIZE, self.config.stream_wait_timeout) {
                Ok(chunk) => return Ok(Some(chunk)),
                Err(StreamError::EndOfStream) => return Ok(None),
                Err(StreamError::WaitTimeout) => self.check_not_done()?,
            }
        }
    }

    fn check_not_done(&self) -> VmResult<()> {
        match self.state.ctx.err() {
            Some(err) => Err(VmError::Context(err)),
            None => Ok(()),
        }
    }
}

/// Iteration filter, nil meaning no filter
fn optional_pattern(value: Value) -> Option<Arc<Pattern>> {
    match value {
        Value::Nil => None,
        value => Some(Pattern::from_value(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_pattern() {
        assert!(optional_pattern(Value::Nil).is_none());
        let pattern = optional_pattern(Value::Int(1)).unwrap();
        assert!(pattern.test(&Value::Int(1)));
        assert!(!pattern.test(&Value::Int(2)));
    }
}
