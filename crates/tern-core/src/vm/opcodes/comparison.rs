//! Comparison opcode handlers: Equal, NotEqual, Is, IsNot, Less, LessEqual, Greater, GreaterEqual,
//! Match, In, SubstrOf, KeyOf, NilCoalesce, ToBool

use crate::error::{ValueError, VmResult};
use crate::value::Value;
use crate::vm::{OpcodeResult, Vm};
use std::cmp::Ordering;
use tern_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn exec_comparison_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        if opcode == Opcode::ToBool {
            let value = self.pop()?;
            self.push(Value::Bool(value.to_bool()))?;
            return Ok(OpcodeResult::Continue);
        }

        let right = self.pop()?;
        let left = self.pop()?;
        let result = match opcode {
            Opcode::Equal => Value::Bool(left == right),
            Opcode::NotEqual => Value::Bool(left != right),
            Opcode::Is => Value::Bool(left.same(&right)),
            Opcode::IsNot => Value::Bool(!left.same(&right)),

            Opcode::Less => Value::Bool(left.compare(&right)? == Ordering::Less),
            Opcode::LessEqual => Value::Bool(left.compare(&right)? != Ordering::Greater),
            Opcode::Greater => Value::Bool(left.compare(&right)? == Ordering::Greater),
            Opcode::GreaterEqual => Value::Bool(left.compare(&right)? != Ordering::Less),

            Opcode::Match => match &right {
                Value::Pattern(pattern) => Value::Bool(pattern.test(&left)),
                _ => Value::Bool(left == right),
            },

            Opcode::In => Value::Bool(self.contains(&right, &left)?),

            Opcode::SubstrOf => {
                let needle = left.as_str()?;
                let haystack = right.as_str()?;
                Value::Bool(haystack.contains(needle))
            }

            Opcode::KeyOf => {
                let key = left.as_str()?;
                let found = match &right {
                    Value::Object(object) => {
                        let _guard = object.lock_for(&self.state)?;
                        object.has_prop(key)
                    }
                    Value::Record(record) => record.prop(key).is_some(),
                    other => return Err(ValueError::mismatch("object or record", other).into()),
                };
                Value::Bool(found)
            }

            Opcode::NilCoalesce => {
                if left.is_nil() {
                    right
                } else {
                    left
                }
            }

            _ => unreachable!("Not a comparison opcode: {:?}", opcode),
        };
        self.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    /// Membership test of `In`
    fn contains(&self, container: &Value, element: &Value) -> VmResult<bool> {
        Ok(match container {
            Value::List(list) => list.snapshot().iter().any(|e| e == element),
            Value::Tuple(elements) => elements.iter().any(|e| e == element),
            Value::Object(object) => {
                let _guard = object.lock_for(&self.state)?;
                object.entries().iter().any(|(_, v)| v == element)
            }
            Value::Record(record) => record.entries().iter().any(|(_, v)| v == element),
            Value::IntRange(range) => matches!(element, Value::Int(i) if range.contains(*i)),
            Value::RuneRange(range) => matches!(element, Value::Rune(c) if range.contains(*c)),
            other => {
                return Err(ValueError::mismatch("list, tuple, object, record or range", other).into())
            }
        })
    }
}
