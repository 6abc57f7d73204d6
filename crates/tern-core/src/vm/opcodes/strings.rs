//! String opcode handlers: StrConcat, Concat, range creation, CreatePath, CreatePathPattern,
//! CreateHost, CreateUrl

use crate::error::{ValueError, VmResult};
use crate::value::{FloatRange, IntRange, List, RuneRange, Value, ValueIterator};
use crate::vm::{OpcodeResult, Vm};
use std::sync::Arc;
use tern_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn exec_string_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::StrConcat => {
                let right = self.pop()?;
                let left = self.pop()?;
                let mut result = String::with_capacity(left.as_str()?.len() + right.as_str()?.len());
                result.push_str(left.as_str()?);
                result.push_str(right.as_str()?);
                self.push(Value::str(result))?;
            }

            Opcode::Concat => {
                let count = self.read_u8()? as usize;
                let flags_index = self.read_u16()? as usize;
                let spread = spread_flags(&self.constant(flags_index)?)?;
                let values = self.pop_n(count)?;

                let mut elements = Vec::with_capacity(values.len());
                for (i, value) in values.into_iter().enumerate() {
                    if spread.get(i).copied().unwrap_or(false) {
                        let iterator = ValueIterator::new(&value)?;
                        while iterator.next() {
                            elements.push(iterator.value()?);
                        }
                    } else {
                        elements.push(value);
                    }
                }
                self.push(concat_values(elements)?)?;
            }

            Opcode::CreateIntRange => {
                let end = self.pop()?.as_int()?;
                let start = self.pop()?.as_int()?;
                self.push(Value::IntRange(IntRange::new(start, end)))?;
            }

            Opcode::CreateFloatRange => {
                let end = self.pop()?.as_float()?;
                let start = self.pop()?.as_float()?;
                if !start.is_finite() || !end.is_finite() {
                    return Err(ValueError::NanOrInfinityOperand.into());
                }
                self.push(Value::FloatRange(FloatRange::new(start, end)))?;
            }

            Opcode::CreateRuneRange => {
                let end = self.pop()?;
                let start = self.pop()?;
                let range = match (&start, &end) {
                    (Value::Rune(start), Value::Rune(end)) => RuneRange {
                        start: *start,
                        end: *end,
                    },
                    (Value::Rune(_), other) | (other, _) => {
                        return Err(ValueError::mismatch("rune", other).into())
                    }
                };
                self.push(Value::RuneRange(range))?;
            }

            Opcode::CreateUpperBoundRange => {
                let range = match self.pop()? {
                    Value::Int(end) => Value::IntRange(IntRange::upper_bound(end)),
                    Value::Float(end) if end.is_finite() => {
                        Value::FloatRange(FloatRange::upper_bound(end))
                    }
                    Value::Float(_) => return Err(ValueError::NanOrInfinityOperand.into()),
                    other => return Err(ValueError::mismatch("int or float", &other).into()),
                };
                self.push(range)?;
            }

            Opcode::CreatePath => {
                let count = self.read_u8()? as usize;
                let slices = self.pop_n(count)?;
                self.push(Value::Path(Arc::from(join_path_slices(&slices)?)))?;
            }

            Opcode::CreatePathPattern => {
                let count = self.read_u8()? as usize;
                let slices = self.pop_n(count)?;
                self.push(Value::PathPattern(Arc::from(join_path_slices(&slices)?)))?;
            }

            Opcode::CreateHost => {
                let scheme = self.read_str_constant()?;
                let authority = self.pop()?;
                let authority = authority.as_str()?;
                if authority.is_empty() || authority.contains('/') {
                    return Err(ValueError::InvalidOperation(format!(
                        "invalid host authority: {:?}",
                        authority
                    ))
                    .into());
                }
                self.push(Value::Host(Arc::from(format!("{}://{}", scheme, authority))))?;
            }

            Opcode::CreateUrl => {
                let count = self.read_u8()? as usize;
                let slices = self.pop_n(count)?;
                let host = match self.pop()? {
                    Value::Host(host) => host,
                    other => return Err(ValueError::mismatch("host", &other).into()),
                };
                let path = join_path_slices(&slices)?;
                let separator = if path.starts_with('/') { "" } else { "/" };
                self.push(Value::Url(Arc::from(format!("{}{}{}", host, separator, path))))?;
            }

            _ => unreachable!("Not a string opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }
}

/// Decode the spread-flags constant of `Concat`: a tuple or list of booleans, or nil
fn spread_flags(constant: &Value) -> Result<Vec<bool>, ValueError> {
    let elements = match constant {
        Value::Nil => return Ok(Vec::new()),
        Value::Tuple(elements) => elements.to_vec(),
        Value::List(list) => list.snapshot(),
        other => return Err(ValueError::mismatch("tuple of booleans", other)),
    };
    elements.iter().map(Value::as_bool).collect()
}

/// Concatenate strings, lists or tuples; the first element picks the result kind
fn concat_values(values: Vec<Value>) -> Result<Value, ValueError> {
    let Some(first) = values.first() else {
        return Err(ValueError::InvalidOperation("nothing to concatenate".to_string()));
    };
    match first {
        Value::Str(_) => {
            let mut result = String::new();
            for value in &values {
                match value {
                    Value::Str(s) => result.push_str(s),
                    other => return Err(ValueError::mismatch("string", other)),
                }
            }
            Ok(Value::str(result))
        }
        Value::List(_) => {
            let result = List::default();
            for value in &values {
                match value {
                    Value::List(list) => result.extend(list.snapshot()),
                    other => return Err(ValueError::mismatch("list", other)),
                }
            }
            Ok(Value::List(Arc::new(result)))
        }
        Value::Tuple(_) => {
            let mut result = Vec::new();
            for value in &values {
                match value {
                    Value::Tuple(elements) => result.extend(elements.iter().cloned()),
                    other => return Err(ValueError::mismatch("tuple", other)),
                }
            }
            Ok(Value::tuple(result))
        }
        other => Err(ValueError::InvalidOperation(format!(
            "values of type {} cannot be concatenated",
            other.type_name()
        ))),
    }
}

/// Join the slices of a path literal. The first slice is the literal's
/// prefix; interpolated slices must not contain `..` segments.
fn join_path_slices(slices: &[Value]) -> Result<String, ValueError> {
    let mut path = String::new();
    for (i, slice) in slices.iter().enumerate() {
        let text = match slice {
            Value::Str(s) | Value::Path(s) | Value::PathPattern(s) => s.as_ref(),
            Value::Int(_) | Value::Rune(_) => {
                path.push_str(&slice_text(slice));
                continue;
            }
            other => return Err(ValueError::mismatch("path slice", other)),
        };
        if i > 0 && text.split('/').any(|segment| segment == "..") {
            return Err(ValueError::InvalidOperation(
                "path slices should not contain '..' segments".to_string(),
            ));
        }
        path.push_str(text);
    }
    Ok(path)
}

fn slice_text(value: &Value) -> String {
    match value {
        Value::Rune(c) => c.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_values() {
        assert_eq!(
            concat_values(vec![Value::str("a"), Value::str("bc")]).unwrap(),
            Value::str("abc")
        );
        assert_eq!(
            concat_values(vec![
                Value::tuple(vec![Value::Int(1)]),
                Value::tuple(vec![Value::Int(2)])
            ])
            .unwrap(),
            Value::tuple(vec![Value::Int(1), Value::Int(2)])
        );
        assert!(concat_values(vec![Value::str("a"), Value::Int(1)]).is_err());
        assert!(concat_values(vec![]).is_err());
    }

    #[test]
    fn test_path_slices_reject_parent_segments() {
        let ok = join_path_slices(&[Value::str("/home/"), Value::str("user")]).unwrap();
        assert_eq!(ok, "/home/user");
        assert_eq!(
            join_path_slices(&[Value::str("../"), Value::Int(1)]).unwrap(),
            "../1"
        );
        assert!(join_path_slices(&[Value::str("/home/"), Value::str("../etc")]).is_err());
    }

    #[test]
    fn test_spread_flags() {
        assert_eq!(spread_flags(&Value::Nil).unwrap(), Vec::<bool>::new());
        assert_eq!(
            spread_flags(&Value::tuple(vec![Value::Bool(false), Value::Bool(true)])).unwrap(),
            vec![false, true]
        );
        assert!(spread_flags(&Value::Int(1)).is_err());
    }
}
