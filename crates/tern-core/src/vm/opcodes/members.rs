//! Member opcode handlers: Memb, OptionalMemb, ComputedMemb, SetMember, At, SafeAt, SetIndex,
//! Slice, SetSlice, GetStructField, SetStructField

use crate::error::{ValueError, VmResult};
use crate::value::composite::{checked_bounds, checked_index};
use crate::value::{List, Value};
use crate::vm::{OpcodeResult, Vm};
use std::sync::Arc;
use tern_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn exec_member_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::Memb => {
                let name = self.read_str_constant()?;
                let value = self.pop()?;
                let member = self
                    .member(&value, &name)?
                    .ok_or_else(|| ValueError::PropertyNotFound(name.to_string()))?;
                self.push(member)?;
            }

            Opcode::OptionalMemb => {
                let name = self.read_str_constant()?;
                let value = self.pop()?;
                let member = match value {
                    Value::Nil => Value::Nil,
                    value => self.member(&value, &name)?.unwrap_or(Value::Nil),
                };
                self.push(member)?;
            }

            Opcode::ComputedMemb => {
                let name = self.pop()?;
                let value = self.pop()?;
                let name = name.as_str()?;
                let member = self
                    .member(&value, name)?
                    .ok_or_else(|| ValueError::PropertyNotFound(name.to_string()))?;
                self.push(member)?;
            }

            Opcode::SetMember => {
                let name = self.read_str_constant()?;
                let value = self.pop()?;
                match self.pop()? {
                    Value::Object(object) => object.set_prop(&self.state, &name, value)?,
                    Value::Struct(instance) => {
                        let index = instance
                            .field_index(&name)
                            .ok_or_else(|| ValueError::PropertyNotFound(name.to_string()))?;
                        instance.set_field(index, value)?;
                    }
                    other => return Err(ValueError::mismatch("object or struct", &other).into()),
                }
            }

            Opcode::At | Opcode::SafeAt => {
                let index = self.pop()?;
                let container = self.pop()?;
                let element = match element_at(&container, &index) {
                    Ok(element) => element,
                    Err(ValueError::IndexOutOfRange { .. } | ValueError::PropertyNotFound(_))
                        if opcode == Opcode::SafeAt =>
                    {
                        Value::Nil
                    }
                    Err(err) => return Err(err.into()),
                };
                self.push(element)?;
            }

            Opcode::SetIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                match self.pop()? {
                    Value::List(list) => list.set(index.as_int()?, value)?,
                    Value::Dictionary(dict) => dict.set(index, value),
                    other => return Err(ValueError::mismatch("list or dictionary", &other).into()),
                }
            }

            Opcode::Slice => {
                let end = self.pop()?;
                let start = self.pop()?;
                let sequence = self.pop()?;
                self.push(slice(&sequence, &start, &end)?)?;
            }

            Opcode::SetSlice => {
                let value = self.pop()?;
                let end = self.pop()?;
                let start = self.pop()?;
                let list = match self.pop()? {
                    Value::List(list) => list,
                    other => return Err(ValueError::mismatch("list", &other).into()),
                };
                let elements = match value {
                    Value::List(source) => source.snapshot(),
                    Value::Tuple(elements) => elements.to_vec(),
                    other => return Err(ValueError::mismatch("list or tuple", &other).into()),
                };
                let start = optional_bound(&start, 0)?;
                let end = optional_bound(&end, i64::MAX)?;
                list.set_slice(start, end, elements)?;
            }

            Opcode::GetStructField => {
                let index = self.read_u8()? as usize;
                let field = match self.pop()? {
                    Value::Struct(instance) => instance.field(index)?,
                    other => return Err(ValueError::mismatch("struct", &other).into()),
                };
                self.push(field)?;
            }

            Opcode::SetStructField => {
                let index = self.read_u8()? as usize;
                let value = self.pop()?;
                match self.pop()? {
                    Value::Struct(instance) => instance.set_field(index, value)?,
                    other => return Err(ValueError::mismatch("struct", &other).into()),
                }
            }

            _ => unreachable!("Not a member opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// Named member of a value, `None` when the value has no such member
    fn member(&self, value: &Value, name: &str) -> VmResult<Option<Value>> {
        Ok(match value {
            Value::Object(object) => object.prop(&self.state, name)?,
            Value::Record(record) => record.prop(name).cloned(),
            Value::Struct(instance) => match instance.field_index(name) {
                Some(index) => Some(instance.field(index)?),
                None => None,
            },
            Value::NamedOption(option) => match name {
                "name" => Some(Value::Str(option.name.clone())),
                "value" => Some(option.value.clone()),
                _ => None,
            },
            Value::Error(error) => match name {
                "text" => Some(Value::Str(error.text.clone())),
                "data" => Some(error.data.clone()),
                _ => None,
            },
            other => {
                return Err(ValueError::InvalidOperation(format!(
                    "value of type {} has no members",
                    other.type_name()
                ))
                .into())
            }
        })
    }
}

fn element_at(container: &Value, index: &Value) -> Result<Value, ValueError> {
    match container {
        Value::List(list) => list.at(index.as_int()?),
        Value::Tuple(elements) => {
            let i = checked_index(index.as_int()?, elements.len())?;
            Ok(elements[i].clone())
        }
        Value::KeyList(keys) => {
            let i = checked_index(index.as_int()?, keys.len())?;
            Ok(Value::Str(keys[i].clone()))
        }
        Value::Str(s) => {
            let i = index.as_int()?;
            let length = s.chars().count();
            let i = checked_index(i, length)?;
            s.chars()
                .nth(i)
                .map(Value::Rune)
                .ok_or(ValueError::IndexOutOfRange {
                    index: i as i64,
                    length,
                })
        }
        Value::Dictionary(dict) => dict
            .get(index)
            .ok_or_else(|| ValueError::PropertyNotFound(index.to_string())),
        other => Err(ValueError::mismatch("indexable", other)),
    }
}

/// Slice bound, nil standing for `default`
fn optional_bound(bound: &Value, default: i64) -> Result<i64, ValueError> {
    match bound {
        Value::Nil => Ok(default),
        other => other.as_int(),
    }
}

fn slice(sequence: &Value, start: &Value, end: &Value) -> Result<Value, ValueError> {
    let start = optional_bound(start, 0)?;
    let end = optional_bound(end, i64::MAX)?;
    match sequence {
        Value::List(list) => Ok(Value::List(Arc::new(List::new(list.slice(start, end)?)))),
        Value::Tuple(elements) => {
            let (start, end) = checked_bounds(start, end, elements.len())?;
            Ok(Value::tuple(elements[start..end].to_vec()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = checked_bounds(start, end, chars.len())?;
            Ok(Value::str(chars[start..end].iter().collect::<String>()))
        }
        other => Err(ValueError::mismatch("list, tuple or string", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_at() {
        let tuple = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(element_at(&tuple, &Value::Int(1)).unwrap(), Value::Int(2));
        assert!(matches!(
            element_at(&tuple, &Value::Int(2)),
            Err(ValueError::IndexOutOfRange { index: 2, length: 2 })
        ));
        assert_eq!(element_at(&Value::str("héllo"), &Value::Int(1)).unwrap(), Value::Rune('é'));
        assert!(element_at(&Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_slice_with_nil_bounds() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            slice(&list, &Value::Int(1), &Value::Nil).unwrap(),
            Value::list(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(slice(&Value::str("abc"), &Value::Nil, &Value::Int(2)).unwrap(), Value::str("ab"));
        assert_eq!(
            slice(&list, &Value::Int(-1), &Value::Nil),
            Err(ValueError::NegativeLowerIndex)
        );
    }
}
