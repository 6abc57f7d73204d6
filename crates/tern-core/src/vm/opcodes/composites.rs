//! Composite opcode handlers: list, tuple, key list, object, record, dictionary, struct, option and
//! XML element creation, spreading, ExtractProps, Append

use crate::error::{ValueError, VmResult};
use crate::value::{Dictionary, NamedOption, Object, Record, Struct, Value, XmlElement};
use crate::vm::{OpcodeResult, Vm};
use std::sync::Arc;
use tern_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn exec_composite_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::CreateList => {
                let count = self.read_u16()? as usize;
                let elements = self.pop_n(count)?;
                self.push(Value::list(elements))?;
            }

            Opcode::CreateTuple => {
                let count = self.read_u16()? as usize;
                let elements = self.pop_n(count)?;
                self.push(Value::tuple(elements))?;
            }

            Opcode::CreateKeyList => {
                let count = self.read_u16()? as usize;
                let keys = self
                    .pop_n(count)?
                    .into_iter()
                    .map(|key| match key {
                        Value::Str(s) => Ok(s),
                        other => Err(ValueError::mismatch("identifier", &other)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.push(Value::KeyList(keys.into()))?;
            }

            Opcode::CreateObject => {
                let slots = self.read_u16()? as usize;
                let mut entries = Vec::with_capacity(slots / 2);
                let mut handlers = Vec::new();
                for (key, value) in key_value_pairs(self.pop_n(slots)?)? {
                    match value {
                        Value::MessageHandler(handler) => handlers.push(handler),
                        value => entries.push((key, value)),
                    }
                }
                self.push(Value::Object(Arc::new(Object::with_handlers(entries, handlers))))?;
            }

            Opcode::CreateRecord => {
                let slots = self.read_u16()? as usize;
                let entries = key_value_pairs(self.pop_n(slots)?)?;
                if let Some((key, value)) = entries.iter().find(|(_, v)| v.is_mutable()) {
                    return Err(ValueError::InvalidOperation(format!(
                        "record property .{} cannot hold a mutable value of type {}",
                        key,
                        value.type_name()
                    ))
                    .into());
                }
                self.push(Value::Record(Arc::new(Record::new(entries))))?;
            }

            Opcode::CreateDict => {
                let slots = self.read_u16()? as usize;
                let mut values = self.pop_n(slots)?.into_iter();
                let mut entries = Vec::with_capacity(slots / 2);
                while let (Some(key), Some(value)) = (values.next(), values.next()) {
                    entries.push((key, value));
                }
                self.push(Value::Dictionary(Arc::new(Dictionary::new(entries))))?;
            }

            Opcode::CreateStruct => {
                let type_index = self.read_u16()? as usize;
                let count = self.read_u8()? as usize;
                let struct_type = match self.constant(type_index)? {
                    Value::StructType(ty) => ty,
                    other => return Err(ValueError::mismatch("struct type", &other).into()),
                };
                let fields = self.pop_n(count)?;
                self.push(Value::Struct(Arc::new(Struct::new(struct_type, fields)?)))?;
            }

            Opcode::CreateOption => {
                let name = self.read_str_constant()?;
                let value = self.pop()?;
                self.push(Value::NamedOption(Arc::new(NamedOption { name, value })))?;
            }

            Opcode::CreateXmlElement => {
                let name = self.read_str_constant()?;
                let attribute_count = self.read_u8()? as usize;
                let child_count = self.read_u8()? as usize;
                let children = self.pop_n(child_count)?;
                let attributes = key_value_pairs(self.pop_n(attribute_count * 2)?)?;
                self.push(Value::XmlElement(Arc::new(XmlElement {
                    name,
                    attributes,
                    children,
                })))?;
            }

            Opcode::SpreadObject => {
                let source = self.pop()?;
                let entries = match &source {
                    Value::Object(object) => {
                        let _guard = object.lock_for(&self.state)?;
                        object.entries()
                    }
                    Value::Record(record) => record.entries().to_vec(),
                    other => return Err(ValueError::mismatch("object or record", other).into()),
                };
                let Value::Object(destination) = self.peek(0)?.clone() else {
                    return Err(ValueError::mismatch("object", self.peek(0)?).into());
                };
                for (key, value) in entries {
                    destination.set_prop(&self.state, &key, value)?;
                }
            }

            Opcode::SpreadList => {
                let source = self.pop()?;
                let elements = match &source {
                    Value::List(list) => list.snapshot(),
                    Value::Tuple(elements) => elements.to_vec(),
                    other => return Err(ValueError::mismatch("list or tuple", other).into()),
                };
                match self.peek(0)? {
                    Value::List(destination) => destination.extend(elements),
                    other => return Err(ValueError::mismatch("list", other).into()),
                }
            }

            Opcode::SpreadTuple => {
                let source = self.pop()?;
                let spread = match &source {
                    Value::Tuple(elements) => elements.to_vec(),
                    Value::List(list) => list.snapshot(),
                    other => return Err(ValueError::mismatch("tuple or list", other).into()),
                };
                let combined = match self.peek(0)? {
                    Value::Tuple(elements) => elements.iter().cloned().chain(spread).collect(),
                    other => return Err(ValueError::mismatch("tuple", other).into()),
                };
                self.replace_top(Value::tuple(combined))?;
            }

            Opcode::ExtractProps => {
                let keys_index = self.read_u16()? as usize;
                let keys = match self.constant(keys_index)? {
                    Value::KeyList(keys) => keys,
                    other => return Err(ValueError::mismatch("key list", &other).into()),
                };
                let object = match self.pop()? {
                    Value::Object(object) => object,
                    other => return Err(ValueError::mismatch("object", &other).into()),
                };
                let mut entries = Vec::with_capacity(keys.len());
                for key in keys.iter() {
                    let value = object
                        .prop(&self.state, key)?
                        .ok_or_else(|| ValueError::PropertyNotFound(key.to_string()))?;
                    entries.push((key.clone(), value));
                }
                self.push(Value::Object(Arc::new(Object::new(entries))))?;
            }

            Opcode::Append => {
                let count = self.read_u8()? as usize;
                let values = self.pop_n(count)?;
                match self.peek(0)? {
                    Value::List(list) => list.extend(values),
                    other => return Err(ValueError::mismatch("list", other).into()),
                }
            }

            _ => unreachable!("Not a composite opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }
}

/// Group `[k0, v0, k1, v1, ...]` into pairs, keys must be strings
fn key_value_pairs(values: Vec<Value>) -> Result<Vec<(Arc<str>, Value)>, ValueError> {
    if values.len() % 2 != 0 {
        return Err(ValueError::InvalidOperation(
            "odd number of key/value slots".to_string(),
        ));
    }
    let mut pairs = Vec::with_capacity(values.len() / 2);
    let mut values = values.into_iter();
    while let (Some(key), Some(value)) = (values.next(), values.next()) {
        match key {
            Value::Str(key) => pairs.push((key, value)),
            other => return Err(ValueError::mismatch("property name", &other)),
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_pairs() {
        let pairs = key_value_pairs(vec![Value::str("a"), Value::Int(1), Value::str("b"), Value::Nil]).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(&*pairs[1].0, "b");
        assert!(key_value_pairs(vec![Value::str("a")]).is_err());
        assert!(key_value_pairs(vec![Value::Int(1), Value::Int(2)]).is_err());
    }
}
