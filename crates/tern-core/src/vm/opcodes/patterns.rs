//! Pattern opcode handlers: pattern construction, combinators, named patterns and namespaces

use crate::error::{ValueError, VmError, VmResult};
use crate::value::{EntryPattern, Pattern, PatternNamespace, StringPattern, TypePattern, Value};
use crate::vm::{OpcodeResult, Vm};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tern_bytecode::{OccurrenceModifier, Opcode};

impl Vm {
    pub(in crate::vm) fn exec_pattern_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::CreateListPattern => {
                let count = self.read_u16()? as usize;
                let has_general_element = self.read_flag()?;
                let pattern = if has_general_element {
                    Pattern::List {
                        elements: Vec::new(),
                        general: Some(Pattern::from_value(self.pop()?)),
                    }
                } else {
                    Pattern::List {
                        elements: self.pop_n(count)?.into_iter().map(Pattern::from_value).collect(),
                        general: None,
                    }
                };
                self.push(Value::Pattern(Arc::new(pattern)))?;
            }

            Opcode::CreateObjectPattern | Opcode::CreateRecordPattern => {
                let slots = self.read_u16()? as usize;
                let inexact = self.read_flag()?;
                let entries = entry_patterns(self.pop_n(slots)?)?;
                let pattern = if opcode == Opcode::CreateObjectPattern {
                    Pattern::Object { entries, inexact }
                } else {
                    Pattern::Record { entries, inexact }
                };
                self.push(Value::Pattern(Arc::new(pattern)))?;
            }

            Opcode::CreateOptionPattern => {
                let name = self.read_str_constant()?;
                let value = Pattern::from_value(self.pop()?);
                self.push(Value::Pattern(Arc::new(Pattern::Option { name, value })))?;
            }

            Opcode::CreateUnionPattern | Opcode::CreateIntersectionPattern => {
                let count = self.read_u16()? as usize;
                let cases = self.pop_n(count)?.into_iter().map(Pattern::from_value).collect();
                let pattern = if opcode == Opcode::CreateUnionPattern {
                    Pattern::Union(cases)
                } else {
                    Pattern::Intersection(cases)
                };
                self.push(Value::Pattern(Arc::new(pattern)))?;
            }

            Opcode::CreateStringUnionPattern => {
                let count = self.read_u16()? as usize;
                let cases = self
                    .pop_n(count)?
                    .iter()
                    .map(string_pattern)
                    .collect::<Result<Vec<_>, _>>()?;
                self.push(Value::Pattern(Arc::new(Pattern::string(StringPattern::Union(cases)))))?;
            }

            Opcode::CreateRepeatedPatternElement => {
                let modifier = self.read_u8()?;
                let modifier = OccurrenceModifier::from_u8(modifier).ok_or_else(|| {
                    VmError::Runtime(format!("invalid occurrence modifier: {}", modifier))
                })?;
                let count = self.read_u8()? as usize;
                let element = string_pattern(&self.pop()?)?;
                self.push(Value::Pattern(Arc::new(Pattern::string(StringPattern::Repeated {
                    element: Box::new(element),
                    modifier,
                    count,
                }))))?;
            }

            Opcode::CreateSequenceStringPattern => {
                let count = self.read_u8()? as usize;
                let elements = self
                    .pop_n(count)?
                    .iter()
                    .map(string_pattern)
                    .collect::<Result<Vec<_>, _>>()?;
                self.push(Value::Pattern(Arc::new(Pattern::string(StringPattern::Sequence(
                    elements,
                )))))?;
            }

            Opcode::CreatePatternNamespace => {
                let entries = match self.pop()? {
                    Value::Record(record) => record.entries().to_vec(),
                    Value::Object(object) => {
                        let _guard = object.lock_for(&self.state)?;
                        object.entries()
                    }
                    other => return Err(ValueError::mismatch("object or record", &other).into()),
                };
                let patterns: FxHashMap<Arc<str>, Arc<Pattern>> = entries
                    .into_iter()
                    .map(|(name, value)| (name, Pattern::from_value(value)))
                    .collect();
                self.push(Value::PatternNamespace(Arc::new(PatternNamespace::new(patterns))))?;
            }

            Opcode::CreateOptionalPattern => {
                let inner = Pattern::from_value(self.pop()?);
                self.push(Value::Pattern(Arc::new(Pattern::Optional(inner))))?;
            }

            Opcode::ToPattern => {
                if !matches!(self.peek(0)?, Value::Pattern(_)) {
                    let value = self.pop()?;
                    self.push(Value::Pattern(Pattern::from_value(value)))?;
                }
            }

            Opcode::DoSetDifference => {
                let removed = Pattern::from_value(self.pop()?);
                let base = Pattern::from_value(self.pop()?);
                self.push(Value::Pattern(Arc::new(Pattern::Difference { base, removed })))?;
            }

            Opcode::SpreadObjectPattern => {
                let spread = self.pop()?;
                let base = self.pop()?;
                self.push(Value::Pattern(Arc::new(merge_object_patterns(&base, &spread)?)))?;
            }

            Opcode::ResolvePattern => {
                let name = self.read_str_constant()?;
                let pattern = self
                    .state
                    .ctx
                    .resolve_named_pattern(&name)
                    .or_else(|| TypePattern::builtin(&name).map(|ty| Arc::new(Pattern::Type(ty))))
                    .ok_or_else(|| VmError::Runtime(format!("pattern %{} is not defined", name)))?;
                self.push(Value::Pattern(pattern))?;
            }

            Opcode::AddPattern => {
                let name = self.read_str_constant()?;
                let pattern = Pattern::from_value(self.pop()?);
                self.state.ctx.add_named_pattern(&name, pattern)?;
            }

            Opcode::ResolvePatternNamespace => {
                let name = self.read_str_constant()?;
                let namespace = self.resolve_namespace(&name)?;
                self.push(Value::PatternNamespace(namespace))?;
            }

            Opcode::AddPatternNamespace => {
                let name = self.read_str_constant()?;
                let namespace = match self.pop()? {
                    Value::PatternNamespace(namespace) => namespace,
                    other => return Err(ValueError::mismatch("pattern namespace", &other).into()),
                };
                self.state.ctx.add_pattern_namespace(&name, namespace)?;
            }

            Opcode::PatternNamespaceMemb => {
                let namespace_name = self.read_str_constant()?;
                let member = self.read_str_constant()?;
                let pattern = self.resolve_namespace(&namespace_name)?.get(&member).ok_or_else(|| {
                    VmError::Runtime(format!(
                        "pattern namespace %{}. has no member {}",
                        namespace_name, member
                    ))
                })?;
                self.push(Value::Pattern(pattern))?;
            }

            _ => unreachable!("Not a pattern opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    fn resolve_namespace(&self, name: &str) -> VmResult<Arc<PatternNamespace>> {
        self.state
            .ctx
            .resolve_pattern_namespace(name)
            .ok_or_else(|| VmError::Runtime(format!("pattern namespace %{}. is not defined", name)))
    }
}

/// Decode `[key, pattern, optional]` triples
fn entry_patterns(values: Vec<Value>) -> Result<Vec<EntryPattern>, ValueError> {
    if values.len() % 3 != 0 {
        return Err(ValueError::InvalidOperation(
            "entry pattern slots should come in triples".to_string(),
        ));
    }
    let mut entries = Vec::with_capacity(values.len() / 3);
    let mut values = values.into_iter();
    while let (Some(key), Some(pattern), Some(optional)) = (values.next(), values.next(), values.next()) {
        let key = match key {
            Value::Str(key) => key,
            other => return Err(ValueError::mismatch("property name", &other)),
        };
        entries.push(EntryPattern {
            key,
            pattern: Pattern::from_value(pattern),
            optional: optional.as_bool()?,
        });
    }
    Ok(entries)
}

/// String pattern of a string literal or of a string pattern value
fn string_pattern(value: &Value) -> Result<StringPattern, ValueError> {
    match value {
        Value::Str(text) => Ok(StringPattern::Exact(text.clone())),
        Value::Pattern(pattern) => match pattern.as_ref() {
            Pattern::String { pattern, .. } => Ok(pattern.clone()),
            Pattern::Exact(Value::Str(text)) => Ok(StringPattern::Exact(text.clone())),
            _ => Err(ValueError::InvalidOperation(format!(
                "%{} is not a string pattern",
                pattern
            ))),
        },
        other => Err(ValueError::mismatch("string pattern", other)),
    }
}

/// Entries of `base` overridden by the entries of `spread`
fn merge_object_patterns(base: &Value, spread: &Value) -> Result<Pattern, ValueError> {
    let (Value::Pattern(base), Value::Pattern(spread)) = (base, spread) else {
        return Err(ValueError::InvalidOperation(
            "only object patterns can be spread".to_string(),
        ));
    };
    let Pattern::Object { entries, inexact } = base.as_ref() else {
        return Err(ValueError::InvalidOperation(format!("%{} is not an object pattern", base)));
    };
    let Pattern::Object { entries: added, .. } = spread.as_ref() else {
        return Err(ValueError::InvalidOperation(format!("%{} is not an object pattern", spread)));
    };

    let mut merged = entries.clone();
    for entry in added {
        match merged.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry.clone(),
            None => merged.push(entry.clone()),
        }
    }
    Ok(Pattern::Object {
        entries: merged,
        inexact: *inexact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: Value, optional: bool) -> EntryPattern {
        EntryPattern {
            key: Arc::from(key),
            pattern: Pattern::from_value(value),
            optional,
        }
    }

    #[test]
    fn test_entry_patterns_from_triples() {
        let entries = entry_patterns(vec![
            Value::str("a"),
            Value::Int(1),
            Value::Bool(false),
            Value::str("b"),
            Value::Int(2),
            Value::Bool(true),
        ])
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].optional);
        assert!(entry_patterns(vec![Value::str("a"), Value::Int(1)]).is_err());
    }

    #[test]
    fn test_string_pattern_conversion() {
        assert_eq!(
            string_pattern(&Value::str("ab")).unwrap(),
            StringPattern::Exact(Arc::from("ab"))
        );
        assert!(string_pattern(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_spread_object_pattern_overrides_entries() {
        let base = Value::Pattern(Arc::new(Pattern::Object {
            entries: vec![entry("a", Value::Int(1), false), entry("b", Value::Int(2), false)],
            inexact: false,
        }));
        let spread = Value::Pattern(Arc::new(Pattern::Object {
            entries: vec![entry("b", Value::Int(3), true)],
            inexact: true,
        }));

        let merged = merge_object_patterns(&base, &spread).unwrap();
        let entries = merged.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].optional);
        assert!(merged.test(&Value::object(vec![("a", Value::Int(1)), ("b", Value::Int(3))])));
        assert!(!merged.test(&Value::object(vec![("a", Value::Int(1)), ("b", Value::Int(2))])));
    }
}
