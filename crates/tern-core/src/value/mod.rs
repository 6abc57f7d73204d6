//! Runtime values
//!
//! [`Value`] is a closed sum over every runtime datum. Scalars and immutable
//! composites are stored inline or behind an `Arc` and may be freely shared
//! between lthreads. Mutable composites (lists, objects, dictionaries,
//! structs) are reference types: cloning a `Value` clones the handle, not the
//! data. Crossing a concurrency boundary goes through [`share_or_clone`].

pub mod arith;
pub mod composite;
pub mod function;
pub mod iter;
pub mod pattern;
pub mod share;

pub use composite::{
    Dictionary, ErrorValue, FloatRange, IntRange, List, MessageHandler, NamedOption, Object,
    Record, RuneRange, Struct, StructType, XmlElement,
};
pub use function::{Function, NativeCall, NativeFunction, SharedOrigin};
pub use iter::{ElementStream, FilteredStream, ReadableStream, StreamError, ValueIterator};
pub use pattern::{EntryPattern, Pattern, PatternNamespace, StringPattern, TypePattern};
pub use share::{check_shared_or_immutable, share_or_clone, SmartLock, SmartLockGuard};

use crate::bytecode::Module;
use crate::error::ValueError;
use crate::lthread::{LThread, LThreadGroup};
use chrono::{DateTime, SecondsFormat, Utc};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Pairs of composite addresses already being compared
pub type CycleGuard = FxHashSet<(usize, usize)>;

/// A runtime value
#[derive(Clone, Debug)]
pub enum Value {
    /// Absence of value
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Byte
    Byte(u8),
    /// Unicode scalar value
    Rune(char),
    /// Immutable string
    Str(Arc<str>),
    /// Non-negative duration
    Duration(Duration),
    /// Point in time
    DateTime(DateTime<Utc>),
    /// Inclusive integer range
    IntRange(IntRange),
    /// Float range
    FloatRange(FloatRange),
    /// Rune range
    RuneRange(RuneRange),
    /// Filesystem path
    Path(Arc<str>),
    /// Filesystem path pattern (`*` globs)
    PathPattern(Arc<str>),
    /// URL
    Url(Arc<str>),
    /// Scheme + authority
    Host(Arc<str>),
    /// Named option (`--name=value`)
    NamedOption(Arc<NamedOption>),
    /// List of identifiers
    KeyList(Arc<[Arc<str>]>),
    /// Immutable sequence
    Tuple(Arc<[Value]>),
    /// Immutable key/value map
    Record(Arc<Record>),
    /// Mutable sequence
    List(Arc<List>),
    /// Mutable, sharable key/value map
    Object(Arc<Object>),
    /// Mutable map with arbitrary keys
    Dictionary(Arc<Dictionary>),
    /// Fixed-layout mutable record
    Struct(Arc<Struct>),
    /// Layout of a struct
    StructType(Arc<StructType>),
    /// XML element
    XmlElement(Arc<XmlElement>),
    /// Compiled function with its captures
    Function(Arc<Function>),
    /// Host function
    NativeFunction(Arc<NativeFunction>),
    /// Synchronous message handler of an object
    MessageHandler(Arc<MessageHandler>),
    /// Pattern
    Pattern(Arc<Pattern>),
    /// Named group of patterns
    PatternNamespace(Arc<PatternNamespace>),
    /// Iterator over a container
    Iterator(Arc<ValueIterator>),
    /// Readable stream of values
    Stream(Arc<dyn ReadableStream>),
    /// Handle to a running lthread
    LThread(Arc<LThread>),
    /// Group of lthreads
    LThreadGroup(Arc<LThreadGroup>),
    /// Embedded module (spawn targets)
    Module(Arc<Module>),
    /// Error value
    Error(Arc<ErrorValue>),
}

impl Value {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a string value
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Create a list value
    pub fn list(elements: Vec<Value>) -> Self {
        Value::List(Arc::new(List::new(elements)))
    }

    /// Create a tuple value
    pub fn tuple(elements: Vec<Value>) -> Self {
        Value::Tuple(elements.into())
    }

    /// Create an object value
    pub fn object<K: AsRef<str>>(entries: Vec<(K, Value)>) -> Self {
        Value::Object(Arc::new(Object::new(
            entries
                .into_iter()
                .map(|(k, v)| (Arc::from(k.as_ref()), v))
                .collect(),
        )))
    }

    /// Create a record value
    pub fn record<K: AsRef<str>>(entries: Vec<(K, Value)>) -> Self {
        Value::Record(Arc::new(Record::new(
            entries
                .into_iter()
                .map(|(k, v)| (Arc::from(k.as_ref()), v))
                .collect(),
        )))
    }

    /// Create an error value
    pub fn error(text: impl AsRef<str>) -> Self {
        Value::Error(Arc::new(ErrorValue::new(text, Value::Nil)))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Byte(_) => "byte",
            Value::Rune(_) => "rune",
            Value::Str(_) => "string",
            Value::Duration(_) => "duration",
            Value::DateTime(_) => "datetime",
            Value::IntRange(_) => "int-range",
            Value::FloatRange(_) => "float-range",
            Value::RuneRange(_) => "rune-range",
            Value::Path(_) => "path",
            Value::PathPattern(_) => "path-pattern",
            Value::Url(_) => "url",
            Value::Host(_) => "host",
            Value::NamedOption(_) => "option",
            Value::KeyList(_) => "key-list",
            Value::Tuple(_) => "tuple",
            Value::Record(_) => "record",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Dictionary(_) => "dictionary",
            Value::Struct(_) => "struct",
            Value::StructType(_) => "struct-type",
            Value::XmlElement(_) => "xml-element",
            Value::Function(_) => "function",
            Value::NativeFunction(_) => "native-function",
            Value::MessageHandler(_) => "message-handler",
            Value::Pattern(_) => "pattern",
            Value::PatternNamespace(_) => "pattern-namespace",
            Value::Iterator(_) => "iterator",
            Value::Stream(_) => "stream",
            Value::LThread(_) => "lthread",
            Value::LThreadGroup(_) => "lthread-group",
            Value::Module(_) => "module",
            Value::Error(_) => "error",
        }
    }

    /// Whether the value can be mutated after creation
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            Value::List(_)
                | Value::Object(_)
                | Value::Dictionary(_)
                | Value::Struct(_)
                | Value::Iterator(_)
                | Value::Stream(_)
        )
    }

    /// Whether the value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Truthiness used by `ToBool` and conditional jumps on non-booleans
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Byte(b) => *b != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Duration(d) => !d.is_zero(),
            Value::KeyList(keys) => !keys.is_empty(),
            Value::Tuple(elements) => !elements.is_empty(),
            Value::Record(record) => !record.entries().is_empty(),
            Value::List(list) => list.len() != 0,
            Value::Object(object) => object.len() != 0,
            Value::Dictionary(dict) => dict.len() != 0,
            _ => true,
        }
    }

    /// Integer content
    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(ValueError::mismatch("int", other)),
        }
    }

    /// Float content
    pub fn as_float(&self) -> Result<f64, ValueError> {
        match self {
            Value::Float(f) => Ok(*f),
            other => Err(ValueError::mismatch("float", other)),
        }
    }

    /// Boolean content
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(ValueError::mismatch("bool", other)),
        }
    }

    /// String content of strings and other string-like values
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Str(s) | Value::Path(s) | Value::PathPattern(s) | Value::Url(s) | Value::Host(s) => Ok(s),
            other => Err(ValueError::mismatch("string", other)),
        }
    }

    // =========================================================================
    // Equality, identity & ordering
    // =========================================================================

    /// Structural equality that terminates on cyclic data.
    ///
    /// `guard` holds the pairs of composites currently being compared; meeting
    /// a pair again means the cycle matches so far.
    pub fn equal(&self, other: &Value, guard: &mut CycleGuard) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Rune(a), Value::Rune(b)) => a == b,
            (Value::Str(a), Value::Str(b))
            | (Value::Path(a), Value::Path(b))
            | (Value::PathPattern(a), Value::PathPattern(b))
            | (Value::Url(a), Value::Url(b))
            | (Value::Host(a), Value::Host(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::IntRange(a), Value::IntRange(b)) => a == b,
            (Value::FloatRange(a), Value::FloatRange(b)) => a == b,
            (Value::RuneRange(a), Value::RuneRange(b)) => a == b,
            (Value::KeyList(a), Value::KeyList(b)) => a == b,
            (Value::NamedOption(a), Value::NamedOption(b)) => {
                a.name == b.name && a.value.equal(&b.value, guard)
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                Arc::ptr_eq(a, b) || sequences_equal(a, b, guard)
            }
            (Value::Record(a), Value::Record(b)) => {
                Arc::ptr_eq(a, b) || entries_equal(a.entries(), b.entries(), guard)
            }
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if !guard.insert((addr(a), addr(b))) {
                    return true;
                }
                sequences_equal(&a.snapshot(), &b.snapshot(), guard)
            }
            (Value::Object(a), Value::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if !guard.insert((addr(a), addr(b))) {
                    return true;
                }
                entries_equal(&a.entries(), &b.entries(), guard)
            }
            (Value::Dictionary(a), Value::Dictionary(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if !guard.insert((addr(a), addr(b))) {
                    return true;
                }
                let (left, right) = (a.entries(), b.entries());
                left.len() == right.len()
                    && left.iter().all(|(key, value)| {
                        right
                            .iter()
                            .find(|(k, _)| k.equal(key, guard))
                            .is_some_and(|(_, v)| v.equal(value, guard))
                    })
            }
            (Value::Struct(a), Value::Struct(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if !guard.insert((addr(a), addr(b))) {
                    return true;
                }
                Arc::ptr_eq(a.struct_type(), b.struct_type())
                    && sequences_equal(&a.fields(), &b.fields(), guard)
            }
            (Value::XmlElement(a), Value::XmlElement(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.name == b.name
                        && entries_equal(&a.attributes, &b.attributes, guard)
                        && sequences_equal(&a.children, &b.children, guard))
            }
            (Value::Error(a), Value::Error(b)) => {
                Arc::ptr_eq(a, b) || (a.text == b.text && a.data.equal(&b.data, guard))
            }
            _ => self.same(other),
        }
    }

    /// Identity: reference equality for reference types, equality for scalars
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Dictionary(a), Value::Dictionary(b)) => Arc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Arc::ptr_eq(a, b),
            (Value::StructType(a), Value::StructType(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => Arc::ptr_eq(a, b),
            (Value::MessageHandler(a), Value::MessageHandler(b)) => Arc::ptr_eq(a, b),
            (Value::Pattern(a), Value::Pattern(b)) => Arc::ptr_eq(a, b),
            (Value::PatternNamespace(a), Value::PatternNamespace(b)) => Arc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Arc::ptr_eq(a, b),
            (Value::Stream(a), Value::Stream(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (Value::LThread(a), Value::LThread(b)) => Arc::ptr_eq(a, b),
            (Value::LThreadGroup(a), Value::LThreadGroup(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b) || self == other,
            (Value::Record(a), Value::Record(b)) => Arc::ptr_eq(a, b) || self == other,
            (Value::XmlElement(a), Value::XmlElement(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            _ if self.is_reference() || other.is_reference() => false,
            _ => self == other,
        }
    }

    fn is_reference(&self) -> bool {
        matches!(
            self,
            Value::List(_)
                | Value::Object(_)
                | Value::Dictionary(_)
                | Value::Struct(_)
                | Value::StructType(_)
                | Value::Function(_)
                | Value::NativeFunction(_)
                | Value::MessageHandler(_)
                | Value::Pattern(_)
                | Value::PatternNamespace(_)
                | Value::Iterator(_)
                | Value::Stream(_)
                | Value::LThread(_)
                | Value::LThreadGroup(_)
                | Value::Module(_)
                | Value::XmlElement(_)
                | Value::Error(_)
        )
    }

    /// Total order of numbers, strings, runes, bytes, durations and datetimes
    pub fn compare(&self, other: &Value) -> Result<Ordering, ValueError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => {
                if !a.is_finite() || !b.is_finite() {
                    return Err(ValueError::NanOrInfinityOperand);
                }
                a.partial_cmp(b).ok_or(ValueError::NanOrInfinityOperand)
            }
            (Value::Byte(a), Value::Byte(b)) => Ok(a.cmp(b)),
            (Value::Rune(a), Value::Rune(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Ok(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Ok(a.cmp(b)),
            _ => Err(ValueError::NotComparable {
                left: self.type_name(),
                right: other.type_name(),
            }),
        }
    }
}

fn addr<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

fn sequences_equal(a: &[Value], b: &[Value], guard: &mut CycleGuard) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal(y, guard))
}

fn entries_equal(a: &[(Arc<str>, Value)], b: &[(Arc<str>, Value)], guard: &mut CycleGuard) -> bool {
    a.len() == b.len()
        && a.iter().all(|(key, value)| {
            b.iter()
                .find(|(k, _)| k == key)
                .is_some_and(|(_, v)| v.equal(value, guard))
        })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other, &mut CycleGuard::default())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Byte(b) => write!(f, "0x{:02x}", b),
            Value::Rune(c) => write!(f, "{:?}", c),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Duration(d) => write!(f, "{:?}", d),
            Value::DateTime(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::IntRange(r) => write!(f, "{}", r),
            Value::FloatRange(r) => write!(f, "{}", r),
            Value::RuneRange(r) => write!(f, "{:?}..{:?}", r.start, r.end),
            Value::Path(p) | Value::PathPattern(p) => write!(f, "{}", p),
            Value::Url(u) | Value::Host(u) => write!(f, "{}", u),
            Value::NamedOption(o) => write!(f, "--{}={}", o.name, o.value),
            Value::KeyList(keys) => write!(f, ".{{{}}}", keys.join(", ")),
            Value::Tuple(elements) => {
                write!(f, "#")?;
                write_sequence(f, elements)
            }
            Value::Record(record) => {
                write!(f, "#")?;
                write_entries(f, record.entries())
            }
            Value::List(list) => write_sequence(f, &list.snapshot()),
            Value::Object(object) => write_entries(f, &object.entries()),
            Value::Dictionary(dict) => {
                write!(f, ":{{")?;
                for (i, (k, v)) in dict.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Struct(s) => {
                write!(f, "{}", s.struct_type().name)?;
                let fields: Vec<_> = s
                    .struct_type()
                    .fields
                    .iter()
                    .cloned()
                    .zip(s.fields())
                    .collect();
                write_entries(f, &fields)
            }
            Value::StructType(t) => write!(f, "struct {}", t.name),
            Value::XmlElement(e) => write!(f, "<{}>", e.name),
            Value::Function(func) => write!(f, "fn {}", func.compiled.name),
            Value::NativeFunction(func) => write!(f, "native fn {}", func.name),
            Value::MessageHandler(_) => write!(f, "message-handler"),
            Value::Pattern(p) => write!(f, "%{}", p),
            Value::PatternNamespace(_) => write!(f, "pattern-namespace"),
            Value::Iterator(_) => write!(f, "iterator"),
            Value::Stream(_) => write!(f, "stream"),
            Value::LThread(t) => write!(f, "lthread {}", t.id()),
            Value::LThreadGroup(g) => write!(f, "lthread-group({})", g.len()),
            Value::Module(m) => write!(f, "module {}", m.name),
            Value::Error(e) => write!(f, "error({:?})", e.text),
        }
    }
}

fn write_sequence(f: &mut fmt::Formatter<'_>, elements: &[Value]) -> fmt::Result {
    write!(f, "[")?;
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", element)?;
    }
    write!(f, "]")
}

fn write_entries(f: &mut fmt::Formatter<'_>, entries: &[(Arc<str>, Value)]) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", key, value)?;
    }
    write!(f, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_equality() {
        assert_eq!(Value::Int(1), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::str("a"), Value::str("a"));
        assert_ne!(Value::str("a"), Value::Path(Arc::from("a")));
    }

    #[test]
    fn test_structural_equality_of_lists() {
        let a = Value::list(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(a, b);
        assert!(!a.same(&b));
        assert!(a.same(&a.clone()));
    }

    #[test]
    fn test_cyclic_equality_terminates() {
        let a = Arc::new(List::new(vec![]));
        let b = Arc::new(List::new(vec![]));
        a.push(Value::List(b.clone()));
        b.push(Value::List(a.clone()));

        assert!(Value::List(a.clone()).equal(&Value::List(b.clone()), &mut CycleGuard::default()));
    }

    #[test]
    fn test_object_equality_ignores_order() {
        let a = Value::object(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let b = Value::object(vec![("b", Value::Int(2)), ("a", Value::Int(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Ok(Ordering::Less));
        assert_eq!(Value::str("b").compare(&Value::str("a")), Ok(Ordering::Greater));
        assert_eq!(
            Value::Float(f64::NAN).compare(&Value::Float(1.0)),
            Err(ValueError::NanOrInfinityOperand)
        );
        assert!(matches!(
            Value::Int(1).compare(&Value::Float(1.0)),
            Err(ValueError::NotComparable { left: "int", right: "float" })
        ));
    }

    #[test]
    fn test_to_bool() {
        assert!(!Value::Nil.to_bool());
        assert!(!Value::Int(0).to_bool());
        assert!(!Value::str("").to_bool());
        assert!(!Value::list(vec![]).to_bool());
        assert!(Value::list(vec![Value::Nil]).to_bool());
        assert!(Value::Float(0.5).to_bool());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::list(vec![Value::Int(1), Value::str("a")]).to_string(), "[1, \"a\"]");
        assert_eq!(Value::record(vec![("a", Value::Nil)]).to_string(), "#{a: nil}");
    }
}
