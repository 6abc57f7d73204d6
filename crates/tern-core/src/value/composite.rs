//! Composite values: ranges, records, lists, objects, dictionaries, structs

use super::pattern::Pattern;
use super::share::{share_or_clone, SmartLock, SmartLockGuard};
use super::Value;
use crate::error::{ContextError, ValueError, VmResult};
use crate::state::GlobalState;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Ranges
// ============================================================================

/// Inclusive integer range, possibly without a known start (`..10`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    /// Whether the range was created from an upper bound only
    pub unknown_start: bool,
    /// First element (0 when the start is unknown)
    pub start: i64,
    /// Last element
    pub end: i64,
}

impl IntRange {
    /// Create `start..end` (inclusive)
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            unknown_start: false,
            start,
            end,
        }
    }

    /// Create `..end`
    pub fn upper_bound(end: i64) -> Self {
        Self {
            unknown_start: true,
            start: 0,
            end,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end as i128 - self.start as i128 + 1) as usize
        }
    }

    /// Whether the range has no elements
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Whether `i` is in the range
    pub fn contains(&self, i: i64) -> bool {
        (self.unknown_start || i >= self.start) && i <= self.end
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unknown_start {
            write!(f, "..{}", self.end)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

/// Float range, possibly without a known start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatRange {
    /// Whether the range was created from an upper bound only
    pub unknown_start: bool,
    /// Lower bound
    pub start: f64,
    /// Upper bound
    pub end: f64,
    /// Whether `end` belongs to the range
    pub inclusive_end: bool,
}

impl FloatRange {
    /// Create an inclusive range
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            unknown_start: false,
            start,
            end,
            inclusive_end: true,
        }
    }

    /// Create `..end`
    pub fn upper_bound(end: f64) -> Self {
        Self {
            unknown_start: true,
            start: f64::MIN,
            end,
            inclusive_end: true,
        }
    }

    /// Whether `x` is in the range
    pub fn contains(&self, x: f64) -> bool {
        let above = self.unknown_start || x >= self.start;
        let below = if self.inclusive_end { x <= self.end } else { x < self.end };
        above && below
    }
}

impl fmt::Display for FloatRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unknown_start {
            write!(f, "..{}", self.end)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

/// Inclusive rune range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuneRange {
    /// First rune
    pub start: char,
    /// Last rune
    pub end: char,
}

impl RuneRange {
    /// Whether `c` is in the range
    pub fn contains(&self, c: char) -> bool {
        c >= self.start && c <= self.end
    }
}

// ============================================================================
// Immutable composites
// ============================================================================

/// `--name=value`
#[derive(Debug, Clone)]
pub struct NamedOption {
    /// Option name
    pub name: Arc<str>,
    /// Option value
    pub value: Value,
}

/// Immutable key/value map
#[derive(Debug, Clone)]
pub struct Record {
    entries: Vec<(Arc<str>, Value)>,
}

impl Record {
    /// Create a record, later duplicates override earlier keys
    pub fn new(entries: Vec<(Arc<str>, Value)>) -> Self {
        let mut deduplicated: Vec<(Arc<str>, Value)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match deduplicated.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => deduplicated.push((key, value)),
            }
        }
        Self {
            entries: deduplicated,
        }
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[(Arc<str>, Value)] {
        &self.entries
    }

    /// Value of a property
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| &**k == name).map(|(_, v)| v)
    }
}

/// XML element, immutable once built
#[derive(Debug, Clone)]
pub struct XmlElement {
    /// Tag name
    pub name: Arc<str>,
    /// Attributes in source order
    pub attributes: Vec<(Arc<str>, Value)>,
    /// Child nodes
    pub children: Vec<Value>,
}

/// Error value
#[derive(Debug, Clone)]
pub struct ErrorValue {
    /// Message
    pub text: Arc<str>,
    /// Attached data
    pub data: Value,
}

impl ErrorValue {
    /// Create an error value
    pub fn new(text: impl AsRef<str>, data: Value) -> Self {
        Self {
            text: Arc::from(text.as_ref()),
            data,
        }
    }
}

/// Handler invoked synchronously when a matching value is sent to an object
#[derive(Debug, Clone)]
pub struct MessageHandler {
    /// Messages matching this pattern are handled
    pub pattern: Arc<Pattern>,
    /// Function called with the message, `self` is the receiver
    pub handler: Value,
}

// ============================================================================
// List
// ============================================================================

/// Mutable sequence. Lists are cloned, never shared, when crossing lthreads.
#[derive(Debug, Default)]
pub struct List {
    elements: Mutex<Vec<Value>>,
}

impl List {
    /// Create a list
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            elements: Mutex::new(elements),
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }

    /// Copy of the elements
    pub fn snapshot(&self) -> Vec<Value> {
        self.elements.lock().clone()
    }

    /// Element at `index`
    pub fn at(&self, index: i64) -> Result<Value, ValueError> {
        let elements = self.elements.lock();
        checked_index(index, elements.len()).map(|i| elements[i].clone())
    }

    /// Replace the element at `index`
    pub fn set(&self, index: i64, value: Value) -> Result<(), ValueError> {
        let mut elements = self.elements.lock();
        let i = checked_index(index, elements.len())?;
        elements[i] = value;
        Ok(())
    }

    /// Append an element
    pub fn push(&self, value: Value) {
        self.elements.lock().push(value);
    }

    /// Append several elements
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) {
        self.elements.lock().extend(values);
    }

    /// Replace `start..end` by `values`
    pub fn set_slice(&self, start: i64, end: i64, values: Vec<Value>) -> Result<(), ValueError> {
        let mut elements = self.elements.lock();
        let (start, end) = checked_bounds(start, end, elements.len())?;
        elements.splice(start..end, values);
        Ok(())
    }

    /// Elements in `start..end`
    pub fn slice(&self, start: i64, end: i64) -> Result<Vec<Value>, ValueError> {
        let elements = self.elements.lock();
        let (start, end) = checked_bounds(start, end, elements.len())?;
        Ok(elements[start..end].to_vec())
    }
}

/// Bounds-check `index` against `length`
pub fn checked_index(index: i64, length: usize) -> Result<usize, ValueError> {
    if index < 0 || index as u64 >= length as u64 {
        return Err(ValueError::IndexOutOfRange { index, length });
    }
    Ok(index as usize)
}

/// Clamp a slice to `length`, rejecting negative lower bounds
pub fn checked_bounds(start: i64, end: i64, length: usize) -> Result<(usize, usize), ValueError> {
    if start < 0 {
        return Err(ValueError::NegativeLowerIndex);
    }
    let end = (end.max(0) as u64).min(length as u64) as usize;
    let start = (start as u64).min(end as u64) as usize;
    Ok((start, end))
}

// ============================================================================
// Object
// ============================================================================

#[derive(Debug, Default)]
struct ObjectData {
    entries: Vec<(Arc<str>, Value)>,
    handlers: Vec<Arc<MessageHandler>>,
}

/// Mutable key/value map that can be shared between lthreads.
///
/// Once shared, every access goes through the object's [`SmartLock`].
#[derive(Debug, Default)]
pub struct Object {
    lock: SmartLock,
    data: Mutex<ObjectData>,
}

impl Object {
    /// Create an object
    pub fn new(entries: Vec<(Arc<str>, Value)>) -> Self {
        Self::with_handlers(entries, Vec::new())
    }

    /// Create an object with message handlers
    pub fn with_handlers(entries: Vec<(Arc<str>, Value)>, handlers: Vec<Arc<MessageHandler>>) -> Self {
        let Record { entries } = Record::new(entries);
        Self {
            lock: SmartLock::default(),
            data: Mutex::new(ObjectData { entries, handlers }),
        }
    }

    /// The object's lock
    pub fn smart_lock(&self) -> &SmartLock {
        &self.lock
    }

    /// Whether the object has been shared
    pub fn is_shared(&self) -> bool {
        self.lock.is_shared()
    }

    /// Share the object: every property value is shared or cloned first
    pub fn share(&self, state: &GlobalState) -> Result<(), ValueError> {
        if self.lock.is_shared() {
            return Ok(());
        }
        // Marked first so that cycles through this object stop here.
        self.lock.mark_shared();
        let entries = self.entries();
        let mut shared = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            shared.push((key, share_or_clone(&value, state)?));
        }
        self.data.lock().entries = shared;
        Ok(())
    }

    /// Acquire the smart lock for the duration of the guard
    pub fn lock_for(&self, state: &GlobalState) -> Result<SmartLockGuard<'_>, ContextError> {
        self.lock.lock(state)
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.data.lock().entries.len()
    }

    /// Whether the object has no property
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the entries, without taking the smart lock
    pub fn entries(&self) -> Vec<(Arc<str>, Value)> {
        self.data.lock().entries.clone()
    }

    /// Property names in insertion order
    pub fn keys(&self) -> Vec<Arc<str>> {
        self.data.lock().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Message handlers
    pub fn handlers(&self) -> Vec<Arc<MessageHandler>> {
        self.data.lock().handlers.clone()
    }

    /// Whether a property exists
    pub fn has_prop(&self, name: &str) -> bool {
        self.data.lock().entries.iter().any(|(k, _)| &**k == name)
    }

    /// Read a property, taking the smart lock if the object is shared
    pub fn prop(&self, state: &GlobalState, name: &str) -> Result<Option<Value>, ContextError> {
        let _guard = self.lock.lock(state)?;
        let data = self.data.lock();
        Ok(data
            .entries
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| v.clone()))
    }

    /// Write a property, taking the smart lock if the object is shared.
    /// Values stored in a shared object are shared or cloned first.
    pub fn set_prop(&self, state: &GlobalState, name: &str, value: Value) -> VmResult<()> {
        let _guard = self.lock.lock(state)?;
        let value = if self.lock.is_shared() {
            share_or_clone(&value, state)?
        } else {
            value
        };
        let mut data = self.data.lock();
        match data.entries.iter_mut().find(|(k, _)| &**k == name) {
            Some(entry) => entry.1 = value,
            None => data.entries.push((Arc::from(name), value)),
        }
        Ok(())
    }

    /// Add message handlers
    pub fn add_handlers(&self, handlers: impl IntoIterator<Item = Arc<MessageHandler>>) {
        self.data.lock().handlers.extend(handlers);
    }
}

// ============================================================================
// Dictionary
// ============================================================================

/// Mutable map with arbitrary keys
#[derive(Debug, Default)]
pub struct Dictionary {
    entries: Mutex<Vec<(Value, Value)>>,
}

impl Dictionary {
    /// Create a dictionary, later duplicates override earlier keys
    pub fn new(entries: Vec<(Value, Value)>) -> Self {
        let dict = Self::default();
        for (key, value) in entries {
            dict.set(key, value);
        }
        dict
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the dictionary is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the entries
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries.lock().clone()
    }

    /// Value for `key`
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert or replace
    pub fn set(&self, key: Value, value: Value) {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }
}

// ============================================================================
// Struct
// ============================================================================

/// Layout of a struct: ordered field names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    /// Type name
    pub name: Arc<str>,
    /// Field names, the index of a name is the field's slot
    pub fields: Vec<Arc<str>>,
}

/// Struct instance. Fields are addressed by index into the layout.
#[derive(Debug)]
pub struct Struct {
    struct_type: Arc<StructType>,
    fields: Mutex<Vec<Value>>,
}

impl Struct {
    /// Create an instance, the field count must match the layout
    pub fn new(struct_type: Arc<StructType>, fields: Vec<Value>) -> Result<Self, ValueError> {
        if fields.len() != struct_type.fields.len() {
            return Err(ValueError::InvalidOperation(format!(
                "struct {} has {} fields, {} given",
                struct_type.name,
                struct_type.fields.len(),
                fields.len()
            )));
        }
        Ok(Self {
            struct_type,
            fields: Mutex::new(fields),
        })
    }

    /// Layout of the struct
    pub fn struct_type(&self) -> &Arc<StructType> {
        &self.struct_type
    }

    /// Copy of the field values
    pub fn fields(&self) -> Vec<Value> {
        self.fields.lock().clone()
    }

    /// Read the field at `index`
    pub fn field(&self, index: usize) -> Result<Value, ValueError> {
        let fields = self.fields.lock();
        fields
            .get(index)
            .cloned()
            .ok_or(ValueError::IndexOutOfRange {
                index: index as i64,
                length: fields.len(),
            })
    }

    /// Write the field at `index`
    pub fn set_field(&self, index: usize, value: Value) -> Result<(), ValueError> {
        let mut fields = self.fields.lock();
        let length = fields.len();
        let slot = fields.get_mut(index).ok_or(ValueError::IndexOutOfRange {
            index: index as i64,
            length,
        })?;
        *slot = value;
        Ok(())
    }

    /// Index of a named field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.struct_type.fields.iter().position(|f| &**f == name)
    }
}
