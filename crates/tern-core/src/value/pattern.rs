//! Patterns
//!
//! A [`Pattern`] is a predicate over values built at runtime by the pattern
//! opcodes. String patterns are compiled lazily to an anchored regex.

use super::composite::IntRange;
use super::Value;
use once_cell::sync::OnceCell;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tern_bytecode::OccurrenceModifier;

/// Entry of an object or record pattern
#[derive(Debug, Clone)]
pub struct EntryPattern {
    /// Property name
    pub key: Arc<str>,
    /// Pattern the property value must match
    pub pattern: Arc<Pattern>,
    /// Whether the property may be absent
    pub optional: bool,
}

/// Pattern matching every value of a builtin type
#[derive(Clone, Copy)]
pub struct TypePattern {
    /// Name the pattern is registered under
    pub name: &'static str,
    test: fn(&Value) -> bool,
}

impl TypePattern {
    /// Builtin type pattern for `name`
    pub fn builtin(name: &str) -> Option<Self> {
        let test: fn(&Value) -> bool = match name {
            "nil" => |v| matches!(v, Value::Nil),
            "bool" => |v| matches!(v, Value::Bool(_)),
            "int" => |v| matches!(v, Value::Int(_)),
            "float" => |v| matches!(v, Value::Float(_)),
            "byte" => |v| matches!(v, Value::Byte(_)),
            "rune" => |v| matches!(v, Value::Rune(_)),
            "str" | "string" => |v| matches!(v, Value::Str(_)),
            "duration" => |v| matches!(v, Value::Duration(_)),
            "datetime" => |v| matches!(v, Value::DateTime(_)),
            "path" => |v| matches!(v, Value::Path(_)),
            "url" => |v| matches!(v, Value::Url(_)),
            "host" => |v| matches!(v, Value::Host(_)),
            "tuple" => |v| matches!(v, Value::Tuple(_)),
            "record" => |v| matches!(v, Value::Record(_)),
            "list" => |v| matches!(v, Value::List(_)),
            "object" => |v| matches!(v, Value::Object(_)),
            "dictionary" => |v| matches!(v, Value::Dictionary(_)),
            "error" => |v| matches!(v, Value::Error(_)),
            "fn" => |v| matches!(v, Value::Function(_) | Value::NativeFunction(_)),
            "any" => |_| true,
            _ => return None,
        };
        let name = BUILTIN_TYPE_NAMES.iter().find(|n| **n == name)?;
        Some(Self { name, test })
    }

    /// Whether `value` has the type
    pub fn test(&self, value: &Value) -> bool {
        (self.test)(value)
    }
}

const BUILTIN_TYPE_NAMES: &[&str] = &[
    "nil", "bool", "int", "float", "byte", "rune", "str", "string", "duration", "datetime", "path",
    "url", "host", "tuple", "record", "list", "object", "dictionary", "error", "fn", "any",
];

impl fmt::Debug for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypePattern({})", self.name)
    }
}

/// Pattern over strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringPattern {
    /// Exact text
    Exact(Arc<str>),
    /// Any of the cases
    Union(Vec<StringPattern>),
    /// Element repeated according to a modifier
    Repeated {
        /// Repeated element
        element: Box<StringPattern>,
        /// Occurrence modifier
        modifier: OccurrenceModifier,
        /// Count for [`OccurrenceModifier::Exactly`]
        count: usize,
    },
    /// Elements one after the other
    Sequence(Vec<StringPattern>),
}

impl StringPattern {
    fn write_regex(&self, out: &mut String) {
        match self {
            StringPattern::Exact(text) => out.push_str(&regex::escape(text)),
            StringPattern::Union(cases) => {
                out.push_str("(?:");
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        out.push('|');
                    }
                    case.write_regex(out);
                }
                out.push(')');
            }
            StringPattern::Repeated {
                element,
                modifier,
                count,
            } => {
                out.push_str("(?:");
                element.write_regex(out);
                out.push(')');
                match modifier {
                    OccurrenceModifier::ExactlyOne => {}
                    OccurrenceModifier::AtMostOne => out.push('?'),
                    OccurrenceModifier::ZeroOrMore => out.push('*'),
                    OccurrenceModifier::AtLeastOne => out.push('+'),
                    OccurrenceModifier::Exactly => out.push_str(&format!("{{{}}}", count)),
                }
            }
            StringPattern::Sequence(elements) => {
                for element in elements {
                    element.write_regex(out);
                }
            }
        }
    }

    /// Anchored regex source
    pub fn regex_source(&self) -> String {
        let mut out = String::from("^(?:");
        self.write_regex(&mut out);
        out.push_str(")$");
        out
    }
}

impl fmt::Display for StringPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringPattern::Exact(text) => write!(f, "{:?}", text),
            StringPattern::Union(cases) => {
                write!(f, "(")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", case)?;
                }
                write!(f, ")")
            }
            StringPattern::Repeated {
                element,
                modifier,
                count,
            } => match modifier {
                OccurrenceModifier::ExactlyOne => write!(f, "{}", element),
                OccurrenceModifier::AtMostOne => write!(f, "{}?", element),
                OccurrenceModifier::ZeroOrMore => write!(f, "{}*", element),
                OccurrenceModifier::AtLeastOne => write!(f, "{}+", element),
                OccurrenceModifier::Exactly => write!(f, "{}={}", element, count),
            },
            StringPattern::Sequence(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A pattern
#[derive(Debug)]
pub enum Pattern {
    /// Values equal to the given one
    Exact(Value),
    /// Values of a builtin type
    Type(TypePattern),
    /// Lists and tuples
    List {
        /// Element-wise patterns, the length must match
        elements: Vec<Arc<Pattern>>,
        /// Pattern every element must match, elements are ignored when set
        general: Option<Arc<Pattern>>,
    },
    /// Objects
    Object {
        /// Entry patterns
        entries: Vec<EntryPattern>,
        /// Whether properties absent from the pattern are accepted
        inexact: bool,
    },
    /// Records
    Record {
        /// Entry patterns
        entries: Vec<EntryPattern>,
        /// Whether properties absent from the pattern are accepted
        inexact: bool,
    },
    /// Any of the cases
    Union(Vec<Arc<Pattern>>),
    /// All of the cases
    Intersection(Vec<Arc<Pattern>>),
    /// Matches `base` but not `removed`
    Difference {
        /// Base pattern
        base: Arc<Pattern>,
        /// Excluded pattern
        removed: Arc<Pattern>,
    },
    /// Nil or the inner pattern
    Optional(Arc<Pattern>),
    /// Named options with a given name
    Option {
        /// Option name
        name: Arc<str>,
        /// Pattern of the option value
        value: Arc<Pattern>,
    },
    /// Integers in a range
    IntRange(IntRange),
    /// Strings
    String {
        /// Pattern
        pattern: StringPattern,
        /// Compiled regex
        regex: OnceCell<Regex>,
    },
    /// Paths matching a glob (`*` within a segment, trailing `/...` for a prefix)
    PathPattern(Arc<str>),
}

impl Pattern {
    /// Create a string pattern
    pub fn string(pattern: StringPattern) -> Self {
        Pattern::String {
            pattern,
            regex: OnceCell::new(),
        }
    }

    /// Exact-value pattern, patterns are returned as is
    pub fn from_value(value: Value) -> Arc<Pattern> {
        match value {
            Value::Pattern(pattern) => pattern,
            Value::IntRange(range) => Arc::new(Pattern::IntRange(range)),
            Value::PathPattern(glob) => Arc::new(Pattern::PathPattern(glob)),
            other => Arc::new(Pattern::Exact(other)),
        }
    }

    /// Whether `value` matches the pattern
    pub fn test(&self, value: &Value) -> bool {
        match self {
            Pattern::Exact(expected) => expected == value,
            Pattern::Type(ty) => ty.test(value),
            Pattern::List { elements, general } => {
                let actual = match value {
                    Value::List(list) => list.snapshot(),
                    Value::Tuple(tuple) => tuple.to_vec(),
                    _ => return false,
                };
                match general {
                    Some(general) => actual.iter().all(|e| general.test(e)),
                    None => {
                        actual.len() == elements.len()
                            && elements.iter().zip(&actual).all(|(p, e)| p.test(e))
                    }
                }
            }
            Pattern::Object { entries, inexact } => match value {
                Value::Object(object) => test_entries(entries, *inexact, &object.entries()),
                _ => false,
            },
            Pattern::Record { entries, inexact } => match value {
                Value::Record(record) => test_entries(entries, *inexact, record.entries()),
                _ => false,
            },
            Pattern::Union(cases) => cases.iter().any(|c| c.test(value)),
            Pattern::Intersection(cases) => cases.iter().all(|c| c.test(value)),
            Pattern::Difference { base, removed } => base.test(value) && !removed.test(value),
            Pattern::Optional(inner) => value.is_nil() || inner.test(value),
            Pattern::Option { name, value: pattern } => match value {
                Value::NamedOption(option) => option.name == *name && pattern.test(&option.value),
                _ => false,
            },
            Pattern::IntRange(range) => matches!(value, Value::Int(i) if range.contains(*i)),
            Pattern::String { pattern, regex } => {
                let Value::Str(s) = value else {
                    return false;
                };
                regex
                    .get_or_try_init(|| Regex::new(&pattern.regex_source()))
                    .map(|regex| regex.is_match(s))
                    .unwrap_or(false)
            }
            Pattern::PathPattern(glob) => match value {
                Value::Path(path) => glob_matches(glob, path),
                _ => false,
            },
        }
    }

    /// Entries of an object or record pattern
    pub fn entries(&self) -> Option<&[EntryPattern]> {
        match self {
            Pattern::Object { entries, .. } | Pattern::Record { entries, .. } => Some(entries),
            _ => None,
        }
    }
}

fn test_entries(patterns: &[EntryPattern], inexact: bool, entries: &[(Arc<str>, Value)]) -> bool {
    for entry in patterns {
        match entries.iter().find(|(k, _)| *k == entry.key) {
            Some((_, value)) => {
                if !entry.pattern.test(value) {
                    return false;
                }
            }
            None if entry.optional => {}
            None => return false,
        }
    }
    inexact
        || entries
            .iter()
            .all(|(k, _)| patterns.iter().any(|p| p.key == *k))
}

fn glob_matches(glob: &str, path: &str) -> bool {
    if let Some(prefix) = glob.strip_suffix("/...") {
        return path.len() > prefix.len() && path.starts_with(prefix) && path[prefix.len()..].starts_with('/');
    }
    let mut source = String::from("^");
    for (i, part) in glob.split('*').enumerate() {
        if i > 0 {
            source.push_str("[^/]*");
        }
        source.push_str(&regex::escape(part));
    }
    source.push('$');
    Regex::new(&source).map(|r| r.is_match(path)).unwrap_or(false)
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(value) => write!(f, "{}", value),
            Pattern::Type(ty) => write!(f, "{}", ty.name),
            Pattern::List { elements, general } => match general {
                Some(general) => write!(f, "[]{}", general),
                None => {
                    write!(f, "[")?;
                    for (i, element) in elements.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", element)?;
                    }
                    write!(f, "]")
                }
            },
            Pattern::Object { entries, inexact } | Pattern::Record { entries, inexact } => {
                if matches!(self, Pattern::Record { .. }) {
                    write!(f, "#")?;
                }
                write!(f, "{{")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let optional = if entry.optional { "?" } else { "" };
                    write!(f, "{}{}: {}", entry.key, optional, entry.pattern)?;
                }
                if *inexact {
                    write!(f, ", ...")?;
                }
                write!(f, "}}")
            }
            Pattern::Union(cases) => write_cases(f, cases, " | "),
            Pattern::Intersection(cases) => write_cases(f, cases, " & "),
            Pattern::Difference { base, removed } => write!(f, "({} \\ {})", base, removed),
            Pattern::Optional(inner) => write!(f, "{}?", inner),
            Pattern::Option { name, value } => write!(f, "--{}={}", name, value),
            Pattern::IntRange(range) => write!(f, "{}", range),
            Pattern::String { pattern, .. } => write!(f, "{}", pattern),
            Pattern::PathPattern(glob) => write!(f, "{}", glob),
        }
    }
}

fn write_cases(f: &mut fmt::Formatter<'_>, cases: &[Arc<Pattern>], separator: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, case) in cases.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", separator)?;
        }
        write!(f, "{}", case)?;
    }
    write!(f, ")")
}

/// Named group of patterns (`%ns.name`)
#[derive(Debug, Default)]
pub struct PatternNamespace {
    patterns: FxHashMap<Arc<str>, Arc<Pattern>>,
}

impl PatternNamespace {
    /// Create a namespace
    pub fn new(patterns: FxHashMap<Arc<str>, Arc<Pattern>>) -> Self {
        Self { patterns }
    }

    /// Member pattern
    pub fn get(&self, name: &str) -> Option<Arc<Pattern>> {
        self.patterns.get(name).cloned()
    }

    /// Member names
    pub fn names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.patterns.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_pattern(name: &str) -> Arc<Pattern> {
        Arc::new(Pattern::Type(TypePattern::builtin(name).unwrap()))
    }

    #[test]
    fn test_exact_and_type_patterns() {
        assert!(Pattern::from_value(Value::Int(1)).test(&Value::Int(1)));
        assert!(!Pattern::from_value(Value::Int(1)).test(&Value::Int(2)));
        assert!(type_pattern("int").test(&Value::Int(2)));
        assert!(!type_pattern("str").test(&Value::Int(2)));
        assert!(TypePattern::builtin("unknown").is_none());
    }

    #[test]
    fn test_object_pattern_exactness() {
        let pattern = Pattern::Object {
            entries: vec![
                EntryPattern {
                    key: Arc::from("a"),
                    pattern: type_pattern("int"),
                    optional: false,
                },
                EntryPattern {
                    key: Arc::from("b"),
                    pattern: type_pattern("str"),
                    optional: true,
                },
            ],
            inexact: false,
        };

        assert!(pattern.test(&Value::object(vec![("a", Value::Int(1))])));
        assert!(!pattern.test(&Value::object(vec![("a", Value::Int(1)), ("c", Value::Nil)])));
        assert!(!pattern.test(&Value::object(vec![("a", Value::Int(1)), ("b", Value::Int(1))])));
        assert!(!pattern.test(&Value::object(vec![("b", Value::str("x"))])));
    }

    #[test]
    fn test_list_patterns() {
        let general = Pattern::List {
            elements: vec![],
            general: Some(type_pattern("int")),
        };
        assert!(general.test(&Value::list(vec![Value::Int(1), Value::Int(2)])));
        assert!(!general.test(&Value::list(vec![Value::Int(1), Value::Nil])));

        let exact = Pattern::List {
            elements: vec![type_pattern("int"), type_pattern("str")],
            general: None,
        };
        assert!(exact.test(&Value::tuple(vec![Value::Int(1), Value::str("a")])));
        assert!(!exact.test(&Value::list(vec![Value::Int(1)])));
    }

    #[test]
    fn test_combinators() {
        let int = type_pattern("int");
        let one = Pattern::from_value(Value::Int(1));
        let difference = Pattern::Difference {
            base: int.clone(),
            removed: one.clone(),
        };
        assert!(difference.test(&Value::Int(2)));
        assert!(!difference.test(&Value::Int(1)));

        let union = Pattern::Union(vec![one, type_pattern("str")]);
        assert!(union.test(&Value::str("x")));
        assert!(!union.test(&Value::Int(3)));

        assert!(Pattern::Optional(int).test(&Value::Nil));
        assert!(Pattern::IntRange(IntRange::new(0, 3)).test(&Value::Int(3)));
    }

    #[test]
    fn test_string_patterns() {
        let digits = StringPattern::Repeated {
            element: Box::new(StringPattern::Union(
                (0..10).map(|d| StringPattern::Exact(Arc::from(d.to_string()))).collect(),
            )),
            modifier: OccurrenceModifier::AtLeastOne,
            count: 0,
        };
        let pattern = Pattern::string(StringPattern::Sequence(vec![
            StringPattern::Exact(Arc::from("v")),
            digits,
            StringPattern::Repeated {
                element: Box::new(StringPattern::Exact(Arc::from("."))),
                modifier: OccurrenceModifier::Exactly,
                count: 2,
            },
        ]));

        assert!(pattern.test(&Value::str("v12..")));
        assert!(!pattern.test(&Value::str("v..")));
        assert!(!pattern.test(&Value::str("v1.")));
        assert!(!pattern.test(&Value::str("xv1..")));
    }

    #[test]
    fn test_path_patterns() {
        let glob = Pattern::PathPattern(Arc::from("/tmp/*.txt"));
        assert!(glob.test(&Value::Path(Arc::from("/tmp/a.txt"))));
        assert!(!glob.test(&Value::Path(Arc::from("/tmp/dir/a.txt"))));

        let prefix = Pattern::PathPattern(Arc::from("/tmp/..."));
        assert!(prefix.test(&Value::Path(Arc::from("/tmp/dir/a.txt"))));
        assert!(!prefix.test(&Value::Path(Arc::from("/tmpfile"))));
    }
}
