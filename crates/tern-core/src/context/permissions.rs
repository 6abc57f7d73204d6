//! Permissions
//!
//! A [`Permission`] grants one kind of action on a family of entities.
//! Permissions are compared with [`Permission::includes`]: a permission
//! includes another one when it allows at least the same action on at
//! least the same entities.

use crate::error::ValueError;
use crate::value::Value;
use std::fmt;

/// Action allowed by a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    /// Read
    Read,
    /// Write (includes create and update)
    Write,
    /// Create
    Create,
    /// Update
    Update,
    /// Delete
    Delete,
    /// Use
    Use,
    /// Consume
    Consume,
    /// Provide
    Provide,
}

impl PermissionKind {
    /// All kinds, in listing order
    pub const ALL: [PermissionKind; 8] = [
        PermissionKind::Read,
        PermissionKind::Write,
        PermissionKind::Create,
        PermissionKind::Update,
        PermissionKind::Delete,
        PermissionKind::Use,
        PermissionKind::Consume,
        PermissionKind::Provide,
    ];

    /// Name used in permission listings
    pub fn name(&self) -> &'static str {
        match self {
            PermissionKind::Read => "read",
            PermissionKind::Write => "write",
            PermissionKind::Create => "create",
            PermissionKind::Update => "update",
            PermissionKind::Delete => "delete",
            PermissionKind::Use => "use",
            PermissionKind::Consume => "consume",
            PermissionKind::Provide => "provide",
        }
    }

    /// Parse a listing name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether the kind allows the actions of `other`
    pub fn includes(&self, other: PermissionKind) -> bool {
        *self == other
            || (*self == PermissionKind::Write
                && matches!(other, PermissionKind::Create | PermissionKind::Update))
    }
}

/// A permission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Access to a global variable, `*` for every global
    GlobalVar {
        /// Kind
        kind: PermissionKind,
        /// Global name or `*`
        name: String,
    },
    /// Operations on lthreads
    LThread {
        /// Kind
        kind: PermissionKind,
    },
    /// Access to paths. The entity is a path, a `/...` prefix pattern or a
    /// `*` glob.
    Filesystem {
        /// Kind
        kind: PermissionKind,
        /// Path or path pattern
        entity: String,
    },
    /// Access to hosts and URLs. The entity is a host or a URL prefix.
    Http {
        /// Kind
        kind: PermissionKind,
        /// Host or URL
        entity: String,
    },
    /// Host-defined permission
    Custom {
        /// Kind
        kind: PermissionKind,
        /// Name of the permission type
        name: String,
    },
}

impl Permission {
    /// Permission to create lthreads
    pub fn create_lthread() -> Self {
        Permission::LThread {
            kind: PermissionKind::Create,
        }
    }

    /// Permission on every global variable
    pub fn all_globals(kind: PermissionKind) -> Self {
        Permission::GlobalVar {
            kind,
            name: "*".to_string(),
        }
    }

    /// Permission on one global variable
    pub fn global(kind: PermissionKind, name: impl Into<String>) -> Self {
        Permission::GlobalVar {
            kind,
            name: name.into(),
        }
    }

    /// Permission kind
    pub fn kind(&self) -> PermissionKind {
        match self {
            Permission::GlobalVar { kind, .. }
            | Permission::LThread { kind }
            | Permission::Filesystem { kind, .. }
            | Permission::Http { kind, .. }
            | Permission::Custom { kind, .. } => *kind,
        }
    }

    /// Whether this permission allows everything `other` allows
    pub fn includes(&self, other: &Permission) -> bool {
        if !self.kind().includes(other.kind()) {
            return false;
        }
        match (self, other) {
            (Permission::GlobalVar { name: a, .. }, Permission::GlobalVar { name: b, .. }) => {
                a == "*" || a == b
            }
            (Permission::LThread { .. }, Permission::LThread { .. }) => true,
            (Permission::Filesystem { entity: a, .. }, Permission::Filesystem { entity: b, .. }) => {
                path_entity_includes(a, b)
            }
            (Permission::Http { entity: a, .. }, Permission::Http { entity: b, .. }) => {
                http_entity_includes(a, b)
            }
            (Permission::Custom { name: a, .. }, Permission::Custom { name: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Parse a permission listing such as
    /// `{read: {globals: "*", fs: %/tmp/...}, create: {threads: {}}}`.
    ///
    /// The listing is a record or object keyed by kind names; each value maps
    /// entity types (`globals`, `threads`, `fs`, `http`, anything else
    /// being a custom permission) to an entity or a list of entities.
    pub fn from_listing(listing: &Value) -> Result<Vec<Permission>, ValueError> {
        let mut permissions = Vec::new();
        for (kind_name, entities) in listing_entries(listing)? {
            let kind = PermissionKind::from_name(&kind_name).ok_or_else(|| {
                ValueError::InvalidOperation(format!("invalid permission kind: {}", kind_name))
            })?;
            for (type_name, value) in listing_entries(&entities)? {
                match type_name.as_str() {
                    "threads" => permissions.push(Permission::LThread { kind }),
                    "globals" => {
                        for name in entity_values(&value) {
                            permissions.push(Permission::GlobalVar {
                                kind,
                                name: name.as_str()?.to_string(),
                            });
                        }
                    }
                    "fs" => {
                        for entity in entity_values(&value) {
                            permissions.push(Permission::Filesystem {
                                kind,
                                entity: entity.as_str()?.to_string(),
                            });
                        }
                    }
                    "http" => {
                        for entity in entity_values(&value) {
                            permissions.push(Permission::Http {
                                kind,
                                entity: entity.as_str()?.to_string(),
                            });
                        }
                    }
                    _ => permissions.push(Permission::Custom {
                        kind,
                        name: type_name.clone(),
                    }),
                }
            }
        }
        Ok(permissions)
    }
}

fn listing_entries(value: &Value) -> Result<Vec<(String, Value)>, ValueError> {
    match value {
        Value::Record(record) => Ok(record
            .entries()
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()),
        Value::Object(object) => Ok(object
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()),
        Value::Nil => Ok(Vec::new()),
        other => Err(ValueError::mismatch("permission listing", other)),
    }
}

fn entity_values(value: &Value) -> Vec<Value> {
    match value {
        Value::List(list) => list.snapshot(),
        Value::Tuple(elements) => elements.to_vec(),
        other => vec![other.clone()],
    }
}

fn path_entity_includes(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("...") {
        return path.starts_with(prefix);
    }
    if pattern.contains('*') {
        return glob_matches(pattern, path);
    }
    false
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == path,
        Some((head, tail)) => {
            let Some(rest) = path.strip_prefix(head) else {
                return false;
            };
            // `*` never crosses a separator
            let segment_end = rest.find('/').unwrap_or(rest.len());
            (0..=segment_end).any(|i| glob_matches(tail, &rest[i..]))
        }
    }
}

fn http_entity_includes(entity: &str, other: &str) -> bool {
    if entity == other {
        return true;
    }
    match other.strip_prefix(entity) {
        Some(rest) => entity.ends_with('/') || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::GlobalVar { kind, name } => write!(f, "[{} global {}]", kind.name(), name),
            Permission::LThread { kind } => write!(f, "[{} threads]", kind.name()),
            Permission::Filesystem { kind, entity } => write!(f, "[{} path(s) {}]", kind.name(), entity),
            Permission::Http { kind, entity } => write!(f, "[{} {}]", kind.name(), entity),
            Permission::Custom { kind, name } => write!(f, "[{} {}]", kind.name(), name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_inclusion() {
        assert!(PermissionKind::Write.includes(PermissionKind::Create));
        assert!(PermissionKind::Write.includes(PermissionKind::Update));
        assert!(!PermissionKind::Create.includes(PermissionKind::Write));
        assert!(!PermissionKind::Read.includes(PermissionKind::Use));
    }

    #[test]
    fn test_global_wildcard() {
        let all = Permission::all_globals(PermissionKind::Read);
        assert!(all.includes(&Permission::global(PermissionKind::Read, "x")));
        assert!(!all.includes(&Permission::global(PermissionKind::Use, "x")));
        assert!(!Permission::global(PermissionKind::Read, "x")
            .includes(&Permission::global(PermissionKind::Read, "y")));
    }

    #[test]
    fn test_filesystem_patterns() {
        let fs = |entity: &str| Permission::Filesystem {
            kind: PermissionKind::Read,
            entity: entity.to_string(),
        };
        assert!(fs("/tmp/...").includes(&fs("/tmp/a/b.txt")));
        assert!(fs("/tmp/*.txt").includes(&fs("/tmp/a.txt")));
        assert!(!fs("/tmp/*.txt").includes(&fs("/tmp/a/b.txt")));
        assert!(!fs("/tmp/").includes(&fs("/tmp/a")));
    }

    #[test]
    fn test_http_prefixes() {
        let http = |entity: &str| Permission::Http {
            kind: PermissionKind::Read,
            entity: entity.to_string(),
        };
        assert!(http("https://example.com").includes(&http("https://example.com/index.html")));
        assert!(!http("https://example.com").includes(&http("https://example.com.evil.org")));
    }

    #[test]
    fn test_from_listing() {
        let listing = Value::record(vec![
            (
                "read",
                Value::record(vec![
                    ("globals", Value::str("*")),
                    ("fs", Value::PathPattern("/tmp/...".into())),
                ]),
            ),
            ("create", Value::record(vec![("threads", Value::record::<&str>(vec![]))])),
        ]);
        let permissions = Permission::from_listing(&listing).unwrap();
        assert_eq!(
            permissions,
            vec![
                Permission::all_globals(PermissionKind::Read),
                Permission::Filesystem {
                    kind: PermissionKind::Read,
                    entity: "/tmp/...".to_string(),
                },
                Permission::create_lthread(),
            ]
        );
        assert!(Permission::from_listing(&Value::record(vec![("fly", Value::Nil)])).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Permission::create_lthread().to_string(), "[create threads]");
    }
}
