//! Window key generation and handling.

use std::fmt;

/// The dimension along which a quota is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Per network address, across every route.
    Global,
    /// Per route, keyed by identity or address.
    Route,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Route => "route",
        }
    }
}

/// Who a quota is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// A client network address.
    Address(String),
    /// A verified principal identifier.
    Identity(String),
}

impl Subject {
    fn tag(&self) -> &'static str {
        match self {
            Subject::Address(_) => "addr",
            Subject::Identity(_) => "user",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Subject::Address(v) | Subject::Identity(v) => v,
        }
    }
}

/// A key that uniquely identifies one window entry in the counter store.
///
/// Global keys ignore the resource so that the global quota is shared by
/// every route an address touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub scope: Scope,
    pub subject: Subject,
    pub resource: Option<String>,
}

impl WindowKey {
    /// Key for the global, per-address scope.
    pub fn global(address: &str) -> Self {
        Self {
            scope: Scope::Global,
            subject: Subject::Address(address.to_string()),
            resource: None,
        }
    }

    /// Key for a route scope charged to `subject`.
    pub fn route(subject: Subject, route: &str) -> Self {
        Self {
            scope: Scope::Route,
            subject,
            resource: Some(route.to_string()),
        }
    }

    /// Render the namespaced store key.
    pub fn to_store_key(&self, prefix: &str) -> String {
        match &self.resource {
            Some(resource) => format!(
                "{}:{}:{}:{}:{}",
                prefix,
                self.scope.as_str(),
                resource,
                self.subject.tag(),
                self.subject.value()
            ),
            None => format!(
                "{}:{}:{}:{}",
                prefix,
                self.scope.as_str(),
                self.subject.tag(),
                self.subject.value()
            ),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(
                f,
                "{}[{}]:{}={}",
                self.scope.as_str(),
                resource,
                self.subject.tag(),
                self.subject.value()
            ),
            None => write!(
                f,
                "{}:{}={}",
                self.scope.as_str(),
                self.subject.tag(),
                self.subject.value()
            ),
        }
    }
}
