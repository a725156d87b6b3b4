//! Principal string parsing.
//!
//! Principal strings take the form `"<kind>:<name>"` where kind is one of
//! `user`, `group`, `role`, `entity`. A bare name with no colon is treated
//! as `kind=user` for backward compatibility with the original PDL.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    User,
    Group,
    Role,
    Entity,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrincipalKind::User => "user",
            PrincipalKind::Group => "group",
            PrincipalKind::Role => "role",
            PrincipalKind::Entity => "entity",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub kind: PrincipalKind,
    pub name: String,
}

impl Principal {
    pub fn parse(s: &str) -> Principal {
        match s.split_once(':') {
            Some(("user", name)) => Principal {
                kind: PrincipalKind::User,
                name: name.to_string(),
            },
            Some(("group", name)) => Principal {
                kind: PrincipalKind::Group,
                name: name.to_string(),
            },
            Some(("role", name)) => Principal {
                kind: PrincipalKind::Role,
                name: name.to_string(),
            },
            Some(("entity", name)) => Principal {
                kind: PrincipalKind::Entity,
                name: name.to_string(),
            },
            // Unrecognized "kind:name" or no colon at all: treat the whole
            // string as a bare user name, matching legacy PDL documents.
            _ => Principal {
                kind: PrincipalKind::User,
                name: s.to_string(),
            },
        }
    }

    pub fn role(name: impl Into<String>) -> Principal {
        Principal {
            kind: PrincipalKind::Role,
            name: name.into(),
        }
    }

    pub fn to_principal_string(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

/// Normalizes a principal string so bare names (`"alice"`) and explicitly
/// kinded ones (`"user:alice"`) compare equal. Idempotent: normalizing an
/// already-normalized string returns it unchanged.
pub fn normalize(s: &str) -> String {
    Principal::parse(s).to_principal_string()
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// The implicit principal every subject holds, regardless of explicit grants.
pub const EVERYONE: &str = "group:everyone";
