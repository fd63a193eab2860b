//! Role-based access control.
//!
//! Roles are a closed enumeration; string names are resolved through
//! [`Role::from_name`], which rejects unknown names with a typed error
//! instead of failing at runtime. Role sets are stored as a bitmask on the
//! user record, so grants are idempotent OR operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Subscriber,
    Author,
    Collaborator,
    Moderator,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Subscriber,
        Role::Author,
        Role::Collaborator,
        Role::Moderator,
        Role::Admin,
    ];

    /// Role granted to every account at signup.
    pub const DEFAULT: Role = Role::Subscriber;

    pub fn bit(self) -> i32 {
        match self {
            Role::Subscriber => 1 << 0,
            Role::Author => 1 << 1,
            Role::Collaborator => 1 << 2,
            Role::Moderator => 1 << 3,
            Role::Admin => 1 << 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Subscriber => "subscriber",
            Role::Author => "author",
            Role::Collaborator => "collaborator",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Validated lookup by name, case-insensitive.
    pub fn from_name(name: &str) -> Result<Role, UnknownRoleError> {
        let normalized = name.trim().to_lowercase();
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| UnknownRoleError(name.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role name: {0}")]
pub struct UnknownRoleError(pub String);

/// Set of roles packed into the `roles_mask` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleSet(i32);

impl RoleSet {
    pub fn from_mask(mask: i32) -> Self {
        Self(mask)
    }

    pub fn mask(self) -> i32 {
        self.0
    }

    pub fn insert(&mut self, role: Role) {
        self.0 |= role.bit();
    }

    pub fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn contains_any(self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.contains(*role))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |role| self.contains(*role))
    }
}

/// What a protected operation demands of the acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Any authenticated user.
    Authenticated,
    /// Unauthenticated callers only (login and signup pages).
    GuestOnly,
    Role(Role),
    /// Any-of semantics.
    AnyRole(Vec<Role>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

/// Pure evaluation against the acting session's roles; `None` means no
/// authenticated session. The caller picks the fallback (redirect, status).
pub fn authorize(roles: Option<RoleSet>, requirement: &Requirement) -> Decision {
    let allowed = match requirement {
        Requirement::Authenticated => roles.is_some(),
        Requirement::GuestOnly => roles.is_none(),
        Requirement::Role(role) => roles.is_some_and(|set| set.contains(*role)),
        Requirement::AnyRole(any) => roles.is_some_and(|set| set.contains_any(any)),
    };
    if allowed {
        Decision::Allowed
    } else {
        Decision::Denied
    }
}
