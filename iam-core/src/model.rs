//! Users, role grants and the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// IDENTITY
// ============================================================================

/// Stable user identifier (an e-mail address in practice).
///
/// Immutable once a user row exists; it is the primary key of the `users`
/// table and the key of the user cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// ROLES
// ============================================================================

/// A role grant: the holder may act as `name` on every resource whose path
/// starts with `path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub path: String,
}

impl Role {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Whether this grant covers `role` on `path`.
    pub fn covers(&self, role: &str, path: &str) -> bool {
        path.starts_with(self.path.as_str()) && self.name == role
    }
}

// ============================================================================
// USERS
// ============================================================================

/// Last-known state of a user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub active: bool,
    /// Grants are evaluated independently; order carries no meaning.
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_access: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_access: Option<Timestamp>,
}

impl User {
    /// A user as it looks right after its first role grant: inactive, with
    /// no profile and no recorded access.
    pub fn new(id: impl Into<UserId>, roles: Vec<Role>) -> Self {
        Self {
            id: id.into(),
            active: false,
            roles,
            display_name: None,
            profile: None,
            first_access: None,
            last_access: None,
        }
    }

    /// Write intent carrying this user's current grants.
    pub fn edit(&self) -> EditUser {
        EditUser {
            id: self.id.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Requested role set for a user. Describes a mutation, never stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditUser {
    pub id: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl EditUser {
    pub fn new(id: impl Into<UserId>, roles: Vec<Role>) -> Self {
        Self {
            id: id.into(),
            roles,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Immutable record of one role edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminEvent {
    /// Assigned by the backend, strictly increasing.
    pub id: i64,
    pub ts: Timestamp,
    /// Acting admin.
    pub admin: UserId,
    /// Target user.
    pub user: UserId,
    /// Role set applied by the edit.
    pub roles: Vec<Role>,
}
