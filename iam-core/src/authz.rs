//! Role checks over the hierarchical path namespace.
//!
//! A grant `(name, path)` matches a request for `role` on `resource` when the
//! names are equal and `resource` starts with the granted path. Grants are
//! OR-ed: the first match wins. There is no other permission engine; every
//! mutation in the store is gated by [`is_in_role`].

use crate::model::User;

/// Role required for role edits and for editing other users' profiles.
pub const ADMIN_ROLE: &str = "admin";

/// Root of the path namespace. A grant on the root covers every path.
pub const ROOT_PATH: &str = "/";

impl User {
    /// Whether this user holds `role` over `path`.
    pub fn is_in_role(&self, role: &str, path: &str) -> bool {
        self.roles.iter().any(|grant| grant.covers(role, path))
    }
}

/// Whether `user` holds `role` over `path`. An absent user holds nothing.
pub fn is_in_role(user: Option<&User>, role: &str, path: &str) -> bool {
    user.is_some_and(|u| u.is_in_role(role, path))
}

/// Shorthand for `admin` on `/`.
pub fn is_admin(user: Option<&User>) -> bool {
    is_in_role(user, ADMIN_ROLE, ROOT_PATH)
}
