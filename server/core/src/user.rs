use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;

/// The session-scoped user injected into every request context. When
/// authentication is disabled a synthetic user with wildcard permissions is
/// used so that downstream code is unchanged.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub permissions: Permissions,
}

impl User {
    /// Returns a user which is allowed to do anything. The email is kept
    /// when the reverse proxy provided one even though authentication is
    /// disabled.
    pub fn wildcard(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            teams: Vec::new(),
            permissions: Permissions::wildcard(),
        }
    }
}
