//! Native user record.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{MetadataRecord, StoreKind, null_as_empty};

fn default_enabled() -> bool {
    true
}

// =============================================================================
// User Type
// =============================================================================

/// A user held by the native users store.
///
/// The password hash is kept opaque: producing and verifying it belongs to the
/// authentication layer. `Debug` output redacts it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Username, taken from the backing-store document id.
    #[serde(default)]
    pub username: String,

    /// Credential hash.
    #[serde(default, alias = "passwordHash", skip_serializing_if = "String::is_empty")]
    pub password_hash: String,

    /// Names of the roles assigned to this user.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roles: Vec<String>,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Free-form metadata attached by administrators.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Disabled users are kept but cannot authenticate.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl User {
    /// Creates an enabled user with no roles.
    #[must_use]
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            roles: Vec::new(),
            full_name: None,
            email: None,
            metadata: serde_json::Map::new(),
            enabled: true,
        }
    }

    /// Creates a new user builder.
    #[must_use]
    pub fn builder(username: impl Into<String>, password_hash: impl Into<String>) -> UserBuilder {
        UserBuilder {
            user: User::new(username, password_hash),
        }
    }

    /// Returns `true` if the user is assigned `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Returns a copy safe to hand to API clients.
    #[must_use]
    pub fn without_credentials(&self) -> Self {
        Self {
            password_hash: String::new(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("roles", &self.roles)
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl MetadataRecord for User {
    const KIND: StoreKind = StoreKind::Users;

    fn name(&self) -> &str {
        &self.username
    }

    fn set_name(&mut self, name: String) {
        self.username = name;
    }

    fn public_view(&self) -> Self {
        self.without_credentials()
    }

    fn lacks_private_fields(&self) -> bool {
        self.password_hash.is_empty()
    }

    fn restore_private_fields(&mut self, stored: &Self) {
        self.password_hash.clone_from(&stored.password_hash);
    }
}

// =============================================================================
// User Builder
// =============================================================================

/// Builder for creating `User` instances.
pub struct UserBuilder {
    user: User,
}

impl UserBuilder {
    /// Assigns a role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.user.roles.push(role.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn full_name(mut self, full_name: impl Into<String>) -> Self {
        self.user.full_name = Some(full_name.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.user.email = Some(email.into());
        self
    }

    /// Enables or disables the user.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.user.enabled = enabled;
        self
    }

    /// Builds the user.
    #[must_use]
    pub fn build(self) -> User {
        self.user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_builder() {
        let user = User::builder("alice", "$2a$10$hash")
            .role("ops")
            .role("reader")
            .full_name("Alice")
            .build();

        assert!(user.has_role("ops"));
        assert!(!user.has_role("admin"));
        assert!(user.enabled);
        assert_eq!(user.full_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_debug_redacts_hash() {
        let user = User::new("alice", "$2a$10$secret");
        let rendered = format!("{user:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_user_parses_camel_case_hash_and_defaults() {
        let user = User::from_document(
            "bob",
            json!({"passwordHash": "h", "roles": null}),
        )
        .unwrap();

        assert_eq!(user.username, "bob");
        assert_eq!(user.password_hash, "h");
        assert!(user.roles.is_empty());
        assert!(user.enabled);
    }

    #[test]
    fn test_without_credentials() {
        let user = User::new("alice", "h");
        let public = user.without_credentials();
        assert!(public.password_hash.is_empty());
        let doc = serde_json::to_value(&public).unwrap();
        assert!(doc.get("password_hash").is_none());
    }
}
