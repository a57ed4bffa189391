//! Role descriptor record.
//!
//! A role grants cluster-level privileges, per-index privileges and the right
//! to run as other users. Only the fields relevant to access decisions are
//! modeled; evaluating them is not this crate's concern.

use serde::{Deserialize, Serialize};

use super::{MetadataRecord, StoreKind, null_as_empty};

// =============================================================================
// Indices Privileges
// =============================================================================

/// Privileges granted on a set of index patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicesPrivileges {
    /// Index names or wildcard patterns (e.g. `"logs-*"`).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub names: Vec<String>,

    /// Privileges granted on matching indices (e.g. `"read"`, `"all"`).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub privileges: Vec<String>,

    /// Field-level restriction. `None` grants every field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,

    /// Document-level restriction query, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl IndicesPrivileges {
    /// Creates a rule granting `privileges` on `names`.
    #[must_use]
    pub fn new<N, P>(names: N, privileges: P) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            privileges: privileges.into_iter().map(Into::into).collect(),
            fields: None,
            query: None,
        }
    }
}

// =============================================================================
// Role Type
// =============================================================================

/// A role in the authorization system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Role name, taken from the backing-store document id.
    #[serde(default)]
    pub name: String,

    /// Cluster-level privileges (e.g. `"none"`, `"monitor"`, `"all"`).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub cluster: Vec<String>,

    /// Per-index privilege rules.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub indices: Vec<IndicesPrivileges>,

    /// Users this role may impersonate.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub run_as: Vec<String>,
}

impl Role {
    /// Creates a role with no privileges.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: Vec::new(),
            indices: Vec::new(),
            run_as: Vec::new(),
        }
    }

    /// Creates a new role builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RoleBuilder {
        RoleBuilder::new(name)
    }

    /// Returns `true` if the role may run as `user`.
    #[must_use]
    pub fn can_run_as(&self, user: &str) -> bool {
        self.run_as.iter().any(|u| u == user || u == "*")
    }

    /// Returns `true` if the role carries the named cluster privilege.
    #[must_use]
    pub fn has_cluster_privilege(&self, privilege: &str) -> bool {
        self.cluster.iter().any(|p| p == privilege)
    }
}

impl MetadataRecord for Role {
    const KIND: StoreKind = StoreKind::Roles;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

// =============================================================================
// Role Builder
// =============================================================================

/// Builder for creating `Role` instances.
pub struct RoleBuilder {
    role: Role,
}

impl RoleBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            role: Role::new(name),
        }
    }

    /// Adds a cluster privilege.
    #[must_use]
    pub fn cluster(mut self, privilege: impl Into<String>) -> Self {
        self.role.cluster.push(privilege.into());
        self
    }

    /// Adds an index privilege rule.
    #[must_use]
    pub fn indices(mut self, rule: IndicesPrivileges) -> Self {
        self.role.indices.push(rule);
        self
    }

    /// Adds a run-as name.
    #[must_use]
    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.role.run_as.push(user.into());
        self
    }

    /// Builds the role.
    #[must_use]
    pub fn build(self) -> Role {
        self.role
    }
}
