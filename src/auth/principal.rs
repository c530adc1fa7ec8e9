use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of roles a principal can hold.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
}

/// Canonical mapping between roles, their wire names, and their storage codes.
const ROLE_TABLE: [(Role, &str, i32); 2] = [
    (Role::Admin, "admin", 2200),
    (Role::Moderator, "moderator", 1500),
];

impl Role {
    pub const ALL: [Role; 2] = [Role::Admin, Role::Moderator];

    pub fn as_str(&self) -> &'static str {
        ROLE_TABLE
            .iter()
            .find(|(role, _, _)| role == self)
            .map(|(_, name, _)| *name)
            .unwrap_or_default()
    }

    pub fn code(&self) -> i32 {
        ROLE_TABLE
            .iter()
            .find(|(role, _, _)| role == self)
            .map(|(_, _, code)| *code)
            .unwrap_or_default()
    }

    pub fn from_code(code: i32) -> Option<Self> {
        ROLE_TABLE
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(role, _, _)| *role)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim().to_ascii_lowercase();
        ROLE_TABLE
            .iter()
            .find(|(_, name, _)| *name == needle)
            .map(|(role, _, _)| *role)
            .ok_or_else(|| UnknownRole(value.to_string()))
    }
}

/// The identity a request acts as.
///
/// `is_admin` is derived from `roles` whenever roles are set, so the two can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    roles: BTreeSet<Role>,
    is_admin: bool,
    pub suspended: bool,
    pub token_version: i32,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(id: Uuid, username: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        let roles: BTreeSet<Role> = roles.into_iter().collect();
        let is_admin = roles.contains(&Role::Admin);
        Self {
            id,
            username: username.into(),
            roles,
            is_admin,
            suspended: false,
            token_version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn has_any_role(&self, allowed: &BTreeSet<Role>) -> bool {
        !self.roles.is_disjoint(allowed)
    }

    pub fn set_roles(&mut self, roles: impl IntoIterator<Item = Role>) {
        self.roles = roles.into_iter().collect();
        self.is_admin = self.roles.contains(&Role::Admin);
    }
}

/// Stored login material for a principal.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub principal_id: Uuid,
    pub username: String,
    pub password_hash: String,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("principal_id", &self.principal_id)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// Input for account creation; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub password_hash: String,
    pub roles: BTreeSet<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_flag_follows_roles() {
        let mut principal = Principal::new(Uuid::new_v4(), "alice", [Role::Admin, Role::Moderator]);
        assert!(principal.is_admin());

        principal.set_roles([Role::Moderator]);
        assert!(!principal.is_admin());
        assert_eq!(principal.roles().len(), 1);

        principal.set_roles([Role::Admin]);
        assert!(principal.is_admin());
    }

    #[test]
    fn role_table_round_trips_codes_and_names() {
        for role in Role::ALL {
            assert_eq!(Role::from_code(role.code()), Some(role));
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert_eq!(Role::Admin.code(), 2200);
        assert_eq!(Role::Moderator.code(), 1500);
        assert_eq!(Role::from_code(42), None);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn roles_deserialize_from_lowercase_names_only() {
        let roles: Vec<Role> = serde_json::from_str(r#"["admin","moderator"]"#).expect("parse");
        assert_eq!(roles, vec![Role::Admin, Role::Moderator]);
        assert!(serde_json::from_str::<Vec<Role>>(r#"[2200]"#).is_err());
        assert!(serde_json::from_str::<Vec<Role>>(r#"["owner"]"#).is_err());
    }

    #[test]
    fn credential_debug_redacts_hash() {
        let record = CredentialRecord {
            principal_id: Uuid::nil(),
            username: "alice".into(),
            password_hash: "$argon2id$secret".into(),
        };
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("argon2id"));
    }
}
