//! Persistence collaborator consulted by the auth core.
//!
//! The core only ever talks to [`PrincipalStore`]; the in-memory store backs
//! tests and the Postgres store backs the running service.

use std::collections::BTreeSet;

use thiserror::Error;
use uuid::Uuid;

use crate::auth::principal::{CredentialRecord, NewPrincipal, Principal, Role};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("principal {0} not found")]
    NotFound(Uuid),
    #[error("username '{0}' already exists")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
}

#[rocket::async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_principal_by_id(&self, id: Uuid) -> StoreResult<Option<Principal>>;

    async fn find_credential_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<CredentialRecord>>;

    /// Fails with [`StoreError::Conflict`] when the username is taken.
    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal>;

    async fn list_principals(&self, suspended: bool) -> StoreResult<Vec<Principal>>;

    /// Renames the principal and bumps its token version.
    async fn update_username(&self, id: Uuid, username: &str) -> StoreResult<()>;

    /// Replaces the password hash and bumps the token version.
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;

    /// Rewrites roles and the admin flag together.
    async fn replace_roles(&self, id: Uuid, roles: BTreeSet<Role>) -> StoreResult<Principal>;

    async fn set_suspended(&self, id: Uuid, suspended: bool) -> StoreResult<()>;

    async fn delete_principal(&self, id: Uuid) -> StoreResult<()>;
}
