use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::postgres::PgRow;
use rocket_db_pools::sqlx::{self, PgPool, Row};
use uuid::Uuid;

use crate::auth::principal::{CredentialRecord, NewPrincipal, Principal, Role};
use crate::store::{PrincipalStore, StoreError, StoreResult};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

/// Principal columns with the role codes folded into one array per user.
const SELECT_PRINCIPALS: &str = "SELECT u.id, u.username, u.suspended, u.token_version, u.created_at, \
     COALESCE(array_agg(r.role) FILTER (WHERE r.role IS NOT NULL), '{}') AS roles \
     FROM users u LEFT JOIN user_roles r ON r.user_id = u.id";

fn principal_from_row(row: &PgRow) -> StoreResult<Principal> {
    let codes: Vec<i32> = row.try_get("roles")?;
    let mut principal = Principal::new(
        row.try_get::<Uuid, _>("id")?,
        row.try_get::<String, _>("username")?,
        decode_roles(&codes)?,
    );
    principal.suspended = row.try_get("suspended")?;
    principal.token_version = row.try_get("token_version")?;
    principal.created_at = row.try_get::<DateTime<Utc>, _>("created_at")?;
    Ok(principal)
}

fn decode_roles(codes: &[i32]) -> StoreResult<BTreeSet<Role>> {
    codes
        .iter()
        .map(|code| {
            Role::from_code(*code)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown role code {code}")))
        })
        .collect()
}

fn credential_from_row(row: &PgRow) -> StoreResult<CredentialRecord> {
    Ok(CredentialRecord {
        principal_id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
    })
}

fn map_unique_violation(err: sqlx::Error, username: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(username.to_string())
        }
        _ => StoreError::Backend(err),
    }
}

fn ensure_affected(rows: u64, id: Uuid) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

#[rocket::async_trait]
impl PrincipalStore for PgStore {
    async fn find_principal_by_id(&self, id: Uuid) -> StoreResult<Option<Principal>> {
        let row = sqlx::query(&format!("{SELECT_PRINCIPALS} WHERE u.id = $1 GROUP BY u.id"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn find_credential_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<CredentialRecord>> {
        let row = sqlx::query("SELECT id, username, password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = $1")
            .bind(&new.username)
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            return Err(StoreError::Conflict(new.username));
        }

        let principal = Principal::new(Uuid::new_v4(), new.username.clone(), new.roles);
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO users (id, username, password_hash, is_admin) VALUES ($1, $2, $3, $4) RETURNING created_at",
        )
        .bind(principal.id)
        .bind(&principal.username)
        .bind(&new.password_hash)
        .bind(principal.is_admin())
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| map_unique_violation(err, &principal.username))?;

        for role in principal.roles() {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
                .bind(principal.id)
                .bind(role.code())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        let mut principal = principal;
        principal.created_at = created_at;
        Ok(principal)
    }

    async fn list_principals(&self, suspended: bool) -> StoreResult<Vec<Principal>> {
        let rows = sqlx::query(&format!(
            "{SELECT_PRINCIPALS} WHERE u.suspended = $1 GROUP BY u.id ORDER BY u.created_at"
        ))
        .bind(suspended)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(principal_from_row).collect()
    }

    async fn update_username(&self, id: Uuid, username: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET username = $1, token_version = token_version + 1 WHERE id = $2",
        )
        .bind(username)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, username))?;
        ensure_affected(result.rows_affected(), id)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $1, token_version = token_version + 1 WHERE id = $2",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_affected(result.rows_affected(), id)
    }

    async fn replace_roles(&self, id: Uuid, roles: BTreeSet<Role>) -> StoreResult<Principal> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE users SET is_admin = $1 WHERE id = $2")
            .bind(roles.contains(&Role::Admin))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        ensure_affected(result.rows_affected(), id)?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for role in &roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
                .bind(id)
                .bind(role.code())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.find_principal_by_id(id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn set_suspended(&self, id: Uuid, suspended: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET suspended = $1 WHERE id = $2")
            .bind(suspended)
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_affected(result.rows_affected(), id)
    }

    async fn delete_principal(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_affected(result.rows_affected(), id)
    }
}
