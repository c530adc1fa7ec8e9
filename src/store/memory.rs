use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::auth::principal::{CredentialRecord, NewPrincipal, Principal, Role};
use crate::store::{PrincipalStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredPrincipal {
    principal: Principal,
    password_hash: String,
}

impl StoredPrincipal {
    fn credential(&self) -> CredentialRecord {
        CredentialRecord {
            principal_id: self.principal.id,
            username: self.principal.username.clone(),
            password_hash: self.password_hash.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    principals: HashMap<Uuid, StoredPrincipal>,
    usernames: HashMap<String, Uuid>,
}

/// Process-local store; a single lock keeps the username index consistent.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_principal<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut StoredPrincipal) -> T,
    ) -> StoreResult<T> {
        let mut tables = self.tables.write();
        let stored = tables
            .principals
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        Ok(f(stored))
    }
}

#[rocket::async_trait]
impl PrincipalStore for MemoryStore {
    async fn find_principal_by_id(&self, id: Uuid) -> StoreResult<Option<Principal>> {
        Ok(self
            .tables
            .read()
            .principals
            .get(&id)
            .map(|stored| stored.principal.clone()))
    }

    async fn find_credential_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<CredentialRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .usernames
            .get(username)
            .and_then(|id| tables.principals.get(id))
            .map(StoredPrincipal::credential))
    }

    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        let mut tables = self.tables.write();
        if tables.usernames.contains_key(&new.username) {
            return Err(StoreError::Conflict(new.username));
        }

        let principal = Principal::new(Uuid::new_v4(), new.username.clone(), new.roles);
        tables.usernames.insert(new.username, principal.id);
        tables.principals.insert(
            principal.id,
            StoredPrincipal {
                principal: principal.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(principal)
    }

    async fn list_principals(&self, suspended: bool) -> StoreResult<Vec<Principal>> {
        let mut principals: Vec<Principal> = self
            .tables
            .read()
            .principals
            .values()
            .filter(|stored| stored.principal.suspended == suspended)
            .map(|stored| stored.principal.clone())
            .collect();
        principals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(principals)
    }

    async fn update_username(&self, id: Uuid, username: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        match tables.usernames.get(username) {
            Some(owner) if *owner != id => return Err(StoreError::Conflict(username.to_string())),
            _ => {}
        }

        let stored = tables
            .principals
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        let previous = std::mem::replace(&mut stored.principal.username, username.to_string());
        stored.principal.token_version += 1;

        tables.usernames.remove(&previous);
        tables.usernames.insert(username.to_string(), id);
        Ok(())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        self.with_principal(id, |stored| {
            stored.password_hash = password_hash.to_string();
            stored.principal.token_version += 1;
        })
    }

    async fn replace_roles(&self, id: Uuid, roles: BTreeSet<Role>) -> StoreResult<Principal> {
        self.with_principal(id, |stored| {
            stored.principal.set_roles(roles);
            stored.principal.clone()
        })
    }

    async fn set_suspended(&self, id: Uuid, suspended: bool) -> StoreResult<()> {
        self.with_principal(id, |stored| stored.principal.suspended = suspended)
    }

    async fn delete_principal(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let stored = tables
            .principals
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;
        tables.usernames.remove(&stored.principal.username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_principal(username: &str, roles: &[Role]) -> NewPrincipal {
        NewPrincipal {
            username: username.to_string(),
            password_hash: format!("hash-of-{username}"),
            roles: roles.iter().copied().collect(),
        }
    }

    #[rocket::async_test]
    async fn usernames_are_unique() {
        let store = MemoryStore::new();
        store
            .create_principal(new_principal("alice", &[Role::Admin]))
            .await
            .expect("create");

        let err = store
            .create_principal(new_principal("alice", &[Role::Moderator]))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict(name) if name == "alice"));
    }

    #[rocket::async_test]
    async fn replace_roles_keeps_admin_flag_consistent() {
        let store = MemoryStore::new();
        let alice = store
            .create_principal(new_principal("alice", &[Role::Admin]))
            .await
            .expect("create");
        assert!(alice.is_admin());

        let updated = store
            .replace_roles(alice.id, [Role::Moderator].into_iter().collect())
            .await
            .expect("replace");
        assert!(!updated.is_admin());

        let reloaded = store
            .find_principal_by_id(alice.id)
            .await
            .expect("lookup")
            .expect("present");
        assert!(!reloaded.is_admin());
        assert_eq!(reloaded.roles().len(), 1);
    }

    #[rocket::async_test]
    async fn rename_moves_username_index_and_bumps_version() {
        let store = MemoryStore::new();
        let alice = store
            .create_principal(new_principal("alice", &[Role::Moderator]))
            .await
            .expect("create");
        store
            .create_principal(new_principal("bob", &[Role::Moderator]))
            .await
            .expect("create");

        assert!(matches!(
            store.update_username(alice.id, "bob").await,
            Err(StoreError::Conflict(_))
        ));

        store.update_username(alice.id, "alicia").await.expect("rename");
        assert!(
            store
                .find_credential_by_username("alice")
                .await
                .expect("lookup")
                .is_none()
        );
        let record = store
            .find_credential_by_username("alicia")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(record.principal_id, alice.id);

        let reloaded = store
            .find_principal_by_id(alice.id)
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(reloaded.token_version, 1);
    }

    #[rocket::async_test]
    async fn listing_filters_on_suspension_and_delete_frees_username() {
        let store = MemoryStore::new();
        let alice = store
            .create_principal(new_principal("alice", &[Role::Admin]))
            .await
            .expect("create");
        let bob = store
            .create_principal(new_principal("bob", &[Role::Moderator]))
            .await
            .expect("create");

        store.set_suspended(bob.id, true).await.expect("suspend");
        let active = store.list_principals(false).await.expect("list");
        let suspended = store.list_principals(true).await.expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, alice.id);
        assert_eq!(suspended.len(), 1);
        assert_eq!(suspended[0].id, bob.id);

        store.delete_principal(bob.id).await.expect("delete");
        assert!(matches!(
            store.delete_principal(bob.id).await,
            Err(StoreError::NotFound(_))
        ));
        store
            .create_principal(new_principal("bob", &[Role::Moderator]))
            .await
            .expect("username reusable");
    }
}
