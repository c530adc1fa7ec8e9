use std::sync::Arc;

use crate::auth::principal::Principal;
use crate::auth::{AuthResult, PasswordService};
use crate::store::PrincipalStore;

/// Checks a username/password pair against stored credentials.
///
/// Returns `Ok(None)` for both an unknown username and a wrong password so
/// callers cannot tell the two apart. Read-only.
pub struct CredentialVerifier {
    store: Arc<dyn PrincipalStore>,
    passwords: Arc<PasswordService>,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn PrincipalStore>, passwords: Arc<PasswordService>) -> Self {
        Self { store, passwords }
    }

    pub async fn verify(&self, username: &str, password: &str) -> AuthResult<Option<Principal>> {
        let record = match self.store.find_credential_by_username(username).await? {
            Some(record) => record,
            None => {
                self.passwords.verify_against_dummy(password);
                return Ok(None);
            }
        };

        if !self
            .passwords
            .verify_password(password, &record.password_hash)?
        {
            return Ok(None);
        }

        Ok(self.store.find_principal_by_id(record.principal_id).await?)
    }
}
