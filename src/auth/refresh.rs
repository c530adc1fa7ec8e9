use std::sync::Arc;

use rocket::http::CookieJar;

use crate::auth::cookies::SessionCookies;
use crate::auth::jwt::{SignedToken, TokenCodec};
use crate::auth::{AuthError, AuthResult, TokenFailure};
use crate::store::PrincipalStore;

/// Exchanges a valid refresh token for a new access token.
///
/// The refresh token itself is not rotated; it stays usable until it expires
/// or the principal's token version moves on.
pub struct TokenRefresh {
    codec: Arc<TokenCodec>,
    store: Arc<dyn PrincipalStore>,
    cookies: SessionCookies,
}

impl TokenRefresh {
    pub fn new(
        codec: Arc<TokenCodec>,
        store: Arc<dyn PrincipalStore>,
        cookies: SessionCookies,
    ) -> Self {
        Self {
            codec,
            store,
            cookies,
        }
    }

    /// Reads the refresh cookie, mints a new access token, and stores it in
    /// the access cookie. The cookie is only written on success.
    pub async fn refresh(&self, jar: &CookieJar<'_>) -> AuthResult<SignedToken> {
        let presented = self.cookies.read_refresh_token(jar);
        let access = self.exchange(presented.as_deref()).await?;
        self.cookies.set_access_token(jar, &access);
        Ok(access)
    }

    pub async fn exchange(&self, refresh_token: Option<&str>) -> AuthResult<SignedToken> {
        let token = refresh_token.ok_or(AuthError::RefreshMissing)?;

        let claims = self.codec.verify_refresh(token).map_err(|failure| {
            log::debug!("rejected refresh token: {}", failure);
            AuthError::RefreshInvalid(failure)
        })?;
        let principal_id = claims.principal_id().map_err(AuthError::RefreshInvalid)?;

        // Claims are re-read from the store; roles may have changed since login.
        let principal = match self.store.find_principal_by_id(principal_id).await? {
            Some(principal) => principal,
            None => {
                log::info!("refresh for deleted principal {}", principal_id);
                return Err(AuthError::RefreshInvalid(TokenFailure::Revoked));
            }
        };

        if principal.suspended {
            return Err(AuthError::AccountSuspended);
        }

        if principal.token_version != claims.ver {
            log::info!(
                "refresh token for {} predates a credential change",
                principal.username
            );
            return Err(AuthError::RefreshInvalid(TokenFailure::Revoked));
        }

        self.codec.issue_access_token(&principal)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::auth::principal::{NewPrincipal, Principal, Role};
    use crate::store::MemoryStore;
    use crate::test_support::test_auth_config;

    struct Fixture {
        codec: Arc<TokenCodec>,
        store: Arc<MemoryStore>,
        refresh: TokenRefresh,
    }

    impl Fixture {
        fn new() -> Self {
            let config = test_auth_config();
            let codec = Arc::new(TokenCodec::from_config(&config).expect("codec"));
            let store = Arc::new(MemoryStore::new());
            let refresh = TokenRefresh::new(
                codec.clone(),
                store.clone(),
                SessionCookies::from_config(&config),
            );
            Self {
                codec,
                store,
                refresh,
            }
        }

        async fn principal(&self, roles: &[Role]) -> Principal {
            self.store
                .create_principal(NewPrincipal {
                    username: "alice".into(),
                    password_hash: "unused".into(),
                    roles: roles.iter().copied().collect(),
                })
                .await
                .expect("create principal")
        }
    }

    #[rocket::async_test]
    async fn missing_token_is_distinct_from_invalid() {
        let fixture = Fixture::new();
        let err = fixture.refresh.exchange(None).await.expect_err("missing");
        assert!(matches!(err, AuthError::RefreshMissing));

        let err = fixture
            .refresh
            .exchange(Some("garbage"))
            .await
            .expect_err("invalid");
        assert!(matches!(err, AuthError::RefreshInvalid(_)));
    }

    #[rocket::async_test]
    async fn expired_refresh_token_is_invalid() {
        let fixture = Fixture::new();
        let alice = fixture.principal(&[Role::Admin]).await;
        let old = fixture
            .codec
            .issue_refresh_token_at(alice.id, 0, Utc::now() - Duration::days(8))
            .expect("old token");
        let err = fixture
            .refresh
            .exchange(Some(&old.token))
            .await
            .expect_err("expired");
        assert!(matches!(err, AuthError::RefreshInvalid(TokenFailure::Expired)));
    }

    #[rocket::async_test]
    async fn access_token_is_not_accepted_as_refresh_token() {
        let fixture = Fixture::new();
        let alice = fixture.principal(&[Role::Admin]).await;
        let access = fixture.codec.issue_access_token(&alice).expect("access");
        let err = fixture
            .refresh
            .exchange(Some(&access.token))
            .await
            .expect_err("wrong secret");
        assert!(matches!(err, AuthError::RefreshInvalid(TokenFailure::BadSignature)));
    }

    #[rocket::async_test]
    async fn repeated_refresh_yields_distinct_valid_tokens() {
        let fixture = Fixture::new();
        let alice = fixture.principal(&[Role::Admin]).await;
        let refresh = fixture
            .codec
            .issue_refresh_token(alice.id, alice.token_version)
            .expect("refresh");

        let first = fixture
            .refresh
            .exchange(Some(&refresh.token))
            .await
            .expect("first refresh");
        let second = fixture
            .refresh
            .exchange(Some(&refresh.token))
            .await
            .expect("second refresh");

        assert_ne!(first.token, second.token);
        assert!(fixture.codec.verify_access(&first.token).is_ok());
        assert!(fixture.codec.verify_access(&second.token).is_ok());
    }

    #[rocket::async_test]
    async fn new_access_token_carries_current_roles() {
        let fixture = Fixture::new();
        let alice = fixture.principal(&[Role::Admin]).await;
        let refresh = fixture
            .codec
            .issue_refresh_token(alice.id, alice.token_version)
            .expect("refresh");

        fixture
            .store
            .replace_roles(alice.id, [Role::Moderator].into_iter().collect())
            .await
            .expect("demote");

        let access = fixture
            .refresh
            .exchange(Some(&refresh.token))
            .await
            .expect("refresh");
        let claims = fixture.codec.verify_access(&access.token).expect("claims");
        assert!(!claims.is_admin);
        assert_eq!(claims.roles, vec![Role::Moderator]);
    }

    #[rocket::async_test]
    async fn credential_change_invalidates_refresh_tokens() {
        let fixture = Fixture::new();
        let alice = fixture.principal(&[Role::Admin]).await;
        let refresh = fixture
            .codec
            .issue_refresh_token(alice.id, alice.token_version)
            .expect("refresh");

        fixture
            .store
            .update_password_hash(alice.id, "new-hash")
            .await
            .expect("password change");

        let err = fixture
            .refresh
            .exchange(Some(&refresh.token))
            .await
            .expect_err("stale version");
        assert!(matches!(err, AuthError::RefreshInvalid(TokenFailure::Revoked)));
    }
}
