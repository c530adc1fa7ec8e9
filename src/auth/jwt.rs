use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::auth::principal::{Principal, Role};
use crate::auth::{AuthConfig, AuthError, AuthResult, TokenFailure};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub username: String,
    pub roles: Vec<Role>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Principal token version at issue time; bumping it kills the token.
    pub ver: i32,
}

impl AccessTokenClaims {
    pub fn principal_id(&self) -> Result<Uuid, TokenFailure> {
        self.sub.parse().map_err(|_| TokenFailure::Malformed)
    }
}

impl RefreshTokenClaims {
    pub fn principal_id(&self) -> Result<Uuid, TokenFailure> {
        self.sub.parse().map_err(|_| TokenFailure::Malformed)
    }
}

/// Which signing secret a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl_secs: i64, name: &str) -> AuthResult<Self> {
        if secret.is_empty() {
            return Err(AuthError::Config(format!("{name} signing secret is unset")));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::try_seconds(ttl_secs)
                .filter(|ttl| *ttl > Duration::zero())
                .ok_or_else(|| {
                    AuthError::Config(format!("{name} ttl of {ttl_secs}s is out of range"))
                })?,
        })
    }
}

/// Signs and verifies access and refresh tokens with independent HS256 secrets.
pub struct TokenCodec {
    access: SigningKeys,
    refresh: SigningKeys,
    validation: Validation,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let access = SigningKeys::new(
            &config.access_token_secret,
            config.access_token_ttl_secs,
            "access token",
        )?;
        let refresh = SigningKeys::new(
            &config.refresh_token_secret,
            config.refresh_token_ttl_secs,
            "refresh token",
        )?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);
        // Expiry is exact: a token is dead the second its TTL elapses.
        validation.leeway = 0;

        Ok(Self {
            access,
            refresh,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }

    pub fn issue_access_token(&self, principal: &Principal) -> AuthResult<SignedToken> {
        self.issue_access_token_at(principal, Utc::now())
    }

    pub fn issue_access_token_at(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> AuthResult<SignedToken> {
        let expires_at = expiry(now, self.access.ttl)?;
        let claims = AccessTokenClaims {
            sub: principal.id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            username: principal.username.clone(),
            roles: principal.roles().iter().copied().collect(),
            is_admin: principal.is_admin(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.access.encoding)?;
        Ok(SignedToken { token, expires_at })
    }

    pub fn issue_refresh_token(&self, principal_id: Uuid, version: i32) -> AuthResult<SignedToken> {
        self.issue_refresh_token_at(principal_id, version, Utc::now())
    }

    pub fn issue_refresh_token_at(
        &self,
        principal_id: Uuid,
        version: i32,
        now: DateTime<Utc>,
    ) -> AuthResult<SignedToken> {
        let expires_at = expiry(now, self.refresh.ttl)?;
        let claims = RefreshTokenClaims {
            sub: principal_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            ver: version,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.refresh.encoding)?;
        Ok(SignedToken { token, expires_at })
    }

    /// Checks signature and expiry against the secret for `kind`.
    pub fn verify<C: DeserializeOwned>(&self, token: &str, kind: TokenKind) -> Result<C, TokenFailure> {
        let key = match kind {
            TokenKind::Access => &self.access.decoding,
            TokenKind::Refresh => &self.refresh.decoding,
        };
        let data = decode::<C>(token, key, &self.validation)?;
        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, TokenFailure> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, TokenFailure> {
        self.verify(token, TokenKind::Refresh)
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> AuthResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Config(format!("token expiry past {now} + {ttl} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_auth_config;

    fn codec() -> TokenCodec {
        TokenCodec::from_config(&test_auth_config()).expect("codec")
    }

    fn alice() -> Principal {
        Principal::new(Uuid::new_v4(), "alice", [Role::Admin])
    }

    #[test]
    fn issues_and_verifies_access_tokens() {
        let codec = codec();
        let principal = alice();
        let token = codec.issue_access_token(&principal).expect("issue");

        let claims = codec.verify_access(&token.token).expect("verify");
        assert_eq!(claims.principal_id(), Ok(principal.id));
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.roles, vec![Role::Admin]);
        assert!(claims.is_admin);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn expired_access_token_is_classified_as_expired() {
        let codec = codec();
        let issued_at = Utc::now() - Duration::minutes(20);
        let token = codec
            .issue_access_token_at(&alice(), issued_at)
            .expect("issue");

        let err = codec.verify_access(&token.token).expect_err("expired");
        assert_eq!(err, TokenFailure::Expired);
    }

    #[test]
    fn tokens_die_the_second_after_their_ttl() {
        let codec = codec();
        let config = test_auth_config();
        let access_issued = Utc::now() - Duration::seconds(config.access_token_ttl_secs + 1);
        let access = codec
            .issue_access_token_at(&alice(), access_issued)
            .expect("issue access");
        assert_eq!(
            codec.verify_access(&access.token).expect_err("expired"),
            TokenFailure::Expired
        );

        let refresh_issued = Utc::now() - Duration::seconds(config.refresh_token_ttl_secs + 1);
        let refresh = codec
            .issue_refresh_token_at(Uuid::new_v4(), 0, refresh_issued)
            .expect("issue refresh");
        assert_eq!(
            codec.verify_refresh(&refresh.token).expect_err("expired"),
            TokenFailure::Expired
        );
    }

    #[test]
    fn out_of_range_ttl_is_a_config_error() {
        let mut config = test_auth_config();
        config.access_token_ttl_secs = 100_000_000_000_000_000;
        assert!(matches!(
            TokenCodec::from_config(&config),
            Err(AuthError::Config(_))
        ));

        // Representable as a duration but not as a date once added to now.
        let mut config = test_auth_config();
        config.refresh_token_ttl_secs = 100_000_000_000_000;
        let codec = TokenCodec::from_config(&config).expect("ttl fits a duration");
        assert!(matches!(
            codec.issue_refresh_token(Uuid::new_v4(), 0),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn refresh_token_does_not_verify_with_access_secret() {
        let codec = codec();
        let refresh = codec
            .issue_refresh_token(Uuid::new_v4(), 0)
            .expect("issue refresh");

        assert!(codec.verify_refresh(&refresh.token).is_ok());
        assert_eq!(
            codec.verify_access(&refresh.token).expect_err("wrong secret"),
            TokenFailure::BadSignature
        );

        let access = codec.issue_access_token(&alice()).expect("issue access");
        assert_eq!(
            codec.verify_refresh(&access.token).expect_err("wrong secret"),
            TokenFailure::BadSignature
        );
    }

    #[test]
    fn refresh_token_lives_seven_days() {
        let codec = codec();
        let id = Uuid::new_v4();
        let refresh = codec.issue_refresh_token(id, 3).expect("issue");
        let claims = codec.verify_refresh(&refresh.token).expect("verify");
        assert_eq!(claims.principal_id(), Ok(id));
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        assert_eq!(
            codec.verify_access("not-a-jwt").expect_err("garbage"),
            TokenFailure::Malformed
        );
    }

    #[test]
    fn consecutive_tokens_differ() {
        let codec = codec();
        let principal = alice();
        let first = codec.issue_access_token(&principal).expect("first");
        let second = codec.issue_access_token(&principal).expect("second");
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn unset_secret_fails_closed() {
        let mut config = test_auth_config();
        config.access_token_secret.clear();
        assert!(matches!(
            TokenCodec::from_config(&config),
            Err(AuthError::Config(_))
        ));
    }
}
