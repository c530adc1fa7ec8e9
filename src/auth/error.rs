use std::fmt;

use rocket::http::Status;
use thiserror::Error;

use crate::store::StoreError;

pub type AuthResult<T> = Result<T, AuthError>;

/// Why a token was rejected. Clients only ever see the collapsed category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFailure {
    Expired,
    Malformed,
    BadSignature,
    /// Well-formed and signed, but the principal is gone or its token version moved on.
    Revoked,
}

impl TokenFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenFailure::Expired => "expired",
            TokenFailure::Malformed => "malformed",
            TokenFailure::BadSignature => "bad_signature",
            TokenFailure::Revoked => "revoked",
        }
    }
}

impl fmt::Display for TokenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<jsonwebtoken::errors::Error> for TokenFailure {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenFailure::Expired,
            ErrorKind::InvalidSignature => TokenFailure::BadSignature,
            _ => TokenFailure::Malformed,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token required")]
    TokenRequired,
    #[error("token invalid ({0})")]
    TokenInvalid(TokenFailure),
    #[error("refresh token missing")]
    RefreshMissing,
    #[error("refresh token invalid ({0})")]
    RefreshInvalid(TokenFailure),
    #[error("user not found")]
    UserNotFound,
    #[error("no authenticated principal")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("account suspended")]
    AccountSuspended,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::TokenRequired | AuthError::RefreshMissing | AuthError::Unauthorized => {
                Status::Unauthorized
            }
            AuthError::TokenInvalid(_)
            | AuthError::RefreshInvalid(_)
            | AuthError::Forbidden
            | AuthError::AccountSuspended => Status::Forbidden,
            AuthError::UserNotFound => Status::NotFound,
            AuthError::InvalidCredentials | AuthError::Validation(_) => Status::BadRequest,
            AuthError::Config(_)
            | AuthError::Store(_)
            | AuthError::Jwt(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => Status::InternalServerError,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::TokenRequired => "TOKEN_REQUIRED",
            AuthError::TokenInvalid(_) => "TOKEN_INVALID",
            AuthError::RefreshMissing => "REFRESH_MISSING",
            AuthError::RefreshInvalid(_) => "REFRESH_INVALID",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::Unauthorized => "UNAUTHORIZED",
            AuthError::Forbidden => "FORBIDDEN",
            AuthError::AccountSuspended => "ACCOUNT_SUSPENDED",
            AuthError::InvalidCredentials => "CREDENTIALS_INVALID",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::Config(_)
            | AuthError::Store(_)
            | AuthError::Jwt(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => "INTERNAL",
        }
    }

    /// Message safe to hand to a client. Never names the failing check.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::TokenRequired => "Unauthorized: Token required.".into(),
            AuthError::TokenInvalid(_) => "Invalid Token".into(),
            AuthError::RefreshMissing => "Refresh token missing".into(),
            AuthError::RefreshInvalid(_) => "Invalid refresh token".into(),
            AuthError::UserNotFound => "User not found".into(),
            AuthError::Unauthorized => "Unauthorized: No user data".into(),
            AuthError::Forbidden => "Forbidden: Insufficient permissions".into(),
            AuthError::AccountSuspended => "Account suspended".into(),
            AuthError::InvalidCredentials => "Incorrect username or password.".into(),
            AuthError::Validation(message) => message.clone(),
            _ => "Something went wrong!".into(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status() == Status::InternalServerError
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_collapse_for_clients() {
        let expired = AuthError::TokenInvalid(TokenFailure::Expired);
        let forged = AuthError::TokenInvalid(TokenFailure::BadSignature);
        assert_eq!(expired.status(), forged.status());
        assert_eq!(expired.code(), forged.code());
        assert_eq!(expired.public_message(), forged.public_message());
        assert_ne!(expired.to_string(), forged.to_string());
    }

    #[test]
    fn refresh_missing_and_invalid_use_distinct_statuses() {
        assert_eq!(AuthError::RefreshMissing.status(), Status::Unauthorized);
        assert_eq!(
            AuthError::RefreshInvalid(TokenFailure::Expired).status(),
            Status::Forbidden
        );
    }

    #[test]
    fn internal_errors_hide_detail() {
        let err = AuthError::Config("BACKOFFICE_JWT_SECRET is required".into());
        assert!(err.is_internal());
        assert_eq!(err.code(), "INTERNAL");
        assert!(!err.public_message().contains("JWT"));
    }
}
