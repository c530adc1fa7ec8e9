//! Authentication and authorization: configuration, credential checks,
//! token minting, the gate pipeline, request guards, and route handlers.

use std::sync::Arc;

pub mod config;
pub mod cookies;
pub mod credentials;
pub mod error;
pub mod gate;
pub mod guards;
pub mod jwt;
pub mod passwords;
pub mod principal;
pub mod refresh;
pub mod responses;
pub mod routes;

pub use config::AuthConfig;
pub use cookies::SessionCookies;
pub use credentials::CredentialVerifier;
pub use error::{AuthError, AuthResult, TokenFailure};
pub use gate::{Authenticate, Pipeline, RoleRequirement};
pub use guards::{AuthUser, RequireAdmin, RequireStaff};
pub use jwt::TokenCodec;
pub use passwords::PasswordService;
pub use principal::{Principal, Role};
pub use refresh::TokenRefresh;

use crate::store::PrincipalStore;

#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub password_service: Arc<PasswordService>,
    pub token_codec: Arc<TokenCodec>,
    pub store: Arc<dyn PrincipalStore>,
    pub cookies: SessionCookies,
    pub credentials: Arc<CredentialVerifier>,
    pub token_refresh: Arc<TokenRefresh>,
}

impl AuthState {
    /// Wires every auth component around one store. Fails on unusable config.
    pub fn new(config: AuthConfig, store: Arc<dyn PrincipalStore>) -> AuthResult<Self> {
        let password_service = Arc::new(PasswordService::from_config(&config)?);
        let token_codec = Arc::new(TokenCodec::from_config(&config)?);
        let cookies = SessionCookies::from_config(&config);
        let credentials = Arc::new(CredentialVerifier::new(
            store.clone(),
            password_service.clone(),
        ));
        let token_refresh = Arc::new(TokenRefresh::new(
            token_codec.clone(),
            store.clone(),
            cookies.clone(),
        ));

        Ok(Self {
            config,
            password_service,
            token_codec,
            store,
            cookies,
            credentials,
            token_refresh,
        })
    }

    /// A fresh pipeline holding only the authentication gate.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::authenticated(Authenticate::new(
            self.token_codec.clone(),
            self.store.clone(),
        ))
    }
}
