//! Per-request gates and the pipeline that composes them.
//!
//! A pipeline always starts with [`Authenticate`]; role checks can only be
//! appended after it, so an authorization gate is never reachable without an
//! authenticated principal in the context.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use crate::auth::jwt::TokenCodec;
use crate::auth::principal::{Principal, Role};
use crate::auth::{AuthError, AuthResult};
use crate::store::PrincipalStore;

/// State shared by every gate and the handler for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    authorization: Option<String>,
    principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(authorization: Option<String>) -> Self {
        Self {
            authorization,
            principal: None,
        }
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn attach_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    pub fn into_principal(self) -> Option<Principal> {
        self.principal
    }
}

#[derive(Debug)]
pub enum GateOutcome {
    Pass,
    Fail(AuthError),
}

#[rocket::async_trait]
pub trait Gate: Send + Sync {
    async fn check(&self, ctx: &mut RequestContext) -> GateOutcome;
}

/// Verifies the bearer token and resolves the principal from the store.
pub struct Authenticate {
    codec: Arc<TokenCodec>,
    store: Arc<dyn PrincipalStore>,
}

impl Authenticate {
    pub fn new(codec: Arc<TokenCodec>, store: Arc<dyn PrincipalStore>) -> Self {
        Self { codec, store }
    }

    async fn resolve(&self, ctx: &RequestContext) -> AuthResult<Principal> {
        let token = ctx
            .authorization()
            .and_then(bearer_token)
            .ok_or(AuthError::TokenRequired)?;

        let claims = self.codec.verify_access(token).map_err(|failure| {
            log::debug!("rejected access token: {}", failure);
            AuthError::TokenInvalid(failure)
        })?;
        let principal_id = claims.principal_id().map_err(AuthError::TokenInvalid)?;

        // Roles come from the store, not the token, so revocations apply immediately.
        let principal = self
            .store
            .find_principal_by_id(principal_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if principal.suspended {
            return Err(AuthError::AccountSuspended);
        }
        Ok(principal)
    }
}

#[rocket::async_trait]
impl Gate for Authenticate {
    async fn check(&self, ctx: &mut RequestContext) -> GateOutcome {
        match self.resolve(ctx).await {
            Ok(principal) => {
                ctx.attach_principal(principal);
                GateOutcome::Pass
            }
            Err(err) => GateOutcome::Fail(err),
        }
    }
}

/// Accepts `Bearer <token>` exactly; any other scheme is treated as absent.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty() && !token.contains(' '))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    /// Authentication alone is enough.
    AnyAuthenticated,
    /// The principal must hold at least one of these roles.
    AnyOf(BTreeSet<Role>),
}

impl RoleRequirement {
    /// An empty role list is a configuration mistake, not "allow everyone".
    pub fn any_of(roles: &[Role]) -> AuthResult<Self> {
        if roles.is_empty() {
            return Err(AuthError::Config(
                "role requirement needs at least one role; use AnyAuthenticated instead".into(),
            ));
        }
        Ok(RoleRequirement::AnyOf(roles.iter().copied().collect()))
    }

    pub fn admits(&self, principal: &Principal) -> bool {
        match self {
            RoleRequirement::AnyAuthenticated => true,
            RoleRequirement::AnyOf(allowed) => principal.has_any_role(allowed),
        }
    }
}

pub struct Authorize {
    requirement: RoleRequirement,
}

/// Declares an endpoint's role requirement once; the gate applies it per request.
pub fn authorize(requirement: RoleRequirement) -> Authorize {
    Authorize { requirement }
}

#[rocket::async_trait]
impl Gate for Authorize {
    async fn check(&self, ctx: &mut RequestContext) -> GateOutcome {
        let Some(principal) = ctx.principal() else {
            return GateOutcome::Fail(AuthError::Unauthorized);
        };

        if self.requirement.admits(principal) {
            GateOutcome::Pass
        } else {
            log::debug!(
                "principal {} lacks required role for {:?}",
                principal.username,
                self.requirement
            );
            GateOutcome::Fail(AuthError::Forbidden)
        }
    }
}

/// Ordered gate chain; the first failing gate ends the request.
pub struct Pipeline {
    gates: Vec<Box<dyn Gate>>,
}

impl Pipeline {
    pub fn authenticated(gate: Authenticate) -> Self {
        Self {
            gates: vec![Box::new(gate)],
        }
    }

    pub fn authorize(self, requirement: RoleRequirement) -> Self {
        self.then(authorize(requirement))
    }

    pub fn then<G: Gate + 'static>(mut self, gate: G) -> Self {
        self.gates.push(Box::new(gate));
        self
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub async fn evaluate(&self, ctx: &mut RequestContext) -> GateOutcome {
        for gate in &self.gates {
            if let GateOutcome::Fail(err) = gate.check(ctx).await {
                return GateOutcome::Fail(err);
            }
        }
        GateOutcome::Pass
    }

    /// Runs every gate, then hands the context to `handler`.
    pub async fn execute<F, Fut, T>(&self, mut ctx: RequestContext, handler: F) -> AuthResult<T>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = T>,
    {
        match self.evaluate(&mut ctx).await {
            GateOutcome::Pass => Ok(handler(ctx).await),
            GateOutcome::Fail(err) => Err(err),
        }
    }
}
