use rocket::Request;
use rocket::State;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::request::OpenApiFromRequest;

use crate::auth::gate::{GateOutcome, RequestContext, RoleRequirement};
use crate::auth::principal::{Principal, Role};
use crate::auth::{AuthError, AuthState};
use crate::error::{GateRejection, log_error};
use crate::request_logger::RequestPrincipal;

/// Any authenticated principal.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct AuthUser(pub Principal);

/// Principal holding the `admin` role.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct RequireAdmin(pub Principal);

/// Principal holding `admin` or `moderator`.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct RequireStaff(pub Principal);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        run_gates(request, Ok(RoleRequirement::AnyAuthenticated))
            .await
            .map(AuthUser)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireAdmin {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        run_gates(request, RoleRequirement::any_of(&[Role::Admin]))
            .await
            .map(RequireAdmin)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireStaff {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        run_gates(request, RoleRequirement::any_of(&[Role::Admin, Role::Moderator]))
            .await
            .map(RequireStaff)
    }
}

/// Builds the authenticate-then-authorize pipeline for this request and runs it.
async fn run_gates(
    request: &Request<'_>,
    requirement: Result<RoleRequirement, AuthError>,
) -> Outcome<Principal, AuthError> {
    let state = match request.guard::<&State<AuthState>>().await.succeeded() {
        Some(state) => state,
        None => return reject(request, AuthError::Config("AuthState missing from state".into())),
    };
    let requirement = match requirement {
        Ok(requirement) => requirement,
        Err(err) => return reject(request, err),
    };

    let authorization = request.headers().get_one("Authorization").map(str::to_string);
    let mut ctx = RequestContext::new(authorization);
    let pipeline = state.pipeline().authorize(requirement);

    match pipeline.evaluate(&mut ctx).await {
        GateOutcome::Pass => match ctx.into_principal() {
            Some(principal) => {
                request.local_cache(|| Some(RequestPrincipal(principal.username.clone())));
                Outcome::Success(principal)
            }
            None => reject(request, AuthError::Unauthorized),
        },
        GateOutcome::Fail(err) => reject(request, err),
    }
}

fn reject<T>(request: &Request<'_>, err: AuthError) -> Outcome<T, AuthError> {
    log_error(&err);
    request.local_cache(|| Some(GateRejection::from(&err)));
    Outcome::Error((err.status(), err))
}
