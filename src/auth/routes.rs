use std::collections::BTreeSet;

use rocket::http::{CookieJar, Status};
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;

use crate::auth::guards::{AuthUser, RequireAdmin};
use crate::auth::principal::NewPrincipal;
use crate::auth::responses::{
    LoginRequest, LoginResponse, MessageResponse, PrincipalSummary, RefreshResponse,
    RegisterRequest, UserInfo, UserResponse,
};
use crate::auth::{AuthError, AuthState};
use crate::error::{ApiResult, ErrorResponse, respond_error, respond_store_error};

/// Exchange a username and password for an access/refresh token pair.
///
/// Both tokens are also set as httpOnly cookies. Nothing is written to the
/// cookie jar unless every check passes.
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    payload: Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let username = payload.username.trim();
    let password = payload.password.as_str();

    if username.is_empty() || password.is_empty() {
        return Err(respond_error(AuthError::Validation(
            "Please enter your username or password.".into(),
        )));
    }

    let principal = state
        .credentials
        .verify(username, password)
        .await
        .map_err(respond_error)?
        .ok_or_else(|| respond_error(AuthError::InvalidCredentials))?;

    if principal.suspended {
        return Err(respond_error(AuthError::AccountSuspended));
    }

    let access = state
        .token_codec
        .issue_access_token(&principal)
        .map_err(respond_error)?;
    let refresh = state
        .token_codec
        .issue_refresh_token(principal.id, principal.token_version)
        .map_err(respond_error)?;

    state.cookies.start_session(cookies, &access, &refresh);
    log::info!("login succeeded for {}", principal.username);

    Ok(Json(LoginResponse {
        message: "Login Successful".into(),
        user_info: UserInfo {
            token: access.token,
            refresh_token: refresh.token,
            id: principal.id.to_string(),
            is_admin: principal.is_admin(),
            username: principal.username.clone(),
            roles: principal.roles().iter().copied().collect(),
        },
    }))
}

/// Mint a new access token from the refresh cookie.
#[openapi(tag = "Auth")]
#[get("/auth/refresh")]
pub async fn refresh(state: &State<AuthState>, cookies: &CookieJar<'_>) -> ApiResult<RefreshResponse> {
    let access = state
        .token_refresh
        .refresh(cookies)
        .await
        .map_err(respond_error)?;

    Ok(Json(RefreshResponse {
        message: "Token refreshed".into(),
        token: access.token,
        expires_at: access.expires_at,
    }))
}

/// Clear both session cookies. Succeeds whether or not a session exists.
#[openapi(tag = "Auth")]
#[post("/auth/logout")]
pub async fn logout(state: &State<AuthState>, cookies: &CookieJar<'_>) -> Json<MessageResponse> {
    state.cookies.end_session(cookies);
    Json(MessageResponse::new("Logged out"))
}

/// Create a principal. Admin only.
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<payload>")]
pub async fn register(
    state: &State<AuthState>,
    admin: RequireAdmin,
    payload: Json<RegisterRequest>,
) -> Result<status::Custom<Json<UserResponse>>, status::Custom<Json<ErrorResponse>>> {
    let payload = payload.into_inner();
    let username = payload.username.trim();

    if username.is_empty() || payload.password.is_empty() || payload.confirm_password.is_empty() {
        return Err(respond_error(AuthError::Validation(
            "Please fill out the required fields!".into(),
        )));
    }
    if payload.roles.is_empty() {
        return Err(respond_error(AuthError::Validation(
            "At least one role is required.".into(),
        )));
    }
    if payload.password != payload.confirm_password {
        return Err(respond_error(AuthError::Validation(
            "Passwords do not match.".into(),
        )));
    }

    let password_hash = state
        .password_service
        .hash_password(&payload.password)
        .map_err(respond_error)?;

    let principal = state
        .store
        .create_principal(NewPrincipal {
            username: username.to_string(),
            password_hash,
            roles: payload.roles.into_iter().collect::<BTreeSet<_>>(),
        })
        .await
        .map_err(respond_store_error)?;

    log::info!(
        "{} registered {} with roles {:?}",
        admin.0.username,
        principal.username,
        principal.roles()
    );

    Ok(status::Custom(
        Status::Created,
        Json(UserResponse {
            message: "Registration successful.".into(),
            user: PrincipalSummary::from(&principal),
        }),
    ))
}

/// The principal behind the presented access token.
#[openapi(tag = "Auth")]
#[get("/auth/me")]
pub async fn me(user: AuthUser) -> Json<UserResponse> {
    Json(UserResponse {
        message: "Authenticated".into(),
        user: PrincipalSummary::from(&user.0),
    })
}
