//! User management endpoints for administrators and moderators.

use std::collections::BTreeSet;

use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::principal::{Principal, Role};
use crate::auth::responses::{MessageResponse, PrincipalSummary, UserListResponse, UserResponse};
use crate::auth::{AuthError, AuthState, RequireAdmin, RequireStaff};
use crate::error::{ApiResult, respond_error, respond_store_error};

/// The three kinds of account change, selected by `type`.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateUserRequest {
    /// Rename the account. Requires its current credentials.
    Username {
        username: String,
        password: String,
        #[serde(rename = "newUsername")]
        new_username: String,
    },
    /// Change the password. Requires the current one.
    Password {
        username: String,
        #[serde(rename = "currentPassword")]
        current_password: String,
        #[serde(rename = "newPassword")]
        new_password: String,
        #[serde(rename = "confirmPassword")]
        confirm_password: String,
    },
    /// Replace the role set. Admin only.
    Role {
        #[serde(rename = "newRole")]
        new_role: Vec<Role>,
    },
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UpdateUserResponse {
    pub message: String,
    /// Present when the change leaves a principal worth returning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PrincipalSummary>,
}

fn parse_user_id(id: &str) -> Result<Uuid, AuthError> {
    Uuid::parse_str(id).map_err(|_| AuthError::Validation("Invalid user id.".into()))
}

async fn load_principal(state: &AuthState, id: Uuid) -> Result<Principal, AuthError> {
    state
        .store
        .find_principal_by_id(id)
        .await?
        .ok_or(AuthError::UserNotFound)
}

/// List active (`status=all`, the default) or suspended accounts.
#[openapi(tag = "Users")]
#[get("/users?<status>")]
pub async fn list_users(
    state: &State<AuthState>,
    _admin: RequireAdmin,
    status: Option<String>,
) -> ApiResult<UserListResponse> {
    let (suspended, message) = match status.as_deref().unwrap_or("all") {
        "all" | "active" => (false, "All users"),
        "suspended" => (true, "Suspended users"),
        _ => {
            return Err(respond_error(AuthError::Validation(
                "Invalid query type".into(),
            )));
        }
    };

    let users: Vec<PrincipalSummary> = state
        .store
        .list_principals(suspended)
        .await
        .map_err(respond_store_error)?
        .iter()
        .map(PrincipalSummary::from)
        .collect();

    Ok(Json(UserListResponse {
        message: message.into(),
        count: users.len(),
        users,
    }))
}

#[openapi(tag = "Users")]
#[get("/users/<id>")]
pub async fn get_user(
    state: &State<AuthState>,
    _staff: RequireStaff,
    id: &str,
) -> ApiResult<UserResponse> {
    let id = parse_user_id(id).map_err(respond_error)?;
    let principal = load_principal(state, id).await.map_err(respond_error)?;

    Ok(Json(UserResponse {
        message: "User found".into(),
        user: PrincipalSummary::from(&principal),
    }))
}

/// Apply one account change. Changing your own username or password ends
/// your session.
#[openapi(tag = "Users")]
#[put("/users/<id>", data = "<payload>")]
pub async fn update_user(
    state: &State<AuthState>,
    caller: RequireStaff,
    cookies: &CookieJar<'_>,
    id: &str,
    payload: Json<UpdateUserRequest>,
) -> ApiResult<UpdateUserResponse> {
    let id = parse_user_id(id).map_err(respond_error)?;
    let target = load_principal(state, id).await.map_err(respond_error)?;
    let is_self = caller.0.id == target.id;

    match payload.into_inner() {
        UpdateUserRequest::Username {
            username,
            password,
            new_username,
        } => {
            let new_username = new_username.trim();
            if new_username.is_empty() {
                return Err(respond_error(AuthError::Validation(
                    "New username is required.".into(),
                )));
            }
            confirm_credentials(state, &target, &username, &password)
                .await
                .map_err(respond_error)?;

            state
                .store
                .update_username(target.id, new_username)
                .await
                .map_err(respond_store_error)?;
            log::info!(
                "{} renamed {} to {}",
                caller.0.username,
                target.username,
                new_username
            );

            if is_self {
                state.cookies.end_session(cookies);
            }
            Ok(Json(UpdateUserResponse {
                message: "Username updated successfully.".into(),
                user: None,
            }))
        }
        UpdateUserRequest::Password {
            username,
            current_password,
            new_password,
            confirm_password,
        } => {
            if new_password.is_empty() {
                return Err(respond_error(AuthError::Validation(
                    "New password is required.".into(),
                )));
            }
            if new_password != confirm_password {
                return Err(respond_error(AuthError::Validation(
                    "Passwords do not match.".into(),
                )));
            }
            confirm_credentials(state, &target, &username, &current_password)
                .await
                .map_err(respond_error)?;

            let password_hash = state
                .password_service
                .hash_password(&new_password)
                .map_err(respond_error)?;
            state
                .store
                .update_password_hash(target.id, &password_hash)
                .await
                .map_err(respond_store_error)?;
            log::info!("{} changed the password of {}", caller.0.username, target.username);

            if is_self {
                state.cookies.end_session(cookies);
            }
            Ok(Json(UpdateUserResponse {
                message: "Password updated successfully.".into(),
                user: None,
            }))
        }
        UpdateUserRequest::Role { new_role } => {
            if !caller.0.is_admin() {
                return Err(respond_error(AuthError::Forbidden));
            }
            let roles: BTreeSet<Role> = new_role.into_iter().collect();
            if roles.is_empty() {
                return Err(respond_error(AuthError::Validation(
                    "At least one role is required.".into(),
                )));
            }

            let updated = state
                .store
                .replace_roles(target.id, roles)
                .await
                .map_err(respond_store_error)?;
            log::info!(
                "{} set roles of {} to {:?}",
                caller.0.username,
                updated.username,
                updated.roles()
            );

            Ok(Json(UpdateUserResponse {
                message: "User roles updated successfully.".into(),
                user: Some(PrincipalSummary::from(&updated)),
            }))
        }
    }
}

/// Re-checks the target's current username and password.
async fn confirm_credentials(
    state: &AuthState,
    target: &Principal,
    username: &str,
    password: &str,
) -> Result<(), AuthError> {
    match state.credentials.verify(username.trim(), password).await? {
        Some(principal) if principal.id == target.id => Ok(()),
        _ => Err(AuthError::InvalidCredentials),
    }
}

#[openapi(tag = "Users")]
#[post("/users/<id>/suspend")]
pub async fn suspend_user(
    state: &State<AuthState>,
    admin: RequireAdmin,
    id: &str,
) -> ApiResult<MessageResponse> {
    let id = parse_user_id(id).map_err(respond_error)?;
    state
        .store
        .set_suspended(id, true)
        .await
        .map_err(respond_store_error)?;
    log::info!("{} suspended {}", admin.0.username, id);

    Ok(Json(MessageResponse::new("Account suspended successfully")))
}

#[openapi(tag = "Users")]
#[delete("/users/<id>")]
pub async fn delete_user(
    state: &State<AuthState>,
    admin: RequireAdmin,
    id: &str,
) -> ApiResult<MessageResponse> {
    let id = parse_user_id(id).map_err(respond_error)?;
    state
        .store
        .delete_principal(id)
        .await
        .map_err(respond_store_error)?;
    log::info!("{} deleted {}", admin.0.username, id);

    Ok(Json(MessageResponse::new("Account deleted successfully")))
}
