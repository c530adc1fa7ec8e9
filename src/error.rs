//! JSON error bodies shared by route handlers and catchers.

use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{Request, catch};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::store::StoreError;

pub type ApiResult<T> = Result<Json<T>, status::Custom<Json<ErrorResponse>>>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    /// Stable, client-safe description.
    pub message: String,
    /// Machine-readable error category, e.g. `TOKEN_INVALID`.
    pub code: String,
}

/// A request-guard failure remembered for the catcher that renders it.
#[derive(Debug, Clone)]
pub struct GateRejection {
    pub status: Status,
    pub code: &'static str,
    pub message: String,
}

impl From<&AuthError> for GateRejection {
    fn from(err: &AuthError) -> Self {
        Self {
            status: err.status(),
            code: err.code(),
            message: err.public_message(),
        }
    }
}

pub fn respond_error(err: AuthError) -> status::Custom<Json<ErrorResponse>> {
    log_error(&err);
    let status = err.status();
    status::Custom(
        status,
        Json(ErrorResponse {
            message: err.public_message(),
            code: err.code().to_string(),
        }),
    )
}

/// Store failures a client can act on keep their meaning; the rest become 500s.
pub fn respond_store_error(err: StoreError) -> status::Custom<Json<ErrorResponse>> {
    let err = match err {
        StoreError::NotFound(_) => AuthError::UserNotFound,
        StoreError::Conflict(_) => AuthError::Validation("Username already exists.".into()),
        other => AuthError::Store(other),
    };
    respond_error(err)
}

pub fn log_error(err: &AuthError) {
    if err.is_internal() {
        log::error!("internal error: {}", err);
    } else {
        log::debug!("request rejected: {}", err);
    }
}

#[catch(default)]
pub fn default_catcher(status: Status, request: &Request<'_>) -> status::Custom<Json<ErrorResponse>> {
    if let Some(rejection) = request.local_cache(|| None::<GateRejection>) {
        return status::Custom(
            rejection.status,
            Json(ErrorResponse {
                message: rejection.message.clone(),
                code: rejection.code.to_string(),
            }),
        );
    }

    let (status, code, message) = match status.code {
        400 | 422 => (Status::BadRequest, "VALIDATION_ERROR", "Malformed request."),
        404 => (Status::NotFound, "NOT_FOUND", "Resource not found"),
        401 => (Status::Unauthorized, "UNAUTHORIZED", "Unauthorized"),
        403 => (Status::Forbidden, "FORBIDDEN", "Forbidden"),
        code if code >= 500 => (status, "INTERNAL", "Something went wrong!"),
        _ => (status, "ERROR", status.reason().unwrap_or("Error")),
    };

    status::Custom(
        status,
        Json(ErrorResponse {
            message: message.to_string(),
            code: code.to_string(),
        }),
    )
}
