use crate::helper::audit_log::AuditError;
use crate::helper::session_manager::AuthError;
use crate::helper::user_admin::AdminError;
use crate::helper::workflow::WorkflowError;
use crate::models::db_operations::users_db_operations::UserDbError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub mod activity;
pub mod articles;
pub mod auth;
pub mod users;

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse { success: true, data })
}

/// Every failure a handler can return, mapped onto an HTTP status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Users(#[from] UserDbError),
    #[error("You must be signed in.")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Auth(e) => match e {
                AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::AccountNotActive(_) => StatusCode::FORBIDDEN,
                AuthError::Timeout | AuthError::Provider(_) => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Workflow(e) => match e {
                WorkflowError::NotAuthenticated => StatusCode::UNAUTHORIZED,
                WorkflowError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                WorkflowError::InvalidTransition { .. } => StatusCode::CONFLICT,
                WorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Admin(e) => match e {
                AdminError::NotAuthenticated => StatusCode::UNAUTHORIZED,
                AdminError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                AdminError::NotFound(_) => StatusCode::NOT_FOUND,
                AdminError::InvalidState { .. } => StatusCode::CONFLICT,
                AdminError::Database(_) | AdminError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Audit(e) => match e {
                AuditError::NotAuthenticated => StatusCode::UNAUTHORIZED,
                AuditError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                AuditError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Users(e) => match e {
                UserDbError::DuplicateEmail(_) => StatusCode::CONFLICT,
                UserDbError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self);
            "An internal error occurred.".to_string()
        } else {
            self.to_string()
        };
        let body = match self {
            ApiError::Auth(AuthError::RateLimited { remaining }) => json!({
                "success": false,
                "error": message,
                "retry_after_secs": remaining.num_seconds().max(1),
            }),
            _ => json!({ "success": false, "error": message }),
        };
        HttpResponse::build(status).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArticleStatus, UserStatus};
    use crate::helper::workflow::WorkflowAction;
    use actix_web::body::to_bytes;
    use chrono::Duration;

    #[test]
    fn errors_map_to_status_codes() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (AuthError::RateLimited { remaining: Duration::minutes(30) }.into(), StatusCode::TOO_MANY_REQUESTS),
            (AuthError::InvalidCredentials.into(), StatusCode::UNAUTHORIZED),
            (AuthError::AccountNotActive(UserStatus::Pending).into(), StatusCode::FORBIDDEN),
            (WorkflowError::PermissionDenied("no".into()).into(), StatusCode::FORBIDDEN),
            (
                WorkflowError::InvalidTransition { action: WorkflowAction::Approve, from: ArticleStatus::Draft }.into(),
                StatusCode::CONFLICT,
            ),
            (WorkflowError::Validation("note".into()).into(), StatusCode::UNPROCESSABLE_ENTITY),
            (WorkflowError::NotFound("a1".into()).into(), StatusCode::NOT_FOUND),
            (UserDbError::DuplicateEmail("a@b.c".into()).into(), StatusCode::CONFLICT),
        ];
        for (error, status) in cases {
            assert_eq!(error.status_code(), status, "{}", error);
        }
    }

    #[actix_web::test]
    async fn rate_limited_body_carries_retry_after() {
        let error = ApiError::from(AuthError::RateLimited { remaining: Duration::minutes(30) });
        let body = to_bytes(error.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["retry_after_secs"], 1800);
    }

    #[actix_web::test]
    async fn internal_details_are_not_leaked() {
        let error = ApiError::Internal("disk on fire".to_string());
        let body = to_bytes(error.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "An internal error occurred.");
    }
}
