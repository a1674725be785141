use crate::middleware::ActingSession;
use crate::models::Role;
use crate::routes::{ok, ApiError};
use crate::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

#[derive(Deserialize)]
struct RoleRequest {
    role: Role,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/users")
            .route("", web::get().to(list_users))
            .route("/{id}/approve", web::post().to(approve_user))
            .route("/{id}/reject", web::post().to(reject_user))
            .route("/{id}/suspend", web::post().to(suspend_user))
            .route("/{id}/reactivate", web::post().to(reactivate_user))
            .route("/{id}/role", web::post().to(change_role)),
    );
}

async fn list_users(session: ActingSession, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.user_admin.list_users(session.confirmed()?)?))
}

async fn approve_user(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.user_admin.approve(session.confirmed()?, &id)?))
}

async fn reject_user(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.user_admin.reject(session.confirmed()?, &id)?))
}

async fn suspend_user(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.user_admin.suspend(session.confirmed()?, &id)?))
}

async fn reactivate_user(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.user_admin.reactivate(session.confirmed()?, &id)?))
}

async fn change_role(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<RoleRequest>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.user_admin.change_role(session.confirmed()?, &id, body.role)?))
}
