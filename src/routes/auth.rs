use crate::helper::audit_log::AuditDetails;
use crate::helper::permissions;
use crate::middleware::ActingSession;
use crate::models::db_operations::users_db_operations;
use crate::models::{ActivityAction, ActivityResource, Role, UserStatus};
use crate::routes::{ok, ApiError};
use crate::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
    #[serde(default)]
    remember: bool,
}

#[derive(Deserialize)]
struct SignupRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct AccessQuery {
    path: String,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/me", web::get().to(me))
            .route("/signup", web::post().to(signup))
            .route("/access", web::get().to(access)),
    );
}

async fn login(
    mut session: ActingSession,
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = session.login(&body.email, &body.password, body.remember)?;
    state.audit.record(
        &session,
        ActivityAction::Login,
        ActivityResource::User,
        AuditDetails::resource(&user.id, &user.name),
    );
    Ok(ok(user))
}

async fn logout(mut session: ActingSession) -> HttpResponse {
    session.logout();
    ok(json!({ "signed_out": true }))
}

async fn me(session: ActingSession) -> Result<HttpResponse, ApiError> {
    let user = session.user()?;
    Ok(ok(json!({
        "user": user,
        "capabilities": permissions::capabilities_for(user.role),
        "target_statuses": permissions::permitted_target_statuses(user.role),
    })))
}

/// New accounts wait as pending authors until an admin approves them.
async fn signup(state: web::Data<AppState>, body: web::Json<SignupRequest>) -> Result<HttpResponse, ApiError> {
    let conn = state.pool.get().map_err(|e| ApiError::Internal(e.to_string()))?;
    let user = users_db_operations::create_user(
        &conn,
        &body.name,
        &body.email,
        &body.password,
        Role::Author,
        UserStatus::Pending,
    )?;
    log::info!("New signup {} awaiting approval.", user.id);
    Ok(ok(user))
}

async fn access(session: ActingSession, query: web::Query<AccessQuery>) -> Result<HttpResponse, ApiError> {
    let user = session.user()?;
    Ok(ok(json!({
        "path": query.path,
        "allowed": permissions::can_access_path(user.role, &query.path),
    })))
}
