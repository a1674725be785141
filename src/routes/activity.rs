use crate::helper::audit_log::{self, AuditQuery};
use crate::helper::permissions::{self, Capability};
use crate::middleware::ActingSession;
use crate::routes::{ok, ApiError};
use crate::AppState;
use actix_web::{http::header, web, HttpResponse};
use serde_json::json;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/activity")
            .route("", web::get().to(list_activity))
            .route("/stats", web::get().to(activity_stats))
            .route("/export", web::get().to(export_activity))
            .route("/clear", web::post().to(clear_activity)),
    );
}

/// Reading the log is part of the full dashboard.
fn require_dashboard(session: &ActingSession) -> Result<(), ApiError> {
    let user = session.user()?;
    if permissions::has_permission(user.role, Capability::ViewFullDashboard) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("You do not have permission to view the activity log.".to_string()))
    }
}

async fn list_activity(
    session: ActingSession,
    state: web::Data<AppState>,
    query: web::Query<AuditQuery>,
) -> Result<HttpResponse, ApiError> {
    require_dashboard(&session)?;
    Ok(ok(state.audit.query(&query)?))
}

async fn activity_stats(session: ActingSession, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_dashboard(&session)?;
    Ok(ok(state.audit.stats()?))
}

async fn export_activity(
    session: ActingSession,
    state: web::Data<AppState>,
    query: web::Query<AuditQuery>,
) -> Result<HttpResponse, ApiError> {
    require_dashboard(&session)?;
    let entries = state.audit.query(&query)?;
    let filename = format!("activity-log-{}.csv", chrono::Local::now().format("%Y-%m-%d"));
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)))
        .body(audit_log::export_csv(&entries)))
}

async fn clear_activity(session: ActingSession, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let removed = state.audit.clear(session.confirmed()?)?;
    Ok(ok(json!({ "removed": removed })))
}
