use crate::helper::permissions;
use crate::helper::workflow::Transition;
use crate::middleware::ActingSession;
use crate::models::{ArticleChanges, ArticleFilter, ArticleStatus, NewArticle};
use crate::routes::{ok, ApiError};
use crate::AppState;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct ScheduleRequest {
    publish_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RejectRequest {
    #[serde(default)]
    note: String,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: ArticleStatus,
    publish_at: Option<DateTime<Utc>>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/articles")
            .route("", web::get().to(list_articles))
            .route("", web::post().to(create_article))
            .route("/targets", web::get().to(target_statuses))
            .route("/publish-due", web::post().to(publish_due))
            .route("/{id}", web::get().to(get_article))
            .route("/{id}", web::put().to(edit_article))
            .route("/{id}", web::delete().to(delete_article))
            .route("/{id}/status", web::post().to(move_to_status))
            .route("/{id}/submit", web::post().to(submit))
            .route("/{id}/publish", web::post().to(publish))
            .route("/{id}/schedule", web::post().to(schedule))
            .route("/{id}/approve", web::post().to(approve))
            .route("/{id}/reject", web::post().to(reject)),
    );
}

async fn list_articles(
    session: ActingSession,
    state: web::Data<AppState>,
    filter: web::Query<ArticleFilter>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.list(session.confirmed()?, &filter)?))
}

async fn create_article(
    session: ActingSession,
    state: web::Data<AppState>,
    body: web::Json<NewArticle>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.create(session.confirmed()?, body.into_inner())?))
}

async fn target_statuses(session: ActingSession) -> Result<HttpResponse, ApiError> {
    let user = session.user()?;
    Ok(ok(permissions::permitted_target_statuses(user.role)))
}

async fn publish_due(session: ActingSession, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let released = state.workflow.publish_due(session.confirmed()?)?;
    Ok(ok(json!({ "published": released.len(), "articles": released })))
}

async fn get_article(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.get(session.confirmed()?, &id)?))
}

async fn edit_article(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<ArticleChanges>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.edit(session.confirmed()?, &id, body.into_inner())?))
}

async fn delete_article(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    state.workflow.delete(session.confirmed()?, &id)?;
    Ok(ok(json!({ "deleted": id.into_inner() })))
}

async fn move_to_status(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<StatusRequest>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.transition_to(session.confirmed()?, &id, body.status, body.publish_at)?))
}

async fn submit(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.transition(session.confirmed()?, &id, Transition::SubmitForReview)?))
}

async fn publish(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.direct_publish(session.confirmed()?, &id)?))
}

async fn schedule(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<ScheduleRequest>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.schedule(session.confirmed()?, &id, body.publish_at)?))
}

async fn approve(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.approve(session.confirmed()?, &id)?))
}

async fn reject(
    session: ActingSession,
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<RejectRequest>,
) -> Result<HttpResponse, ApiError> {
    Ok(ok(state.workflow.reject(session.confirmed()?, &id, &body.note)?))
}
