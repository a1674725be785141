//! Article lifecycle.
//!
//! Every operation follows the same order: resolve the acting user from the
//! session, reload the article, check the capability (or ownership), check the
//! source status, validate input, then save and write exactly one audit entry.
//! Anything that fails before the save leaves the article untouched and the
//! audit log silent.

use crate::helper::audit_log::{AuditDetails, AuditLog};
use crate::helper::clock::Clock;
use crate::helper::permissions::{self, Capability};
use crate::helper::session_manager::SessionManager;
use crate::models::db_operations::articles_db_operations::ArticleStore;
use crate::models::db_operations::StoreError;
use crate::models::{
    ActivityAction, ActivityResource, Article, ArticleChanges, ArticleFilter, ArticleStatus, NewArticle, User,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Create,
    SubmitForReview,
    DirectPublish,
    Schedule,
    Approve,
    Reject,
    Edit,
    Delete,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Create => "create",
            WorkflowAction::SubmitForReview => "submit for review",
            WorkflowAction::DirectPublish => "publish",
            WorkflowAction::Schedule => "schedule",
            WorkflowAction::Approve => "approve",
            WorkflowAction::Reject => "reject",
            WorkflowAction::Edit => "edit",
            WorkflowAction::Delete => "delete",
        }
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("You must be signed in.")]
    NotAuthenticated,
    #[error("{0}")]
    PermissionDenied(String),
    #[error("Cannot {action} an article that is {from}.")]
    InvalidTransition { action: WorkflowAction, from: ArticleStatus },
    #[error("{0}")]
    Validation(String),
    #[error("Article {0} was not found.")]
    NotFound(String),
    #[error("Article storage error: {0}")]
    Storage(#[from] StoreError),
}

/// A status change on an existing article, with whatever input it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    SubmitForReview,
    DirectPublish,
    Schedule { at: DateTime<Utc> },
    Approve,
    Reject { note: String },
}

impl Transition {
    pub fn action(&self) -> WorkflowAction {
        match self {
            Transition::SubmitForReview => WorkflowAction::SubmitForReview,
            Transition::DirectPublish => WorkflowAction::DirectPublish,
            Transition::Schedule { .. } => WorkflowAction::Schedule,
            Transition::Approve => WorkflowAction::Approve,
            Transition::Reject { .. } => WorkflowAction::Reject,
        }
    }

    fn allowed_sources(&self) -> &'static [ArticleStatus] {
        match self {
            Transition::SubmitForReview => &[ArticleStatus::Draft, ArticleStatus::Rejected],
            Transition::DirectPublish => &[ArticleStatus::Draft, ArticleStatus::PendingReview],
            Transition::Schedule { .. } => &[ArticleStatus::Draft],
            Transition::Approve | Transition::Reject { .. } => &[ArticleStatus::PendingReview],
        }
    }

    fn audit_action(&self) -> ActivityAction {
        match self {
            Transition::SubmitForReview => ActivityAction::Submit,
            Transition::DirectPublish => ActivityAction::Publish,
            Transition::Schedule { .. } => ActivityAction::Update,
            Transition::Approve => ActivityAction::Approve,
            Transition::Reject { .. } => ActivityAction::Reject,
        }
    }
}

fn require(actor: &User, capability: Capability, what: &str) -> Result<(), WorkflowError> {
    if permissions::has_permission(actor.role, capability) {
        Ok(())
    } else {
        Err(WorkflowError::PermissionDenied(format!("You do not have permission to {}.", what)))
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub struct WorkflowEngine {
    store: Arc<dyn ArticleStore>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn ArticleStore>, audit: Arc<AuditLog>, clock: Arc<dyn Clock>) -> Self {
        WorkflowEngine { store, audit, clock }
    }

    fn actor(session: &SessionManager) -> Result<&User, WorkflowError> {
        session.current_user().ok_or(WorkflowError::NotAuthenticated)
    }

    fn load(&self, id: &str) -> Result<Article, WorkflowError> {
        self.store.load(id)?.ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    fn audit(&self, session: &SessionManager, action: ActivityAction, article: &Article, details: Option<String>) {
        let mut entry = AuditDetails::resource(&article.id, &article.title);
        entry.details = details;
        self.audit.record(session, action, ActivityResource::Article, entry);
    }

    fn refused<T>(action: WorkflowAction, id: &str, result: Result<T, WorkflowError>) -> Result<T, WorkflowError> {
        if let Err(e) = &result {
            log::debug!("Refused {} on article {}: {}", action, id, e);
        }
        result
    }

    pub fn get(&self, session: &SessionManager, id: &str) -> Result<Article, WorkflowError> {
        Self::actor(session)?;
        self.load(id)
    }

    pub fn list(&self, session: &SessionManager, filter: &ArticleFilter) -> Result<Vec<Article>, WorkflowError> {
        Self::actor(session)?;
        Ok(self.store.list(filter)?)
    }

    /// New draft owned by the acting user.
    pub fn create(&self, session: &SessionManager, input: NewArticle) -> Result<Article, WorkflowError> {
        let actor = Self::actor(session)?;
        let title = non_empty(&input.title)
            .ok_or_else(|| WorkflowError::Validation("An article needs a title.".to_string()))?;
        let now = self.clock.now();
        let article = Article {
            id: Uuid::new_v4().to_string(),
            author_id: actor.id.clone(),
            title,
            body: input.body,
            status: ArticleStatus::Draft,
            submitted_by: None,
            reviewed_by: None,
            review_note: None,
            is_breaking: false,
            is_featured: false,
            created_at: now,
            updated_at: now,
            published_at: None,
        };
        self.store.save(&article)?;
        self.audit(session, ActivityAction::Create, &article, None);
        Ok(article)
    }

    pub fn submit_for_review(&self, session: &SessionManager, id: &str) -> Result<Article, WorkflowError> {
        self.transition(session, id, Transition::SubmitForReview)
    }

    pub fn direct_publish(&self, session: &SessionManager, id: &str) -> Result<Article, WorkflowError> {
        self.transition(session, id, Transition::DirectPublish)
    }

    pub fn schedule(&self, session: &SessionManager, id: &str, at: DateTime<Utc>) -> Result<Article, WorkflowError> {
        self.transition(session, id, Transition::Schedule { at })
    }

    pub fn approve(&self, session: &SessionManager, id: &str) -> Result<Article, WorkflowError> {
        self.transition(session, id, Transition::Approve)
    }

    pub fn reject(&self, session: &SessionManager, id: &str, note: &str) -> Result<Article, WorkflowError> {
        self.transition(session, id, Transition::Reject { note: note.to_string() })
    }

    pub fn transition(&self, session: &SessionManager, id: &str, transition: Transition) -> Result<Article, WorkflowError> {
        let action = transition.action();
        Self::refused(action, id, self.apply(session, id, transition))
    }

    fn apply(&self, session: &SessionManager, id: &str, transition: Transition) -> Result<Article, WorkflowError> {
        let actor = Self::actor(session)?;
        let mut article = self.load(id)?;
        let now = self.clock.now();

        match &transition {
            Transition::SubmitForReview => {
                if !article.is_owned_by(&actor.id) && !permissions::has_permission(actor.role, Capability::EditAllArticles) {
                    return Err(WorkflowError::PermissionDenied(
                        "You can only submit your own articles for review.".to_string(),
                    ));
                }
            }
            Transition::DirectPublish | Transition::Schedule { .. } => {
                require(actor, Capability::PublishArticles, "publish articles")?;
            }
            Transition::Approve | Transition::Reject { .. } => {
                require(actor, Capability::ReviewArticles, "review articles")?;
            }
        }

        if !transition.allowed_sources().contains(&article.status) {
            return Err(WorkflowError::InvalidTransition {
                action: transition.action(),
                from: article.status,
            });
        }

        let mut details = None;
        match &transition {
            Transition::SubmitForReview => {
                article.status = ArticleStatus::PendingReview;
                if actor.id != article.author_id {
                    article.submitted_by = Some(actor.id.clone());
                }
            }
            Transition::DirectPublish => {
                article.status = ArticleStatus::Published;
                article.published_at = Some(now);
            }
            Transition::Schedule { at } => {
                if *at <= now {
                    return Err(WorkflowError::Validation("The scheduled time must be in the future.".to_string()));
                }
                article.status = ArticleStatus::Scheduled;
                article.published_at = Some(*at);
                details = Some(format!("Scheduled for {}", at.to_rfc3339()));
            }
            Transition::Approve => {
                article.status = ArticleStatus::Published;
                article.published_at = Some(now);
                article.reviewed_by = Some(actor.id.clone());
            }
            Transition::Reject { note } => {
                let note = non_empty(note)
                    .ok_or_else(|| WorkflowError::Validation("Rejection requires a review note.".to_string()))?;
                article.status = ArticleStatus::Rejected;
                article.reviewed_by = Some(actor.id.clone());
                details = Some(note.clone());
                article.review_note = Some(note);
            }
        }
        article.updated_at = now;

        self.store.save(&article)?;
        self.audit(session, transition.audit_action(), &article, details);
        Ok(article)
    }

    /// Runs the action that moves an article to `target`. Targets the role is
    /// never offered are refused before anything is loaded.
    pub fn transition_to(
        &self,
        session: &SessionManager,
        id: &str,
        target: ArticleStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Article, WorkflowError> {
        let actor = Self::actor(session)?;
        if !permissions::permitted_target_statuses(actor.role).contains(&target) {
            return Err(WorkflowError::PermissionDenied(format!(
                "Your role cannot move articles to {}.",
                target
            )));
        }
        let transition = match target {
            ArticleStatus::PendingReview => Transition::SubmitForReview,
            ArticleStatus::Published => Transition::DirectPublish,
            ArticleStatus::Scheduled => Transition::Schedule {
                at: scheduled_at
                    .ok_or_else(|| WorkflowError::Validation("A scheduled time is required.".to_string()))?,
            },
            ArticleStatus::Draft | ArticleStatus::Rejected => {
                return Err(WorkflowError::Validation(format!("Articles cannot be moved to {}.", target)));
            }
        };
        self.transition(session, id, transition)
    }

    /// Content and flag changes. Status never changes here.
    pub fn edit(&self, session: &SessionManager, id: &str, changes: ArticleChanges) -> Result<Article, WorkflowError> {
        Self::refused(WorkflowAction::Edit, id, self.apply_edit(session, id, changes))
    }

    fn apply_edit(&self, session: &SessionManager, id: &str, changes: ArticleChanges) -> Result<Article, WorkflowError> {
        let actor = Self::actor(session)?;
        let mut article = self.load(id)?;

        let edits_all = permissions::has_permission(actor.role, Capability::EditAllArticles);
        if !edits_all {
            if !article.is_owned_by(&actor.id) {
                return Err(WorkflowError::PermissionDenied("You can only edit your own articles.".to_string()));
            }
            if article.status == ArticleStatus::Published {
                return Err(WorkflowError::PermissionDenied(
                    "Published articles can only be edited by editors.".to_string(),
                ));
            }
        }

        let mut changed = Vec::new();
        if let Some(breaking) = changes.is_breaking.filter(|b| *b != article.is_breaking) {
            require(actor, Capability::SetBreakingNews, "mark breaking news")?;
            article.is_breaking = breaking;
            changed.push("breaking");
        }
        if let Some(featured) = changes.is_featured.filter(|f| *f != article.is_featured) {
            require(actor, Capability::SetFeatured, "feature articles")?;
            article.is_featured = featured;
            changed.push("featured");
        }
        if let Some(title) = changes.title {
            article.title =
                non_empty(&title).ok_or_else(|| WorkflowError::Validation("An article needs a title.".to_string()))?;
            changed.push("title");
        }
        if let Some(body) = changes.body {
            article.body = body;
            changed.push("body");
        }
        article.updated_at = self.clock.now();

        self.store.save(&article)?;
        let details = (!changed.is_empty()).then(|| format!("Changed {}", changed.join(", ")));
        self.audit(session, ActivityAction::Update, &article, details);
        Ok(article)
    }

    pub fn delete(&self, session: &SessionManager, id: &str) -> Result<(), WorkflowError> {
        Self::refused(WorkflowAction::Delete, id, self.apply_delete(session, id))
    }

    fn apply_delete(&self, session: &SessionManager, id: &str) -> Result<(), WorkflowError> {
        let actor = Self::actor(session)?;
        let article = self.load(id)?;
        if !article.is_owned_by(&actor.id) && !permissions::has_permission(actor.role, Capability::DeleteAllArticles) {
            return Err(WorkflowError::PermissionDenied("You can only delete your own articles.".to_string()));
        }
        if !self.store.delete(id)? {
            return Err(WorkflowError::NotFound(id.to_string()));
        }
        self.audit(session, ActivityAction::Delete, &article, None);
        Ok(())
    }

    /// Publishes every scheduled article whose release time has passed.
    pub fn publish_due(&self, session: &SessionManager) -> Result<Vec<Article>, WorkflowError> {
        let actor = Self::actor(session)?;
        require(actor, Capability::PublishArticles, "publish articles")?;
        let now = self.clock.now();
        let filter = ArticleFilter {
            status: Some(ArticleStatus::Scheduled),
            author_id: None,
        };

        let mut released = Vec::new();
        for mut article in self.store.list(&filter)? {
            if article.published_at.map_or(true, |at| at > now) {
                continue;
            }
            article.status = ArticleStatus::Published;
            article.updated_at = now;
            self.store.save(&article)?;
            self.audit(session, ActivityAction::Publish, &article, Some("Scheduled release".to_string()));
            released.push(article);
        }
        if !released.is_empty() {
            log::info!("Released {} scheduled article(s).", released.len());
        }
        Ok(released)
    }
}
