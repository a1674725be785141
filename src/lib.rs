use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use redb::Database;

use crate::helper::audit_log::AuditLog;
use crate::helper::clock::Clock;
use crate::helper::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::helper::session_manager::{AuthServices, SessionPolicy};
use crate::helper::user_admin::UserAdmin;
use crate::helper::workflow::WorkflowEngine;
use crate::models::db_operations::articles_db_operations::{ArticleEvent, NotifyingArticleStore, RedbArticleStore};
use crate::models::db_operations::audit_db_operations::SqliteAuditStore;
use crate::models::db_operations::users_db_operations::SqliteIdentityProvider;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Everything a request handler needs, shared across workers.
pub struct AppState {
    pub pool: DbPool,
    pub auth: AuthServices,
    pub audit: Arc<AuditLog>,
    pub workflow: WorkflowEngine,
    pub user_admin: UserAdmin,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        articles_db: Arc<Database>,
        rate_limit: RateLimitConfig,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let articles = NotifyingArticleStore::new(RedbArticleStore::new(articles_db));
        articles.subscribe(Box::new(|event: &ArticleEvent| match event {
            ArticleEvent::Saved { id, status } => log::debug!("Article {} saved as {}.", id, status),
            ArticleEvent::Deleted { id } => log::debug!("Article {} deleted.", id),
        }));

        let audit = Arc::new(AuditLog::new(Arc::new(SqliteAuditStore::new(pool.clone())), clock.clone()));
        let auth = AuthServices::new(
            Arc::new(RateLimiter::new(rate_limit, clock.clone())),
            Arc::new(SqliteIdentityProvider::new(pool.clone())),
            policy,
            clock.clone(),
        );

        AppState {
            workflow: WorkflowEngine::new(Arc::new(articles), audit.clone(), clock),
            user_admin: UserAdmin::new(pool.clone(), audit.clone()),
            pool,
            auth,
            audit,
        }
    }
}

pub mod config;
pub mod helper;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod setup;
