use crate::helper::audit_log::{AuditDetails, AuditLog};
use crate::helper::permissions::{self, Capability};
use crate::helper::session_manager::SessionManager;
use crate::models::db_operations::users_db_operations::{self, UserDbError};
use crate::models::{ActivityAction, ActivityResource, Role, User, UserStatus};
use crate::DbPool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("You must be signed in.")]
    NotAuthenticated,
    #[error("{0}")]
    PermissionDenied(String),
    #[error("User {0} was not found.")]
    NotFound(String),
    #[error("Cannot {action} a user who is {status}.")]
    InvalidState { action: &'static str, status: UserStatus },
    #[error("User database error: {0}")]
    Database(#[from] UserDbError),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Account approval, suspension and role changes. All of it needs `manageUsers`.
///
/// A rejected account is kept, not deleted: its email stays taken and an admin
/// can still approve it later.
pub struct UserAdmin {
    pool: DbPool,
    audit: Arc<AuditLog>,
}

impl UserAdmin {
    pub fn new(pool: DbPool, audit: Arc<AuditLog>) -> Self {
        UserAdmin { pool, audit }
    }

    fn admin(session: &SessionManager) -> Result<&User, AdminError> {
        let actor = session.current_user().ok_or(AdminError::NotAuthenticated)?;
        if !permissions::has_permission(actor.role, Capability::ManageUsers) {
            return Err(AdminError::PermissionDenied("You do not have permission to manage users.".to_string()));
        }
        Ok(actor)
    }

    fn load(&self, user_id: &str) -> Result<User, AdminError> {
        let conn = self.pool.get()?;
        users_db_operations::read_user_by_id(&conn, user_id)?.ok_or_else(|| AdminError::NotFound(user_id.to_string()))
    }

    pub fn list_users(&self, session: &SessionManager) -> Result<Vec<User>, AdminError> {
        Self::admin(session)?;
        let conn = self.pool.get()?;
        Ok(users_db_operations::read_all_users(&conn)?)
    }

    pub fn approve(&self, session: &SessionManager, user_id: &str) -> Result<User, AdminError> {
        self.set_status(
            session,
            user_id,
            "approve",
            &[UserStatus::Pending, UserStatus::Rejected],
            UserStatus::Active,
            ActivityAction::Approve,
        )
    }

    pub fn reject(&self, session: &SessionManager, user_id: &str) -> Result<User, AdminError> {
        self.set_status(session, user_id, "reject", &[UserStatus::Pending], UserStatus::Rejected, ActivityAction::Reject)
    }

    pub fn suspend(&self, session: &SessionManager, user_id: &str) -> Result<User, AdminError> {
        self.set_status(session, user_id, "suspend", &[UserStatus::Active], UserStatus::Suspended, ActivityAction::Update)
    }

    pub fn reactivate(&self, session: &SessionManager, user_id: &str) -> Result<User, AdminError> {
        self.set_status(session, user_id, "reactivate", &[UserStatus::Suspended], UserStatus::Active, ActivityAction::Update)
    }

    fn set_status(
        &self,
        session: &SessionManager,
        user_id: &str,
        action: &'static str,
        from: &[UserStatus],
        to: UserStatus,
        audit_action: ActivityAction,
    ) -> Result<User, AdminError> {
        let actor = Self::admin(session)?;
        if actor.id == user_id {
            return Err(AdminError::PermissionDenied(format!("You cannot {} your own account.", action)));
        }
        let mut user = self.load(user_id)?;
        if !from.contains(&user.status) {
            return Err(AdminError::InvalidState { action, status: user.status });
        }

        {
            let conn = self.pool.get()?;
            users_db_operations::update_user_status(&conn, user_id, to)?;
        }
        let details = format!("Status {} -> {}", user.status, to);
        log::info!("User {}: {} (by {}).", user.id, details, actor.id);
        user.status = to;
        self.audit.record(
            session,
            audit_action,
            ActivityResource::User,
            AuditDetails::resource(&user.id, &user.name).with_details(details),
        );
        Ok(user)
    }

    pub fn change_role(&self, session: &SessionManager, user_id: &str, role: Role) -> Result<User, AdminError> {
        let actor = Self::admin(session)?;
        if actor.id == user_id {
            return Err(AdminError::PermissionDenied("You cannot change your own role.".to_string()));
        }
        let mut user = self.load(user_id)?;
        if user.role == role {
            return Ok(user);
        }

        {
            let conn = self.pool.get()?;
            users_db_operations::update_user_role(&conn, user_id, role)?;
        }
        let details = format!("Role {} -> {}", user.role, role);
        user.role = role;
        log::info!("User {} is now {} (changed by {}).", user.id, role, actor.id);
        self.audit.record(
            session,
            ActivityAction::Update,
            ActivityResource::User,
            AuditDetails::resource(&user.id, &user.name).with_details(details),
        );
        Ok(user)
    }
}
