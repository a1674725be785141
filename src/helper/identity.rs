use crate::models::User;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    /// The provider answered and said no.
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// The provider never answered in time.
    #[error("Identity provider timed out")]
    Timeout,
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

/// The external authority on who a user is and what status their account has.
pub trait IdentityProvider: Send + Sync {
    /// Checks credentials and returns the authoritative user record, whatever its status.
    fn authenticate(&self, identity: &str, secret: &str) -> Result<User, IdentityError>;

    /// Fresh copy of a user by id, used for status checks on a live session.
    fn find_user(&self, user_id: &str) -> Result<Option<User>, IdentityError>;
}
