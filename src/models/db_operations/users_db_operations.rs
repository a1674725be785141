use crate::helper::identity::{IdentityError, IdentityProvider};
use crate::models::db_operations::{parse_column, parse_timestamp};
use crate::models::{Role, User, UserStatus};
use crate::DbPool;
use bcrypt::{hash, verify, BcryptError};
use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UserDbError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Password hashing error: {0}")]
    Bcrypt(#[from] BcryptError),
    #[error("A user with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

const USER_COLUMNS: &str = "id, name, email, role, status, created_at";

// Minimum cost under test.
const HASH_COST: u32 = if cfg!(test) { 4 } else { bcrypt::DEFAULT_COST };

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: parse_column(row, 3)?,
        status: parse_column(row, 4)?,
        created_at: parse_timestamp(row, 5)?,
    })
}

/// Registers a user. Signups arrive as `Pending`; the CLI creates the first admin as `Active`.
pub fn create_user(
    conn: &Connection,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
    status: UserStatus,
) -> Result<User, UserDbError> {
    let name = name.trim();
    let email = normalize_email(email);
    if name.is_empty() {
        return Err(UserDbError::InvalidInput("Name is required.".to_string()));
    }
    if !email_pattern().is_match(&email) {
        return Err(UserDbError::InvalidInput(format!("'{}' is not a valid email address.", email)));
    }
    if password.len() < 8 {
        return Err(UserDbError::InvalidInput("Password must be at least 8 characters.".to_string()));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email,
        role,
        status,
        created_at: Utc::now(),
    };
    let hashed_password = hash(password, HASH_COST)?;
    let inserted = conn.execute(
        "INSERT INTO users (id, name, email, password_hash, role, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.id,
            user.name,
            user.email,
            hashed_password,
            user.role.as_str(),
            user.status.as_str(),
            user.created_at.to_rfc3339()
        ],
    );
    match inserted {
        Ok(_) => Ok(user),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(UserDbError::DuplicateEmail(user.email))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn read_all_users(conn: &Connection) -> Result<Vec<User>, UserDbError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY created_at", USER_COLUMNS))?;
    let users = stmt
        .query_map([], row_to_user)?
        .collect::<rusqlite::Result<Vec<User>>>()?;
    Ok(users)
}

pub fn read_user_by_id(conn: &Connection, user_id: &str) -> Result<Option<User>, UserDbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [user_id],
            row_to_user,
        )
        .optional()?)
}

pub fn read_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, UserDbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            [normalize_email(email)],
            row_to_user,
        )
        .optional()?)
}

/// Returns the user when the password matches, whatever the account status.
/// Deciding what a non-active account may do is the session manager's job.
pub fn verify_credentials(conn: &Connection, email: &str, password: &str) -> Result<Option<User>, UserDbError> {
    let res: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?1",
            [normalize_email(email)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match res {
        Some((user_id, password_hash)) if verify(password, &password_hash).unwrap_or(false) => {
            read_user_by_id(conn, &user_id)
        }
        _ => Ok(None),
    }
}

pub fn update_user_status(conn: &Connection, user_id: &str, status: UserStatus) -> Result<usize, UserDbError> {
    Ok(conn.execute(
        "UPDATE users SET status = ?1 WHERE id = ?2",
        params![status.as_str(), user_id],
    )?)
}

pub fn update_user_role(conn: &Connection, user_id: &str, role: Role) -> Result<usize, UserDbError> {
    Ok(conn.execute(
        "UPDATE users SET role = ?1 WHERE id = ?2",
        params![role.as_str(), user_id],
    )?)
}

pub fn update_password(conn: &Connection, email: &str, new_password: &str) -> Result<usize, UserDbError> {
    let hashed_password = hash(new_password, HASH_COST)?;
    Ok(conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE email = ?2",
        params![hashed_password, normalize_email(email)],
    )?)
}

pub fn update_last_login_time(conn: &Connection, user_id: &str) -> Result<(), UserDbError> {
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE users SET last_login_time = ?1 WHERE id = ?2", params![now, user_id])?;
    Ok(())
}

/// Identity collaborator backed by the SQLite users table.
#[derive(Clone)]
pub struct SqliteIdentityProvider {
    pool: DbPool,
}

impl SqliteIdentityProvider {
    pub fn new(pool: DbPool) -> Self {
        SqliteIdentityProvider { pool }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, IdentityError> {
        self.pool.get().map_err(|e| {
            log::error!("Could not get DB connection from pool for identity lookup: {}", e);
            IdentityError::Unavailable(e.to_string())
        })
    }
}

impl IdentityProvider for SqliteIdentityProvider {
    fn authenticate(&self, identity: &str, secret: &str) -> Result<User, IdentityError> {
        let conn = self.conn()?;
        match verify_credentials(&conn, identity, secret) {
            Ok(Some(user)) => {
                if let Err(e) = update_last_login_time(&conn, &user.id) {
                    log::warn!("Failed to update last login time for {}: {}", user.id, e);
                }
                Ok(user)
            }
            Ok(None) => Err(IdentityError::InvalidCredentials),
            Err(e) => Err(IdentityError::Unavailable(e.to_string())),
        }
    }

    fn find_user(&self, user_id: &str) -> Result<Option<User>, IdentityError> {
        let conn = self.conn()?;
        read_user_by_id(&conn, user_id).map_err(|e| IdentityError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::setup::db_setup;
    use r2d2_sqlite::SqliteConnectionManager;

    /// Single-connection in-memory pool; every connection of a `memory()` manager is its own database.
    pub(crate) fn memory_pool() -> DbPool {
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())
            .unwrap();
        let mut conn = pool.get().unwrap();
        db_setup::setup_users_db(&mut conn).unwrap();
        drop(conn);
        pool
    }

    #[test]
    fn signup_normalizes_email_and_rejects_duplicates() {
        let pool = memory_pool();
        let conn = pool.get().unwrap();
        let user = create_user(&conn, "Ada", "  Ada@Example.COM ", "correct horse", Role::Author, UserStatus::Pending).unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.status, UserStatus::Pending);

        let again = create_user(&conn, "Ada 2", "ada@example.com", "correct horse", Role::Author, UserStatus::Pending);
        assert!(matches!(again, Err(UserDbError::DuplicateEmail(_))));
    }

    #[test]
    fn signup_validates_input() {
        let pool = memory_pool();
        let conn = pool.get().unwrap();
        assert!(matches!(
            create_user(&conn, "Ada", "not-an-email", "correct horse", Role::Author, UserStatus::Pending),
            Err(UserDbError::InvalidInput(_))
        ));
        assert!(matches!(
            create_user(&conn, "Ada", "ada@example.com", "short", Role::Author, UserStatus::Pending),
            Err(UserDbError::InvalidInput(_))
        ));
    }

    #[test]
    fn credentials_are_checked_against_the_hash() {
        let pool = memory_pool();
        let conn = pool.get().unwrap();
        let created = create_user(&conn, "Ada", "ada@example.com", "correct horse", Role::Editor, UserStatus::Active).unwrap();

        let found = verify_credentials(&conn, "ADA@example.com", "correct horse").unwrap();
        assert_eq!(found, Some(created));
        assert_eq!(verify_credentials(&conn, "ada@example.com", "wrong horse").unwrap(), None);
        assert_eq!(verify_credentials(&conn, "nobody@example.com", "correct horse").unwrap(), None);
    }

    #[test]
    fn status_and_role_updates_round_trip() {
        let pool = memory_pool();
        let conn = pool.get().unwrap();
        let user = create_user(&conn, "Ada", "ada@example.com", "correct horse", Role::Author, UserStatus::Pending).unwrap();

        assert_eq!(update_user_status(&conn, &user.id, UserStatus::Active).unwrap(), 1);
        assert_eq!(update_user_role(&conn, &user.id, Role::Journalist).unwrap(), 1);
        let reloaded = read_user_by_id(&conn, &user.id).unwrap().unwrap();
        assert_eq!(reloaded.status, UserStatus::Active);
        assert_eq!(reloaded.role, Role::Journalist);
        assert_eq!(update_user_status(&conn, "missing", UserStatus::Active).unwrap(), 0);
    }

    #[test]
    fn identity_provider_returns_non_active_users_too() {
        let pool = memory_pool();
        {
            let conn = pool.get().unwrap();
            create_user(&conn, "Ada", "ada@example.com", "correct horse", Role::Author, UserStatus::Pending).unwrap();
        }
        let provider = SqliteIdentityProvider::new(pool);
        let user = provider.authenticate("ada@example.com", "correct horse").unwrap();
        assert_eq!(user.status, UserStatus::Pending);
        assert!(matches!(
            provider.authenticate("ada@example.com", "nope"),
            Err(IdentityError::InvalidCredentials)
        ));
        assert_eq!(provider.find_user(&user.id).unwrap().map(|u| u.id), Some(user.id));
    }
}
