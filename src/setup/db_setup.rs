use crate::models::db_operations::articles_db_operations::ARTICLES;
use redb::{CommitError, Database, StorageError, TableError, TransactionError};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
}

/// Users and the activity log share one SQLite file.
pub fn setup_users_db(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;
    println!("- Creating 'users' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin', 'editor', 'journalist', 'author')),
            status TEXT NOT NULL CHECK(status IN ('pending', 'active', 'rejected', 'suspended')),
            created_at TEXT NOT NULL,
            last_login_time TEXT
        )",
        [],
    )?;

    println!("- Creating 'activity_log' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS activity_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            user_name TEXT NOT NULL,
            user_role TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            resource_id TEXT,
            resource_name TEXT,
            details TEXT,
            timestamp TEXT NOT NULL
        )",
        [],
    )?;

    // Entries may be cleared wholesale but never edited.
    println!("- Creating 'activity_log_no_update' trigger...");
    tx.execute(
        "CREATE TRIGGER IF NOT EXISTS activity_log_no_update
         BEFORE UPDATE ON activity_log
         BEGIN
             SELECT RAISE(ABORT, 'activity log entries are immutable');
         END",
        [],
    )?;

    tx.commit()?;
    Ok(())
}

pub fn setup_articles_db(db: &Database) -> Result<(), SetupError> {
    let write_txn = db.begin_write()?;
    {
        println!("- Creating 'articles' table in Redb...");
        write_txn.open_table(ARTICLES)?;
    }
    write_txn.commit()?;
    Ok(())
}
