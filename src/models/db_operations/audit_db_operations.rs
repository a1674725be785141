use crate::models::db_operations::{parse_column, parse_timestamp, StoreError};
use crate::models::ActivityLogEntry;
use crate::DbPool;
use rusqlite::{params, Connection, Row};
use std::sync::{Mutex, MutexGuard};

/// Where activity log entries are kept. Entries are never updated.
pub trait AuditStore: Send + Sync {
    fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError>;

    /// All entries, most recent first.
    fn list(&self) -> Result<Vec<ActivityLogEntry>, StoreError>;

    fn clear(&self) -> Result<usize, StoreError>;
}

fn row_to_entry(row: &Row) -> rusqlite::Result<ActivityLogEntry> {
    Ok(ActivityLogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        user_role: parse_column(row, 3)?,
        action: parse_column(row, 4)?,
        resource: parse_column(row, 5)?,
        resource_id: row.get(6)?,
        resource_name: row.get(7)?,
        details: row.get(8)?,
        timestamp: parse_timestamp(row, 9)?,
    })
}

pub fn insert_entry(conn: &Connection, entry: &ActivityLogEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO activity_log (id, user_id, user_name, user_role, action, resource, resource_id, resource_name, details, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.id,
            entry.user_id,
            entry.user_name,
            entry.user_role.as_str(),
            entry.action.as_str(),
            entry.resource.as_str(),
            entry.resource_id,
            entry.resource_name,
            entry.details,
            entry.timestamp.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn read_all_entries(conn: &Connection) -> Result<Vec<ActivityLogEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, user_name, user_role, action, resource, resource_id, resource_name, details, timestamp
         FROM activity_log ORDER BY seq DESC",
    )?;
    let entries = stmt
        .query_map([], row_to_entry)?
        .collect::<rusqlite::Result<Vec<ActivityLogEntry>>>()?;
    Ok(entries)
}

pub fn delete_all_entries(conn: &Connection) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM activity_log", [])?)
}

/// Activity log kept in the users SQLite database.
#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: DbPool,
}

impl SqliteAuditStore {
    pub fn new(pool: DbPool) -> Self {
        SqliteAuditStore { pool }
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        insert_entry(&conn, entry)
    }

    fn list(&self) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let conn = self.pool.get()?;
        read_all_entries(&conn)
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        delete_all_entries(&conn)
    }
}

/// Process-local activity log.
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<ActivityLogEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ActivityLogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            log::error!("Audit store lock was poisoned! Recovering lock.");
            poisoned.into_inner()
        })
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        self.lock().insert(0, entry.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<ActivityLogEntry>, StoreError> {
        Ok(self.lock().clone())
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::users_db_operations::tests::memory_pool;
    use crate::models::{ActivityAction, ActivityResource, Role};
    use chrono::{DateTime, Duration, Utc};

    fn entry(id: &str, action: ActivityAction, at: DateTime<Utc>) -> ActivityLogEntry {
        ActivityLogEntry {
            id: id.to_string(),
            user_id: "u1".to_string(),
            user_name: "Ada, the \"Editor\"".to_string(),
            user_role: Role::Editor,
            action,
            resource: ActivityResource::Article,
            resource_id: Some("a1".to_string()),
            resource_name: None,
            details: Some("note".to_string()),
            timestamp: at,
        }
    }

    #[test]
    fn sqlite_store_lists_most_recent_first_and_clears() {
        let store = SqliteAuditStore::new(memory_pool());
        let now = Utc::now();
        let first = entry("e1", ActivityAction::Create, now);
        let second = entry("e2", ActivityAction::Publish, now + Duration::seconds(1));
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "e2");
        assert_eq!(listed[1].user_name, first.user_name);
        assert_eq!(listed[1].action, ActivityAction::Create);

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn sqlite_rows_cannot_be_updated() {
        let pool = memory_pool();
        let conn = pool.get().unwrap();
        insert_entry(&conn, &entry("e1", ActivityAction::Create, Utc::now())).unwrap();
        let updated = conn.execute("UPDATE activity_log SET user_name = 'mallory' WHERE id = 'e1'", []);
        assert!(updated.is_err());
        assert_eq!(read_all_entries(&conn).unwrap()[0].user_name, "Ada, the \"Editor\"");
    }

    #[test]
    fn concurrent_records_are_all_kept() {
        use crate::helper::audit_log::{AuditDetails, AuditLog, AuditQuery};
        use crate::helper::clock::ManualClock;
        use crate::helper::session_manager::tests::{services, user, FakeIdentity};
        use crate::helper::session_manager::SessionManager;
        use crate::models::UserStatus;
        use std::collections::HashSet;
        use std::sync::Arc;

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let audit = Arc::new(AuditLog::new(Arc::new(SqliteAuditStore::new(memory_pool())), clock.clone()));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let audit = Arc::clone(&audit);
                let services = services(Arc::new(FakeIdentity::default()), clock.clone());
                std::thread::spawn(move || {
                    let session = SessionManager::for_user(services, user(&format!("u{}", t), Role::Editor, UserStatus::Active));
                    for i in 0..25 {
                        let recorded = audit.record(
                            &session,
                            ActivityAction::Update,
                            ActivityResource::Article,
                            AuditDetails::resource(format!("a{}-{}", t, i), "Harbour plans"),
                        );
                        assert!(recorded.is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(entries.len(), 200);
        let ids: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(entries.iter().filter(|e| e.user_id == "u3").count(), 25);
    }

    #[test]
    fn memory_store_prepends() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        store.append(&entry("e1", ActivityAction::Create, now)).unwrap();
        store.append(&entry("e2", ActivityAction::Update, now)).unwrap();
        let ids: Vec<String> = store.list().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, ["e2", "e1"]);
        assert_eq!(store.clear().unwrap(), 2);
    }
}
