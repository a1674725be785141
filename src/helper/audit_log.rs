//! Append-only record of privileged actions.
//!
//! `record` stamps the entry with whoever the session says is acting at that
//! moment. Writing is best effort: a failed append is logged and dropped, never
//! returned to the operation that triggered it.
//!
//! `clear` is the one exception to append-only. It empties the log for storage
//! management and is not itself written to the log; the operational log gets a
//! warning naming who cleared it instead.

use crate::helper::clock::Clock;
use crate::helper::permissions::{self, Capability};
use crate::helper::session_manager::SessionManager;
use crate::models::db_operations::audit_db_operations::AuditStore;
use crate::models::db_operations::StoreError;
use crate::models::{ActivityAction, ActivityLogEntry, ActivityResource};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const CSV_HEADER: &str = "Timestamp,User,Role,Action,Resource,Resource Name,Details";

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("You must be signed in.")]
    NotAuthenticated,
    #[error("You do not have permission to {0}.")]
    PermissionDenied(&'static str),
    #[error("Activity log storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Optional descriptive fields of an entry.
#[derive(Debug, Clone, Default)]
pub struct AuditDetails {
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub details: Option<String>,
}

impl AuditDetails {
    pub fn resource(id: impl Into<String>, name: impl Into<String>) -> Self {
        AuditDetails {
            resource_id: Some(id.into()),
            resource_name: Some(name.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Filters are ANDed. `text` and `user_name` are case-insensitive substring matches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub text: Option<String>,
    pub action: Option<ActivityAction>,
    pub resource: Option<ActivityResource>,
    pub user_name: Option<String>,
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

impl AuditQuery {
    pub fn matches(&self, entry: &ActivityLogEntry) -> bool {
        if self.action.map_or(false, |a| a != entry.action) {
            return false;
        }
        if self.resource.map_or(false, |r| r != entry.resource) {
            return false;
        }
        if let Some(name) = self.user_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            if !contains_ci(&entry.user_name, &name.to_lowercase()) {
                return false;
            }
        }
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = text.to_lowercase();
            let fields = [
                Some(entry.user_name.as_str()),
                Some(entry.action.as_str()),
                Some(entry.resource.as_str()),
                entry.resource_id.as_deref(),
                entry.resource_name.as_deref(),
                entry.details.as_deref(),
            ];
            if !fields.iter().flatten().any(|f| contains_ci(f, &needle)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub today: usize,
    pub by_action: BTreeMap<String, usize>,
}

pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        AuditLog { store, clock }
    }

    /// Appends one entry for the session's current user. Returns the entry when it was written.
    pub fn record(
        &self,
        session: &SessionManager,
        action: ActivityAction,
        resource: ActivityResource,
        details: AuditDetails,
    ) -> Option<ActivityLogEntry> {
        let Some(actor) = session.current_user() else {
            log::warn!("Dropping {} {} audit entry: no signed-in user.", action, resource);
            return None;
        };
        let entry = ActivityLogEntry {
            id: Uuid::new_v4().to_string(),
            user_id: actor.id.clone(),
            user_name: actor.name.clone(),
            user_role: actor.role,
            action,
            resource,
            resource_id: details.resource_id,
            resource_name: details.resource_name,
            details: details.details,
            timestamp: self.clock.now(),
        };
        match self.store.append(&entry) {
            Ok(()) => Some(entry),
            Err(e) => {
                log::error!("Failed to write audit entry {} {} by {}: {}", action, resource, entry.user_id, e);
                None
            }
        }
    }

    pub fn query(&self, query: &AuditQuery) -> Result<Vec<ActivityLogEntry>, AuditError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|entry| query.matches(entry))
            .collect())
    }

    /// `today` counts entries since local midnight.
    pub fn stats(&self) -> Result<AuditStats, AuditError> {
        let entries = self.store.list()?;
        let today = self.clock.now().with_timezone(&Local).date_naive();
        let mut stats = AuditStats {
            total: entries.len(),
            ..AuditStats::default()
        };
        for entry in &entries {
            if entry.timestamp.with_timezone(&Local).date_naive() == today {
                stats.today += 1;
            }
            *stats.by_action.entry(entry.action.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Empties the log. Requires `manageSettings`.
    pub fn clear(&self, session: &SessionManager) -> Result<usize, AuditError> {
        let actor = session.current_user().ok_or(AuditError::NotAuthenticated)?;
        if !permissions::has_permission(actor.role, Capability::ManageSettings) {
            return Err(AuditError::PermissionDenied("clear the activity log"));
        }
        let removed = self.store.clear()?;
        log::warn!("Activity log cleared by {} ({}): {} entries removed.", actor.name, actor.id, removed);
        Ok(removed)
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// CSV download of `entries`, timestamps in local time.
pub fn export_csv(entries: &[ActivityLogEntry]) -> String {
    export_csv_in(entries, &Local)
}

pub fn export_csv_in<Tz>(entries: &[ActivityLogEntry], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = String::from(CSV_HEADER);
    for entry in entries {
        let timestamp = entry.timestamp.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string();
        let row = [
            timestamp.as_str(),
            entry.user_name.as_str(),
            entry.user_role.as_str(),
            entry.action.as_str(),
            entry.resource.as_str(),
            entry.resource_name.as_deref().unwrap_or(""),
            entry.details.as_deref().unwrap_or(""),
        ];
        out.push('\n');
        out.push_str(&row.iter().map(|f| quote(f)).collect::<Vec<_>>().join(","));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::clock::ManualClock;
    use crate::helper::session_manager::tests::{services, user, FakeIdentity};
    use crate::models::db_operations::audit_db_operations::MemoryAuditStore;
    use crate::models::{Role, UserStatus};
    use chrono::{Duration, Utc};

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn append(&self, _: &ActivityLogEntry) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }
        fn list(&self) -> Result<Vec<ActivityLogEntry>, StoreError> {
            Ok(Vec::new())
        }
        fn clear(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    fn session_for(role: Role, clock: &Arc<ManualClock>) -> SessionManager {
        let identity = Arc::new(FakeIdentity::default());
        SessionManager::for_user(services(identity, clock.clone()), user("ada", role, UserStatus::Active))
    }

    fn anonymous(clock: &Arc<ManualClock>) -> SessionManager {
        let identity = Arc::new(FakeIdentity::default());
        SessionManager::for_user(services(identity, clock.clone()), user("nobody", Role::Author, UserStatus::Pending))
    }

    #[test]
    fn record_stamps_the_session_user() {
        let clock = clock();
        let log = AuditLog::new(Arc::new(MemoryAuditStore::new()), clock.clone());
        let session = session_for(Role::Editor, &clock);

        let entry = log
            .record(&session, ActivityAction::Publish, ActivityResource::Article, AuditDetails::resource("a1", "Budget"))
            .unwrap();
        assert_eq!(entry.user_id, "ada");
        assert_eq!(entry.user_name, "User ada");
        assert_eq!(entry.user_role, Role::Editor);
        assert_eq!(entry.timestamp, clock.now());
        assert_eq!(log.query(&AuditQuery::default()).unwrap(), vec![entry]);
    }

    #[test]
    fn record_without_user_writes_nothing() {
        let clock = clock();
        let log = AuditLog::new(Arc::new(MemoryAuditStore::new()), clock.clone());
        let session = anonymous(&clock);
        assert!(log.record(&session, ActivityAction::Create, ActivityResource::Article, AuditDetails::default()).is_none());
        assert_eq!(log.stats().unwrap().total, 0);
    }

    #[test]
    fn store_failures_are_swallowed() {
        let clock = clock();
        let log = AuditLog::new(Arc::new(FailingStore), clock.clone());
        let session = session_for(Role::Admin, &clock);
        assert!(log.record(&session, ActivityAction::Delete, ActivityResource::Media, AuditDetails::default()).is_none());
    }

    #[test]
    fn query_ands_filters() {
        let clock = clock();
        let log = AuditLog::new(Arc::new(MemoryAuditStore::new()), clock.clone());
        let editor = session_for(Role::Editor, &clock);
        log.record(&editor, ActivityAction::Approve, ActivityResource::Article, AuditDetails::resource("a1", "Harbour Plans"));
        log.record(&editor, ActivityAction::Reject, ActivityResource::Article, AuditDetails::resource("a2", "Ferry Strike").with_details("needs sources"));
        log.record(&editor, ActivityAction::Update, ActivityResource::User, AuditDetails::resource("u9", "Pat"));

        let by_text = log.query(&AuditQuery { text: Some("HARBOUR".into()), ..Default::default() }).unwrap();
        assert_eq!(by_text.len(), 1);

        let by_details = log.query(&AuditQuery { text: Some("sources".into()), ..Default::default() }).unwrap();
        assert_eq!(by_details[0].action, ActivityAction::Reject);

        let articles = log
            .query(&AuditQuery { resource: Some(ActivityResource::Article), user_name: Some("user ADA".into()), ..Default::default() })
            .unwrap();
        assert_eq!(articles.len(), 2);

        let none = log
            .query(&AuditQuery { action: Some(ActivityAction::Approve), resource: Some(ActivityResource::User), ..Default::default() })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn stats_count_today_and_by_action() {
        let clock = clock();
        let log = AuditLog::new(Arc::new(MemoryAuditStore::new()), clock.clone());
        let session = session_for(Role::Editor, &clock);

        clock.advance(Duration::days(-3));
        log.record(&session, ActivityAction::Create, ActivityResource::Article, AuditDetails::default());
        clock.advance(Duration::days(3));
        log.record(&session, ActivityAction::Create, ActivityResource::Article, AuditDetails::default());
        log.record(&session, ActivityAction::Publish, ActivityResource::Article, AuditDetails::default());

        let stats = log.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.today, 2);
        assert_eq!(stats.by_action.get("create"), Some(&2));
        assert_eq!(stats.by_action.get("publish"), Some(&1));
    }

    #[test]
    fn only_settings_managers_can_clear() {
        let clock = clock();
        let log = AuditLog::new(Arc::new(MemoryAuditStore::new()), clock.clone());
        let editor = session_for(Role::Editor, &clock);
        let admin = session_for(Role::Admin, &clock);
        log.record(&editor, ActivityAction::Create, ActivityResource::Article, AuditDetails::default());

        assert!(matches!(log.clear(&editor), Err(AuditError::PermissionDenied(_))));
        assert!(matches!(log.clear(&anonymous(&clock)), Err(AuditError::NotAuthenticated)));
        assert_eq!(log.clear(&admin).unwrap(), 1);
        assert_eq!(log.stats().unwrap().total, 0);
    }

    #[test]
    fn csv_quotes_every_field() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let entry = ActivityLogEntry {
            id: "e1".into(),
            user_id: "u1".into(),
            user_name: "Doe, \"JD\"".into(),
            user_role: Role::Journalist,
            action: ActivityAction::BulkDelete,
            resource: ActivityResource::Comment,
            resource_id: None,
            resource_name: Some("Spam, mostly".into()),
            details: None,
            timestamp: at,
        };
        let csv = export_csv_in(&[entry], &Utc);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Timestamp,User,Role,Action,Resource,Resource Name,Details");
        assert_eq!(
            lines[1],
            r#""2024-05-06 07:08:09","Doe, ""JD""","journalist","bulk_delete","comment","Spam, mostly","""#
        );
        assert_eq!(export_csv(&[]), CSV_HEADER);
    }
}
