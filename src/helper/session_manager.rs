use crate::helper::clock::Clock;
use crate::helper::identity::{IdentityError, IdentityProvider};
use crate::helper::rate_limiter::{AttemptOutcome, RateLimiter};
use crate::models::{User, UserStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

fn minutes_rounded_up(d: &Duration) -> i64 {
    (d.num_seconds() + 59).max(60) / 60
}

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Too many failed login attempts. Try again in {} minute(s).", minutes_rounded_up(.remaining))]
    RateLimited { remaining: Duration },
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("{}", account_status_message(.0))]
    AccountNotActive(UserStatus),
    #[error("The sign-in service did not respond. Please try again.")]
    Timeout,
    #[error("The sign-in service is unavailable: {0}")]
    Provider(String),
    #[error("Could not store the session: {0}")]
    Session(String),
}

fn account_status_message(status: &UserStatus) -> &'static str {
    match status {
        UserStatus::Pending => "Your account is awaiting approval by an administrator.",
        UserStatus::Rejected => "Your registration was not approved.",
        UserStatus::Suspended => "Your account has been suspended.",
        UserStatus::Active => "Your account is active.",
    }
}

#[derive(Error, Debug)]
#[error("{0}")]
pub struct SessionStoreError(pub String);

/// What survives between requests (or restarts) for a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub remember: bool,
    pub established_at: DateTime<Utc>,
    /// Process that issued a non-remembered session; such records die with it.
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Persistence for one session's record. Each session owns its own store.
pub trait SessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, SessionStoreError>;
    fn persist(&self, record: &SessionRecord) -> Result<(), SessionStoreError>;
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, SessionStoreError> {
        Ok(self.record.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn persist(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        *self.record.lock().unwrap_or_else(|p| p.into_inner()) = Some(record.clone());
        Ok(())
    }

    fn clear(&self) {
        *self.record.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

// Lets tests and callers keep a handle on a store they hand to the manager.
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn load(&self) -> Result<Option<SessionRecord>, SessionStoreError> {
        (**self).load()
    }

    fn persist(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        (**self).persist(record)
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// How long a persisted session is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub session_ttl: Duration,
    pub remember_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        SessionPolicy {
            session_ttl: Duration::hours(12),
            remember_ttl: Duration::days(30),
        }
    }
}

impl SessionPolicy {
    pub fn is_expired(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        let ttl = if record.remember { self.remember_ttl } else { self.session_ttl };
        now >= record.established_at + ttl
    }
}

/// The long-lived collaborators every session manager needs.
#[derive(Clone)]
pub struct AuthServices {
    pub rate_limiter: Arc<RateLimiter>,
    pub identity: Arc<dyn IdentityProvider>,
    pub policy: SessionPolicy,
    pub clock: Arc<dyn Clock>,
    /// Fresh per process. Clones share it.
    pub instance_id: String,
}

impl AuthServices {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        identity: Arc<dyn IdentityProvider>,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        AuthServices {
            rate_limiter,
            identity,
            policy,
            clock,
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Who is acting in one session. Only `Active` users are ever exposed as the current user.
pub struct SessionManager {
    services: AuthServices,
    store: Box<dyn SessionStore>,
    current: Option<User>,
}

impl SessionManager {
    pub fn new(services: AuthServices, store: Box<dyn SessionStore>) -> Self {
        SessionManager {
            services,
            store,
            current: None,
        }
    }

    /// A session with a fixed, already-verified user. Background jobs and tests use this.
    pub fn for_user(services: AuthServices, user: User) -> Self {
        let mut manager = Self::new(services, Box::new(MemorySessionStore::new()));
        if user.is_active() {
            manager.current = Some(user);
        }
        manager
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    pub fn login(&mut self, identity: &str, secret: &str, remember: bool) -> Result<User, AuthError> {
        let limiter = &self.services.rate_limiter;
        if let Some(remaining) = limiter.lockout_remaining(identity) {
            log::info!("Rejected login for '{}': locked out.", RateLimiter::normalize_key(identity));
            return Err(AuthError::RateLimited { remaining });
        }

        let user = match self.services.identity.authenticate(identity, secret) {
            Ok(user) => user,
            Err(IdentityError::InvalidCredentials) => {
                if let AttemptOutcome::Counted { remaining_attempts } = limiter.record_attempt(identity, false) {
                    log::debug!("Failed login for '{}', {} attempt(s) left.", RateLimiter::normalize_key(identity), remaining_attempts);
                }
                return Err(AuthError::InvalidCredentials);
            }
            // The provider, not the user, failed here, so nothing is counted.
            Err(IdentityError::Timeout) => return Err(AuthError::Timeout),
            Err(IdentityError::Unavailable(e)) => {
                log::error!("Identity provider unavailable during login: {}", e);
                return Err(AuthError::Provider(e));
            }
        };
        limiter.record_attempt(identity, true);

        if !user.is_active() {
            self.terminate();
            log::info!("Refused session for user {} with status {}.", user.id, user.status);
            return Err(AuthError::AccountNotActive(user.status));
        }

        let record = SessionRecord {
            user_id: user.id.clone(),
            remember,
            established_at: self.services.clock.now(),
            instance_id: (!remember).then(|| self.services.instance_id.clone()),
        };
        self.store
            .persist(&record)
            .map_err(|e| AuthError::Session(e.to_string()))?;
        self.current = Some(user.clone());
        log::info!("User {} ({}) signed in.", user.id, user.role);
        Ok(user)
    }

    pub fn logout(&mut self) {
        if let Some(user) = &self.current {
            log::info!("User {} signed out.", user.id);
        }
        self.terminate();
    }

    fn terminate(&mut self) {
        self.store.clear();
        self.current = None;
    }

    /// Picks up a persisted session, re-checking expiry and the user's current status.
    pub fn restore(&mut self) -> Result<Option<&User>, AuthError> {
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.current = None;
                return Ok(None);
            }
            Err(e) => {
                log::warn!("Discarding unreadable session record: {}", e);
                self.terminate();
                return Ok(None);
            }
        };

        if !record.remember && record.instance_id.as_deref() != Some(self.services.instance_id.as_str()) {
            log::debug!("Session for user {} was issued by an earlier run.", record.user_id);
            self.terminate();
            return Ok(None);
        }

        if self.services.policy.is_expired(&record, self.services.clock.now()) {
            log::debug!("Session for user {} expired.", record.user_id);
            self.terminate();
            return Ok(None);
        }

        self.refresh_user(&record.user_id)?;
        Ok(self.current.as_ref())
    }

    /// Re-reads the current user's status. A user who is gone or no longer
    /// `Active` loses the session here.
    pub fn check_status(&mut self) -> Result<bool, AuthError> {
        let Some(user_id) = self.current.as_ref().map(|u| u.id.clone()) else {
            return Ok(false);
        };
        self.refresh_user(&user_id)?;
        Ok(self.current.is_some())
    }

    fn refresh_user(&mut self, user_id: &str) -> Result<(), AuthError> {
        match self.services.identity.find_user(user_id) {
            Ok(Some(user)) if user.is_active() => {
                self.current = Some(user);
                Ok(())
            }
            Ok(Some(user)) => {
                log::info!("Ending session for user {}: status is now {}.", user.id, user.status);
                self.terminate();
                Ok(())
            }
            Ok(None) => {
                log::info!("Ending session for user {}: account no longer exists.", user_id);
                self.terminate();
                Ok(())
            }
            // Status unknown: hide the user for this call but keep the record.
            Err(IdentityError::Timeout) => {
                self.current = None;
                Err(AuthError::Timeout)
            }
            Err(e) => {
                self.current = None;
                Err(AuthError::Provider(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::helper::clock::ManualClock;
    use crate::helper::rate_limiter::RateLimitConfig;
    use crate::models::Role;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const PASSWORD: &str = "correct horse";

    /// Identity provider over a fixed user table. Status can be changed mid-test.
    #[derive(Default)]
    pub(crate) struct FakeIdentity {
        pub users: Mutex<HashMap<String, User>>,
        pub calls: AtomicUsize,
        pub time_out: Mutex<bool>,
    }

    impl FakeIdentity {
        pub(crate) fn with(users: Vec<User>) -> Self {
            let identity = FakeIdentity::default();
            for user in users {
                identity.users.lock().unwrap().insert(user.email.clone(), user);
            }
            identity
        }

        pub(crate) fn set_status(&self, email: &str, status: UserStatus) {
            self.users.lock().unwrap().get_mut(email).unwrap().status = status;
        }
    }

    impl IdentityProvider for FakeIdentity {
        fn authenticate(&self, identity: &str, secret: &str) -> Result<User, IdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.time_out.lock().unwrap() {
                return Err(IdentityError::Timeout);
            }
            match self.users.lock().unwrap().get(&identity.to_lowercase()) {
                Some(user) if secret == PASSWORD => Ok(user.clone()),
                _ => Err(IdentityError::InvalidCredentials),
            }
        }

        fn find_user(&self, user_id: &str) -> Result<Option<User>, IdentityError> {
            if *self.time_out.lock().unwrap() {
                return Err(IdentityError::Timeout);
            }
            Ok(self.users.lock().unwrap().values().find(|u| u.id == user_id).cloned())
        }
    }

    pub(crate) fn user(id: &str, role: Role, status: UserStatus) -> User {
        User {
            id: id.to_string(),
            name: format!("User {}", id),
            email: format!("{}@example.com", id),
            role,
            status,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    pub(crate) fn services(identity: Arc<FakeIdentity>, clock: Arc<ManualClock>) -> AuthServices {
        AuthServices::new(
            Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone())),
            identity,
            SessionPolicy::default(),
            clock,
        )
    }

    struct Harness {
        identity: Arc<FakeIdentity>,
        clock: Arc<ManualClock>,
        services: AuthServices,
        store: Arc<MemorySessionStore>,
        manager: SessionManager,
    }

    fn harness(users: Vec<User>) -> Harness {
        let identity = Arc::new(FakeIdentity::with(users));
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let services = services(identity.clone(), clock.clone());
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(services.clone(), Box::new(store.clone()));
        Harness { identity, clock, services, store, manager }
    }

    #[test]
    fn active_user_gets_a_persisted_session() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        let signed_in = h.manager.login("ada@example.com", PASSWORD, true).unwrap();
        assert_eq!(signed_in.id, "ada");
        assert!(h.manager.is_authenticated());
        let record = h.store.load().unwrap().unwrap();
        assert_eq!(record.user_id, "ada");
        assert!(record.remember);
    }

    #[test]
    fn pending_user_is_refused_without_session() {
        let mut h = harness(vec![user("pat", Role::Author, UserStatus::Pending)]);
        let err = h.manager.login("pat@example.com", PASSWORD, false).unwrap_err();
        assert!(matches!(err, AuthError::AccountNotActive(UserStatus::Pending)));
        assert!(!h.manager.is_authenticated());
        assert_eq!(h.store.load().unwrap(), None);
    }

    #[test]
    fn rejected_and_suspended_users_get_their_own_errors() {
        let mut h = harness(vec![
            user("rej", Role::Author, UserStatus::Rejected),
            user("sus", Role::Author, UserStatus::Suspended),
        ]);
        assert!(matches!(
            h.manager.login("rej@example.com", PASSWORD, false),
            Err(AuthError::AccountNotActive(UserStatus::Rejected))
        ));
        assert!(matches!(
            h.manager.login("sus@example.com", PASSWORD, false),
            Err(AuthError::AccountNotActive(UserStatus::Suspended))
        ));
    }

    #[test]
    fn locked_identity_never_reaches_the_provider() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        for _ in 0..5 {
            assert!(matches!(
                h.manager.login("ada@example.com", "guess", false),
                Err(AuthError::InvalidCredentials)
            ));
        }
        let calls_before = h.identity.calls.load(Ordering::SeqCst);
        match h.manager.login("ada@example.com", PASSWORD, false) {
            Err(AuthError::RateLimited { remaining }) => assert_eq!(remaining, Duration::minutes(30)),
            other => panic!("expected rate limit, got {:?}", other.map(|u| u.id)),
        }
        assert_eq!(h.identity.calls.load(Ordering::SeqCst), calls_before);
        assert!(!h.manager.is_authenticated());

        h.clock.advance(Duration::minutes(30));
        assert!(h.manager.login("ada@example.com", PASSWORD, false).is_ok());
    }

    #[test]
    fn timeouts_do_not_count_as_failures() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        *h.identity.time_out.lock().unwrap() = true;
        for _ in 0..10 {
            assert!(matches!(h.manager.login("ada@example.com", "guess", false), Err(AuthError::Timeout)));
        }
        *h.identity.time_out.lock().unwrap() = false;
        assert!(h.manager.login("ada@example.com", PASSWORD, false).is_ok());
    }

    #[test]
    fn logout_clears_persisted_state() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        h.manager.login("ada@example.com", PASSWORD, true).unwrap();
        h.manager.logout();
        assert!(!h.manager.is_authenticated());
        assert_eq!(h.store.load().unwrap(), None);
    }

    #[test]
    fn status_change_ends_live_session_on_next_check() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        h.manager.login("ada@example.com", PASSWORD, false).unwrap();
        assert!(h.manager.check_status().unwrap());

        h.identity.set_status("ada@example.com", UserStatus::Suspended);
        assert!(!h.manager.check_status().unwrap());
        assert!(h.manager.current_user().is_none());
        assert_eq!(h.store.load().unwrap(), None);
    }

    #[test]
    fn restore_honours_remember_duration() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        h.manager.login("ada@example.com", PASSWORD, false).unwrap();

        let services = h.services.clone();
        let mut next_request = SessionManager::new(services.clone(), Box::new(h.store.clone()));
        assert_eq!(next_request.restore().unwrap().map(|u| u.id.clone()), Some("ada".to_string()));

        h.clock.advance(Duration::hours(13));
        let mut later = SessionManager::new(services.clone(), Box::new(h.store.clone()));
        assert!(later.restore().unwrap().is_none());
        assert_eq!(h.store.load().unwrap(), None);

        let mut remembered = SessionManager::new(services.clone(), Box::new(h.store.clone()));
        remembered.login("ada@example.com", PASSWORD, true).unwrap();
        h.clock.advance(Duration::days(29));
        let mut much_later = SessionManager::new(services, Box::new(h.store.clone()));
        assert!(much_later.restore().unwrap().is_some());
    }

    #[test]
    fn restore_drops_session_of_deactivated_user() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        h.manager.login("ada@example.com", PASSWORD, false).unwrap();
        h.identity.set_status("ada@example.com", UserStatus::Rejected);

        let mut next_request = SessionManager::new(h.services.clone(), Box::new(h.store.clone()));
        assert!(next_request.restore().unwrap().is_none());
        assert_eq!(h.store.load().unwrap(), None);
    }

    #[test]
    fn unremembered_session_ends_with_the_process() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        h.manager.login("ada@example.com", PASSWORD, false).unwrap();
        h.clock.advance(Duration::hours(1));

        let restarted = services(h.identity.clone(), h.clock.clone());
        let mut after_restart = SessionManager::new(restarted.clone(), Box::new(h.store.clone()));
        assert!(after_restart.restore().unwrap().is_none());
        assert_eq!(h.store.load().unwrap(), None);

        let mut remembered = SessionManager::new(h.services.clone(), Box::new(h.store.clone()));
        remembered.login("ada@example.com", PASSWORD, true).unwrap();
        let mut after_second_restart = SessionManager::new(restarted, Box::new(h.store.clone()));
        assert!(after_second_restart.restore().unwrap().is_some());
    }

    #[test]
    fn logout_clears_record_even_when_provider_times_out() {
        let mut h = harness(vec![user("ada", Role::Editor, UserStatus::Active)]);
        h.manager.login("ada@example.com", PASSWORD, true).unwrap();
        *h.identity.time_out.lock().unwrap() = true;

        let mut next_request = SessionManager::new(h.services.clone(), Box::new(h.store.clone()));
        assert!(matches!(next_request.restore(), Err(AuthError::Timeout)));
        assert!(h.store.load().unwrap().is_some());

        next_request.logout();
        assert_eq!(h.store.load().unwrap(), None);
        assert!(!next_request.is_authenticated());
    }

    #[test]
    fn rate_limited_message_rounds_minutes_up() {
        let err = AuthError::RateLimited { remaining: Duration::seconds(61) };
        assert_eq!(err.to_string(), "Too many failed login attempts. Try again in 2 minute(s).");
    }
}
