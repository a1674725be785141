use crate::helper::session_manager::{AuthError, SessionManager, SessionRecord, SessionStore, SessionStoreError};
use crate::models::User;
use crate::routes::ApiError;
use crate::AppState;
use actix_session::{Session, SessionExt};
use actix_web::{dev, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use std::ops::{Deref, DerefMut};

pub const SESSION_RECORD_KEY: &str = "session_record";

/// Keeps the session record in the signed actix-session cookie.
pub struct ActixSessionStore {
    session: Session,
}

impl ActixSessionStore {
    pub fn new(session: Session) -> Self {
        ActixSessionStore { session }
    }
}

impl SessionStore for ActixSessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, SessionStoreError> {
        self.session
            .get::<SessionRecord>(SESSION_RECORD_KEY)
            .map_err(|e| SessionStoreError(e.to_string()))
    }

    fn persist(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        // New identity, new session id.
        self.session.renew();
        self.session
            .insert(SESSION_RECORD_KEY, record)
            .map_err(|e| SessionStoreError(e.to_string()))
    }

    fn clear(&self) {
        self.session.purge();
    }
}

/// The request's session manager, already restored from the cookie.
/// Anonymous requests get a manager with no current user. When the identity
/// provider cannot confirm a restored user the request still proceeds anonymously,
/// so login and logout keep working; `user()` then reports the provider failure.
pub struct ActingSession {
    manager: SessionManager,
    restore_error: Option<AuthError>,
}

impl ActingSession {
    pub fn restored(mut manager: SessionManager) -> Self {
        let restore_error = match manager.restore() {
            Ok(_) => None,
            Err(e) => {
                log::warn!("Could not confirm the signed-in user: {}", e);
                Some(e)
            }
        };
        ActingSession { manager, restore_error }
    }

    /// The manager, unless the identity provider failed while restoring it.
    pub fn confirmed(&self) -> Result<&SessionManager, ApiError> {
        match &self.restore_error {
            Some(e) if self.manager.current_user().is_none() => Err(ApiError::Auth(e.clone())),
            _ => Ok(&self.manager),
        }
    }

    pub fn user(&self) -> Result<&User, ApiError> {
        match (self.manager.current_user(), &self.restore_error) {
            (Some(user), _) => Ok(user),
            (None, Some(e)) => Err(ApiError::Auth(e.clone())),
            (None, None) => Err(ApiError::Unauthorized),
        }
    }
}

impl Deref for ActingSession {
    type Target = SessionManager;

    fn deref(&self) -> &SessionManager {
        &self.manager
    }
}

impl DerefMut for ActingSession {
    fn deref_mut(&mut self) -> &mut SessionManager {
        &mut self.manager
    }
}

impl FromRequest for ActingSession {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            log::error!("AppState is not registered; cannot build a session.");
            return ready(Err(ApiError::Internal("application state missing".to_string()).into()));
        };
        let store = ActixSessionStore::new(req.get_session());
        let manager = SessionManager::new(state.auth.clone(), Box::new(store));
        ready(Ok(ActingSession::restored(manager)))
    }
}
