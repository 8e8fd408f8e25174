use std::sync::Arc;
use axum::extract::Request;
use tracing::debug;

use super::principal::{BackendUser, FrontendUser};
use super::request_context::context_mut;
use super::session::{now_secs, LoginType, SessionManager, SessionRecord};
use crate::bridge::cookie::parse_cookie;
use crate::directory::UserDirectory;
use crate::error::AppResult;

/// Resolve a session cookie to a live record: missing, empty or expired cookies yield None.
/// Expired records are dropped from the store; live ones get their activity timestamp bumped
/// unless it already lies in the future.
fn live_session(
    sessions: &SessionManager,
    login_type: LoginType,
    req: &Request,
    cookie_name: &str,
    lifetime_secs: i64,
) -> AppResult<Option<SessionRecord>> {
    let Some(id) = parse_cookie(req.headers(), cookie_name).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let store = sessions.backend(login_type);
    let Some(mut record) = store.get(&id)? else {
        debug!(target: "auth", login_type = login_type.as_str(), "session cookie without stored session");
        return Ok(None);
    };
    let now = now_secs();
    if record.is_expired(lifetime_secs, now) {
        debug!(target: "auth", login_type = login_type.as_str(), "session expired");
        store.remove(&id)?;
        return Ok(None);
    }
    if record.timestamp < now {
        record.timestamp = now;
        store.set(&id, record.clone())?;
    }
    Ok(Some(record))
}

/// Backend authentication stage. Runs once in the normal pipeline and once more,
/// explicitly, after the session bridge has put a fresh session id into the request.
#[derive(Clone)]
pub struct BackendAuthenticator {
    sessions: SessionManager,
    directory: Arc<dyn UserDirectory>,
    cookie_name: String,
    lifetime_secs: i64,
}

impl BackendAuthenticator {
    pub fn new(sessions: SessionManager, directory: Arc<dyn UserDirectory>, cookie_name: String, lifetime_secs: i64) -> Self {
        Self { sessions, directory, cookie_name, lifetime_secs }
    }

    pub fn cookie_name(&self) -> &str { &self.cookie_name }

    /// Authenticate the backend user from the request cookies and record it in the request context.
    pub fn authenticate(&self, req: &mut Request) -> AppResult<Option<BackendUser>> {
        let Some(session) = live_session(&self.sessions, LoginType::Backend, req, &self.cookie_name, self.lifetime_secs)? else {
            return Ok(None);
        };
        let Some(record) = self.directory.backend_user(session.user_id)? else {
            debug!(target: "auth", uid = session.user_id, "backend session for unknown or disabled user");
            return Ok(None);
        };
        let user = BackendUser { session, record };
        debug!(target: "auth", user = %user.record.username, simulated = user.is_simulated(), "backend user authenticated");
        context_mut(req).backend = Some(user.clone());
        Ok(Some(user))
    }

    pub fn logoff(&self, user: &BackendUser) -> AppResult<bool> {
        let removed = self.sessions.backend(LoginType::Backend).remove(&user.session.id)?;
        debug!(target: "auth", user = %user.record.username, removed, "backend logoff");
        Ok(removed)
    }
}

#[derive(Clone)]
pub struct FrontendAuthenticator {
    sessions: SessionManager,
    directory: Arc<dyn UserDirectory>,
    cookie_name: String,
    lifetime_secs: i64,
}

impl FrontendAuthenticator {
    pub fn new(sessions: SessionManager, directory: Arc<dyn UserDirectory>, cookie_name: String, lifetime_secs: i64) -> Self {
        Self { sessions, directory, cookie_name, lifetime_secs }
    }

    pub fn cookie_name(&self) -> &str { &self.cookie_name }

    pub fn authenticate(&self, req: &mut Request) -> AppResult<Option<FrontendUser>> {
        let Some(session) = live_session(&self.sessions, LoginType::Frontend, req, &self.cookie_name, self.lifetime_secs)? else {
            return Ok(None);
        };
        let Some(record) = self.directory.frontend_user(session.user_id)? else {
            return Ok(None);
        };
        let user = FrontendUser { session_id: session.id, record };
        debug!(target: "auth", user = %user.record.username, "frontend user authenticated");
        context_mut(req).frontend = Some(user.clone());
        Ok(Some(user))
    }

    pub fn logoff(&self, user: &FrontendUser) -> AppResult<bool> {
        let removed = self.sessions.backend(LoginType::Frontend).remove(&user.session_id)?;
        debug!(target: "auth", user = %user.record.username, removed, "frontend logoff");
        Ok(removed)
    }
}
