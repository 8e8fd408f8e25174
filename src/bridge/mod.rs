//!
//! Session bridge
//! --------------
//! Elevates an authenticated frontend user to a simulated backend session.
//!
//! The bridge runs after both authentication stages. Per request it either passes
//! through untouched, clears a stale simulation cookie, or creates a backend
//! session whose id is the frontend session id, re-runs backend authentication so
//! the downstream handler sees the elevated user, and writes both cookies.
//!
//! Concurrent first requests from one browser can each create a session; the last
//! cookie write wins. Nothing here serializes elevation across requests.

use std::sync::Arc;
use axum::extract::Request;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

pub mod cookie;
pub mod mapping;
pub mod logout;

pub use cookie::{CookieDiff, CookieMutation, CookieTarget, SessionCookieWriter};
pub use logout::{LogoutCoordinator, LogoutEvent, LogoutOutcome};
pub use mapping::resolve_backend_user;

use crate::config::Settings;
use crate::directory::UserDirectory;
use crate::error::{AppError, AppResult};
use crate::identity::{context, BackendAuthenticator, BackendUserRecord, FrontendUser, LoginType, SessionManager, SessionRecord};
use cookie::{parse_cookie, with_request_cookie};

/// True when the query parameter is present with a value other than `""` or `"0"`.
pub fn query_flag(query: Option<&str>, name: &str) -> bool {
    let Some(q) = query else { return false; };
    q.split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let k = urlencoding::decode(k).ok()?;
            (k == name).then(|| urlencoding::decode(v).map(|v| v.into_owned()).unwrap_or_default())
        })
        .last()
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct SessionBridge {
    settings: Arc<Settings>,
    directory: Arc<dyn UserDirectory>,
    sessions: SessionManager,
    backend_auth: BackendAuthenticator,
}

impl SessionBridge {
    pub fn new(
        settings: Arc<Settings>,
        directory: Arc<dyn UserDirectory>,
        sessions: SessionManager,
        backend_auth: BackendAuthenticator,
    ) -> Self {
        Self { settings, directory, sessions, backend_auth }
    }

    pub async fn process(&self, mut request: Request, next: Next) -> AppResult<Response> {
        debug!(target: "simulate", "session bridge start");
        let bridge = &self.settings.bridge;
        let cookies = &self.settings.cookies;
        let writer = SessionCookieWriter::new(cookies);
        let target = CookieTarget::from_request(&request, cookies.trust_forwarded_proto);
        let simulation_cookie = parse_cookie(request.headers(), &bridge.cookie_name);
        let (frontend, backend_logged_in) = match context(&request) {
            Some(ctx) => (ctx.frontend.clone(), ctx.is_backend_logged_in()),
            None => (None, false),
        };

        let Some(frontend) = frontend else {
            debug!(target: "simulate", "no frontend user logged in");
            let mut response = next.run(request).await;
            if simulation_cookie.is_some() {
                // frontend session is gone but the marker lingers
                debug!(target: "simulate", "clearing simulation cookie");
                let mut diff = CookieDiff::default();
                diff.clear(&bridge.cookie_name, None);
                diff.apply(&mut response, &writer, &target)?;
            }
            return Ok(response);
        };

        let link_requested = query_flag(request.uri().query(), &bridge.link_parameter_name);
        if bridge.on_link_parameter && !link_requested {
            debug!(target: "simulate", "activation parameter absent");
            return Ok(next.run(request).await);
        }

        if backend_logged_in {
            debug!(target: "simulate", "backend user already logged in");
            return Ok(next.run(request).await);
        }

        // Re-simulating would break a manual backend logout
        if simulation_cookie.as_deref().is_some_and(|v| !v.is_empty()) {
            debug!(target: "simulate", "backend user already simulated");
            return Ok(next.run(request).await);
        }

        let Some(backend_user) = resolve_backend_user(self.directory.as_ref(), &frontend.record)? else {
            debug!(target: "simulate", user = %frontend.record.username, "no backend user mapped");
            return Ok(next.run(request).await);
        };

        writer.ensure_transport(&target)?;
        let session = self.simulate(&frontend, &backend_user)?;

        with_request_cookie(request.headers_mut(), &bridge.cookie_name, &session.id)?;
        with_request_cookie(request.headers_mut(), &cookies.backend_cookie_name, &session.id)?;
        // second backend authentication pass, now that the cookie carries the new id
        if self.backend_auth.authenticate(&mut request)?.is_none() {
            return Err(AppError::internal(
                "simulation_failed".to_string(),
                format!("simulated backend session for {} could not be authenticated", backend_user.username),
            ));
        }

        let mut response = next.run(request).await;
        let mut diff = CookieDiff::default();
        diff.set(&bridge.cookie_name, &session.id, None)
            .set(&cookies.backend_cookie_name, &session.id, Some(LoginType::Backend));
        diff.apply(&mut response, &writer, &target)?;

        if bridge.on_link_parameter && link_requested {
            debug!(target: "simulate", to = %bridge.admin_entry_path, "redirecting to admin entry");
            return redirect_with_headers(&bridge.admin_entry_path, response);
        }
        Ok(response)
    }

    /// Create the backend session for `backend_user`, reusing the frontend session id.
    fn simulate(&self, frontend: &FrontendUser, backend_user: &BackendUserRecord) -> AppResult<SessionRecord> {
        debug!(target: "simulate", user = %frontend.record.username, backend = %backend_user.username, "create backend user session");
        let mut record = self.sessions.create_user_session(
            LoginType::Backend,
            Some(frontend.session_id.clone()),
            backend_user.uid,
            Some(frontend.session_id.clone()),
        )?;
        let fake_timeout = self.settings.bridge.fake_timeout;
        if fake_timeout > 0 {
            record.timestamp = record.timestamp.saturating_add(i64::try_from(fake_timeout).unwrap_or(i64::MAX));
            self.sessions.backend(LoginType::Backend).set(&record.id, record.clone())?;
        }
        Ok(record)
    }
}

/// 307 to `location`, keeping the headers (and Set-Cookies) of `response` but not its body.
fn redirect_with_headers(location: &str, response: Response) -> AppResult<Response> {
    let (parts, _body) = response.into_parts();
    let mut redirect = Response::new(axum::body::Body::empty());
    *redirect.status_mut() = StatusCode::TEMPORARY_REDIRECT;
    for (name, value) in parts.headers.iter() {
        if name == CONTENT_LENGTH || name == CONTENT_TYPE || name == LOCATION { continue; }
        redirect.headers_mut().append(name.clone(), value.clone());
    }
    let location = HeaderValue::from_str(location)
        .map_err(|e| AppError::config("admin_entry_path".to_string(), format!("invalid redirect target {}: {}", location, e)))?;
    redirect.headers_mut().insert(LOCATION, location);
    Ok(redirect)
}
