//!
//! session-bridge HTTP server
//! --------------------------
//! This module wires the Axum router for the reference service: the request
//! pipeline stages around every route, and a handful of endpoints to log in and
//! out and to inspect the resulting identities.
//!
//! Pipeline order (outermost first):
//! - request context: request id, tracing span, empty `RequestContext`.
//! - backend authentication: backend session cookie to backend user.
//! - frontend authentication: frontend session cookie to frontend user; handles
//!   `?logintype=logout` and notifies the logout coordinator.
//! - session bridge: elevation and simulation cookie upkeep.
//!
//! Routes:
//! - `GET /` current identities as JSON.
//! - `GET /admin` admin entry point, requires a backend user.
//! - `POST /login` frontend login.
//! - `POST /logout` frontend logout.
//! - `POST /admin/logout` backend logout.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use anyhow::Context;
use serde::Deserialize;
use tracing::{info, Instrument};

use crate::bridge::cookie::parse_cookie;
use crate::bridge::{CookieDiff, CookieTarget, LogoutCoordinator, LogoutEvent, LogoutOutcome, SessionBridge, SessionCookieWriter};
use crate::config::Settings;
use crate::directory::{InMemoryDirectory, UserDirectory};
use crate::error::{AppError, AppResult};
use crate::identity::{
    context_mut, AuthProvider, BackendAuthenticator, FrontendAuthenticator, FrontendUser, LocalAuthProvider, LoginRequest,
    LoginType, RequestContext, SessionManager,
};

/// Shared server state injected into all stages and handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub directory: Arc<dyn UserDirectory>,
    pub sessions: SessionManager,
    pub backend_auth: BackendAuthenticator,
    pub frontend_auth: FrontendAuthenticator,
    pub bridge: SessionBridge,
    pub logout: LogoutCoordinator,
    pub login: LocalAuthProvider,
}

impl AppState {
    pub fn new(settings: Settings, directory: Arc<dyn UserDirectory>, sessions: SessionManager) -> Self {
        let settings = Arc::new(settings);
        let backend_auth = BackendAuthenticator::new(
            sessions.clone(),
            directory.clone(),
            settings.cookies.backend_cookie_name.clone(),
            settings.sessions.backend_lifetime,
        );
        let frontend_auth = FrontendAuthenticator::new(
            sessions.clone(),
            directory.clone(),
            settings.cookies.frontend_cookie_name.clone(),
            settings.sessions.frontend_lifetime,
        );
        let bridge = SessionBridge::new(settings.clone(), directory.clone(), sessions.clone(), backend_auth.clone());
        let logout = LogoutCoordinator::new(sessions.clone());
        let login = LocalAuthProvider::new(directory.clone(), sessions.clone());
        Self { settings, directory, sessions, backend_auth, frontend_auth, bridge, logout, login }
    }

    fn cookie_writer(&self) -> SessionCookieWriter<'_> {
        SessionCookieWriter::new(&self.settings.cookies)
    }

    fn cookie_target(&self, headers: &HeaderMap, uri: &Uri) -> CookieTarget {
        CookieTarget::new(headers, uri, self.settings.cookies.trust_forwarded_proto)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page))
        .route("/admin", get(admin_entry))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/admin/logout", post(admin_logout))
        .layer(middleware::from_fn_with_state(state.clone(), bridge_stage))
        .layer(middleware::from_fn_with_state(state.clone(), frontend_stage))
        .layer(middleware::from_fn_with_state(state.clone(), backend_stage))
        .layer(middleware::from_fn(request_context_stage))
        .with_state(state)
}

/// Start the HTTP server with the given settings.
///
/// The user directory is seeded from `settings.directory_file` when set, otherwise
/// it starts empty.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let directory = match settings.directory_file.as_deref() {
        Some(path) => InMemoryDirectory::load_json(path)
            .with_context(|| format!("While loading user directory from {}", path.display()))?,
        None => {
            tracing::warn!(target: "startup", "no user directory file configured; starting with an empty directory");
            InMemoryDirectory::new()
        }
    };
    let http_port = settings.http_port;
    info!(
        target: "startup",
        "session bridge: cookie={}, link_parameter={}, on_link_parameter={}, fake_timeout={}s, secure_cookies={}",
        settings.bridge.cookie_name, settings.bridge.link_parameter_name, settings.bridge.on_link_parameter,
        settings.bridge.fake_timeout, settings.cookies.secure
    );
    let state = AppState::new(settings, Arc::new(directory), SessionManager::default());
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn request_context_stage(mut req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %request_id, method = %req.method(), path = %req.uri().path());
    context_mut(&mut req).request_id = Some(request_id);
    next.run(req).instrument(span).await
}

async fn backend_stage(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    state.backend_auth.authenticate(&mut req)?;
    Ok(next.run(req).await)
}

async fn frontend_stage(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let target = state.cookie_target(req.headers(), req.uri());
    let logout_requested = req
        .uri()
        .query()
        .map(|q| q.split('&').any(|pair| pair == "logintype=logout"))
        .unwrap_or(false);
    let mut diff = CookieDiff::default();

    if let Some(user) = state.frontend_auth.authenticate(&mut req)? {
        if logout_requested {
            end_frontend_session(&state, &user, context_mut(&mut req), &mut diff)?;
        }
    }

    let mut response = next.run(req).await;
    diff.apply(&mut response, &state.cookie_writer(), &target)?;
    Ok(response)
}

/// Ends the frontend session, lets the logout coordinator end a simulated backend
/// session, and queues the cookie clears for both.
fn end_frontend_session(
    state: &AppState,
    user: &FrontendUser,
    ctx: &mut RequestContext,
    diff: &mut CookieDiff,
) -> AppResult<LogoutOutcome> {
    state.frontend_auth.logoff(user)?;
    diff.clear(state.frontend_auth.cookie_name(), Some(LoginType::Frontend));
    ctx.frontend = None;
    let outcome = state.logout.on_logout(&LogoutEvent::frontend(user.session_id.clone()), ctx)?;
    if outcome == LogoutOutcome::Terminated {
        diff.clear(state.backend_auth.cookie_name(), Some(LoginType::Backend));
    }
    info!(target: "auth", user = %user.record.username, ?outcome, "frontend logout");
    Ok(outcome)
}

async fn bridge_stage(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    state.bridge.process(req, next).await
}

async fn page(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "request_id": ctx.request_id,
        "frontend": ctx.frontend.as_ref().map(|u| u.record.username.clone()),
        "backend": ctx.backend.as_ref().map(|u| u.record.username.clone()),
        "simulated": ctx.backend.as_ref().map(|u| u.is_simulated()).unwrap_or(false),
    }))
}

async fn admin_entry(Extension(ctx): Extension<RequestContext>) -> AppResult<Json<serde_json::Value>> {
    let Some(user) = ctx.backend else {
        return Err(AppError::auth("not_logged_in", "backend login required"));
    };
    Ok(Json(serde_json::json!({
        "status": "ok",
        "backend": user.record.username,
        "admin": user.record.admin,
        "simulated": user.is_simulated(),
    })))
}

#[derive(Debug, Deserialize)]
struct LoginPayload { username: String, password: String }

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Json(payload): Json<LoginPayload>,
) -> AppResult<Response> {
    let target = state.cookie_target(&headers, &uri);
    let user = state.login.login(&LoginRequest { username: payload.username, password: payload.password })?;
    let mut response = Json(serde_json::json!({"status": "ok", "frontend": user.record.username})).into_response();
    let mut diff = CookieDiff::default();
    diff.set(state.frontend_auth.cookie_name(), &user.session_id, Some(LoginType::Frontend));
    diff.apply(&mut response, &state.cookie_writer(), &target)?;
    Ok(response)
}

/// Frontend logout. Unlike `?logintype=logout` this runs after the bridge, so the
/// simulation cookie is cleared here instead of on the bridge's pass-through.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Extension(mut ctx): Extension<RequestContext>,
) -> AppResult<Response> {
    let target = state.cookie_target(&headers, &uri);
    let Some(user) = ctx.frontend.clone() else {
        return Err(AppError::auth("not_logged_in", "frontend login required"));
    };
    let mut diff = CookieDiff::default();
    let outcome = end_frontend_session(&state, &user, &mut ctx, &mut diff)?;
    if parse_cookie(&headers, &state.settings.bridge.cookie_name).is_some() {
        diff.clear(&state.settings.bridge.cookie_name, None);
    }
    let mut response = Json(serde_json::json!({
        "status": "ok",
        "backend_terminated": outcome == LogoutOutcome::Terminated,
    }))
    .into_response();
    diff.apply(&mut response, &state.cookie_writer(), &target)?;
    Ok(response)
}

/// Backend logout. The simulation cookie stays, so the next request does not re-elevate.
async fn admin_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Extension(mut ctx): Extension<RequestContext>,
) -> AppResult<Response> {
    let target = state.cookie_target(&headers, &uri);
    let Some(user) = ctx.backend.clone() else {
        return Err(AppError::auth("not_logged_in", "backend login required"));
    };
    state.backend_auth.logoff(&user)?;
    state.logout.on_logout(&LogoutEvent::backend(user.session.id.clone()), &mut ctx)?;
    let mut response = Json(serde_json::json!({"status": "ok"})).into_response();
    let mut diff = CookieDiff::default();
    diff.clear(state.backend_auth.cookie_name(), Some(LoginType::Backend));
    diff.apply(&mut response, &state.cookie_writer(), &target)?;
    Ok(response)
}
