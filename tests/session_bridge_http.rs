//! End-to-end tests through the full router: both authentication stages, the
//! session bridge, logout propagation, and the login endpoints.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use session_bridge::directory::InMemoryDirectory;
use session_bridge::identity::{BackendUserRecord, FrontendUserRecord, LocalAuthProvider, LoginType, SessionManager};
use session_bridge::server::{router, AppState};
use session_bridge::Settings;

struct TestApp {
    app: Router,
    sessions: SessionManager,
}

impl TestApp {
    fn new(settings: Settings) -> Result<Self> {
        let directory = InMemoryDirectory::new();
        directory.insert_frontend(FrontendUserRecord {
            uid: 1,
            username: "alice".into(),
            password_hash: Some(LocalAuthProvider::hash_password("wonderland")?),
            ..Default::default()
        });
        directory.insert_frontend(FrontendUserRecord { uid: 2, username: "bob".into(), backend_user: Some(21), ..Default::default() });
        directory.insert_frontend(FrontendUserRecord { uid: 3, username: "carol".into(), ..Default::default() });
        directory.insert_backend(BackendUserRecord {
            uid: 10,
            username: "alice_admin".into(),
            frontend_username: Some("alice".into()),
            admin: true,
            ..Default::default()
        });
        directory.insert_backend(BackendUserRecord { uid: 20, username: "bob_by_name".into(), frontend_username: Some("bob".into()), ..Default::default() });
        directory.insert_backend(BackendUserRecord { uid: 21, username: "bob_by_id".into(), ..Default::default() });
        directory.insert_backend(BackendUserRecord { uid: 30, username: "editor".into(), ..Default::default() });
        let sessions = SessionManager::default();
        let state = AppState::new(settings, Arc::new(directory), sessions.clone());
        Ok(Self { app: router(state), sessions })
    }

    fn frontend_session(&self, uid: u64) -> Result<String> {
        Ok(self.sessions.create_user_session(LoginType::Frontend, None, uid, None)?.id)
    }

    async fn get(&self, uri: &str, cookie: &str) -> Result<Response> {
        let mut b = Request::builder().uri(uri).header("host", "www.example.com");
        if !cookie.is_empty() { b = b.header(COOKIE, cookie); }
        Ok(self.app.clone().oneshot(b.body(Body::empty())?).await?)
    }

    async fn post(&self, uri: &str, cookie: &str, body: serde_json::Value) -> Result<Response> {
        let mut b = Request::builder()
            .method("POST")
            .uri(uri)
            .header("host", "www.example.com")
            .header(CONTENT_TYPE, "application/json");
        if !cookie.is_empty() { b = b.header(COOKIE, cookie); }
        Ok(self.app.clone().oneshot(b.body(Body::from(body.to_string()))?).await?)
    }
}

fn set_cookies(resp: &Response) -> Vec<String> {
    resp.headers().get_all(SET_COOKIE).iter().filter_map(|v| v.to_str().ok().map(|s| s.to_string())).collect()
}

fn cookie_value(set_cookie: &[String], name: &str) -> Option<String> {
    set_cookie.iter().find_map(|c| {
        let first = c.split(';').next()?;
        let (k, v) = first.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

async fn json(resp: Response) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn anonymous_request_gets_no_backend_cookie() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let resp = t.get("/", "").await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookies(&resp).is_empty());
    let body = json(resp).await?;
    assert!(body["frontend"].is_null());
    assert!(body["backend"].is_null());
    Ok(())
}

#[tokio::test]
async fn link_parameter_required_and_absent_passes_through() -> Result<()> {
    let mut settings = Settings::default();
    settings.bridge.on_link_parameter = true;
    let t = TestApp::new(settings)?;
    let fe = t.frontend_session(1)?;
    let resp = t.get("/", &format!("fe_session={}", fe)).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookies(&resp).is_empty());
    let body = json(resp).await?;
    assert_eq!(body["frontend"], "alice");
    assert!(body["backend"].is_null());
    Ok(())
}

#[tokio::test]
async fn logged_in_frontend_user_is_elevated() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(1)?;
    let resp = t.get("/", &format!("fe_session={}", fe)).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookies = set_cookies(&resp);
    assert_eq!(cookies.len(), 2);
    assert_eq!(cookie_value(&cookies, "be_simulated").as_deref(), Some(fe.as_str()));
    assert_eq!(cookie_value(&cookies, "be_session").as_deref(), Some(fe.as_str()));
    let body = json(resp).await?;
    assert_eq!(body["backend"], "alice_admin");
    assert_eq!(body["simulated"], true);

    // follow-up request with the issued cookies reuses the session
    let cookie = format!("fe_session={fe}; be_simulated={fe}; be_session={fe}");
    let resp = t.get("/admin", &cookie).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookies(&resp).is_empty());
    assert_eq!(json(resp).await?["backend"], "alice_admin");
    Ok(())
}

#[tokio::test]
async fn link_parameter_activation_redirects_to_admin() -> Result<()> {
    let mut settings = Settings::default();
    settings.bridge.on_link_parameter = true;
    let t = TestApp::new(settings)?;
    let fe = t.frontend_session(1)?;
    let resp = t.get("/?simulate_be=1", &format!("fe_session={}", fe)).await?;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()), Some("/admin"));
    assert_eq!(set_cookies(&resp).len(), 2);
    Ok(())
}

#[tokio::test]
async fn explicit_backend_id_takes_precedence_over_username() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(2)?;
    let resp = t.get("/", &format!("fe_session={}", fe)).await?;
    assert_eq!(json(resp).await?["backend"], "bob_by_id");
    Ok(())
}

#[tokio::test]
async fn unmapped_frontend_user_is_not_elevated() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(3)?;
    let resp = t.get("/", &format!("fe_session={}", fe)).await?;
    assert!(set_cookies(&resp).is_empty());
    let body = json(resp).await?;
    assert_eq!(body["frontend"], "carol");
    assert!(body["backend"].is_null());
    Ok(())
}

#[tokio::test]
async fn independent_backend_login_is_left_alone() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(1)?;
    let be = t.sessions.create_user_session(LoginType::Backend, None, 30, None)?.id;
    let resp = t.get("/", &format!("fe_session={fe}; be_session={be}")).await?;
    assert!(set_cookies(&resp).is_empty());
    assert_eq!(json(resp).await?["backend"], "editor");
    assert!(t.sessions.backend(LoginType::Backend).get(&fe)?.is_none());
    Ok(())
}

#[tokio::test]
async fn frontend_logout_terminates_simulated_session() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(1)?;
    t.get("/", &format!("fe_session={}", fe)).await?;
    assert!(t.sessions.backend(LoginType::Backend).get(&fe)?.is_some());

    let cookie = format!("fe_session={fe}; be_simulated={fe}; be_session={fe}");
    let resp = t.get("/?logintype=logout", &cookie).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookies = set_cookies(&resp);
    for name in ["be_simulated", "fe_session", "be_session"] {
        let c = cookies.iter().find(|c| c.starts_with(&format!("{}=;", name)));
        assert!(c.is_some_and(|c| c.contains("Max-Age=0")), "{} not cleared in {:?}", name, cookies);
    }
    assert!(t.sessions.backend(LoginType::Backend).get(&fe)?.is_none());
    assert!(t.sessions.backend(LoginType::Frontend).get(&fe)?.is_none());
    let body = json(resp).await?;
    assert!(body["frontend"].is_null());
    assert!(body["backend"].is_null());
    Ok(())
}

#[tokio::test]
async fn frontend_logout_keeps_unrelated_backend_session() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(1)?;
    let be = t.sessions.create_user_session(LoginType::Backend, None, 30, None)?.id;
    let resp = t.get("/?logintype=logout", &format!("fe_session={fe}; be_session={be}")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(t.sessions.backend(LoginType::Backend).get(&be)?.is_some());
    assert!(cookie_value(&set_cookies(&resp), "be_session").is_none());
    assert_eq!(json(resp).await?["backend"], "editor");
    Ok(())
}

#[tokio::test]
async fn backend_logout_keeps_simulation_marker_and_prevents_re_elevation() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(1)?;
    t.get("/", &format!("fe_session={}", fe)).await?;

    let resp = t.post("/admin/logout", &format!("fe_session={fe}; be_simulated={fe}; be_session={fe}"), serde_json::json!({})).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookies = set_cookies(&resp);
    assert_eq!(cookie_value(&cookies, "be_session").as_deref(), Some(""));
    assert!(cookie_value(&cookies, "be_simulated").is_none());
    assert!(t.sessions.backend(LoginType::Backend).get(&fe)?.is_none());

    let resp = t.get("/", &format!("fe_session={fe}; be_simulated={fe}")).await?;
    assert!(set_cookies(&resp).is_empty());
    assert!(json(resp).await?["backend"].is_null());
    assert!(t.sessions.backend(LoginType::Backend).get(&fe)?.is_none());
    Ok(())
}

#[tokio::test]
async fn login_sets_frontend_cookie_and_next_request_elevates() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let resp = t.post("/login", "", serde_json::json!({"username": "alice", "password": "wonderland"})).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let fe = cookie_value(&set_cookies(&resp), "fe_session").expect("frontend cookie");

    let resp = t.get("/", &format!("fe_session={}", fe)).await?;
    assert_eq!(json(resp).await?["backend"], "alice_admin");

    let resp = t.post("/login", "", serde_json::json!({"username": "alice", "password": "wrong"})).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn admin_entry_requires_backend_user() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let resp = t.get("/admin", "").await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_endpoint_ends_frontend_and_simulated_sessions() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(1)?;
    t.get("/", &format!("fe_session={}", fe)).await?;
    assert!(t.sessions.backend(LoginType::Backend).get(&fe)?.is_some());

    let cookie = format!("fe_session={fe}; be_simulated={fe}; be_session={fe}");
    let resp = t.post("/logout", &cookie, serde_json::json!({})).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookies = set_cookies(&resp);
    for name in ["fe_session", "be_session", "be_simulated"] {
        assert_eq!(cookie_value(&cookies, name).as_deref(), Some(""), "{} not cleared in {:?}", name, cookies);
    }
    assert!(t.sessions.backend(LoginType::Frontend).get(&fe)?.is_none());
    assert!(t.sessions.backend(LoginType::Backend).get(&fe)?.is_none());
    assert_eq!(json(resp).await?["backend_terminated"], true);

    // the old cookies no longer identify anyone
    let resp = t.get("/", &cookie).await?;
    let body = json(resp).await?;
    assert!(body["frontend"].is_null());
    assert!(body["backend"].is_null());
    Ok(())
}

#[tokio::test]
async fn logout_endpoint_keeps_independent_backend_login() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let fe = t.frontend_session(1)?;
    let be = t.sessions.create_user_session(LoginType::Backend, None, 30, None)?.id;
    let resp = t.post("/logout", &format!("fe_session={fe}; be_session={be}"), serde_json::json!({})).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookies = set_cookies(&resp);
    assert_eq!(cookie_value(&cookies, "fe_session").as_deref(), Some(""));
    assert!(cookie_value(&cookies, "be_session").is_none());
    assert!(t.sessions.backend(LoginType::Backend).get(&be)?.is_some());
    assert_eq!(json(resp).await?["backend_terminated"], false);
    Ok(())
}

#[tokio::test]
async fn logout_endpoint_requires_frontend_user() -> Result<()> {
    let t = TestApp::new(Settings::default())?;
    let resp = t.post("/logout", "", serde_json::json!({})).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
