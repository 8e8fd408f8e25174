use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Which authentication subsystem a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    Frontend,
    Backend,
}

impl LoginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginType::Frontend => "FE",
            LoginType::Backend => "BE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: u64,
    pub login_type: LoginType,
    /// Last activity, unix seconds. May lie in the future when a fake timeout was applied.
    pub timestamp: i64,
    /// Frontend session id this backend session was simulated for.
    #[serde(default)]
    pub simulated_for: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl SessionRecord {
    /// A lifetime of zero or less never expires.
    pub fn is_expired(&self, lifetime_secs: i64, now: i64) -> bool {
        lifetime_secs > 0 && self.timestamp.saturating_add(lifetime_secs) < now
    }

    pub fn is_simulation_of(&self, frontend_session_id: &str) -> bool {
        self.simulated_for.as_deref() == Some(frontend_session_id)
    }
}

/// Storage for session records of one login type.
pub trait SessionBackend: Send + Sync {
    fn get(&self, id: &str) -> AppResult<Option<SessionRecord>>;
    fn set(&self, id: &str, record: SessionRecord) -> AppResult<()>;
    /// Returns true when a record was removed.
    fn remove(&self, id: &str) -> AppResult<bool>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemorySessionBackend {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl InMemorySessionBackend {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.records.read().len() }

    pub fn is_empty(&self) -> bool { self.records.read().is_empty() }
}

impl SessionBackend for InMemorySessionBackend {
    fn get(&self, id: &str) -> AppResult<Option<SessionRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn set(&self, id: &str, record: SessionRecord) -> AppResult<()> {
        self.records.write().insert(id.to_string(), record);
        Ok(())
    }

    fn remove(&self, id: &str) -> AppResult<bool> {
        Ok(self.records.write().remove(id).is_some())
    }
}

pub fn gen_id() -> AppResult<String> {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)
        .map_err(|e| AppError::internal("session_id".to_string(), format!("random source unavailable: {}", e)))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Hands out the login-type scoped session backends and owns the session-creation primitive.
#[derive(Clone)]
pub struct SessionManager {
    frontend: Arc<dyn SessionBackend>,
    backend: Arc<dyn SessionBackend>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySessionBackend::new()), Arc::new(InMemorySessionBackend::new()))
    }
}

impl SessionManager {
    pub fn new(frontend: Arc<dyn SessionBackend>, backend: Arc<dyn SessionBackend>) -> Self {
        Self { frontend, backend }
    }

    pub fn backend(&self, login_type: LoginType) -> Arc<dyn SessionBackend> {
        match login_type {
            LoginType::Frontend => self.frontend.clone(),
            LoginType::Backend => self.backend.clone(),
        }
    }

    /// Create and persist a session for `user_id`. A caller supplied `id` is used
    /// verbatim (and replaces any record stored under it), otherwise a fresh one is generated.
    pub fn create_user_session(
        &self,
        login_type: LoginType,
        id: Option<String>,
        user_id: u64,
        simulated_for: Option<String>,
    ) -> AppResult<SessionRecord> {
        let id = match id {
            Some(id) => id,
            None => gen_id()?,
        };
        let record = SessionRecord {
            id: id.clone(),
            user_id,
            login_type,
            timestamp: now_secs(),
            simulated_for,
            data: serde_json::Map::new(),
        };
        self.backend(login_type).set(&id, record.clone())?;
        debug!(target: "session", login_type = login_type.as_str(), user_id, "session.create");
        Ok(record)
    }
}
