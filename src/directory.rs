//! User directory: the lookup surface for frontend and backend accounts.
//!
//! The bridge only ever asks for one backend account per request. Lookups are
//! restricted to root-scope accounts (`pid == 0`) that are not disabled, and the
//! first matching record wins.

use std::path::Path;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

use crate::error::AppResult;
use crate::identity::{BackendUserRecord, FrontendUserRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendUserLookup {
    /// Explicit backend account id from the frontend user record.
    Uid(u64),
    /// Backend account whose `frontend_username` equals this name.
    FrontendUsername(String),
}

pub trait UserDirectory: Send + Sync {
    /// Root-scope backend account for a mapping lookup, if any.
    fn find_backend_user(&self, lookup: &BackendUserLookup) -> AppResult<Option<BackendUserRecord>>;
    /// Backend account by id, used when materializing an authenticated backend session.
    fn backend_user(&self, uid: u64) -> AppResult<Option<BackendUserRecord>>;
    fn frontend_user(&self, uid: u64) -> AppResult<Option<FrontendUserRecord>>;
    fn frontend_user_by_name(&self, username: &str) -> AppResult<Option<FrontendUserRecord>>;
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    frontend_users: Vec<FrontendUserRecord>,
    #[serde(default)]
    backend_users: Vec<BackendUserRecord>,
}

/// Directory held in memory, optionally seeded from a JSON file of the form
/// `{"frontend_users": [...], "backend_users": [...]}`.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    frontend: RwLock<Vec<FrontendUserRecord>>,
    backend: RwLock<Vec<BackendUserRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self { Self::default() }

    pub fn load_json(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read user directory file: {}", path.display()))?;
        let file: DirectoryFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid user directory JSON in {}", path.display()))?;
        info!(
            target: "startup",
            "user directory loaded from {}: frontend_users={}, backend_users={}",
            path.display(), file.frontend_users.len(), file.backend_users.len()
        );
        Ok(Self { frontend: RwLock::new(file.frontend_users), backend: RwLock::new(file.backend_users) })
    }

    pub fn insert_frontend(&self, user: FrontendUserRecord) {
        let mut users = self.frontend.write();
        users.retain(|u| u.uid != user.uid);
        users.push(user);
    }

    pub fn insert_backend(&self, user: BackendUserRecord) {
        let mut users = self.backend.write();
        users.retain(|u| u.uid != user.uid);
        users.push(user);
    }
}

impl UserDirectory for InMemoryDirectory {
    fn find_backend_user(&self, lookup: &BackendUserLookup) -> AppResult<Option<BackendUserRecord>> {
        let users = self.backend.read();
        let found = users
            .iter()
            .filter(|u| u.pid == 0 && !u.disabled)
            .find(|u| match lookup {
                BackendUserLookup::Uid(uid) => u.uid == *uid,
                BackendUserLookup::FrontendUsername(name) => u.frontend_username.as_deref() == Some(name.as_str()),
            })
            .cloned();
        Ok(found)
    }

    fn backend_user(&self, uid: u64) -> AppResult<Option<BackendUserRecord>> {
        Ok(self.backend.read().iter().find(|u| u.uid == uid && !u.disabled).cloned())
    }

    fn frontend_user(&self, uid: u64) -> AppResult<Option<FrontendUserRecord>> {
        Ok(self.frontend.read().iter().find(|u| u.uid == uid).cloned())
    }

    fn frontend_user_by_name(&self, username: &str) -> AppResult<Option<FrontendUserRecord>> {
        Ok(self.frontend.read().iter().find(|u| u.username == username).cloned())
    }
}
