use serde::{Deserialize, Serialize};

use super::session::SessionRecord;

/// A frontend (website) account as stored in the user directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FrontendUserRecord {
    pub uid: u64,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,
    /// Explicit backend account this user may simulate. Zero means "not set".
    #[serde(default)]
    pub backend_user: Option<u64>,
    #[serde(default, flatten)]
    pub attrs: serde_json::Map<String, serde_json::Value>,
}

/// A backend (administrative) account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendUserRecord {
    pub uid: u64,
    /// Storage scope; only root-scope (0) accounts can be simulated.
    #[serde(default)]
    pub pid: u64,
    pub username: String,
    /// Frontend username entitled to simulate this account.
    #[serde(default)]
    pub frontend_username: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub disabled: bool,
}

/// An authenticated frontend user for the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontendUser {
    pub session_id: String,
    pub record: FrontendUserRecord,
}

/// An authenticated backend user for the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendUser {
    pub session: SessionRecord,
    pub record: BackendUserRecord,
}

impl BackendUser {
    pub fn is_simulated(&self) -> bool { self.session.simulated_for.is_some() }
}
