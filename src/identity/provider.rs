use std::sync::Arc;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use tracing::{debug, info};

use super::principal::FrontendUser;
use super::session::{LoginType, SessionManager};
use crate::directory::UserDirectory;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> AppResult<FrontendUser>;
}

/// Frontend login against the user directory with Argon2 password hashes.
/// Stands in for the site's own frontend authentication; the bridge never calls it.
#[derive(Clone)]
pub struct LocalAuthProvider {
    pub directory: Arc<dyn UserDirectory>,
    pub sessions: SessionManager,
}

impl LocalAuthProvider {
    pub fn new(directory: Arc<dyn UserDirectory>, sessions: SessionManager) -> Self { Self { directory, sessions } }

    /// PHC string for seeding directory records; random 16-byte salt.
    pub fn hash_password(password: &str) -> AppResult<String> {
        let hashing_failed = |e: String| AppError::internal("password_hash".to_string(), e);
        let mut salt = [0u8; 16];
        getrandom::getrandom(&mut salt).map_err(|e| hashing_failed(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt).map_err(|e| hashing_failed(e.to_string()))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|phc| phc.to_string())
            .map_err(|e| hashing_failed(e.to_string()))
    }

    /// A stored hash that does not parse never matches.
    fn password_matches(stored: &str, password: &str) -> bool {
        PasswordHash::new(stored)
            .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    }
}

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest) -> AppResult<FrontendUser> {
        let invalid = || AppError::auth("invalid_credentials", "invalid username or password");
        let Some(record) = self.directory.frontend_user_by_name(&req.username)? else { return Err(invalid()); };
        let matches = record
            .password_hash
            .as_deref()
            .is_some_and(|stored| Self::password_matches(stored, &req.password));
        if !matches {
            debug!(target: "auth", user = %req.username, "frontend login rejected");
            return Err(invalid());
        }
        let session = self.sessions.create_user_session(LoginType::Frontend, None, record.uid, None)?;
        info!(target: "auth", user = %record.username, uid = record.uid, "frontend login");
        Ok(FrontendUser { session_id: session.id, record })
    }
}
