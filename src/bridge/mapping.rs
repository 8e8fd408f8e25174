use tracing::debug;

use crate::directory::{BackendUserLookup, UserDirectory};
use crate::error::AppResult;
use crate::identity::{BackendUserRecord, FrontendUserRecord};

/// Lookup key for a frontend user: the explicit backend id when non-zero,
/// otherwise the username. A user with neither has no mapping.
pub fn lookup_for(user: &FrontendUserRecord) -> Option<BackendUserLookup> {
    match user.backend_user {
        Some(uid) if uid > 0 => Some(BackendUserLookup::Uid(uid)),
        _ if !user.username.is_empty() => Some(BackendUserLookup::FrontendUsername(user.username.clone())),
        _ => None,
    }
}

/// Backend account the frontend user is entitled to simulate, if any.
/// An explicit id that does not resolve does not fall back to the username.
pub fn resolve_backend_user(directory: &dyn UserDirectory, user: &FrontendUserRecord) -> AppResult<Option<BackendUserRecord>> {
    let Some(lookup) = lookup_for(user) else {
        debug!(target: "simulate", uid = user.uid, "frontend user has neither backend id nor username");
        return Ok(None);
    };
    let found = directory.find_backend_user(&lookup)?;
    debug!(target: "simulate", ?lookup, found = found.as_ref().map(|u| u.uid), "backend user lookup");
    Ok(found)
}
