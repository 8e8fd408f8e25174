use tracing::{debug, info};

use crate::error::AppResult;
use crate::identity::{LoginType, RequestContext, SessionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutEvent {
    pub login_type: LoginType,
    pub session_id: String,
}

impl LogoutEvent {
    pub fn frontend(session_id: impl Into<String>) -> Self {
        Self { login_type: LoginType::Frontend, session_id: session_id.into() }
    }

    pub fn backend(session_id: impl Into<String>) -> Self {
        Self { login_type: LoginType::Backend, session_id: session_id.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    NotFrontend,
    NoBackendUser,
    /// The backend session is not the one simulated for this frontend session.
    UnrelatedSession,
    Terminated,
}

/// Ends the simulated backend session when its frontend session logs out.
/// Runs inside the frontend authentication stage, where the backend user of the
/// request is still known; the bridge only sees the aftermath.
#[derive(Clone)]
pub struct LogoutCoordinator {
    sessions: SessionManager,
}

impl LogoutCoordinator {
    pub fn new(sessions: SessionManager) -> Self { Self { sessions } }

    /// Called on every logout. The simulation cookie is left for the bridge to clear.
    pub fn on_logout(&self, event: &LogoutEvent, ctx: &mut RequestContext) -> AppResult<LogoutOutcome> {
        if event.login_type != LoginType::Frontend {
            return Ok(LogoutOutcome::NotFrontend);
        }
        let Some(backend) = ctx.backend.as_ref() else {
            debug!(target: "simulate", "frontend logout without backend user");
            return Ok(LogoutOutcome::NoBackendUser);
        };
        if !backend.session.is_simulation_of(&event.session_id) {
            debug!(target: "simulate", "frontend logout keeps independent backend session");
            return Ok(LogoutOutcome::UnrelatedSession);
        }
        self.sessions.backend(LoginType::Backend).remove(&backend.session.id)?;
        info!(target: "simulate", user = %backend.record.username, "simulated backend session terminated on frontend logout");
        ctx.backend = None;
        Ok(LogoutOutcome::Terminated)
    }
}
