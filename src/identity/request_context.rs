use axum::extract::Request;

use super::{BackendUser, FrontendUser};

/// Per-request identity state, carried as a request extension.
/// The authentication stages fill it in; the bridge and handlers read it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub frontend: Option<FrontendUser>,
    pub backend: Option<BackendUser>,
}

impl RequestContext {
    pub fn is_frontend_logged_in(&self) -> bool { self.frontend.is_some() }

    pub fn is_backend_logged_in(&self) -> bool { self.backend.is_some() }
}

pub fn context(req: &Request) -> Option<&RequestContext> {
    req.extensions().get::<RequestContext>()
}

pub fn context_mut(req: &mut Request) -> &mut RequestContext {
    req.extensions_mut().get_or_insert_default::<RequestContext>()
}
