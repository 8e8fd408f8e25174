//! Frontend and backend identities, their sessions, and the authentication stages
//! that turn session cookies into authenticated users on the request context.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod request_context;
mod authenticator;

pub use principal::{BackendUser, BackendUserRecord, FrontendUser, FrontendUserRecord};
pub use session::{gen_id, now_secs, InMemorySessionBackend, LoginType, SessionBackend, SessionManager, SessionRecord};
pub use provider::{AuthProvider, LocalAuthProvider, LoginRequest};
pub use request_context::{context, context_mut, RequestContext};
pub use authenticator::{BackendAuthenticator, FrontendAuthenticator};
