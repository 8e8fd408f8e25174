pub mod bridge;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod server;

pub use bridge::{LogoutCoordinator, SessionBridge};
pub use config::Settings;
pub use error::{AppError, AppResult};
