use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use session_bridge::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config_path = std::env::var("SESSION_BRIDGE_CONFIG").ok().map(PathBuf::from);
    let mut settings = Settings::load_or_default(config_path.as_deref())?;
    settings.apply_env()?;
    info!(
        target: "startup",
        "session-bridge starting: RUST_LOG='{}', config={:?}, http_port={}, directory={:?}",
        rust_log, config_path, settings.http_port, settings.directory_file
    );

    session_bridge::server::run(settings).await
}
