//!
//! session-bridge settings
//! -----------------------
//! Settings are read once at startup: serde defaults, then an optional JSON file,
//! then `SESSION_BRIDGE_*` environment overrides. The resulting `Settings` is
//! shared read-only by every request.
//!
//! Layout:
//! - `bridge`: the simulation options (cookie name, activation parameter, fake timeout).
//! - `cookies`: cookie policy shared by every session cookie the service writes.
//! - `sessions`: session lifetimes per login type.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::LoginType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid settings JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct BridgeSettings {
    /// Name of the cookie marking a simulated backend session.
    #[serde(default = "BridgeSettings::default_cookie_name")]
    pub cookie_name: String,
    /// Query parameter that activates simulation when `on_link_parameter` is set.
    #[serde(default = "BridgeSettings::default_link_parameter_name")]
    pub link_parameter_name: String,
    #[serde(default)]
    pub on_link_parameter: bool,
    /// Seconds added to a new backend session's timestamp; 0 disables.
    #[serde(default)]
    pub fake_timeout: u64,
    /// Redirect target after activation through the link parameter.
    #[serde(default = "BridgeSettings::default_admin_entry_path")]
    pub admin_entry_path: String,
}

impl BridgeSettings {
    fn default_cookie_name() -> String { "be_simulated".to_string() }
    fn default_link_parameter_name() -> String { "simulate_be".to_string() }
    fn default_admin_entry_path() -> String { "/admin".to_string() }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            cookie_name: Self::default_cookie_name(),
            link_parameter_name: Self::default_link_parameter_name(),
            on_link_parameter: false,
            fake_timeout: 0,
            admin_entry_path: Self::default_admin_entry_path(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CookieSettings {
    /// Require HTTPS for every cookie written. Plain HTTP requests then fail.
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "CookieSettings::default_true")]
    pub http_only: bool,
    /// Cookie domain, or a `/regex/flags` pattern matched against the request host.
    #[serde(default)]
    pub domain: String,
    /// Per login type domain overriding `domain` when non-empty.
    #[serde(default)]
    pub login_type_domains: HashMap<LoginType, String>,
    /// Cookie path used when no domain applies.
    #[serde(default = "CookieSettings::default_site_path")]
    pub site_path: String,
    #[serde(default = "CookieSettings::default_frontend_cookie_name")]
    pub frontend_cookie_name: String,
    #[serde(default = "CookieSettings::default_backend_cookie_name")]
    pub backend_cookie_name: String,
    /// Honour `X-Forwarded-Proto: https` from a terminating proxy.
    #[serde(default)]
    pub trust_forwarded_proto: bool,
}

impl CookieSettings {
    fn default_true() -> bool { true }
    fn default_site_path() -> String { "/".to_string() }
    fn default_frontend_cookie_name() -> String { "fe_session".to_string() }
    fn default_backend_cookie_name() -> String { "be_session".to_string() }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: false,
            http_only: true,
            domain: String::new(),
            login_type_domains: HashMap::new(),
            site_path: Self::default_site_path(),
            frontend_cookie_name: Self::default_frontend_cookie_name(),
            backend_cookie_name: Self::default_backend_cookie_name(),
            trust_forwarded_proto: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SessionSettings {
    /// Inactivity lifetime in seconds; 0 never expires.
    #[serde(default = "SessionSettings::default_frontend_lifetime")]
    pub frontend_lifetime: i64,
    #[serde(default = "SessionSettings::default_backend_lifetime")]
    pub backend_lifetime: i64,
}

impl SessionSettings {
    fn default_frontend_lifetime() -> i64 { 6_000 }
    fn default_backend_lifetime() -> i64 { 28_800 }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { frontend_lifetime: Self::default_frontend_lifetime(), backend_lifetime: Self::default_backend_lifetime() }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub cookies: CookieSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default = "Settings::default_http_port")]
    pub http_port: u16,
    /// Optional JSON seed file for the in-memory user directory.
    #[serde(default)]
    pub directory_file: Option<PathBuf>,
}

impl Settings {
    fn default_http_port() -> u16 { 7878 }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read settings from `path` when given and existing, falling back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else { return Ok(Self::default()); };
        if !path.exists() {
            tracing::warn!(target: "startup", "settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_json_str(&text)
    }

    /// Apply `SESSION_BRIDGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; unset keys leave the value unchanged.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SESSION_BRIDGE_COOKIE_NAME") { self.bridge.cookie_name = v; }
        if let Some(v) = lookup("SESSION_BRIDGE_LINK_PARAMETER") { self.bridge.link_parameter_name = v; }
        if let Some(v) = lookup("SESSION_BRIDGE_ON_LINK_PARAMETER") {
            self.bridge.on_link_parameter = parse_bool("SESSION_BRIDGE_ON_LINK_PARAMETER", &v)?;
        }
        if let Some(v) = lookup("SESSION_BRIDGE_FAKE_TIMEOUT") {
            self.bridge.fake_timeout = parse_num("SESSION_BRIDGE_FAKE_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("SESSION_BRIDGE_ADMIN_PATH") { self.bridge.admin_entry_path = v; }
        if let Some(v) = lookup("SESSION_BRIDGE_COOKIE_SECURE") {
            self.cookies.secure = parse_bool("SESSION_BRIDGE_COOKIE_SECURE", &v)?;
        }
        if let Some(v) = lookup("SESSION_BRIDGE_COOKIE_HTTP_ONLY") {
            self.cookies.http_only = parse_bool("SESSION_BRIDGE_COOKIE_HTTP_ONLY", &v)?;
        }
        if let Some(v) = lookup("SESSION_BRIDGE_COOKIE_DOMAIN") { self.cookies.domain = v; }
        if let Some(v) = lookup("SESSION_BRIDGE_SITE_PATH") { self.cookies.site_path = v; }
        if let Some(v) = lookup("SESSION_BRIDGE_TRUST_FORWARDED_PROTO") {
            self.cookies.trust_forwarded_proto = parse_bool("SESSION_BRIDGE_TRUST_FORWARDED_PROTO", &v)?;
        }
        if let Some(v) = lookup("SESSION_BRIDGE_HTTP_PORT") {
            self.http_port = parse_num("SESSION_BRIDGE_HTTP_PORT", &v)?;
        }
        if let Some(v) = lookup("SESSION_BRIDGE_DIRECTORY") { self.directory_file = Some(PathBuf::from(v)); }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge: BridgeSettings::default(),
            cookies: CookieSettings::default(),
            sessions: SessionSettings::default(),
            http_port: Self::default_http_port(),
            directory_file: None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
