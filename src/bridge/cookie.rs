//! Session cookie transport: reading cookies from requests, rewriting the request
//! cookie header, and rendering `Set-Cookie` headers under the configured policy.
//!
//! Cookie writes are collected in a `CookieDiff` and applied to the outgoing
//! response in one place, so the secure-transport check and domain resolution
//! happen exactly once per cookie.

use axum::extract::Request;
use axum::http::header::{COOKIE, HOST, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Uri};
use axum::response::Response;
use regex::RegexBuilder;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::CookieSettings;
use crate::error::{AppError, AppResult};
use crate::identity::LoginType;

/// Attributes that make a client drop the cookie immediately.
pub const EXPIRED_ATTRS: &str = "expires=Thu, 01-Jan-1970 00:00:01 GMT; Max-Age=0";

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(s) = header.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some(eq) = p.find('=') {
                let (k, v) = p.split_at(eq);
                if k == name { return Some(v[1..].to_string()); }
            } else if p == name {
                return Some(String::new());
            }
        }
    }
    None
}

/// Set `name=value` in the request's cookie header, replacing an existing entry.
/// All cookie headers are folded into one.
pub fn with_request_cookie(headers: &mut HeaderMap, name: &str, value: &str) -> AppResult<()> {
    let mut pairs: Vec<String> = Vec::new();
    for header in headers.get_all(COOKIE) {
        let Ok(s) = header.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if p.is_empty() { continue; }
            let key = p.split('=').next().unwrap_or(p);
            if key != name { pairs.push(p.to_string()); }
        }
    }
    pairs.push(format!("{}={}", name, value));
    let joined = HeaderValue::from_str(&pairs.join("; "))
        .map_err(|e| AppError::user("bad_cookie".to_string(), format!("cookie {} not representable: {}", name, e)))?;
    headers.insert(COOKIE, joined);
    Ok(())
}

/// Request facts the cookie policy depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieTarget {
    /// Host without port.
    pub host: String,
    pub https: bool,
}

impl CookieTarget {
    pub fn new(headers: &HeaderMap, uri: &Uri, trust_forwarded_proto: bool) -> Self {
        let host = uri.host().map(|h| h.to_string())
            .or_else(|| headers.get(HOST).and_then(|v| v.to_str().ok()).map(strip_port))
            .unwrap_or_default();
        let forwarded_https = trust_forwarded_proto
            && headers.get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').next().unwrap_or("").trim().eq_ignore_ascii_case("https"))
                .unwrap_or(false);
        let https = uri.scheme_str() == Some("https") || forwarded_https;
        Self { host, https }
    }

    pub fn from_request(req: &Request, trust_forwarded_proto: bool) -> Self {
        Self::new(req.headers(), req.uri(), trust_forwarded_proto)
    }
}

fn strip_port(host: &str) -> String {
    // IPv6 literals keep their brackets
    if let Some(end) = host.find(']') {
        return host[..=end].to_string();
    }
    host.split(':').next().unwrap_or(host).to_string()
}

#[derive(Debug, Error)]
pub enum DomainPatternError {
    #[error("missing closing delimiter")]
    Unterminated,
    #[error("unsupported modifier '{0}'")]
    Modifier(char),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Match a `/pattern/flags` domain expression against `host`; the first match is the domain.
pub fn match_domain_pattern(pattern: &str, host: &str) -> Result<Option<String>, DomainPatternError> {
    let body = pattern.strip_prefix('/').ok_or(DomainPatternError::Unterminated)?;
    let end = body.rfind('/').ok_or(DomainPatternError::Unterminated)?;
    let (expr, flags) = (&body[..end], &body[end + 1..]);
    let mut builder = RegexBuilder::new(expr);
    for flag in flags.chars() {
        match flag {
            'i' => { builder.case_insensitive(true); }
            'm' => { builder.multi_line(true); }
            's' => { builder.dot_matches_new_line(true); }
            'x' => { builder.ignore_whitespace(true); }
            'u' => {}
            other => return Err(DomainPatternError::Modifier(other)),
        }
    }
    let re = builder.build()?;
    Ok(re.find(host).map(|m| m.as_str().to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieMutation {
    pub name: String,
    /// Empty value deletes the cookie.
    pub value: String,
    /// Login type whose domain override applies, if any.
    pub login_type: Option<LoginType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieDiff {
    mutations: Vec<CookieMutation>,
}

impl CookieDiff {
    pub fn set(&mut self, name: &str, value: &str, login_type: Option<LoginType>) -> &mut Self {
        self.mutations.push(CookieMutation { name: name.to_string(), value: value.to_string(), login_type });
        self
    }

    pub fn clear(&mut self, name: &str, login_type: Option<LoginType>) -> &mut Self {
        self.set(name, "", login_type)
    }

    pub fn is_empty(&self) -> bool { self.mutations.is_empty() }

    pub fn mutations(&self) -> &[CookieMutation] { &self.mutations }

    /// Render every mutation as a `Set-Cookie` header on `response`, in insertion order.
    pub fn apply(&self, response: &mut Response, writer: &SessionCookieWriter<'_>, target: &CookieTarget) -> AppResult<()> {
        for m in &self.mutations {
            let value = writer.header_value(m, target)?;
            response.headers_mut().append(SET_COOKIE, value);
        }
        Ok(())
    }
}

/// Renders session cookies under the configured cookie policy.
pub struct SessionCookieWriter<'a> {
    settings: &'a CookieSettings,
}

impl<'a> SessionCookieWriter<'a> {
    pub fn new(settings: &'a CookieSettings) -> Self { Self { settings } }

    /// Secure cookies are mandatory when configured; plain HTTP is a configuration error.
    pub fn ensure_transport(&self, target: &CookieTarget) -> AppResult<()> {
        if self.settings.secure && !target.https {
            return Err(AppError::config(
                "cookie_secure",
                "Cookie was not set since HTTPS was forced in the cookie settings.",
            ));
        }
        Ok(())
    }

    /// Domain for a cookie of `login_type`; empty when none applies or the pattern is broken.
    pub fn cookie_domain(&self, login_type: Option<LoginType>, host: &str) -> String {
        let configured = login_type
            .and_then(|lt| self.settings.login_type_domains.get(&lt))
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.settings.domain);
        if configured.is_empty() {
            return String::new();
        }
        if !configured.starts_with('/') {
            return configured.clone();
        }
        match match_domain_pattern(configured, host) {
            Ok(Some(domain)) => domain,
            Ok(None) => {
                debug!(target: "cookie", host, "cookie domain pattern did not match host");
                String::new()
            }
            Err(e) => {
                error!(
                    target: "cookie",
                    "The regular expression for the cookie domain ({}) contains errors: {}. The session is not shared across sub-domains.",
                    configured, e
                );
                String::new()
            }
        }
    }

    pub fn render(&self, m: &CookieMutation, target: &CookieTarget) -> AppResult<String> {
        self.ensure_transport(target)?;
        let domain = self.cookie_domain(m.login_type, &target.host);
        let path = if domain.is_empty() { self.settings.site_path.as_str() } else { "/" };
        let mut out = format!("{}={}; Path={}", m.name, m.value, path);
        if self.settings.secure && target.https { out.push_str("; Secure"); }
        if self.settings.http_only { out.push_str("; HttpOnly"); }
        if !domain.is_empty() {
            out.push_str("; Domain=");
            out.push_str(&domain);
        }
        if m.value.is_empty() {
            out.push_str("; ");
            out.push_str(EXPIRED_ATTRS);
        }
        Ok(out)
    }

    pub fn header_value(&self, m: &CookieMutation, target: &CookieTarget) -> AppResult<HeaderValue> {
        let rendered = self.render(m, target)?;
        HeaderValue::from_str(&rendered)
            .map_err(|e| AppError::internal("bad_cookie".to_string(), format!("cookie {} not representable: {}", m.name, e)))
    }
}

#[cfg(test)]
#[path = "cookie_tests.rs"]
mod cookie_tests;
