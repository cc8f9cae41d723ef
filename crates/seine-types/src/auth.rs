//! Snapshotted authentication material.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Seconds of past-expiry tolerance before a cookie is demoted to a session
/// cookie.
const STALE_EXPIRY_GRACE_SECS: i64 = 24 * 60 * 60;

/// Credentials captured at job submission and frozen for the job's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    #[serde(default)]
    pub cookies: Vec<CookieSpec>,
    /// Extra headers sent on every request (e.g. a bearer token).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl AuthSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.headers.is_empty()
    }
}

/// One cookie in the snapshot. `expires` is unix seconds; 0 means session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub expires: i64,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl CookieSpec {
    /// Domain the cookie is grouped under: leading dot stripped, falling back
    /// to `fallback_host` when the snapshot carries no domain.
    pub fn effective_domain(&self, fallback_host: &str) -> String {
        let trimmed = self.domain.trim_start_matches('.');
        if trimmed.is_empty() {
            fallback_host.to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Expiry after coercion: zero or long-past timestamps become session
    /// cookies (`None`).
    pub fn coerced_expires(&self, now_unix: i64) -> Option<i64> {
        if self.expires == 0 || self.expires < now_unix - STALE_EXPIRY_GRACE_SECS {
            None
        } else {
            Some(self.expires)
        }
    }
}
