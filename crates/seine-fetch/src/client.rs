//! Per-job HTTP client construction from the auth snapshot.

use chrono::{TimeZone, Utc};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use seine_types::{AuthSnapshot, CrawlError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("seine/", env!("CARGO_PKG_VERSION"));

/// Build the job's HTTP client: one cookie jar seeded from the snapshot's
/// cookie list grouped by effective domain, default headers from the
/// snapshot, redirects on the default policy.
///
/// Cookies with a zero or long-past expiry are coerced to session cookies.
pub fn build_job_client(
    auth: Option<&AuthSnapshot>,
    base: &Url,
    timeout: Duration,
) -> Result<reqwest::Client, CrawlError> {
    let jar = Arc::new(Jar::default());
    let mut headers = HeaderMap::new();
    let fallback_host = base.host_str().unwrap_or_default();
    let now_unix = Utc::now().timestamp();

    if let Some(auth) = auth {
        for cookie in &auth.cookies {
            let domain = cookie.effective_domain(fallback_host);
            if domain.is_empty() {
                warn!(cookie = %cookie.name, "cookie has no resolvable domain, skipped");
                continue;
            }
            let Ok(cookie_url) = Url::parse(&format!("https://{domain}/")) else {
                warn!(cookie = %cookie.name, domain = %domain, "invalid cookie domain, skipped");
                continue;
            };
            jar.add_cookie_str(&cookie_header(cookie, &domain, now_unix), &cookie_url);
        }

        for (name, value) in &auth.headers {
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(header = %name, "invalid auth header name, skipped");
                continue;
            };
            let Ok(header_value) = HeaderValue::from_str(value) else {
                warn!(header = %name, "invalid auth header value, skipped");
                continue;
            };
            headers.insert(header_name, header_value);
        }

        debug!(
            cookies = auth.cookies.len(),
            headers = auth.headers.len(),
            "seeded per-job http client from auth snapshot"
        );
    }

    reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .cookie_provider(jar)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|e| CrawlError::fatal_config(format!("http client: {e}")))
}

fn cookie_header(cookie: &seine_types::CookieSpec, domain: &str, now_unix: i64) -> String {
    let mut header = format!("{}={}; Domain={}", cookie.name, cookie.value, domain);
    let path = if cookie.path.is_empty() { "/" } else { &cookie.path };
    header.push_str(&format!("; Path={path}"));
    if let Some(expires) = cookie.coerced_expires(now_unix) {
        if let Some(when) = Utc.timestamp_opt(expires, 0).single() {
            header.push_str(&format!(
                "; Expires={}",
                when.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
    }
    if cookie.secure {
        header.push_str("; Secure");
    }
    if cookie.http_only {
        header.push_str("; HttpOnly");
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use seine_types::CookieSpec;

    fn cookie(expires: i64) -> CookieSpec {
        CookieSpec {
            name: "JSESSIONID".into(),
            value: "abc123".into(),
            domain: ".jira.example.com".into(),
            path: "".into(),
            expires,
            secure: true,
            http_only: true,
        }
    }

    #[test]
    fn session_cookie_has_no_expires() {
        let header = cookie_header(&cookie(0), "jira.example.com", 1_700_000_000);
        assert!(header.starts_with("JSESSIONID=abc123; Domain=jira.example.com; Path=/"));
        assert!(!header.contains("Expires="));
        assert!(header.contains("Secure"));
        assert!(header.contains("HttpOnly"));
    }

    #[test]
    fn future_expiry_is_kept() {
        let now = 1_700_000_000;
        let header = cookie_header(&cookie(now + 3600), "jira.example.com", now);
        assert!(header.contains("Expires="));
    }

    #[test]
    fn builds_client_with_snapshot() {
        let auth = AuthSnapshot {
            cookies: vec![cookie(0)],
            headers: [("Authorization".to_string(), "Bearer abc".to_string())]
                .into_iter()
                .collect(),
        };
        let base = Url::parse("https://jira.example.com").unwrap();
        let client = build_job_client(Some(&auth), &base, Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn builds_default_client_without_snapshot() {
        let base = Url::parse("https://example.com").unwrap();
        assert!(build_job_client(None, &base, Duration::from_secs(5)).is_ok());
    }
}
