//! Fetch outcomes.

use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Structured page content produced by the content pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub canonical: Option<Url>,
    /// Converted body; empty when nothing convertible was found.
    pub markdown: String,
    pub links: Vec<Url>,
    /// Open-graph / twitter-card pairs keyed by property name.
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// The outcome of fetching one URL. Created by the fetcher, consumed by the
/// worker, optionally archived on the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: Url,
    /// HTTP status; 0 when the request never produced a response.
    pub status: u16,
    pub body: Option<String>,
    pub headers: HashMap<String, String>,
    pub content_type: Option<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub page: Option<PageContent>,
}

impl FetchResult {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            status: 0,
            body: None,
            headers: HashMap::new(),
            content_type: None,
            duration_ms: 0,
            error: None,
            error_kind: None,
            page: None,
        }
    }

    pub fn failure(url: Url, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut result = Self::new(url);
        result.error = Some(message.into());
        result.error_kind = Some(kind);
        result
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    /// Converted text, if the pipeline produced any.
    pub fn converted_text(&self) -> Option<&str> {
        self.page
            .as_ref()
            .map(|p| p.markdown.as_str())
            .filter(|m| !m.is_empty())
    }

    /// Title, falling back to the URL's last path segment.
    pub fn title_or_fallback(&self) -> String {
        if let Some(title) = self.page.as_ref().and_then(|p| p.title.clone()) {
            if !title.is_empty() {
                return title;
            }
        }
        self.url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.url.as_str())
            .to_string()
    }

    pub fn links(&self) -> &[Url] {
        self.page.as_ref().map(|p| p.links.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_2xx_and_no_error() {
        let mut result = FetchResult::new(Url::parse("https://example.com/x").unwrap());
        result.status = 200;
        assert!(result.is_success());

        result.status = 301;
        assert!(!result.is_success());

        result.status = 200;
        result.error = Some("tls handshake".into());
        assert!(!result.is_success());
    }

    #[test]
    fn title_fallback_uses_last_path_segment() {
        let result = FetchResult::new(Url::parse("https://example.com/wiki/Space+Home").unwrap());
        assert_eq!(result.title_or_fallback(), "Space+Home");

        let root = FetchResult::new(Url::parse("https://example.com/").unwrap());
        assert_eq!(root.title_or_fallback(), "https://example.com/");
    }

    #[test]
    fn converted_text_ignores_empty_markdown() {
        let mut result = FetchResult::new(Url::parse("https://example.com/x").unwrap());
        result.page = Some(PageContent::default());
        assert!(result.converted_text().is_none());

        result.page.as_mut().unwrap().markdown = "# Hi".into();
        assert_eq!(result.converted_text(), Some("# Hi"));
    }
}
