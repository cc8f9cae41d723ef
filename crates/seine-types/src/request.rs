//! Queue items and source categories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Closed set of source categories the engine understands.
///
/// Labels parse case-insensitively; anything that is not a known system
/// falls back to `Web`, which applies no source-specific link filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Jira,
    Confluence,
    #[default]
    Web,
}

impl SourceKind {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "jira" => Self::Jira,
            "confluence" => Self::Confluence,
            _ => Self::Web,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jira => "jira",
            Self::Confluence => "confluence",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default priority for seed and discovered URLs; lower values pop earlier.
pub const DEFAULT_PRIORITY: u8 = 100;

/// A unit of crawl work.
///
/// Created by the controller (seeds) or a worker (discovered links), owned by
/// the queue until popped, then by the fetching worker until its outcome is
/// recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRequest {
    pub url: Url,
    /// Distance from the seed; seeds are depth 0.
    pub depth: u32,
    pub parent: Option<Url>,
    pub job_id: Uuid,
    pub source: SourceKind,
    pub entity_type: String,
    pub attempts: u32,
    /// Lower pops earlier; ties broken by enqueue order.
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
}

impl UrlRequest {
    pub fn seed(url: Url, job_id: Uuid, source: SourceKind, entity_type: impl Into<String>) -> Self {
        Self {
            url,
            depth: 0,
            parent: None,
            job_id,
            source,
            entity_type: entity_type.into(),
            attempts: 0,
            priority: DEFAULT_PRIORITY,
            enqueued_at: Utc::now(),
        }
    }

    /// A link discovered on this page: depth + 1, categories inherited.
    pub fn child(&self, url: Url) -> Self {
        Self {
            url,
            depth: self.depth + 1,
            parent: Some(self.url.clone()),
            job_id: self.job_id,
            source: self.source,
            entity_type: self.entity_type.clone(),
            attempts: 0,
            priority: self.priority,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_parses_case_insensitively() {
        assert_eq!(SourceKind::parse("JIRA"), SourceKind::Jira);
        assert_eq!(SourceKind::parse("Confluence"), SourceKind::Confluence);
        assert_eq!(SourceKind::parse("web"), SourceKind::Web);
        assert_eq!(SourceKind::parse("sharepoint"), SourceKind::Web);
        assert_eq!(SourceKind::parse("  jira "), SourceKind::Jira);
    }

    #[test]
    fn child_inherits_and_deepens() {
        let seed = UrlRequest::seed(
            Url::parse("https://example.com/a").unwrap(),
            Uuid::new_v4(),
            SourceKind::Jira,
            "issue",
        );
        let child = seed.child(Url::parse("https://example.com/b").unwrap());
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent.as_ref().unwrap().as_str(), "https://example.com/a");
        assert_eq!(child.job_id, seed.job_id);
        assert_eq!(child.source, SourceKind::Jira);
        assert_eq!(child.entity_type, "issue");
        assert_eq!(child.attempts, 0);
    }
}
