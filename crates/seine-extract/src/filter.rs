//! Source-aware and user-configured URL filtering.

use regex::Regex;
use seine_types::SourceKind;
use tracing::warn;
use url::Url;

/// Cap on diagnostic sample lists.
const SAMPLE_CAP: usize = 5;

/// Path prefixes that are never content pages on a Jira host.
const JIRA_REJECT_PREFIXES: &[&str] = &[
    "/rest/api/",
    "/rest/agile/",
    "/rest/auth/",
    "/secure/attachment/",
    "/plugins/servlet/",
    "/secure/admin/",
    "/secure/project/",
];

/// Path prefixes that are never content pages on a Confluence host.
const CONFLUENCE_REJECT_PREFIXES: &[&str] = &[
    "/rest/api/",
    "/download/attachments/",
    "/download/thumbnails/",
    "/admin/",
    "/people/",
];

/// Result of a filter pass: survivors plus bounded samples of what was
/// dropped, for diagnostics.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub passed: Vec<Url>,
    pub excluded_samples: Vec<String>,
    pub not_included_samples: Vec<String>,
}

/// Compiled include/exclude rules plus the source-specific reject tables.
///
/// Exclude runs before include; a non-empty include list means a URL must
/// match at least one include pattern to survive. Invalid regexes are logged
/// and skipped, never fatal.
pub struct LinkFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl LinkFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: compile_patterns(include, "include"),
            exclude: compile_patterns(exclude, "exclude"),
        }
    }

    /// Filter discovered URLs for a page of the given source category.
    /// `seed` anchors the same-host rule for jira/confluence sources.
    pub fn apply(&self, urls: Vec<Url>, seed: &Url, source: SourceKind) -> FilterOutcome {
        self.run(urls, Some((seed, source)))
    }

    /// Generic pass only (exclude, then include). Pagination cursors go
    /// through here: they live under the API paths the source tables reject.
    pub fn apply_generic(&self, urls: Vec<Url>) -> FilterOutcome {
        self.run(urls, None)
    }

    fn run(&self, urls: Vec<Url>, source: Option<(&Url, SourceKind)>) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();

        for url in urls {
            let source_rejected = source
                .map(|(seed, kind)| source_rejects(kind, &url, seed.host_str()))
                .unwrap_or(false);
            if source_rejected || self.exclude_matches(&url) {
                push_sample(&mut outcome.excluded_samples, &url);
                continue;
            }
            if !self.include.is_empty() && !self.include_matches(&url) {
                push_sample(&mut outcome.not_included_samples, &url);
                continue;
            }
            outcome.passed.push(url);
        }
        outcome
    }

    fn exclude_matches(&self, url: &Url) -> bool {
        self.exclude.iter().any(|re| re.is_match(url.as_str()))
    }

    fn include_matches(&self, url: &Url) -> bool {
        self.include.iter().any(|re| re.is_match(url.as_str()))
    }
}

fn compile_patterns(patterns: &[String], role: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(error) => {
                warn!(pattern = %pattern, role = role, error = %error, "skipping invalid filter regex");
                None
            }
        })
        .collect()
}

fn push_sample(samples: &mut Vec<String>, url: &Url) {
    if samples.len() < SAMPLE_CAP {
        samples.push(url.to_string());
    }
}

/// Source-category reject table. Category semantics: jira and confluence
/// crawls never leave the seed's host and skip their API/attachment/admin
/// surfaces; plain web crawls reject nothing here.
fn source_rejects(source: SourceKind, url: &Url, seed_host: Option<&str>) -> bool {
    match source {
        SourceKind::Web => false,
        SourceKind::Jira => {
            if url.host_str() != seed_host {
                return true;
            }
            let path = url.path();
            JIRA_REJECT_PREFIXES.iter().any(|p| path.starts_with(p))
                || path.contains("login")
                || path.contains("logout")
        }
        SourceKind::Confluence => {
            if url.host_str() != seed_host {
                return true;
            }
            let path = url.path();
            CONFLUENCE_REJECT_PREFIXES.iter().any(|p| path.starts_with(p))
        }
    }
}
