//! Link extraction from HTML and JSON responses.

use scraper::{Html, Selector};
use seine_types::SourceKind;
use seine_util::{normalize_url, normalized_key};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Schemes that are never crawlable.
const REJECTED_SCHEMES: &[&str] = &["javascript", "mailto", "tel", "sms", "ftp", "data"];

/// File extensions that point at binary downloads rather than pages.
const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "tar", "gz", "tgz", "exe", "dmg", "pkg", "deb", "rpm", "iso", "rar", "7z",
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "png", "jpg", "jpeg", "gif", "svg", "ico",
    "webp", "mp3", "mp4", "avi", "mov", "wmv", "flv", "woff", "woff2", "ttf", "eot", "css", "js",
];

/// Extract candidate crawl URLs from an HTML document: anchor hrefs, the
/// canonical link, and `img` srcset candidates, resolved against the page
/// URL, normalized, and deduplicated.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    extract_from_document(&document, base)
}

pub(crate) fn extract_from_document(document: &Html, base: &Url) -> Vec<Url> {
    let anchor = Selector::parse("a[href]").expect("static selector");
    let canonical = Selector::parse("link[rel=\"canonical\"]").expect("static selector");
    let srcset = Selector::parse("img[srcset]").expect("static selector");

    let mut candidates: Vec<&str> = Vec::new();
    for element in document.select(&anchor) {
        if let Some(href) = element.value().attr("href") {
            candidates.push(href);
        }
    }
    for element in document.select(&canonical) {
        if let Some(href) = element.value().attr("href") {
            candidates.push(href);
        }
    }
    let mut owned_candidates: Vec<String> = Vec::new();
    for element in document.select(&srcset) {
        if let Some(set) = element.value().attr("srcset") {
            for candidate in set.split(',') {
                if let Some(url_part) = candidate.trim().split_whitespace().next() {
                    owned_candidates.push(url_part.to_string());
                }
            }
        }
    }
    if let Ok(styled) = Selector::parse("[style]") {
        for element in document.select(&styled) {
            if let Some(style) = element.value().attr("style") {
                owned_candidates.extend(background_image_urls(style));
            }
        }
    }
    candidates.extend(owned_candidates.iter().map(String::as_str));

    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();
    for raw in candidates {
        let Some(url) = resolve_candidate(raw, base) else {
            continue;
        };
        let key = normalized_key(&url);
        if seen.insert(key) {
            links.push(normalize_url(&url));
        }
    }
    links
}

/// Pull `url(...)` targets out of an inline `background-image` style.
fn background_image_urls(style: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let Some(position) = style.find("background-image") else {
        return urls;
    };
    for part in style[position..].split("url(").skip(1) {
        if let Some(end) = part.find(')') {
            let target = part[..end].trim().trim_matches(|c| c == '"' || c == '\'');
            if !target.is_empty() {
                urls.push(target.to_string());
            }
        }
    }
    urls
}

/// Resolve one raw href against the page URL, rejecting non-crawlable
/// schemes, fragment-only references, and binary-download extensions.
fn resolve_candidate(raw: &str, base: &Url) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let url = base.join(trimmed).ok()?;
    if REJECTED_SCHEMES.contains(&url.scheme()) {
        return None;
    }
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    if let Some(extension) = url.path().rsplit('.').next() {
        if url.path().contains('.') && BINARY_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
        {
            return None;
        }
    }

    Some(url)
}

/// Extract pagination links from a JSON API response, source-specifically.
///
/// Confluence pages carry `_links.next` (relative to `_links.base` when
/// present); Jira search results advance `startAt` by `maxResults` while
/// `startAt + maxResults < total`.
pub fn extract_json_links(body: &str, source: SourceKind, base: &Url) -> Vec<Url> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        debug!(url = %base, "response is not valid JSON, no links extracted");
        return Vec::new();
    };

    match source {
        SourceKind::Confluence => confluence_next(&value, base).into_iter().collect(),
        SourceKind::Jira => jira_next(&value, base).into_iter().collect(),
        SourceKind::Web => Vec::new(),
    }
}

fn confluence_next(value: &serde_json::Value, base: &Url) -> Option<Url> {
    let links = value.get("_links")?;
    let next = links.get("next")?.as_str()?;
    let resolved = match links.get("base").and_then(|b| b.as_str()) {
        Some(api_base) => Url::parse(api_base).ok()?.join(next).ok()?,
        None => base.join(next).ok()?,
    };
    Some(normalize_url(&resolved))
}

fn jira_next(value: &serde_json::Value, base: &Url) -> Option<Url> {
    let start_at = value.get("startAt")?.as_u64()?;
    let max_results = value.get("maxResults")?.as_u64()?;
    let total = value.get("total")?.as_u64()?;
    if max_results == 0 || start_at + max_results >= total {
        return None;
    }

    let next_start = start_at + max_results;
    let mut next = base.clone();
    let pairs: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != "startAt")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .chain(std::iter::once(("startAt".to_string(), next_start.to_string())))
        .collect();
    next.query_pairs_mut().clear().extend_pairs(pairs).finish();
    Some(normalize_url(&next))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/index.html").unwrap()
    }

    #[test]
    fn extracts_and_resolves_anchors() {
        let html = r##"
            <html><body>
              <a href="/a">A</a>
              <a href="b.html">B</a>
              <a href="https://other.example/c">C</a>
            </body></html>
        "##;
        let links = extract_links(html, &base());
        let strings: Vec<String> = links.iter().map(|u| u.to_string()).collect();
        assert_eq!(
            strings,
            vec![
                "https://example.com/a",
                "https://example.com/docs/b.html",
                "https://other.example/c",
            ]
        );
    }

    #[test]
    fn rejects_schemes_fragments_and_binaries() {
        let html = r##"
            <a href="javascript:void(0)">js</a>
            <a href="mailto:x@example.com">mail</a>
            <a href="tel:+123">tel</a>
            <a href="#section">frag</a>
            <a href="/report.pdf">pdf</a>
            <a href="/archive.tar.gz">tarball</a>
            <a href="/ok">ok</a>
        "##;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].path(), "/ok");
    }

    #[test]
    fn dedupes_on_normalized_form() {
        let html = r##"
            <a href="/x?b=2&a=1">one</a>
            <a href="/x?a=1&b=2">two</a>
            <a href="/x?a=1&b=2#frag">three</a>
        "##;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn background_image_and_srcset_candidates() {
        let html = r##"
            <div style="color: red; background-image: url('/assets/hero')">x</div>
            <img srcset="/img/a 1x, /img/b 2x" src="ignored">
        "##;
        let links = extract_links(html, &base());
        let paths: Vec<&str> = links.iter().map(|u| u.path()).collect();
        assert!(paths.contains(&"/assets/hero"));
        assert!(paths.contains(&"/img/a"));
        assert!(paths.contains(&"/img/b"));
    }

    #[test]
    fn picks_up_canonical_link() {
        let html = r##"<head><link rel="canonical" href="https://example.com/canonical"></head>"##;
        let links = extract_links(html, &base());
        assert_eq!(links[0].as_str(), "https://example.com/canonical");
    }

    #[test]
    fn confluence_next_relative_to_links_base() {
        let body = r#"{
            "results": [],
            "_links": {
                "base": "https://wiki.example.com/rest/api",
                "next": "/content?start=25&limit=25"
            }
        }"#;
        let links = extract_json_links(
            body,
            SourceKind::Confluence,
            &Url::parse("https://wiki.example.com/rest/api/content").unwrap(),
        );
        assert_eq!(links.len(), 1);
        assert!(links[0].as_str().contains("start=25"));
    }

    #[test]
    fn jira_paginates_until_total() {
        let base = Url::parse("https://jira.example.com/rest/api/2/search?jql=x&startAt=0").unwrap();
        let body = r#"{"startAt": 0, "maxResults": 50, "total": 120, "issues": []}"#;
        let links = extract_json_links(body, SourceKind::Jira, &base);
        assert_eq!(links.len(), 1);
        assert!(links[0].query().unwrap().contains("startAt=50"));

        let last_page = r#"{"startAt": 100, "maxResults": 50, "total": 120, "issues": []}"#;
        assert!(extract_json_links(last_page, SourceKind::Jira, &base).is_empty());
    }

    #[test]
    fn invalid_json_yields_nothing() {
        assert!(extract_json_links("<html>", SourceKind::Jira, &base()).is_empty());
    }

    #[test]
    fn web_source_has_no_json_pagination() {
        let body = r#"{"startAt": 0, "maxResults": 50, "total": 120}"#;
        assert!(extract_json_links(body, SourceKind::Web, &base()).is_empty());
    }
}
