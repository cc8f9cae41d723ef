//! Default content pipeline: metadata harvesting and markdown conversion.

use crate::links::extract_from_document;
use htmd::HtmlToMarkdown;
use scraper::{Html, Selector};
use seine_types::{ContentPipeline, CrawlError, PageContent};
use tracing::debug;
use url::Url;

/// [`ContentPipeline`] implementation over `scraper` + `htmd`.
///
/// Harvests title, description, language, the canonical URL, open-graph and
/// twitter-card pairs, and the link list, then converts the body to markdown.
pub struct HtmlPipeline {
    converter: HtmlToMarkdown,
}

impl Default for HtmlPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlPipeline {
    pub fn new() -> Self {
        Self {
            converter: HtmlToMarkdown::builder()
                .skip_tags(vec!["script", "style", "noscript"])
                .build(),
        }
    }
}

impl ContentPipeline for HtmlPipeline {
    fn process(&self, html: &str, base: &Url) -> Result<PageContent, CrawlError> {
        let document = Html::parse_document(html);
        let mut page = PageContent {
            title: select_text(&document, "title"),
            description: select_attr(&document, "meta[name=\"description\"]", "content"),
            language: select_attr(&document, "html[lang]", "lang"),
            canonical: select_attr(&document, "link[rel=\"canonical\"]", "href")
                .and_then(|href| base.join(&href).ok()),
            markdown: String::new(),
            links: extract_from_document(&document, base),
            meta: Default::default(),
        };

        collect_meta_pairs(&document, &mut page);

        if page.description.is_none() {
            page.description = page.meta.get("og:description").cloned();
        }
        if page.title.is_none() {
            page.title = page.meta.get("og:title").cloned();
        }

        page.markdown = self
            .converter
            .convert(html)
            .map_err(|e| CrawlError::parse(format!("markdown conversion failed: {e}")))?
            .trim()
            .to_string();

        debug!(
            url = %base,
            links = page.links.len(),
            markdown_bytes = page.markdown.len(),
            "processed page content"
        );
        Ok(page)
    }
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text: String = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr(attr)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Collect `og:*` / `twitter:*` meta pairs and a JSON-LD type marker.
fn collect_meta_pairs(document: &Html, page: &mut PageContent) {
    if let Ok(selector) = Selector::parse("meta[property], meta[name]") {
        for element in document.select(&selector) {
            let value = element.value();
            let key = value.attr("property").or_else(|| value.attr("name"));
            let (Some(key), Some(content)) = (key, value.attr("content")) else {
                continue;
            };
            if key.starts_with("og:") || key.starts_with("twitter:") {
                page.meta.insert(key.to_string(), content.to_string());
            }
        }
    }

    if let Ok(selector) = Selector::parse("script[type=\"application/ld+json\"]") {
        if let Some(element) = document.select(&selector).next() {
            let raw: String = element.text().collect();
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Some(ld_type) = value.get("@type").and_then(|t| t.as_str()) {
                    page.meta.insert("json-ld:type".into(), ld_type.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <title>Release Notes</title>
  <meta name="description" content="What changed in 2.0">
  <meta property="og:title" content="Release Notes 2.0">
  <meta name="twitter:card" content="summary">
  <link rel="canonical" href="/releases/2.0">
  <script type="application/ld+json">{"@type": "Article", "name": "x"}</script>
</head>
<body>
  <h1>Release Notes</h1>
  <p>Everything that changed.</p>
  <a href="/releases/1.0">previous</a>
  <script>console.log("ignored")</script>
</body>
</html>"##;

    #[test]
    fn harvests_metadata_and_links() {
        let pipeline = HtmlPipeline::new();
        let base = Url::parse("https://example.com/releases/2.0").unwrap();
        let page = pipeline.process(PAGE, &base).unwrap();

        assert_eq!(page.title.as_deref(), Some("Release Notes"));
        assert_eq!(page.description.as_deref(), Some("What changed in 2.0"));
        assert_eq!(page.language.as_deref(), Some("en"));
        assert_eq!(
            page.canonical.as_ref().map(|u| u.as_str()),
            Some("https://example.com/releases/2.0")
        );
        assert_eq!(page.meta.get("og:title").map(String::as_str), Some("Release Notes 2.0"));
        assert_eq!(page.meta.get("twitter:card").map(String::as_str), Some("summary"));
        assert_eq!(page.meta.get("json-ld:type").map(String::as_str), Some("Article"));
        assert_eq!(page.links.len(), 2); // anchor + canonical
    }

    #[test]
    fn converts_body_to_markdown_without_scripts() {
        let pipeline = HtmlPipeline::new();
        let base = Url::parse("https://example.com/").unwrap();
        let page = pipeline.process(PAGE, &base).unwrap();

        assert!(page.markdown.contains("Release Notes"));
        assert!(page.markdown.contains("Everything that changed."));
        assert!(!page.markdown.contains("console.log"));
    }

    #[test]
    fn og_fallbacks_fill_missing_title() {
        let pipeline = HtmlPipeline::new();
        let base = Url::parse("https://example.com/").unwrap();
        let html = r##"<head><meta property="og:title" content="From OG"></head><body>x</body>"##;
        let page = pipeline.process(html, &base).unwrap();
        assert_eq!(page.title.as_deref(), Some("From OG"));
    }
}
