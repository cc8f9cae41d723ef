//! Single-attempt URL fetching over HTTP or a browser slot.

use seine_headless::BrowserSlot;
use seine_types::{
    ContentPipeline, CrawlConfig, ErrorKind, FetchResult, SourceKind, UrlRequest,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Which path carries this fetch.
pub enum Transport<'a> {
    Http(&'a reqwest::Client),
    Browser(&'a BrowserSlot),
}

/// Fetches one URL and post-processes the HTML through the content pipeline.
/// A single call is one attempt; the retry policy wraps it.
pub struct Fetcher {
    pipeline: Arc<dyn ContentPipeline>,
    accept_any_content: bool,
}

impl Fetcher {
    pub fn new(pipeline: Arc<dyn ContentPipeline>) -> Self {
        Self {
            pipeline,
            accept_any_content: false,
        }
    }

    /// Treat non-HTML, non-JSON content types as successes too.
    pub fn accept_any_content(mut self) -> Self {
        self.accept_any_content = true;
        self
    }

    pub async fn fetch(
        &self,
        request: &UrlRequest,
        transport: Transport<'_>,
        config: &CrawlConfig,
    ) -> FetchResult {
        let started = Instant::now();
        let mut result = match transport {
            Transport::Http(client) => self.fetch_http(client, request, config).await,
            Transport::Browser(slot) => self.fetch_browser(slot, request, config).await,
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        if result.error.is_none() {
            if let Some(kind) = ErrorKind::from_status(result.status) {
                result.error = Some(format!("HTTP {}", result.status));
                result.error_kind = Some(kind);
            }
        }

        if result.error.is_none() {
            self.post_process(&mut result, request);
        }

        debug!(
            url = %request.url,
            status = result.status,
            duration_ms = result.duration_ms,
            success = result.is_success(),
            "fetched"
        );
        result
    }

    async fn fetch_http(
        &self,
        client: &reqwest::Client,
        request: &UrlRequest,
        config: &CrawlConfig,
    ) -> FetchResult {
        // The result is keyed by the requested URL even when redirects land
        // elsewhere; the final body is still what gets processed.
        let mut result = FetchResult::new(request.url.clone());

        let response = match client.get(request.url.clone()).send().await {
            Ok(response) => response,
            Err(error) => {
                return FetchResult::failure(
                    request.url.clone(),
                    ErrorKind::Transport,
                    error.to_string(),
                );
            }
        };

        result.status = response.status().as_u16();
        result.content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        result.headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = config.max_body_bytes.saturating_sub(body.len());
                    if remaining == 0 {
                        debug!(url = %request.url, cap = config.max_body_bytes, "body cap reached");
                        break;
                    }
                    body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                }
                Ok(None) => break,
                Err(error) => {
                    result.error = Some(format!("body read failed: {error}"));
                    result.error_kind = Some(ErrorKind::Transport);
                    return result;
                }
            }
        }
        result.body = Some(String::from_utf8_lossy(&body).into_owned());
        result
    }

    async fn fetch_browser(
        &self,
        slot: &BrowserSlot,
        request: &UrlRequest,
        config: &CrawlConfig,
    ) -> FetchResult {
        match slot
            .render(request.url.as_str(), config.js_wait(), config.request_timeout())
            .await
        {
            Ok(html) => {
                let mut result = FetchResult::new(request.url.clone());
                // Navigation succeeded: synthesize the response envelope.
                result.status = 200;
                result.content_type = Some("text/html".into());
                result
                    .headers
                    .insert("content-type".into(), "text/html".into());
                result.body = Some(html);
                result
            }
            Err(error) => FetchResult::failure(
                request.url.clone(),
                ErrorKind::Transport,
                error.to_string(),
            ),
        }
    }

    /// Run the content pipeline on HTML bodies. JSON bodies from API sources
    /// pass through untouched (the worker paginates them); anything else is a
    /// non-success unless opted in.
    fn post_process(&self, result: &mut FetchResult, request: &UrlRequest) {
        let body_is_empty = result.body.as_deref().map_or(true, str::is_empty);

        if is_html(result.content_type.as_deref()) {
            if body_is_empty {
                result.error = Some("empty HTML body".into());
                result.error_kind = Some(ErrorKind::Parse);
                return;
            }
            let html = result.body.as_deref().unwrap_or_default();
            match self.pipeline.process(html, &result.url) {
                Ok(page) => result.page = Some(page),
                // Parse failures degrade: the body was produced, so the URL
                // still counts as completed.
                Err(error) => {
                    warn!(url = %result.url, error = %error, "content pipeline failed");
                }
            }
            return;
        }

        if is_json(result.content_type.as_deref()) && request.source != SourceKind::Web {
            return;
        }

        if !self.accept_any_content {
            result.error = Some(format!(
                "unsupported content type: {}",
                result.content_type.as_deref().unwrap_or("unknown")
            ));
            result.error_kind = Some(ErrorKind::Parse);
        }
    }
}

fn is_html(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml+xml"))
        .unwrap_or(false)
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.map(|ct| ct.contains("json")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seine_extract::HtmlPipeline;
    use seine_types::SourceKind;
    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_for(server_url: &str, path: &str, source: SourceKind) -> UrlRequest {
        UrlRequest::seed(
            Url::parse(&format!("{server_url}{path}")).unwrap(),
            Uuid::new_v4(),
            source,
            "page",
        )
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(Arc::new(HtmlPipeline::new()))
    }

    #[tokio::test]
    async fn fetches_and_processes_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        "<html><title>T</title><body><a href=\"/next\">n</a></body></html>",
                        "text/html; charset=utf-8",
                    ),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let request = request_for(&server.uri(), "/page", SourceKind::Web);
        let result = fetcher()
            .fetch(&request, Transport::Http(&client), &CrawlConfig::default())
            .await;

        assert!(result.is_success());
        assert_eq!(result.status, 200);
        let page = result.page.as_ref().unwrap();
        assert_eq!(page.title.as_deref(), Some("T"));
        assert_eq!(page.links.len(), 1);
    }

    #[tokio::test]
    async fn classifies_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let request = request_for(&server.uri(), "/missing", SourceKind::Web);
        let result = fetcher()
            .fetch(&request, Transport::Http(&client), &CrawlConfig::default())
            .await;

        assert!(!result.is_success());
        assert_eq!(result.status, 404);
        assert_eq!(result.error_kind, Some(ErrorKind::HttpClient));
    }

    #[tokio::test]
    async fn caps_body_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("x".repeat(64 * 1024), "text/html"),
            )
            .mount(&server)
            .await;

        let config = CrawlConfig {
            max_body_bytes: 1024,
            ..Default::default()
        };
        let client = reqwest::Client::new();
        let request = request_for(&server.uri(), "/big", SourceKind::Web);
        let result = fetcher()
            .fetch(&request, Transport::Http(&client), &config)
            .await;

        assert!(result.body.as_ref().unwrap().len() <= 1024);
    }

    #[tokio::test]
    async fn json_passes_for_api_sources_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        r#"{"startAt":0,"maxResults":50,"total":10}"#,
                        "application/json",
                    ),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let config = CrawlConfig::default();

        let jira = request_for(&server.uri(), "/rest/api/2/search", SourceKind::Jira);
        let result = fetcher().fetch(&jira, Transport::Http(&client), &config).await;
        assert!(result.is_success());
        assert!(result.page.is_none());

        let web = request_for(&server.uri(), "/rest/api/2/search", SourceKind::Web);
        let result = fetcher().fetch(&web, Transport::Http(&client), &config).await;
        assert!(!result.is_success());
        assert_eq!(result.error_kind, Some(ErrorKind::Parse));
    }

    #[tokio::test]
    async fn follows_redirects_but_keys_by_request_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "/new"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><title>New</title><body>here</body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let request = request_for(&server.uri(), "/old", SourceKind::Web);
        let result = fetcher()
            .fetch(&request, Transport::Http(&client), &CrawlConfig::default())
            .await;

        assert!(result.is_success());
        assert_eq!(result.url.path(), "/old");
        assert_eq!(result.page.as_ref().unwrap().title.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let client = reqwest::Client::new();
        // Reserved port with nothing listening.
        let request = request_for("http://127.0.0.1:9", "/", SourceKind::Web);
        let result = fetcher()
            .fetch(&request, Transport::Http(&client), &CrawlConfig::default())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Transport));
        assert_eq!(result.status, 0);
    }
}
