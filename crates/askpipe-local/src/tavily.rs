use askpipe_core::{
    Error, ExtractResponse, ExtractedPage, Extractor, FailedExtraction, Result, SearchResult,
    TavilySearchOptions, WebSearch, MAX_EXTRACT_URLS,
};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::{env, env_any, join_url};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

fn tavily_api_key_from_env() -> Option<String> {
    env_any(&["ASKPIPE_TAVILY_API_KEY", "TAVILY_API_KEY"])
}

fn tavily_base_url_from_env() -> String {
    env("ASKPIPE_TAVILY_ENDPOINT").unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn missing_key() -> Error {
    Error::NotConfigured("missing ASKPIPE_TAVILY_API_KEY (or TAVILY_API_KEY)".to_string())
}

#[derive(Debug, Clone)]
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl TavilySearch {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = tavily_api_key_from_env().ok_or_else(missing_key)?;
        Ok(Self::new(client, api_key, tavily_base_url_from_env()))
    }
}

/// Request body in Tavily's snake_case shape, with defaults filled in.
fn search_body(query: &str, o: &TavilySearchOptions) -> serde_json::Value {
    let mut body = serde_json::json!({
        "query": query,
        "search_depth": o.effective_search_depth().as_str(),
        "topic": o.effective_topic().as_str(),
        "max_results": o.effective_max_results(),
        "include_answer": o.effective_include_answer().to_json(),
        "include_images": o.include_images.unwrap_or(false),
        "include_raw_content": o.include_raw_content.unwrap_or(false),
    });
    if let Some(days) = o.effective_days() {
        body["days"] = days.into();
    }
    if let Some(t) = o.time_range {
        body["time_range"] = t.as_str().into();
    }
    if let Some(d) = o.include_image_descriptions {
        body["include_image_descriptions"] = d.into();
    }
    if let Some(domains) = o.include_domains.as_ref().filter(|d| !d.is_empty()) {
        body["include_domains"] = domains.clone().into();
    }
    body
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    title: Option<String>,
    content: Option<String>,
    score: Option<f64>,
}

impl From<TavilyResult> for SearchResult {
    fn from(r: TavilyResult) -> Self {
        SearchResult {
            title: r.title.filter(|t| !t.is_empty()).unwrap_or_else(|| r.url.clone()),
            content: r.content.unwrap_or_default(),
            url: r.url,
            score: r.score.filter(|s| s.is_finite()).unwrap_or(0.0),
        }
    }
}

#[async_trait::async_trait]
impl WebSearch for TavilySearch {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, query: &str, options: &TavilySearchOptions) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidRequest("tavily search: query is required".to_string()));
        }
        let t0 = Instant::now();
        let resp = self
            .client
            .post(join_url(&self.base_url, "search"))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&search_body(query, options))
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Search("tavily search timed out".to_string())
                } else {
                    Error::Search(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("tavily search HTTP {status}")));
        }

        let parsed: TavilySearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        tracing::debug!(
            results = parsed.results.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "tavily search completed"
        );
        Ok(parsed.results.into_iter().map(SearchResult::from).collect())
    }
}

#[derive(Debug, Clone)]
pub struct TavilyExtract {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl TavilyExtract {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = tavily_api_key_from_env().ok_or_else(missing_key)?;
        Ok(Self::new(client, api_key, tavily_base_url_from_env()))
    }
}

#[derive(Debug, Deserialize)]
struct TavilyExtractResponse {
    #[serde(default)]
    results: Vec<TavilyExtracted>,
    #[serde(default)]
    failed_results: Vec<TavilyFailed>,
}

#[derive(Debug, Deserialize)]
struct TavilyExtracted {
    url: String,
    #[serde(default)]
    raw_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TavilyFailed {
    url: String,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait::async_trait]
impl Extractor for TavilyExtract {
    fn name(&self) -> &'static str {
        "tavily-extract"
    }

    async fn extract(&self, urls: &[String]) -> Result<ExtractResponse> {
        if urls.is_empty() {
            return Err(Error::InvalidRequest("tavily extract: valid URLs array is required".to_string()));
        }
        if urls.len() > MAX_EXTRACT_URLS {
            return Err(Error::InvalidRequest(format!(
                "tavily extract: maximum {MAX_EXTRACT_URLS} URLs allowed per request"
            )));
        }

        let resp = self
            .client
            .post(join_url(&self.base_url, "extract"))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&serde_json::json!({ "urls": urls }))
            .timeout(EXTRACT_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Extract(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Extract(format!("tavily extract HTTP {status}")));
        }

        let parsed: TavilyExtractResponse = resp
            .json()
            .await
            .map_err(|e| Error::Extract(e.to_string()))?;
        Ok(ExtractResponse {
            results: parsed
                .results
                .into_iter()
                .map(|r| ExtractedPage {
                    url: r.url,
                    raw_content: r.raw_content.unwrap_or_default(),
                })
                .collect(),
            failed_results: parsed
                .failed_results
                .into_iter()
                .map(|f| FailedExtraction {
                    url: f.url,
                    error: f.error.unwrap_or_else(|| "unknown error".to_string()),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, EnvGuard};
    use askpipe_core::{IncludeAnswer, Topic};
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    #[test]
    fn empty_api_keys_are_treated_as_missing() {
        let _g1 = EnvGuard::set("ASKPIPE_TAVILY_API_KEY", "");
        let _g2 = EnvGuard::set("TAVILY_API_KEY", "   ");
        assert!(tavily_api_key_from_env().is_none());
        assert!(matches!(
            TavilySearch::from_env(reqwest::Client::new()),
            Err(Error::NotConfigured(_))
        ));
    }

    #[test]
    fn body_fills_defaults_and_news_days() {
        let b = search_body("q", &TavilySearchOptions::default());
        assert_eq!(b["search_depth"], "basic");
        assert_eq!(b["topic"], "general");
        assert_eq!(b["max_results"], 5);
        assert_eq!(b["include_answer"], true);
        assert!(b.get("days").is_none());
        assert!(b.get("include_domains").is_none());

        let o = TavilySearchOptions {
            topic: Some(Topic::News),
            max_results: Some(8),
            include_answer: Some(IncludeAnswer::Flag(false)),
            include_domains: Some(vec!["reddit.com".to_string()]),
            ..TavilySearchOptions::default()
        };
        let b = search_body("q", &o);
        assert_eq!(b["topic"], "news");
        assert_eq!(b["days"], 3);
        assert_eq!(b["max_results"], 8);
        assert_eq!(b["include_answer"], false);
        assert_eq!(b["include_domains"], serde_json::json!(["reddit.com"]));
    }

    #[tokio::test]
    async fn search_posts_bearer_and_maps_results() {
        let seen: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let app = Router::new().route(
            "/search",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let seen = seen2.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    *seen.lock().unwrap() = Some((auth, body));
                    Json(serde_json::json!({
                        "results": [
                            {"url": "https://example.com/a", "title": "A", "content": "alpha", "score": 0.8},
                            {"url": "https://example.com/b", "content": "beta"}
                        ],
                        "response_time": 0.4
                    }))
                }
            }),
        );
        let addr = serve(app).await;

        let s = TavilySearch::new(reqwest::Client::new(), "tvly-test", format!("http://{addr}"));
        let rs = s.search("rust async", &TavilySearchOptions::fallback()).await.unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs[0].title, "A");
        assert_eq!(rs[0].score, 0.8);
        assert_eq!(rs[1].title, "https://example.com/b");
        assert_eq!(rs[1].score, 0.0);

        let (auth, body) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(auth, "Bearer tvly-test");
        assert_eq!(body["query"], "rust async");
        assert_eq!(body["include_domains"], serde_json::json!(["twitter.com", "reddit.com"]));
    }

    #[tokio::test]
    async fn search_maps_http_errors() {
        let app = Router::new().route(
            "/search",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let addr = serve(app).await;
        let s = TavilySearch::new(reqwest::Client::new(), "k", format!("http://{addr}"));
        let err = s.search("q", &TavilySearchOptions::default()).await.unwrap_err();
        match err {
            Error::Search(m) => assert!(m.contains("429"), "{m}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn extract_rejects_bad_batches_without_network() {
        // Nothing listens on the discard port; a network call would fail differently.
        let ex = TavilyExtract::new(reqwest::Client::new(), "k", "http://127.0.0.1:9");
        let urls: Vec<String> = (0..21).map(|i| format!("https://e.com/{i}")).collect();
        assert!(matches!(ex.extract(&urls).await, Err(Error::InvalidRequest(_))));
        assert!(matches!(ex.extract(&[]).await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn extract_maps_results_and_failures() {
        let app = Router::new().route(
            "/extract",
            post(|Json(body): Json<serde_json::Value>| async move {
                let n = body["urls"].as_array().map(Vec::len).unwrap_or(0);
                Json(serde_json::json!({
                    "results": [{"url": "https://a.com", "raw_content": format!("{n} urls")}],
                    "failed_results": [{"url": "https://b.com", "error": "blocked"}, {"url": "https://c.com"}]
                }))
            }),
        );
        let addr = serve(app).await;
        let ex = TavilyExtract::new(reqwest::Client::new(), "k", format!("http://{addr}/"));
        let urls = vec![
            "https://a.com".to_string(),
            "https://b.com".to_string(),
            "https://c.com".to_string(),
        ];
        let r = ex.extract(&urls).await.unwrap();
        assert_eq!(r.results[0].raw_content, "3 urls");
        assert_eq!(r.failed_results.len(), 2);
        assert_eq!(r.failed_results[0].error, "blocked");
        assert_eq!(r.failed_results[1].error, "unknown error");
    }
}
