use askpipe_core::{
    AnswerSearch, AnswerSearchResponse, Error, OpenPerplexSearchOptions, Result, SearchResult,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::{env, env_any, join_url};

const DEFAULT_ENDPOINT: &str = "https://api.openperplex.com";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

fn openperplex_api_key_from_env() -> Option<String> {
    env_any(&["ASKPIPE_OPENPERPLEX_API_KEY", "OPENPERPLEX_API_KEY"])
}

#[derive(Debug, Clone)]
pub struct OpenPerplexSearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenPerplexSearch {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = openperplex_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing ASKPIPE_OPENPERPLEX_API_KEY (or OPENPERPLEX_API_KEY)".to_string(),
            )
        })?;
        let endpoint =
            env("ASKPIPE_OPENPERPLEX_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Ok(Self::new(client, api_key, endpoint))
    }
}

fn query_params(query: &str, o: &OpenPerplexSearchOptions, now: &str) -> Vec<(&'static str, String)> {
    vec![
        ("query", query.to_string()),
        ("location", o.effective_location().to_string()),
        ("pro_mode", o.pro_mode.unwrap_or(false).to_string()),
        ("response_language", o.effective_response_language().to_string()),
        ("answer_type", o.effective_answer_type().to_string()),
        ("search_type", o.effective_search_type().to_string()),
        ("verbose_mode", o.verbose_mode.unwrap_or(false).to_string()),
        ("return_sources", o.return_sources.unwrap_or(true).to_string()),
        ("return_images", o.return_images.unwrap_or(false).to_string()),
        ("return_citations", o.return_citations.unwrap_or(true).to_string()),
        ("recency_filter", o.effective_recency_filter().to_string()),
        ("date_context", now.to_string()),
    ]
}

#[derive(Debug, Deserialize)]
struct OpenPerplexResponse {
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    llm_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Source {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    relevance_score: Option<f64>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

impl From<Source> for SearchResult {
    fn from(s: Source) -> Self {
        let url = non_empty(s.url).unwrap_or_default();
        let title = non_empty(s.title)
            .or_else(|| Some(url.clone()).filter(|u| !u.is_empty()))
            .unwrap_or_else(|| "No title".to_string());
        SearchResult {
            title,
            content: non_empty(s.snippet).or(non_empty(s.text)).unwrap_or_default(),
            url,
            score: s.relevance_score.filter(|x| x.is_finite()).unwrap_or(1.0),
        }
    }
}

#[async_trait::async_trait]
impl AnswerSearch for OpenPerplexSearch {
    fn name(&self) -> &'static str {
        "openperplex"
    }

    async fn search(
        &self,
        query: &str,
        options: &OpenPerplexSearchOptions,
    ) -> Result<AnswerSearchResponse> {
        if query.trim().is_empty() {
            return Err(Error::InvalidRequest("openperplex search: query is required".to_string()));
        }
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let resp = self
            .client
            .get(join_url(&self.endpoint, "search"))
            .query(&query_params(query, options, &now))
            .header("X-API-Key", self.api_key.as_str())
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(%status, body_chars = body.len(), "openperplex error body");
            return Err(Error::Search(format!("openperplex search HTTP {status}")));
        }

        let parsed: OpenPerplexResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let mut results: Vec<SearchResult> =
            parsed.sources.into_iter().map(SearchResult::from).collect();
        results.truncate(options.effective_max_results() as usize);
        Ok(AnswerSearchResponse {
            results,
            llm_response: parsed.llm_response,
        })
    }
}
