//! Search and extraction stage.

use std::sync::Arc;

use crate::options::SearchOptions;
use crate::state::ChatStore;
use crate::{
    AnswerSearch, Error, ExtractResponse, Extractor, Result, SearchResult, WebSearch,
    MAX_EXTRACT_URLS,
};

/// How many top-ranked results are sent to extraction.
pub const EXTRACT_TOP_N: usize = 3;

/// The adapters behind each provider variant.
#[derive(Clone)]
pub struct SearchBackends {
    pub web: Arc<dyn WebSearch>,
    pub answer: Arc<dyn AnswerSearch>,
    pub extractor: Arc<dyn Extractor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchContext {
    pub results: Vec<SearchResult>,
    pub extracted_content: String,
}

/// Indices of `results` ordered by score, highest first. Ties keep input order.
pub fn rank_by_score(results: &[SearchResult]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..results.len()).collect();
    // `sort_by` is stable.
    idx.sort_by(|&a, &b| results[b].score.total_cmp(&results[a].score));
    idx
}

/// Validate a batch and hand it to the extractor as one call.
pub async fn extract_batch(extractor: &dyn Extractor, urls: &[String]) -> Result<ExtractResponse> {
    if urls.is_empty() {
        return Err(Error::InvalidRequest("extract: no URLs provided".to_string()));
    }
    if urls.len() > MAX_EXTRACT_URLS {
        return Err(Error::InvalidRequest(format!(
            "extract: maximum {MAX_EXTRACT_URLS} URLs allowed per request (got {})",
            urls.len()
        )));
    }
    extractor.extract(urls).await
}

fn join_raw_content(resp: &ExtractResponse) -> String {
    resp.results
        .iter()
        .map(|r| r.raw_content.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Run the provider's search, update `current_search_results` once, and gather the
/// extra content for the prompt. Adapter failures degrade to empty values.
pub async fn run_search(
    backends: &SearchBackends,
    refined_query: &str,
    options: &SearchOptions,
    store: &mut ChatStore,
) -> SearchContext {
    match options {
        SearchOptions::Tavily(opts) => {
            tracing::debug!(backend = backends.web.name(), query = refined_query, options = ?opts, "search starting");
            let results = match backends.web.search(refined_query, opts).await {
                Ok(rs) => rs,
                Err(e) => {
                    tracing::warn!(backend = backends.web.name(), error = %e, "search failed; continuing without results");
                    Vec::new()
                }
            };
            store.set_current_search_results(results.clone());
            tracing::debug!(result_count = results.len(), "search completed");

            let mut extracted_content = String::new();
            if !results.is_empty() {
                let urls: Vec<String> = rank_by_score(&results)
                    .into_iter()
                    .take(EXTRACT_TOP_N)
                    .map(|i| results[i].url.clone())
                    .collect();
                store.set_is_extracting(true);
                match extract_batch(backends.extractor.as_ref(), &urls).await {
                    Ok(resp) => {
                        for f in &resp.failed_results {
                            tracing::debug!(url = %f.url, error = %f.error, "extraction failed for url");
                        }
                        extracted_content = join_raw_content(&resp);
                    }
                    Err(e) => {
                        tracing::warn!(backend = backends.extractor.name(), error = %e, "extraction failed; continuing without extracted content");
                    }
                }
                store.set_is_extracting(false);
                tracing::debug!(chars = extracted_content.len(), "extraction completed");
            }

            SearchContext {
                results,
                extracted_content,
            }
        }
        SearchOptions::OpenPerplex(opts) => {
            tracing::debug!(backend = backends.answer.name(), query = refined_query, options = ?opts, "search starting");
            let resp = match backends.answer.search(refined_query, opts).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(backend = backends.answer.name(), error = %e, "search failed; continuing without results");
                    Default::default()
                }
            };
            store.set_current_search_results(resp.results.clone());
            tracing::debug!(result_count = resp.results.len(), "search completed");
            SearchContext {
                results: resp.results,
                extracted_content: resp.llm_response.unwrap_or_default(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::options::{OpenPerplexSearchOptions, SearchProvider, TavilySearchOptions};
    use crate::state::ChatState;
    use crate::{AnswerSearchResponse, ExtractedPage, FailedExtraction};
    use std::sync::Mutex;

    pub(crate) fn result(url: &str, score: f64) -> SearchResult {
        SearchResult {
            title: format!("title {url}"),
            content: format!("snippet {url}"),
            url: url.to_string(),
            score,
        }
    }

    pub(crate) struct FakeWeb {
        pub reply: Result<Vec<SearchResult>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeWeb {
        pub(crate) fn ok(results: Vec<SearchResult>) -> Self {
            Self {
                reply: Ok(results),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                reply: Err(Error::Search("HTTP 500".to_string())),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl WebSearch for FakeWeb {
        fn name(&self) -> &'static str {
            "fake-web"
        }

        async fn search(&self, query: &str, _o: &TavilySearchOptions) -> Result<Vec<SearchResult>> {
            self.calls.lock().unwrap().push(query.to_string());
            match &self.reply {
                Ok(rs) => Ok(rs.clone()),
                Err(e) => Err(Error::Search(e.to_string())),
            }
        }
    }

    pub(crate) struct FakeAnswer {
        pub reply: Result<AnswerSearchResponse>,
    }

    #[async_trait::async_trait]
    impl AnswerSearch for FakeAnswer {
        fn name(&self) -> &'static str {
            "fake-answer"
        }

        async fn search(
            &self,
            _q: &str,
            _o: &OpenPerplexSearchOptions,
        ) -> Result<AnswerSearchResponse> {
            match &self.reply {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(Error::Search(e.to_string())),
            }
        }
    }

    pub(crate) struct FakeExtractor {
        pub reply: Result<ExtractResponse>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeExtractor {
        pub(crate) fn ok(resp: ExtractResponse) -> Self {
            Self {
                reply: Ok(resp),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Extractor for FakeExtractor {
        fn name(&self) -> &'static str {
            "fake-extract"
        }

        async fn extract(&self, urls: &[String]) -> Result<ExtractResponse> {
            self.calls.lock().unwrap().push(urls.to_vec());
            match &self.reply {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(Error::Extract(e.to_string())),
            }
        }
    }

    fn page(url: &str, raw: &str) -> ExtractedPage {
        ExtractedPage {
            url: url.to_string(),
            raw_content: raw.to_string(),
        }
    }

    fn backends(
        web: Arc<FakeWeb>,
        answer: Arc<FakeAnswer>,
        extractor: Arc<FakeExtractor>,
    ) -> SearchBackends {
        SearchBackends {
            web,
            answer,
            extractor,
        }
    }

    fn no_answer() -> Arc<FakeAnswer> {
        Arc::new(FakeAnswer {
            reply: Ok(AnswerSearchResponse::default()),
        })
    }

    #[test]
    fn ranking_is_stable_for_ties() {
        let rs = vec![
            result("a", 0.5),
            result("b", 0.9),
            result("c", 0.9),
            result("d", 0.3),
        ];
        let top: Vec<usize> = rank_by_score(&rs).into_iter().take(3).collect();
        assert_eq!(top, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn extract_batch_rejects_oversized_batches_before_calling_adapter() {
        let ex = FakeExtractor::ok(ExtractResponse::default());
        let urls: Vec<String> = (0..21).map(|i| format!("https://e.com/{i}")).collect();
        let err = extract_batch(&ex, &urls).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        let err = extract_batch(&ex, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(ex.calls.lock().unwrap().is_empty());

        extract_batch(&ex, &urls[..20]).await.unwrap();
        assert_eq!(ex.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tavily_path_extracts_top_three_and_joins_content() {
        let web = Arc::new(FakeWeb::ok(vec![
            result("https://a", 0.5),
            result("https://b", 0.9),
            result("https://c", 0.9),
            result("https://d", 0.3),
        ]));
        let ex = Arc::new(FakeExtractor::ok(ExtractResponse {
            results: vec![page("https://b", "B body"), page("https://c", ""), page("https://a", "A body")],
            failed_results: vec![FailedExtraction {
                url: "https://x".to_string(),
                error: "timeout".to_string(),
            }],
        }));
        let b = backends(Arc::clone(&web), no_answer(), Arc::clone(&ex));
        let mut store = ChatStore::new(ChatState::default());

        let ctx = run_search(
            &b,
            "q",
            &SearchOptions::empty(SearchProvider::Tavily),
            &mut store,
        )
        .await;

        assert_eq!(ctx.results.len(), 4);
        assert_eq!(ctx.extracted_content, "B body\n\nA body");
        assert_eq!(
            ex.calls.lock().unwrap()[0],
            vec!["https://b", "https://c", "https://a"]
        );
        assert_eq!(store.state().current_search_results, ctx.results);
        assert!(!store.state().is_extracting);
    }

    #[tokio::test]
    async fn tavily_path_survives_failing_adapters() {
        let ex = Arc::new(FakeExtractor {
            reply: Err(Error::Extract("HTTP 502".to_string())),
            calls: Mutex::new(Vec::new()),
        });
        let web = Arc::new(FakeWeb::ok(vec![result("https://a", 0.7)]));
        let b = backends(web, no_answer(), Arc::clone(&ex));
        let mut store = ChatStore::new(ChatState::default());
        let ctx = run_search(&b, "q", &SearchOptions::empty(SearchProvider::Tavily), &mut store).await;
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.extracted_content, "");
        assert!(!store.state().is_extracting);

        let web = Arc::new(FakeWeb::failing());
        let ex = Arc::new(FakeExtractor::ok(ExtractResponse::default()));
        let b = backends(web, no_answer(), Arc::clone(&ex));
        let ctx = run_search(&b, "q", &SearchOptions::empty(SearchProvider::Tavily), &mut store).await;
        assert_eq!(ctx, SearchContext::default());
        assert!(ex.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn openperplex_path_uses_answer_as_extracted_content() {
        let answer = Arc::new(FakeAnswer {
            reply: Ok(AnswerSearchResponse {
                results: vec![result("https://p", 1.0)],
                llm_response: Some("synthesized answer".to_string()),
            }),
        });
        let web = Arc::new(FakeWeb::ok(Vec::new()));
        let ex = Arc::new(FakeExtractor::ok(ExtractResponse::default()));
        let b = backends(Arc::clone(&web), answer, Arc::clone(&ex));
        let mut store = ChatStore::new(ChatState::default());

        let ctx = run_search(
            &b,
            "q",
            &SearchOptions::empty(SearchProvider::OpenPerplex),
            &mut store,
        )
        .await;
        assert_eq!(ctx.extracted_content, "synthesized answer");
        assert_eq!(store.state().current_search_results.len(), 1);
        assert!(web.calls.lock().unwrap().is_empty());
        assert!(ex.calls.lock().unwrap().is_empty());
    }
}
