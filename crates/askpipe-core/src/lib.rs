use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub mod assemble;
pub mod options;
pub mod refine;
pub mod search;
pub mod state;
pub mod stream;
pub mod submit;

pub use assemble::{assemble, bare_domain, AssembleOptions};
pub use options::{
    IncludeAnswer, OpenPerplexSearchOptions, SearchDepth, SearchOptions, SearchProvider,
    TavilySearchOptions, TimeRange, Topic,
};
pub use refine::{parse_refinement, refine, RefinedQuery, RefinementParse};
pub use search::{extract_batch, rank_by_score, run_search, SearchBackends, SearchContext};
pub use state::{ChatState, ChatStore};
pub use stream::{consume, Utf8StreamDecoder};
pub use submit::{model_messages, NoopEvent, Orchestrator, SubmitEvent, DEFAULT_SYSTEM_PROMPT};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("extract failed: {0}")]
    Extract(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("generation failed (HTTP {status}): {body}")]
    Generation { status: u16, body: String },
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Content of the placeholder message shown while search runs.
pub const SENTINEL_SEARCH_RESULTS: &str = "search-results";
/// Placeholder content once search came back empty.
pub const SENTINEL_NO_RESULTS: &str = "no-results";
pub const PLACEHOLDER_THINKING: &str = "thinking...";
pub const PLACEHOLDER_GENERATING: &str = "generating...";

pub const APOLOGY: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";
pub const STREAM_ERROR_MESSAGE: &str =
    "Error: Failed to process the streaming response. Please try again.";
pub const HISTORY_ERROR_MARKER: &str = "Error: Unable to process request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub content: String,
    pub url: String,
    /// Relevance in `[0, 1]`.
    pub score: f64,
}

/// A message as the UI renders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<SearchResult>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            context: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            context: None,
        }
    }

    /// True for reserved contents that mark UI state rather than text.
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant
            && matches!(
                self.content.as_str(),
                SENTINEL_SEARCH_RESULTS
                    | SENTINEL_NO_RESULTS
                    | PLACEHOLDER_THINKING
                    | PLACEHOLDER_GENERATING
            )
    }
}

/// One entry of the transcript sent to the model (never rendered as-is).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reasoning: bool,
}

impl ChatHistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&ChatHistoryEntry> for ChatMessage {
    fn from(e: &ChatHistoryEntry) -> Self {
        Self {
            role: e.role,
            content: e.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub reasoning_enabled: bool,
}

/// Raw response body of a chat completion: plain text, chunked arbitrarily.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a completion. Non-success responses map to `Error::Generation`.
    async fn stream(&self, req: &ChatRequest) -> Result<ByteStream>;

    /// Whole-response variant used by refinement.
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        let s = self.stream(req).await?;
        stream::consume(s, |_| {}).await
    }

    /// Whether the provider rejects two consecutive user turns.
    fn requires_alternation(&self) -> bool {
        true
    }
}

#[async_trait::async_trait]
pub trait WebSearch: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, query: &str, options: &TavilySearchOptions) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerSearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub llm_response: Option<String>,
}

#[async_trait::async_trait]
pub trait AnswerSearch: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(
        &self,
        query: &str,
        options: &OpenPerplexSearchOptions,
    ) -> Result<AnswerSearchResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub url: String,
    #[serde(default)]
    pub raw_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExtraction {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractResponse {
    #[serde(default)]
    pub results: Vec<ExtractedPage>,
    #[serde(default)]
    pub failed_results: Vec<FailedExtraction>,
}

/// Maximum URLs accepted by one extraction call.
pub const MAX_EXTRACT_URLS: usize = 20;

#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract(&self, urls: &[String]) -> Result<ExtractResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_entry_omits_reasoning_flag_when_false() {
        let e = ChatHistoryEntry::new(Role::User, "hi");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v, serde_json::json!({"role": "user", "content": "hi"}));

        let e = ChatHistoryEntry {
            reasoning: true,
            ..ChatHistoryEntry::new(Role::Assistant, "ok")
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["reasoning"], serde_json::json!(true));
    }

    #[test]
    fn placeholders_are_recognized_only_on_assistant_messages() {
        assert!(Message::assistant(SENTINEL_SEARCH_RESULTS).is_placeholder());
        assert!(Message::assistant(PLACEHOLDER_THINKING).is_placeholder());
        assert!(!Message::user(SENTINEL_NO_RESULTS).is_placeholder());
        assert!(!Message::assistant("no-results found here").is_placeholder());
    }
}
