//! Query refinement: ask the model for a search query plus provider options, and
//! turn whatever comes back into a usable `RefinedQuery`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

use crate::options::{SearchOptions, SearchProvider};
use crate::{ChatBackend, ChatHistoryEntry, ChatMessage, ChatRequest, Role};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinedQuery {
    pub refined_query: String,
    pub search_options: SearchOptions,
}

impl RefinedQuery {
    /// The safe default: search for the message as typed.
    pub fn fallback(user_message: &str, provider: SearchProvider) -> Self {
        Self {
            refined_query: user_message.to_string(),
            search_options: SearchOptions::fallback(provider),
        }
    }
}

/// Outcome of parsing a refinement response.
#[derive(Debug, Clone, PartialEq)]
pub enum RefinementParse {
    Parsed(RefinedQuery),
    /// The response had no usable JSON object; the reason is for logs only.
    NeedsDefault(String),
}

impl RefinementParse {
    pub fn into_refined(self, user_message: &str, provider: SearchProvider) -> RefinedQuery {
        match self {
            RefinementParse::Parsed(r) => r,
            RefinementParse::NeedsDefault(_) => RefinedQuery::fallback(user_message, provider),
        }
    }
}

fn prefix_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(Answer|Response|Here's the JSON|JSON)?\s*:?\s*").ok())
        .as_ref()
}

fn strip_prefix(raw: &str) -> String {
    match prefix_re() {
        Some(re) => re.replace(raw, "").trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Greedy `{ ... }` span: first opening brace through the last closing brace.
fn brace_span(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

/// Parse a refinement response. Never fails; malformed input yields `NeedsDefault`.
pub fn parse_refinement(
    raw: &str,
    user_message: &str,
    provider: SearchProvider,
) -> RefinementParse {
    let cleaned = strip_prefix(raw);

    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(v) => v,
        Err(direct_err) => {
            tracing::debug!(error = %direct_err, "refinement: direct parse failed, trying brace extraction");
            let Some(span) = brace_span(&cleaned) else {
                return RefinementParse::NeedsDefault(
                    "no JSON object found in response".to_string(),
                );
            };
            match serde_json::from_str::<Value>(span) {
                Ok(v) => v,
                Err(e) => {
                    return RefinementParse::NeedsDefault(format!(
                        "extracted JSON did not parse: {e}"
                    ))
                }
            }
        }
    };

    let Some(obj) = value.as_object() else {
        return RefinementParse::NeedsDefault("response JSON is not an object".to_string());
    };

    let refined_query = obj
        .get("refinedQuery")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(user_message)
        .to_string();

    let search_options = match obj.get("searchOptions") {
        Some(v) if v.is_object() => SearchOptions::from_value(provider, v),
        _ => SearchOptions::empty(provider),
    };

    RefinementParse::Parsed(RefinedQuery {
        refined_query,
        search_options,
    })
}

fn provider_option_lines(provider: SearchProvider) -> &'static str {
    match provider {
        SearchProvider::Tavily => {
            r#"   - "searchDepth": "basic" or "advanced" (default "basic")
   - "topic": "general" or "news" (default "general")
   - "days": number (1-30, only used with topic:"news", default 3)
   - "timeRange": "day"/"d", "week"/"w", "month"/"m", "year"/"y"
   - "maxResults": number between 1-10 (default 5)
   - "includeImages": boolean
   - "includeImageDescriptions": boolean
   - "includeAnswer": boolean | "basic" | "advanced"
   - "includeRawContent": boolean
   - "includeDomains": array of domains to include"#
        }
        SearchProvider::OpenPerplex => r#"   - "maxResults": number between 1-10 (default 5)"#,
    }
}

/// System prompt for the refinement call.
pub fn refinement_prompt(
    provider: SearchProvider,
    history: &[ChatHistoryEntry],
    now: DateTime<Utc>,
) -> String {
    let history_json = serde_json::to_string(history).unwrap_or_else(|_| "[]".to_string());
    let domains_rule = match provider {
        SearchProvider::Tavily => "\nAlways include \"twitter.com\" and \"reddit.com\" in \"includeDomains\" to ensure searches cover those platforms.\n",
        SearchProvider::OpenPerplex => "",
    };
    format!(
        r#"You are a specialized LLM that refines user queries to maximize search result quality.

Your task is to optimize the user's query for the {provider} search API.
The current date is {date} and the current time is {time}. Please use this date and time to get the most up-to-date results.

Consider the chat history for context:
{history_json}

Return ONLY a valid JSON object with the following properties:
1. "refinedQuery" (string):
   - A clear and focused search query, optimized for relevance.

2. "searchOptions" (object) with ONLY these valid {name} parameters:
{options}
{domains_rule}"#,
        provider = provider.as_str(),
        date = now.format("%Y-%m-%d"),
        time = now.format("%H:%M:%S"),
        name = provider.display_name(),
        options = provider_option_lines(provider),
    )
}

/// Run the refinement call. Any failure degrades to `RefinedQuery::fallback`.
pub async fn refine(
    chat: &dyn ChatBackend,
    user_message: &str,
    history: &[ChatHistoryEntry],
    provider: SearchProvider,
    now: DateTime<Utc>,
) -> RefinedQuery {
    let req = ChatRequest {
        messages: vec![
            ChatMessage::new(Role::System, refinement_prompt(provider, history, now)),
            ChatMessage::new(Role::User, user_message),
        ],
        reasoning_enabled: false,
    };

    let raw = match chat.complete(&req).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(backend = chat.name(), error = %e, "refinement request failed; using fallback");
            return RefinedQuery::fallback(user_message, provider);
        }
    };

    match parse_refinement(&raw, user_message, provider) {
        RefinementParse::Parsed(r) => {
            tracing::debug!(
                original = user_message,
                refined = %r.refined_query,
                "refinement parsed"
            );
            r
        }
        RefinementParse::NeedsDefault(reason) => {
            tracing::warn!(%reason, response_len = raw.len(), "refinement unusable; using fallback");
            RefinedQuery::fallback(user_message, provider)
        }
    }
}
