//! Provider selection and per-provider search options.
//!
//! Options come out of an LLM response, so parsing is lenient: unknown keys are
//! dropped, fields with the wrong type are treated as unset, and numeric fields are
//! clamped into their legal range. Defaults are applied late, by the `effective_*`
//! accessors that adapters use when they build a request.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::Error;

pub const DEFAULT_MAX_RESULTS: u32 = 5;
pub const MAX_RESULTS_RANGE: (u32, u32) = (1, 10);
pub const DEFAULT_NEWS_DAYS: u32 = 3;
pub const NEWS_DAYS_RANGE: (u32, u32) = (1, 30);

/// Domains the Tavily fallback always searches.
pub const FALLBACK_INCLUDE_DOMAINS: [&str; 2] = ["twitter.com", "reddit.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProvider {
    /// General web search followed by page extraction.
    #[default]
    Tavily,
    /// Search that also returns a synthesized answer.
    OpenPerplex,
}

impl SearchProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchProvider::Tavily => "tavily",
            SearchProvider::OpenPerplex => "openperplex",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SearchProvider::Tavily => "Tavily",
            SearchProvider::OpenPerplex => "OpenPerplex",
        }
    }

    pub fn all() -> [SearchProvider; 2] {
        [SearchProvider::Tavily, SearchProvider::OpenPerplex]
    }
}

impl fmt::Display for SearchProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tavily" | "general" => Ok(SearchProvider::Tavily),
            "openperplex" | "pro" => Ok(SearchProvider::OpenPerplex),
            other => Err(Error::InvalidRequest(format!(
                "unknown search provider {other:?} (allowed: tavily, openperplex)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(SearchDepth::Basic),
            "advanced" => Some(SearchDepth::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    #[default]
    General,
    News,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::General => "general",
            Topic::News => "news",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Topic::General),
            "news" => Some(Topic::News),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "day",
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Year => "year",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "d" => Some(TimeRange::Day),
            "week" | "w" => Some(TimeRange::Week),
            "month" | "m" => Some(TimeRange::Month),
            "year" | "y" => Some(TimeRange::Year),
            _ => None,
        }
    }
}

/// `includeAnswer` accepts a flag or an answer depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IncludeAnswer {
    Flag(bool),
    Depth(SearchDepth),
}

impl IncludeAnswer {
    fn parse(v: &Value) -> Option<Self> {
        match v {
            Value::Bool(b) => Some(IncludeAnswer::Flag(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(IncludeAnswer::Flag(true)),
                "false" => Some(IncludeAnswer::Flag(false)),
                other => SearchDepth::parse(other).map(IncludeAnswer::Depth),
            },
            _ => None,
        }
    }

    pub fn to_json(self) -> Value {
        match self {
            IncludeAnswer::Flag(b) => Value::Bool(b),
            IncludeAnswer::Depth(d) => Value::String(d.as_str().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TavilySearchOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_depth: Option<SearchDepth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_image_descriptions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_answer: Option<IncludeAnswer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_raw_content: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_domains: Option<Vec<String>>,
}

impl TavilySearchOptions {
    pub fn fallback() -> Self {
        Self {
            search_depth: Some(SearchDepth::Basic),
            topic: Some(Topic::General),
            max_results: Some(DEFAULT_MAX_RESULTS),
            include_answer: Some(IncludeAnswer::Flag(true)),
            include_domains: Some(
                FALLBACK_INCLUDE_DOMAINS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn from_value(v: &Value) -> Self {
        let Some(obj) = v.as_object() else {
            return Self::default();
        };
        let get = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));
        Self {
            search_depth: get(&["searchDepth", "search_depth"])
                .and_then(Value::as_str)
                .and_then(SearchDepth::parse),
            topic: get(&["topic"])
                .and_then(Value::as_str)
                .and_then(Topic::parse),
            days: get(&["days"])
                .and_then(lenient_u32)
                .map(|n| clamp(n, NEWS_DAYS_RANGE)),
            time_range: get(&["timeRange", "time_range"])
                .and_then(Value::as_str)
                .and_then(TimeRange::parse),
            max_results: get(&["maxResults", "max_results"])
                .and_then(lenient_u32)
                .map(|n| clamp(n, MAX_RESULTS_RANGE)),
            include_images: get(&["includeImages", "include_images"]).and_then(lenient_bool),
            include_image_descriptions: get(&[
                "includeImageDescriptions",
                "include_image_descriptions",
            ])
            .and_then(lenient_bool),
            include_answer: get(&["includeAnswer", "include_answer"])
                .and_then(IncludeAnswer::parse),
            include_raw_content: get(&["includeRawContent", "include_raw_content"])
                .and_then(lenient_bool),
            include_domains: get(&["includeDomains", "include_domains"])
                .and_then(lenient_string_list),
        }
    }

    pub fn effective_max_results(&self) -> u32 {
        effective_max_results(self.max_results)
    }

    pub fn effective_search_depth(&self) -> SearchDepth {
        self.search_depth.unwrap_or_default()
    }

    pub fn effective_topic(&self) -> Topic {
        self.topic.unwrap_or_default()
    }

    /// `days` only applies to news searches.
    pub fn effective_days(&self) -> Option<u32> {
        match self.effective_topic() {
            Topic::News => Some(self.days.unwrap_or(DEFAULT_NEWS_DAYS)),
            Topic::General => None,
        }
    }

    pub fn effective_include_answer(&self) -> IncludeAnswer {
        self.include_answer.unwrap_or(IncludeAnswer::Flag(true))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpenPerplexSearchOptions {
    #[serde(rename = "maxResults", skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pro_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_sources: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_citations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency_filter: Option<String>,
}

impl OpenPerplexSearchOptions {
    pub fn fallback() -> Self {
        Self {
            max_results: Some(DEFAULT_MAX_RESULTS),
            ..Self::default()
        }
    }

    pub fn from_value(v: &Value) -> Self {
        let Some(obj) = v.as_object() else {
            return Self::default();
        };
        let get = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));
        let string = |keys: &[&str]| {
            get(keys)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            max_results: get(&["maxResults", "max_results"])
                .and_then(lenient_u32)
                .map(|n| clamp(n, MAX_RESULTS_RANGE)),
            location: string(&["location"]),
            pro_mode: get(&["pro_mode", "proMode"]).and_then(lenient_bool),
            response_language: string(&["response_language", "responseLanguage"]),
            answer_type: string(&["answer_type", "answerType"]),
            search_type: string(&["search_type", "searchType"]),
            verbose_mode: get(&["verbose_mode", "verboseMode"]).and_then(lenient_bool),
            return_sources: get(&["return_sources", "returnSources"]).and_then(lenient_bool),
            return_images: get(&["return_images", "returnImages"]).and_then(lenient_bool),
            return_citations: get(&["return_citations", "returnCitations"])
                .and_then(lenient_bool),
            recency_filter: string(&["recency_filter", "recencyFilter"]),
        }
    }

    pub fn effective_max_results(&self) -> u32 {
        effective_max_results(self.max_results)
    }

    pub fn effective_location(&self) -> &str {
        self.location.as_deref().unwrap_or("us")
    }

    pub fn effective_response_language(&self) -> &str {
        self.response_language.as_deref().unwrap_or("en")
    }

    pub fn effective_answer_type(&self) -> &str {
        self.answer_type.as_deref().unwrap_or("text")
    }

    pub fn effective_search_type(&self) -> &str {
        self.search_type.as_deref().unwrap_or("general")
    }

    pub fn effective_recency_filter(&self) -> &str {
        self.recency_filter.as_deref().unwrap_or("anytime")
    }
}

/// Options tagged by the provider they belong to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "provider", content = "options", rename_all = "lowercase")]
pub enum SearchOptions {
    Tavily(TavilySearchOptions),
    OpenPerplex(OpenPerplexSearchOptions),
}

impl SearchOptions {
    pub fn provider(&self) -> SearchProvider {
        match self {
            SearchOptions::Tavily(_) => SearchProvider::Tavily,
            SearchOptions::OpenPerplex(_) => SearchProvider::OpenPerplex,
        }
    }

    /// No fields set: every value comes from the adapter defaults.
    pub fn empty(provider: SearchProvider) -> Self {
        match provider {
            SearchProvider::Tavily => SearchOptions::Tavily(TavilySearchOptions::default()),
            SearchProvider::OpenPerplex => {
                SearchOptions::OpenPerplex(OpenPerplexSearchOptions::default())
            }
        }
    }

    /// Hardcoded options used when the refinement response is unusable.
    pub fn fallback(provider: SearchProvider) -> Self {
        match provider {
            SearchProvider::Tavily => SearchOptions::Tavily(TavilySearchOptions::fallback()),
            SearchProvider::OpenPerplex => {
                SearchOptions::OpenPerplex(OpenPerplexSearchOptions::fallback())
            }
        }
    }

    pub fn from_value(provider: SearchProvider, v: &Value) -> Self {
        match provider {
            SearchProvider::Tavily => SearchOptions::Tavily(TavilySearchOptions::from_value(v)),
            SearchProvider::OpenPerplex => {
                SearchOptions::OpenPerplex(OpenPerplexSearchOptions::from_value(v))
            }
        }
    }
}

fn effective_max_results(n: Option<u32>) -> u32 {
    // Zero behaves like unset.
    match n {
        Some(0) | None => DEFAULT_MAX_RESULTS,
        Some(n) => clamp(n, MAX_RESULTS_RANGE),
    }
}

fn clamp(n: u32, (lo, hi): (u32, u32)) -> u32 {
    n.clamp(lo, hi)
}

fn lenient_u32(v: &Value) -> Option<u32> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !f.is_finite() {
        return None;
    }
    Some(f.max(0.0).min(u32::MAX as f64).round() as u32)
}

fn lenient_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lenient_string_list(v: &Value) -> Option<Vec<String>> {
    match v {
        Value::Array(xs) => Some(
            xs.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        Value::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tavily_options_clamp_and_drop_bad_fields() {
        let o = TavilySearchOptions::from_value(&json!({
            "searchDepth": "ADVANCED",
            "topic": "sports",
            "days": 90,
            "timeRange": "w",
            "maxResults": 50,
            "includeImages": "yes",
            "includeAnswer": "basic",
            "includeDomains": ["reddit.com", "", 3],
            "bogus": true
        }));
        assert_eq!(o.search_depth, Some(SearchDepth::Advanced));
        assert_eq!(o.topic, None);
        assert_eq!(o.days, Some(30));
        assert_eq!(o.time_range, Some(TimeRange::Week));
        assert_eq!(o.max_results, Some(10));
        assert_eq!(o.include_images, Some(true));
        assert_eq!(o.include_answer, Some(IncludeAnswer::Depth(SearchDepth::Basic)));
        assert_eq!(o.include_domains, Some(vec!["reddit.com".to_string()]));
    }

    #[test]
    fn max_results_lower_bound_and_zero() {
        let o = TavilySearchOptions::from_value(&json!({ "maxResults": 0 }));
        assert_eq!(o.max_results, Some(1));
        assert_eq!(effective_max_results(Some(0)), DEFAULT_MAX_RESULTS);
        assert_eq!(effective_max_results(None), DEFAULT_MAX_RESULTS);
        assert_eq!(effective_max_results(Some(7)), 7);
    }

    #[test]
    fn days_apply_only_to_news() {
        let general = TavilySearchOptions::from_value(&json!({ "days": 4 }));
        assert_eq!(general.effective_days(), None);
        let news = TavilySearchOptions::from_value(&json!({ "topic": "news" }));
        assert_eq!(news.effective_days(), Some(DEFAULT_NEWS_DAYS));
    }

    #[test]
    fn openperplex_options_accept_both_key_styles() {
        let o = OpenPerplexSearchOptions::from_value(&json!({
            "maxResults": "3",
            "proMode": true,
            "recency_filter": "week",
            "location": "  "
        }));
        assert_eq!(o.max_results, Some(3));
        assert_eq!(o.pro_mode, Some(true));
        assert_eq!(o.effective_recency_filter(), "week");
        assert_eq!(o.effective_location(), "us");
    }

    #[test]
    fn fallback_options_match_provider() {
        let SearchOptions::Tavily(t) = SearchOptions::fallback(SearchProvider::Tavily) else {
            panic!("expected tavily options");
        };
        assert_eq!(t.include_answer, Some(IncludeAnswer::Flag(true)));
        assert_eq!(
            t.include_domains.as_deref(),
            Some(&["twitter.com".to_string(), "reddit.com".to_string()][..])
        );
        assert_eq!(
            SearchOptions::fallback(SearchProvider::OpenPerplex).provider(),
            SearchProvider::OpenPerplex
        );
    }

    #[test]
    fn provider_parses_aliases() {
        assert_eq!("pro".parse::<SearchProvider>().unwrap(), SearchProvider::OpenPerplex);
        assert_eq!(" Tavily ".parse::<SearchProvider>().unwrap(), SearchProvider::Tavily);
        assert!("bing".parse::<SearchProvider>().is_err());
    }
}
