//! Environment-first configuration and backend wiring.

use anyhow::Context;
use askpipe_core::{
    AnswerSearch, AnswerSearchResponse, AssembleOptions, ChatState, Error, ExtractResponse,
    Extractor, OpenPerplexSearchOptions, Orchestrator, SearchBackends, SearchProvider,
    SearchResult, TavilySearchOptions, WebSearch,
};
use askpipe_local::{OpenAiCompatChat, OpenPerplexSearch, TavilyExtract, TavilySearch};
use std::path::PathBuf;
use std::sync::Arc;

pub const ENV_FILE_VAR: &str = "ASKPIPE_ENV_FILE";
/// Set to `0` to skip the default env file (explicit `ASKPIPE_ENV_FILE` still loads).
pub const DOTENV_VAR: &str = "ASKPIPE_DOTENV";

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

/// `ASKPIPE_ENV_FILE`, else `<config_dir>/askpipe/env` when it exists.
pub fn env_file_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(ENV_FILE_VAR) {
        let p = p.trim();
        if !p.is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    let disabled = matches!(
        std::env::var(DOTENV_VAR)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "0" | "false" | "no" | "off"
    );
    if disabled {
        return None;
    }
    dirs::config_dir()
        .map(|d| d.join("askpipe").join("env"))
        .filter(|p| p.is_file())
}

/// `KEY=VALUE` lines; blank lines and `#` comments are skipped, matching quotes stripped.
pub fn parse_env_file(txt: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let s = s.strip_prefix("export ").unwrap_or(s);
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        let v = v.trim();
        let v = ['"', '\'']
            .iter()
            .find_map(|q| v.strip_prefix(*q).and_then(|x| x.strip_suffix(*q)))
            .unwrap_or(v);
        out.push((k.to_string(), v.to_string()));
    }
    out
}

/// Apply the env file without overriding the process environment. Returns the
/// path that was read, if any. Values are never logged.
pub fn load_env_file() -> Option<PathBuf> {
    let path = env_file_path()?;
    let txt = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "env file not readable");
            return None;
        }
    };
    let mut applied = 0usize;
    for (k, v) in parse_env_file(&txt) {
        if std::env::var_os(&k).is_none() {
            std::env::set_var(&k, v);
            applied += 1;
        }
    }
    tracing::debug!(path = %path.display(), applied, "env file loaded");
    Some(path)
}

/// Per-session toggles, seeded from CLI flags.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub provider: SearchProvider,
    pub search_enabled: bool,
    pub reasoning_enabled: bool,
    pub answer_guidelines: bool,
}

impl Settings {
    pub fn initial_state(&self) -> ChatState {
        ChatState::new(self.search_enabled, self.reasoning_enabled, self.provider)
    }
}

/// Stand-in for a provider whose key is missing. Every call fails, which the
/// search stage already treats as "no results".
#[derive(Debug, Clone)]
struct Unconfigured {
    name: &'static str,
    hint: &'static str,
}

impl Unconfigured {
    fn error(&self) -> Error {
        Error::NotConfigured(self.hint.to_string())
    }
}

#[async_trait::async_trait]
impl WebSearch for Unconfigured {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(&self, _q: &str, _o: &TavilySearchOptions) -> askpipe_core::Result<Vec<SearchResult>> {
        Err(self.error())
    }
}

#[async_trait::async_trait]
impl AnswerSearch for Unconfigured {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(
        &self,
        _q: &str,
        _o: &OpenPerplexSearchOptions,
    ) -> askpipe_core::Result<AnswerSearchResponse> {
        Err(self.error())
    }
}

#[async_trait::async_trait]
impl Extractor for Unconfigured {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn extract(&self, _urls: &[String]) -> askpipe_core::Result<ExtractResponse> {
        Err(self.error())
    }
}

const TAVILY_HINT: &str = "missing ASKPIPE_TAVILY_API_KEY (or TAVILY_API_KEY)";
const OPENPERPLEX_HINT: &str = "missing ASKPIPE_OPENPERPLEX_API_KEY (or OPENPERPLEX_API_KEY)";

/// Wire the orchestrator from the environment. Only the chat backend is required.
pub fn build_orchestrator(settings: &Settings) -> anyhow::Result<Orchestrator> {
    let client = askpipe_local::http_client()?;
    let chat = OpenAiCompatChat::from_env(client.clone())
        .context("chat backend is required (see `askpipe doctor`)")?;

    let web: Arc<dyn WebSearch> = match TavilySearch::from_env(client.clone()) {
        Ok(s) => Arc::new(s),
        Err(_) => Arc::new(Unconfigured {
            name: "tavily",
            hint: TAVILY_HINT,
        }),
    };
    let extractor: Arc<dyn Extractor> = match TavilyExtract::from_env(client.clone()) {
        Ok(s) => Arc::new(s),
        Err(_) => Arc::new(Unconfigured {
            name: "tavily-extract",
            hint: TAVILY_HINT,
        }),
    };
    let answer: Arc<dyn AnswerSearch> = match OpenPerplexSearch::from_env(client) {
        Ok(s) => Arc::new(s),
        Err(_) => Arc::new(Unconfigured {
            name: "openperplex",
            hint: OPENPERPLEX_HINT,
        }),
    };
    if settings.search_enabled && !provider_configured(settings.provider) {
        tracing::warn!(provider = %settings.provider, "search provider not configured; answers will have no sources");
    }

    Ok(Orchestrator::new(
        Arc::new(chat),
        SearchBackends {
            web,
            answer,
            extractor,
        },
    )
    .with_assemble_options(AssembleOptions {
        answer_guidelines: settings.answer_guidelines,
    }))
}

pub fn provider_configured(provider: SearchProvider) -> bool {
    match provider {
        SearchProvider::Tavily => has_env("ASKPIPE_TAVILY_API_KEY") || has_env("TAVILY_API_KEY"),
        SearchProvider::OpenPerplex => {
            has_env("ASKPIPE_OPENPERPLEX_API_KEY") || has_env("OPENPERPLEX_API_KEY")
        }
    }
}

pub fn chat_configured() -> bool {
    has_env("ASKPIPE_CHAT_API_KEY") || has_env("DEEPSEEK_API_KEY")
}

/// Configuration report (booleans only; never values).
pub fn doctor_report(env_file: Option<&PathBuf>) -> serde_json::Value {
    let chat_ok = chat_configured();
    let tavily_ok = provider_configured(SearchProvider::Tavily);
    let openperplex_ok = provider_configured(SearchProvider::OpenPerplex);
    let checks = vec![
        serde_json::json!({
            "name": "chat_backend",
            "ok": chat_ok,
            "hint": if chat_ok { "" } else { "Set ASKPIPE_CHAT_API_KEY (or DEEPSEEK_API_KEY)." },
        }),
        serde_json::json!({
            "name": "search_provider",
            "ok": tavily_ok || openperplex_ok,
            "hint": if tavily_ok || openperplex_ok { "" } else { "Set TAVILY_API_KEY or OPENPERPLEX_API_KEY to enable sources." },
        }),
    ];
    serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": chat_ok,
        "name": "askpipe",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "configured": {
            "providers": {
                "tavily": tavily_ok,
                "openperplex": openperplex_ok,
            },
            "chat": {
                "api_key": chat_ok,
                "custom_base_url": has_env("ASKPIPE_CHAT_BASE_URL"),
                "custom_models": has_env("ASKPIPE_CHAT_MODEL") || has_env("ASKPIPE_REASONER_MODEL"),
            },
            "env_file": env_file.map(|p| p.to_string_lossy().to_string()),
        },
        "checks": checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_parsing_skips_comments_and_strips_quotes() {
        let txt = "\n# keys\nTAVILY_API_KEY=tvly-1\nexport DEEPSEEK_API_KEY = \"sk-2\"\nBAD LINE\n=novalue\nEMPTY=\nQUOTED='x y'\n";
        let kv = parse_env_file(txt);
        assert_eq!(
            kv,
            vec![
                ("TAVILY_API_KEY".to_string(), "tvly-1".to_string()),
                ("DEEPSEEK_API_KEY".to_string(), "sk-2".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("QUOTED".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn settings_seed_the_initial_state() {
        let s = Settings {
            provider: SearchProvider::OpenPerplex,
            search_enabled: false,
            reasoning_enabled: true,
            answer_guidelines: false,
        };
        let st = s.initial_state();
        assert_eq!(st.search_provider, SearchProvider::OpenPerplex);
        assert!(!st.search_enabled);
        assert!(st.reasoning_enabled);
        assert!(st.messages.is_empty());
    }
}
