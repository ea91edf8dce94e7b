//! reqwest-backed adapters for the askpipe pipeline.
//!
//! Every adapter has a `new` constructor taking explicit endpoints (used by tests
//! against local stub servers) and a `from_env` constructor reading `ASKPIPE_*`
//! variables, with the vendor's own variable name as a fallback for API keys.

use askpipe_core::{Error, Result};
use std::time::Duration;

pub mod chat;
pub mod openperplex;
pub mod tavily;

pub use chat::{OpenAiCompatChat, SseFramer};
pub use openperplex::OpenPerplexSearch;
pub use tavily::{TavilyExtract, TavilySearch};

/// Shared client. No overall timeout: chat responses stream for as long as the
/// model talks. Search adapters set their own per-request timeouts.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("askpipe-local/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::NotConfigured(e.to_string()))
}

/// Trimmed value of `key`; empty counts as unset.
pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First non-empty value among `keys`.
pub(crate) fn env_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env(k))
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;
    use std::net::SocketAddr;

    pub(crate) async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    pub(crate) struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        pub(crate) fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }

        pub(crate) fn unset(k: &'static str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::remove_var(k);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::EnvGuard;

    #[test]
    fn env_any_skips_blank_values() {
        let _a = EnvGuard::set("ASKPIPE_TEST_ENV_ANY_A", "   ");
        let _b = EnvGuard::set("ASKPIPE_TEST_ENV_ANY_B", " second ");
        assert_eq!(
            env_any(&["ASKPIPE_TEST_ENV_ANY_A", "ASKPIPE_TEST_ENV_ANY_B"]).as_deref(),
            Some("second")
        );
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("http://a/", "/search"), "http://a/search");
        assert_eq!(join_url("http://a/v1", "chat/completions"), "http://a/v1/chat/completions");
    }
}
