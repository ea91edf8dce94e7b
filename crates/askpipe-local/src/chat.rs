//! OpenAI-compatible streaming chat (DeepSeek by default).
//!
//! The HTTP response is server-sent events; [`SseFramer`] turns it into the plain
//! text stream the pipeline consumes, labelling reasoning and answer phases.

use askpipe_core::{ByteStream, ChatBackend, ChatMessage, ChatRequest, Error, Result};
use futures_util::StreamExt;
use serde::Serialize;

use crate::{env, env_any, join_url};

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";
const DEFAULT_REASONER_MODEL: &str = "deepseek-reasoner";
const REASONING_TEMPERATURE: f64 = 0.7;

pub const REASONING_LABEL: &str = "Reasoning:\n";
pub const ANSWER_LABEL: &str = "\n\nAnswer:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reasoning,
    Content,
}

/// Incremental SSE-to-text framer.
///
/// Feed raw body bytes with [`SseFramer::push`]; lines may be split anywhere.
/// `data: [DONE]` ends the stream, after which input is ignored. Event lines that
/// are not JSON, or carry no delta, produce nothing.
#[derive(Debug)]
pub struct SseFramer {
    reasoning_enabled: bool,
    buf: Vec<u8>,
    phase: Phase,
    done: bool,
}

impl SseFramer {
    pub fn new(reasoning_enabled: bool) -> Self {
        Self {
            reasoning_enabled,
            buf: Vec::new(),
            phase: Phase::Idle,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut out = String::new();
        if self.done {
            return out;
        }
        self.buf.extend_from_slice(chunk);
        while let Some(nl) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=nl).collect();
            self.line(&line[..nl], &mut out);
            if self.done {
                self.buf.clear();
                break;
            }
        }
        out
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        if !self.done && !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.line(&line, &mut out);
        }
        self.done = true;
        out
    }

    fn line(&mut self, raw: &[u8], out: &mut String) {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_end_matches('\r');
        let Some(data) = text.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        let Ok(v) = serde_json::from_str::<serde_json::Value>(data) else {
            tracing::trace!(line_chars = data.len(), "skipping unparseable event line");
            return;
        };
        let delta = &v["choices"][0]["delta"];

        if self.reasoning_enabled {
            if let Some(r) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
                match self.phase {
                    Phase::Reasoning => {}
                    Phase::Content => {
                        out.push_str("\n\n");
                        out.push_str(REASONING_LABEL);
                    }
                    Phase::Idle => out.push_str(REASONING_LABEL),
                }
                self.phase = Phase::Reasoning;
                out.push_str(r);
            }
        }
        if let Some(c) = delta["content"].as_str().filter(|s| !s.is_empty()) {
            if self.phase == Phase::Reasoning {
                out.push_str(ANSWER_LABEL);
            }
            self.phase = Phase::Content;
            out.push_str(c);
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    reasoner_model: String,
}

impl OpenAiCompatChat {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            reasoner_model: DEFAULT_REASONER_MODEL.to_string(),
        }
    }

    pub fn with_models(mut self, chat: impl Into<String>, reasoner: impl Into<String>) -> Self {
        self.chat_model = chat.into();
        self.reasoner_model = reasoner.into();
        self
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = env_any(&["ASKPIPE_CHAT_API_KEY", "DEEPSEEK_API_KEY"]).ok_or_else(|| {
            Error::NotConfigured("missing ASKPIPE_CHAT_API_KEY (or DEEPSEEK_API_KEY)".to_string())
        })?;
        let base_url = env("ASKPIPE_CHAT_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(client, base_url, api_key).with_models(
            env("ASKPIPE_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            env("ASKPIPE_REASONER_MODEL").unwrap_or_else(|| DEFAULT_REASONER_MODEL.to_string()),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn model_for(&self, reasoning: bool) -> &str {
        if reasoning {
            &self.reasoner_model
        } else {
            &self.chat_model
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// Frame an SSE body into text chunks; transport errors end the stream.
fn frame<S, B, E>(body: S, reasoning_enabled: bool) -> ByteStream
where
    S: futures_util::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(body), SseFramer::new(reasoning_enabled), false);
    Box::pin(futures_util::stream::unfold(
        state,
        |(mut body, mut framer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match body.next().await {
                    Some(Ok(chunk)) => {
                        let text = framer.push(chunk.as_ref());
                        if framer.is_done() {
                            return Some((Ok(text.into_bytes()), (body, framer, true)));
                        }
                        if !text.is_empty() {
                            return Some((Ok(text.into_bytes()), (body, framer, false)));
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(Error::Stream(e.to_string())), (body, framer, true)));
                    }
                    None => {
                        let tail = framer.finish();
                        if tail.is_empty() {
                            return None;
                        }
                        return Some((Ok(tail.into_bytes()), (body, framer, true)));
                    }
                }
            }
        },
    ))
}

#[async_trait::async_trait]
impl ChatBackend for OpenAiCompatChat {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    async fn stream(&self, req: &ChatRequest) -> Result<ByteStream> {
        let body = ChatCompletionsRequest {
            model: self.model_for(req.reasoning_enabled),
            messages: &req.messages,
            stream: true,
            temperature: req.reasoning_enabled.then_some(REASONING_TEMPERATURE),
        };
        tracing::debug!(model = body.model, messages = req.messages.len(), "chat.completions request");

        let resp = self
            .client
            .post(join_url(&self.base_url, "chat/completions"))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Generation {
                status: status.as_u16(),
                body,
            });
        }
        Ok(frame(resp.bytes_stream(), req.reasoning_enabled))
    }
}
