//! The submission orchestrator: one user turn, start to finish.
//!
//! Stages run strictly in order (refine -> search -> assemble -> generate), each
//! awaited before the next. Refinement and search failures degrade to defaults;
//! only a failed generation reaches the user, as an apology message. Nothing
//! escapes `submit`.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::assemble::{assemble, AssembleOptions};
use crate::options::SearchProvider;
use crate::refine::refine;
use crate::search::{rank_by_score, run_search, SearchBackends, SearchContext};
use crate::state::ChatStore;
use crate::stream::consume;
use crate::{
    ChatBackend, ChatHistoryEntry, ChatMessage, ChatRequest, Error, Message, Result, Role,
    APOLOGY, HISTORY_ERROR_MARKER, PLACEHOLDER_GENERATING, PLACEHOLDER_THINKING,
    SENTINEL_NO_RESULTS, SENTINEL_SEARCH_RESULTS, STREAM_ERROR_MESSAGE,
};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that provides clear, focused responses. For factual questions, you give direct answers with sources. For complex topics, you break down explanations into clear sections. You use simple language and note any uncertainties.";

/// Synthetic assistant turn used to keep user/assistant alternation.
pub const ALTERNATION_FILLER: &str = "Acknowledged.";

/// The UI event that triggered a submission.
pub trait SubmitEvent {
    fn prevent_default(&mut self);
}

/// For callers with no UI event to suppress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvent;

impl SubmitEvent for NoopEvent {
    fn prevent_default(&mut self) {}
}

/// Settings captured when a turn starts; later toggles do not affect it.
struct Turn {
    user_message: String,
    search_enabled: bool,
    reasoning_enabled: bool,
    provider: SearchProvider,
    history: Vec<ChatHistoryEntry>,
}

pub struct Orchestrator {
    chat: Arc<dyn ChatBackend>,
    search: SearchBackends,
    assemble: AssembleOptions,
    system_prompt: String,
    clock: fn() -> DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(chat: Arc<dyn ChatBackend>, search: SearchBackends) -> Self {
        Self {
            chat,
            search,
            assemble: AssembleOptions::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            clock: Utc::now,
        }
    }

    pub fn with_assemble_options(mut self, opts: AssembleOptions) -> Self {
        self.assemble = opts;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Handle one submission. Empty input is a no-op once the event is suppressed.
    pub async fn submit(&self, event: &mut dyn SubmitEvent, store: &mut ChatStore) {
        event.prevent_default();

        let state = store.state();
        let user_message = state.input.trim().to_string();
        if user_message.is_empty() {
            return;
        }
        let turn = Turn {
            user_message,
            search_enabled: state.search_enabled,
            reasoning_enabled: state.reasoning_enabled,
            provider: state.search_provider,
            history: state.chat_history.clone(),
        };
        tracing::info!(
            search_enabled = turn.search_enabled,
            provider = %turn.provider,
            reasoning_enabled = turn.reasoning_enabled,
            "submit: turn starting"
        );

        store.set_input("");
        store.push_message(Message::user(turn.user_message.clone()));

        match self.run_turn(&turn, store).await {
            Ok(()) => tracing::info!("submit: turn completed"),
            Err(e) => {
                tracing::error!(error = %e, "submit: turn failed");
                store.set_is_searching(false);
                store.set_is_extracting(false);
                store.push_message(Message::assistant(APOLOGY));
            }
        }
    }

    async fn run_turn(&self, turn: &Turn, store: &mut ChatStore) -> Result<()> {
        let mut contextualized = turn.user_message.clone();
        let mut searched: Option<(String, SearchContext)> = None;

        if turn.search_enabled {
            let refined = refine(
                self.chat.as_ref(),
                &turn.user_message,
                &turn.history,
                turn.provider,
                (self.clock)(),
            )
            .await;

            store.set_is_searching(true);
            store.set_current_search_results(Vec::new());
            let placeholder = store.push_message(Message::assistant(SENTINEL_SEARCH_RESULTS));

            let ctx = run_search(
                &self.search,
                &refined.refined_query,
                &refined.search_options,
                store,
            )
            .await;

            store.update_message(placeholder, |m| {
                if ctx.results.is_empty() {
                    m.content = SENTINEL_NO_RESULTS.to_string();
                    m.context = Some(Vec::new());
                } else {
                    m.context = Some(ctx.results.clone());
                }
            });
            store.set_is_searching(false);

            contextualized = assemble(
                &turn.user_message,
                &refined.refined_query,
                &ctx.results,
                &ctx.extracted_content,
                turn.provider,
                self.assemble,
            );
            store.set_is_extracting(false);
            searched = Some((refined.refined_query, ctx));
        }

        let placeholder = if turn.reasoning_enabled {
            PLACEHOLDER_THINKING
        } else {
            PLACEHOLDER_GENERATING
        };
        let in_flight = store.push_message(Message::assistant(placeholder));

        let req = ChatRequest {
            messages: model_messages(
                &self.system_prompt,
                &turn.history,
                &contextualized,
                self.chat.requires_alternation(),
            ),
            reasoning_enabled: turn.reasoning_enabled,
        };
        tracing::debug!(
            backend = self.chat.name(),
            messages = req.messages.len(),
            prompt_chars = contextualized.len(),
            "generation starting"
        );

        let body = match self.chat.stream(&req).await {
            Ok(s) => s,
            Err(e) => {
                store.update_message(in_flight, |m| m.content = APOLOGY.to_string());
                if let Error::Generation { status, .. } = &e {
                    tracing::warn!(status, "generation request rejected");
                    let user_message = turn.user_message.clone();
                    store.set_chat_history(|mut h| {
                        h.push(ChatHistoryEntry::new(Role::User, user_message));
                        h.push(ChatHistoryEntry::new(Role::Assistant, HISTORY_ERROR_MARKER));
                        h
                    });
                }
                return Err(e);
            }
        };

        let content = match consume(body, |text| {
            store.update_message(in_flight, |m| m.content = text.to_string())
        })
        .await
        {
            Ok(c) => c,
            Err(e) => {
                store.update_message(in_flight, |m| {
                    m.content = STREAM_ERROR_MESSAGE.to_string()
                });
                return Err(e);
            }
        };
        if content.is_empty() {
            store.update_message(in_flight, |m| m.content.clear());
        }

        let entries = history_entries(turn, &contextualized, searched.as_ref(), content);
        store.set_chat_history(|mut h| {
            h.extend(entries);
            h
        });
        Ok(())
    }
}

/// Messages for the generation call: system prompt, prior non-system history, then
/// the contextualized input as the final user turn.
pub fn model_messages(
    system_prompt: &str,
    history: &[ChatHistoryEntry],
    contextualized: &str,
    alternate: bool,
) -> Vec<ChatMessage> {
    let prior: Vec<&ChatHistoryEntry> = history.iter().filter(|e| e.role != Role::System).collect();
    let mut out = Vec::with_capacity(prior.len() + 2);
    out.push(ChatMessage::new(Role::System, system_prompt));
    for (i, e) in prior.iter().enumerate() {
        out.push(ChatMessage::from(*e));
        let next_is_assistant = prior.get(i + 1).map(|n| n.role == Role::Assistant);
        if alternate && e.role == Role::User && next_is_assistant == Some(false) {
            out.push(ChatMessage::new(Role::Assistant, ALTERNATION_FILLER));
        }
    }
    out.push(ChatMessage::new(Role::User, contextualized));
    out
}

fn search_summary(ctx: &SearchContext) -> String {
    let n = ctx.results.len();
    match rank_by_score(&ctx.results).first().map(|&i| &ctx.results[i]) {
        Some(top) => format!(
            "Found {n} relevant results. Top result: \"{}\" (Score: {}%)",
            top.title,
            (top.score * 100.0).round() as i64
        ),
        None => format!("Found {n} relevant results."),
    }
}

fn history_entries(
    turn: &Turn,
    contextualized: &str,
    searched: Option<&(String, SearchContext)>,
    content: String,
) -> Vec<ChatHistoryEntry> {
    let mut out = vec![ChatHistoryEntry::new(Role::User, turn.user_message.clone())];
    if let Some((refined_query, ctx)) = searched {
        out.push(ChatHistoryEntry::new(
            Role::System,
            format!("Refined search query: \"{refined_query}\""),
        ));
        out.push(ChatHistoryEntry::new(Role::System, search_summary(ctx)));
        out.push(ChatHistoryEntry::new(
            Role::System,
            "Contextualized query with search results and extracted content",
        ));
        out.push(ChatHistoryEntry::new(Role::User, contextualized));
    }
    out.push(ChatHistoryEntry {
        role: Role::Assistant,
        content,
        reasoning: turn.reasoning_enabled,
    });
    out
}
