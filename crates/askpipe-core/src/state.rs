//! Chat state and the store that owns it.
//!
//! Every mutation is a functional transition: the mutator receives the previous
//! value and returns the next one. A listener, if installed, observes the state
//! after each transition; front ends render from it.

use serde::Serialize;

use crate::options::SearchProvider;
use crate::{ChatHistoryEntry, Message, SearchResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub input: String,
    pub is_searching: bool,
    pub is_extracting: bool,
    pub current_search_results: Vec<SearchResult>,
    pub search_enabled: bool,
    pub reasoning_enabled: bool,
    pub search_provider: SearchProvider,
    pub chat_history: Vec<ChatHistoryEntry>,
}

impl ChatState {
    pub fn new(search_enabled: bool, reasoning_enabled: bool, provider: SearchProvider) -> Self {
        Self {
            search_enabled,
            reasoning_enabled,
            search_provider: provider,
            ..Self::default()
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

pub type Listener = Box<dyn Fn(&ChatState) + Send + Sync>;

#[derive(Default)]
pub struct ChatStore {
    state: ChatState,
    listener: Option<Listener>,
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("state", &self.state)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl ChatStore {
    pub fn new(state: ChatState) -> Self {
        Self {
            state,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn into_state(self) -> ChatState {
        self.state
    }

    fn notify(&self) {
        if let Some(l) = &self.listener {
            l(&self.state);
        }
    }

    pub fn set_messages(&mut self, f: impl FnOnce(Vec<Message>) -> Vec<Message>) {
        let prev = std::mem::take(&mut self.state.messages);
        self.state.messages = f(prev);
        self.notify();
    }

    /// Append one message and return its index.
    pub fn push_message(&mut self, message: Message) -> usize {
        let mut idx = 0;
        self.set_messages(|mut prev| {
            prev.push(message);
            idx = prev.len() - 1;
            prev
        });
        idx
    }

    /// Apply `f` to the message at `idx`; out-of-range indices are ignored.
    pub fn update_message(&mut self, idx: usize, f: impl FnOnce(&mut Message)) {
        self.set_messages(|mut prev| {
            if let Some(m) = prev.get_mut(idx) {
                f(m);
            }
            prev
        });
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.state.input = input.into();
        self.notify();
    }

    pub fn set_is_searching(&mut self, v: bool) {
        self.state.is_searching = v;
        self.notify();
    }

    pub fn set_is_extracting(&mut self, v: bool) {
        self.state.is_extracting = v;
        self.notify();
    }

    pub fn set_current_search_results(&mut self, results: Vec<SearchResult>) {
        self.state.current_search_results = results;
        self.notify();
    }

    pub fn set_chat_history(
        &mut self,
        f: impl FnOnce(Vec<ChatHistoryEntry>) -> Vec<ChatHistoryEntry>,
    ) {
        let prev = std::mem::take(&mut self.state.chat_history);
        self.state.chat_history = f(prev);
        self.notify();
    }

    pub fn set_search_enabled(&mut self, v: bool) {
        self.state.search_enabled = v;
        self.notify();
    }

    pub fn set_reasoning_enabled(&mut self, v: bool) {
        self.state.reasoning_enabled = v;
        self.notify();
    }

    pub fn set_search_provider(&mut self, provider: SearchProvider) {
        self.state.search_provider = provider;
        self.notify();
    }

    /// Drop the conversation; toggles and provider are kept.
    pub fn reset(&mut self) {
        let s = &mut self.state;
        s.messages.clear();
        s.chat_history.clear();
        s.current_search_results.clear();
        s.input.clear();
        s.is_searching = false;
        s.is_extracting = false;
        self.notify();
    }
}
