//! Slash commands for `askpipe chat`.

use askpipe_core::{ChatStore, SearchProvider};

pub const HELP: &str = "commands: /search on|off, /reasoning on|off, /provider tavily|openperplex, /status, /reset, /quit (start a message with // to send a literal /)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Quit,
    Reset,
    Help,
    Status,
    Search(bool),
    Reasoning(bool),
    Provider(SearchProvider),
    Invalid(String),
}

/// One line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    Command(ReplCommand),
    Message(String),
}

/// Classify a trimmed, non-empty line. `//` escapes a leading slash; a `/word`
/// that is not a known command is sent as a message.
pub fn read_line(line: &str, store: &ChatStore) -> ChatLine {
    if let Some(rest) = line.strip_prefix("//") {
        return ChatLine::Message(format!("/{rest}"));
    }
    match line.strip_prefix('/').and_then(|cmd| parse(cmd, store)) {
        Some(cmd) => ChatLine::Command(cmd),
        None => ChatLine::Message(line.to_string()),
    }
}

fn on_off(arg: Option<&str>, current: bool) -> Option<bool> {
    match arg.map(|s| s.to_ascii_lowercase()) {
        None => Some(!current),
        Some(s) => match s.as_str() {
            "on" | "true" | "1" | "yes" => Some(true),
            "off" | "false" | "0" | "no" => Some(false),
            _ => None,
        },
    }
}

/// Parse the text after the leading `/`. A toggle without an argument flips the
/// current value in `store`. Unknown command names give `None`.
pub fn parse(input: &str, store: &ChatStore) -> Option<ReplCommand> {
    let mut parts = input.split_whitespace();
    let name = parts.next().unwrap_or("").to_ascii_lowercase();
    let arg = parts.next();
    let s = store.state();
    let cmd = match name.as_str() {
        "quit" | "exit" | "q" => ReplCommand::Quit,
        "reset" | "clear" => ReplCommand::Reset,
        "help" | "?" => ReplCommand::Help,
        "status" => ReplCommand::Status,
        "search" => on_off(arg, s.search_enabled)
            .map(ReplCommand::Search)
            .unwrap_or_else(|| ReplCommand::Invalid("usage: /search on|off".to_string())),
        "reasoning" => on_off(arg, s.reasoning_enabled)
            .map(ReplCommand::Reasoning)
            .unwrap_or_else(|| ReplCommand::Invalid("usage: /reasoning on|off".to_string())),
        "provider" => match arg.map(str::parse::<SearchProvider>) {
            Some(Ok(p)) => ReplCommand::Provider(p),
            Some(Err(e)) => ReplCommand::Invalid(e.to_string()),
            None => ReplCommand::Invalid("usage: /provider tavily|openperplex".to_string()),
        },
        _ => return None,
    };
    Some(cmd)
}

pub fn status_line(store: &ChatStore) -> String {
    let s = store.state();
    format!(
        "search={} reasoning={} provider={} turns={}",
        if s.search_enabled { "on" } else { "off" },
        if s.reasoning_enabled { "on" } else { "off" },
        s.search_provider,
        s.chat_history
            .iter()
            .filter(|e| e.role == askpipe_core::Role::User)
            .count()
    )
}

/// Apply a settings command to the store and describe the result. `Quit` is left
/// to the caller.
pub fn apply(cmd: &ReplCommand, store: &mut ChatStore) -> String {
    match cmd {
        ReplCommand::Quit => "bye".to_string(),
        ReplCommand::Reset => {
            store.reset();
            "conversation cleared".to_string()
        }
        ReplCommand::Help => HELP.to_string(),
        ReplCommand::Status => status_line(store),
        ReplCommand::Search(on) => {
            store.set_search_enabled(*on);
            status_line(store)
        }
        ReplCommand::Reasoning(on) => {
            store.set_reasoning_enabled(*on);
            status_line(store)
        }
        ReplCommand::Provider(p) => {
            store.set_search_provider(*p);
            status_line(store)
        }
        ReplCommand::Invalid(msg) => msg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askpipe_core::ChatState;

    fn store() -> ChatStore {
        ChatStore::new(ChatState::new(true, false, SearchProvider::Tavily))
    }

    #[test]
    fn toggles_accept_explicit_values_or_flip() {
        let s = store();
        assert_eq!(parse("search off", &s), Some(ReplCommand::Search(false)));
        assert_eq!(parse("search", &s), Some(ReplCommand::Search(false)));
        assert_eq!(parse("reasoning", &s), Some(ReplCommand::Reasoning(true)));
        assert_eq!(parse("REASONING On", &s), Some(ReplCommand::Reasoning(true)));
        assert!(matches!(parse("search maybe", &s), Some(ReplCommand::Invalid(_))));
    }

    #[test]
    fn provider_parsing_reports_unknown_names() {
        let s = store();
        assert_eq!(
            parse("provider openperplex", &s),
            Some(ReplCommand::Provider(SearchProvider::OpenPerplex))
        );
        assert!(matches!(parse("provider bing", &s), Some(ReplCommand::Invalid(_))));
        assert!(matches!(parse("provider", &s), Some(ReplCommand::Invalid(_))));
        assert_eq!(parse("frobnicate", &s), None);
    }

    #[test]
    fn slash_lines_that_are_not_commands_are_sent_as_messages() {
        let s = store();
        assert_eq!(read_line("/quit", &s), ChatLine::Command(ReplCommand::Quit));
        assert_eq!(
            read_line("/etc/hosts format?", &s),
            ChatLine::Message("/etc/hosts format?".to_string())
        );
        assert_eq!(
            read_line("//reset means what?", &s),
            ChatLine::Message("/reset means what?".to_string())
        );
        assert_eq!(read_line("hello", &s), ChatLine::Message("hello".to_string()));
    }

    #[test]
    fn apply_updates_settings_and_reset_keeps_them() {
        let mut s = store();
        apply(&ReplCommand::Provider(SearchProvider::OpenPerplex), &mut s);
        let line = apply(&ReplCommand::Search(false), &mut s);
        assert_eq!(line, "search=off reasoning=off provider=openperplex turns=0");
        s.push_message(askpipe_core::Message::user("hi"));
        apply(&ReplCommand::Reset, &mut s);
        assert!(s.state().messages.is_empty());
        assert_eq!(s.state().search_provider, SearchProvider::OpenPerplex);
        assert!(!s.state().search_enabled);
    }
}
