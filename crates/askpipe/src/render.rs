//! Terminal rendering of store snapshots.
//!
//! The answer streams to `out` as it grows; status lines and sources go to
//! `status` so `out` carries only assistant text.

use askpipe_core::state::Listener;
use askpipe_core::{bare_domain, ChatState, Message, Role, SENTINEL_SEARCH_RESULTS};
use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Progress {
    /// Index of the assistant message being streamed and the bytes already written.
    streaming: Option<(usize, String)>,
    searching: bool,
    extracting: bool,
    /// Placeholder indices whose sources were already listed.
    listed: Vec<usize>,
}

/// A writer that goes quiet once its reader has gone away.
struct Sink {
    w: Box<dyn Write + Send>,
    closed: bool,
}

impl Sink {
    fn new(w: Box<dyn Write + Send>) -> Self {
        Self { w, closed: false }
    }

    fn emit(&mut self, text: &str) {
        if self.closed {
            return;
        }
        if let Err(e) = self.w.write_all(text.as_bytes()).and_then(|_| self.w.flush()) {
            if e.kind() == ErrorKind::BrokenPipe {
                self.closed = true;
            } else {
                tracing::debug!(error = %e, "terminal write failed");
            }
        }
    }
}

pub struct Renderer {
    progress: Mutex<Progress>,
    out: Mutex<Sink>,
    status: Mutex<Sink>,
}

impl Renderer {
    pub fn new(out: Box<dyn Write + Send>, status: Box<dyn Write + Send>) -> Self {
        Self {
            progress: Mutex::new(Progress::default()),
            out: Mutex::new(Sink::new(out)),
            status: Mutex::new(Sink::new(status)),
        }
    }

    pub fn stdio() -> Self {
        Self::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }

    pub fn listener(self: &Arc<Self>) -> Listener {
        let me = Arc::clone(self);
        Box::new(move |s| me.observe(s))
    }

    fn status_line(&self, line: &str) {
        if let Ok(mut w) = self.status.lock() {
            w.emit(&format!("{line}\n"));
        }
    }

    fn write_out(&self, text: &str) {
        if let Ok(mut w) = self.out.lock() {
            w.emit(text);
        }
    }

    /// True once stdout's reader has closed the pipe.
    pub fn out_closed(&self) -> bool {
        self.out.lock().map(|w| w.closed).unwrap_or(true)
    }

    /// Finish the current answer with a newline, if one was started.
    pub fn end_turn(&self) {
        let started = match self.progress.lock() {
            Ok(mut p) => p.streaming.take().is_some(),
            Err(_) => false,
        };
        if started {
            self.write_out("\n");
        }
    }

    /// Forget per-conversation progress after the store was reset.
    pub fn reset(&self) {
        if let Ok(mut p) = self.progress.lock() {
            *p = Progress::default();
        }
    }

    pub fn observe(&self, s: &ChatState) {
        let Ok(mut p) = self.progress.lock() else {
            return;
        };

        if s.is_searching != p.searching {
            p.searching = s.is_searching;
            if s.is_searching {
                self.status_line("searching...");
            }
        }
        if s.is_extracting != p.extracting {
            p.extracting = s.is_extracting;
            if s.is_extracting {
                self.status_line("reading top results...");
            }
        }

        for (i, m) in s.messages.iter().enumerate() {
            if m.role == Role::Assistant && m.context.is_some() && !p.listed.contains(&i) {
                p.listed.push(i);
                self.list_sources(m);
            }
        }

        let Some(idx) = s.messages.len().checked_sub(1) else {
            p.streaming = None;
            return;
        };
        let m = &s.messages[idx];
        if m.role != Role::Assistant || m.is_placeholder() {
            return;
        }

        match &mut p.streaming {
            Some((i, written)) if *i == idx => {
                if let Some(rest) = m.content.strip_prefix(written.as_str()) {
                    if !rest.is_empty() {
                        self.write_out(rest);
                        written.push_str(rest);
                    }
                } else {
                    // Replaced rather than extended.
                    self.write_out(&format!("\n{}", m.content));
                    *written = m.content.clone();
                }
            }
            slot => {
                if slot.is_some() {
                    self.write_out("\n");
                }
                self.write_out(&m.content);
                *slot = Some((idx, m.content.clone()));
            }
        }
    }

    fn list_sources(&self, m: &Message) {
        let results = m.context.as_deref().unwrap_or_default();
        if results.is_empty() || m.content != SENTINEL_SEARCH_RESULTS {
            self.status_line("no sources found");
            return;
        }
        self.status_line("sources:");
        for (n, r) in results.iter().enumerate() {
            self.status_line(&format!(
                "  [{}] {} ({}) {}",
                n + 1,
                r.title,
                bare_domain(&r.url),
                r.url
            ));
        }
    }
}
