//! Per-message working state

use std::ops::Range;

use crate::cache::ActorRef;

/// Mutable working state for one filtering pass.
///
/// Created per inbound message, discarded when the pass (and any delivery it
/// produced) is done. `original_text` keeps the text as received unless a
/// rule sets `modify_raw`, in which case raw-aware actions rewrite it too so
/// downstream logging sees the filtered view.
#[derive(Debug, Clone)]
pub struct MessageState {
    /// Text as received from the host.
    pub original_text: String,
    /// Text after the transforms committed so far.
    pub current_text: String,
    /// Region of `current_text` the active rule matched.
    pub match_span: Option<Range<usize>>,
    /// Region of `original_text` corresponding to the active match, for
    /// raw-aware actions.
    pub raw_span: Option<Range<usize>>,
    /// Author of the message; `None` for system-originated text.
    pub actor: Option<ActorRef>,
    /// Whether raw-aware actions must also rewrite `original_text`.
    pub modify_raw: bool,
    log: Vec<String>,
}

impl MessageState {
    pub fn new(text: &str, actor: Option<ActorRef>, modify_raw: bool) -> Self {
        Self {
            original_text: text.to_string(),
            current_text: text.to_string(),
            match_span: None,
            raw_span: None,
            actor,
            modify_raw,
            log: Vec::new(),
        }
    }

    /// Append one human-readable description of what an action did.
    pub fn push_log(&mut self, entry: impl Into<String>) {
        self.log.push(entry.into());
    }

    /// Everything the actions logged, in order.
    pub fn log(&self) -> &[String] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_untouched() {
        let state = MessageState::new("hello", None, false);
        assert_eq!(state.original_text, state.current_text);
        assert!(state.match_span.is_none());
        assert!(state.log().is_empty());
    }

    #[test]
    fn test_log_is_append_only_ordered() {
        let mut state = MessageState::new("hello", None, false);
        state.push_log("first");
        state.push_log("second");
        assert_eq!(state.log(), ["first", "second"]);
    }
}
