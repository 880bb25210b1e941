//! The engine context
//!
//! One `FilterEngine` exists per embedding host, constructed at startup and
//! passed explicitly to whoever runs filtering passes. It owns the compiled
//! rules, the snapshot cache handle, the host bridge, and the template
//! expander; there is no hidden global.

use std::sync::Arc;

use tracing::debug;

use super::FilterCtx;
use super::pipeline::FilterRule;
use super::state::MessageState;
use crate::bridge::HostBridge;
use crate::cache::{ActorRef, ActorSnapshotCache};
use crate::shared::{StandardExpander, VarExpander};

/// Result of one filtering pass over one inbound message.
#[derive(Debug)]
pub struct PassOutcome {
    /// Final working state; `state.current_text` is the text to deliver.
    pub state: MessageState,
    /// Whether any rule matched.
    pub matched: bool,
    /// Whether any action rewrote the text.
    pub changed: bool,
    /// Delivery requests handed to the bridge, fire-and-forget.
    pub deliveries_sent: usize,
}

/// The filtering engine. Safe to share across concurrent filtering passes;
/// rules are immutable once compiled and every actor lookup goes through the
/// snapshot cache.
pub struct FilterEngine {
    rules: Vec<FilterRule>,
    cache: Arc<ActorSnapshotCache>,
    bridge: HostBridge,
    expander: Box<dyn VarExpander>,
}

impl FilterEngine {
    pub fn new(rules: Vec<FilterRule>, cache: Arc<ActorSnapshotCache>, bridge: HostBridge) -> Self {
        Self {
            rules,
            cache,
            bridge,
            expander: Box::new(StandardExpander),
        }
    }

    /// Swap in a host-specific template expander.
    pub fn with_expander(mut self, expander: Box<dyn VarExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn cache(&self) -> &Arc<ActorSnapshotCache> {
        &self.cache
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Run one filtering pass: apply every rule in configured order to the
    /// message, then hand any accumulated warnings to the bridge. Never calls
    /// the live host API and never blocks on delivery.
    pub fn process(&self, text: &str, actor: Option<ActorRef>) -> PassOutcome {
        let mut state = MessageState::new(text, actor, false);
        let ctx = FilterCtx {
            cache: &self.cache,
            expander: self.expander.as_ref(),
        };

        let mut matched = false;
        let mut changed = false;
        let mut deliveries = Vec::new();
        for rule in &self.rules {
            let outcome = rule.apply(&mut state, &ctx);
            matched |= outcome.matched;
            changed |= outcome.mutated;
            deliveries.extend(outcome.deliveries);
        }

        let deliveries_sent = deliveries.len();
        if deliveries_sent > 0 {
            self.bridge.deliver_all(deliveries);
        }
        debug!(matched, changed, deliveries_sent, "filtering pass finished");

        PassOutcome {
            state,
            matched,
            changed,
            deliveries_sent,
        }
    }
}
