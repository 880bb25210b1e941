//! The filtering pipeline
//!
//! A filtering pass takes one inbound message, matches it against compiled
//! rules, and applies each matching rule's actions in order against a mutable
//! [`MessageState`]. Passes run concurrently and entirely off the privileged
//! context; anything actor-dependent reads the snapshot cache, and anything
//! that must reach the host (warning delivery) comes back out of the pipeline
//! as a [`DeliveryRequest`] for the bridge to dispatch.

pub mod action;
pub mod engine;
pub mod pipeline;
pub mod state;

pub use action::{Action, DeliveryRequest, FailurePolicy, StepResult};
pub use engine::{FilterEngine, PassOutcome};
pub use pipeline::{FilterRule, RuleApplication};
pub use state::MessageState;

use crate::cache::ActorSnapshotCache;
use crate::shared::VarExpander;

/// Read-only context handed to every executing action: the snapshot cache and
/// the template expander. Never the live host API.
pub struct FilterCtx<'a> {
    pub cache: &'a ActorSnapshotCache,
    pub expander: &'a dyn VarExpander,
}
