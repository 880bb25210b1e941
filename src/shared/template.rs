//! Variable substitution for notify templates
//!
//! Notify actions carry a message template with `{name}`-style placeholders.
//! Expansion happens inside the filtering pass, against cached snapshot data
//! only, so the seam is a trait the embedding host can override.

use crate::cache::ActorSnapshotCache;
use crate::filter::MessageState;

/// Fills placeholders in a notify template before delivery.
pub trait VarExpander: Send + Sync {
    fn expand(&self, template: &str, state: &MessageState, cache: &ActorSnapshotCache) -> String;
}

/// Default expander. Supported placeholders:
///
/// - `{name}` - the author's cached display name
/// - `{world}` - the author's cached world
/// - `{message}` - the current (filtered) text
///
/// Attributes of an actor the cache has not seen yet expand to `"unknown"`.
#[derive(Debug, Default)]
pub struct StandardExpander;

impl VarExpander for StandardExpander {
    fn expand(&self, template: &str, state: &MessageState, cache: &ActorSnapshotCache) -> String {
        let snapshot = state.actor.and_then(|actor| cache.lookup(&actor));
        let name = snapshot
            .as_ref()
            .map(|s| s.display_name.as_str())
            .unwrap_or("unknown");
        let world = snapshot
            .as_ref()
            .map(|s| s.world_name.as_str())
            .unwrap_or("unknown");

        template
            .replace("{name}", name)
            .replace("{world}", world)
            .replace("{message}", &state.current_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ActorRef;

    #[test]
    fn test_unknown_actor_expands_to_placeholder() {
        let cache = ActorSnapshotCache::default();
        let state = MessageState::new("hi", Some(ActorRef::new()), false);
        let out = StandardExpander.expand("Warning, {name}!", &state, &cache);
        assert_eq!(out, "Warning, unknown!");
    }

    #[test]
    fn test_message_placeholder_uses_current_text() {
        let cache = ActorSnapshotCache::default();
        let state = MessageState::new("watch it", None, false);
        let out = StandardExpander.expand("you said: {message}", &state, &cache);
        assert_eq!(out, "you said: watch it");
    }
}
