//! Filter actions
//!
//! One action is one unit of work over a [`MessageState`]. Actions are built
//! and validated once when rules are compiled, then shared read-only across
//! every concurrent filtering pass; `execute` never re-parses configuration.

use anyhow::{Result, bail};
use rand::Rng;
use tracing::debug;

use super::FilterCtx;
use super::state::MessageState;
use crate::cache::ActorRef;
use crate::shared::format::{lowercase_span, normalize_codes, replace_span, span_is_usable, text_is_clean};

/// A message a filtering pass wants delivered to an actor. Produced by warn
/// actions and handed to the bridge; the pipeline never delivers directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub actor: ActorRef,
    pub text: String,
}

/// What the pipeline does when an action reports a failed precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Benign skip: remaining actions of the rule still run.
    Continue,
    /// Remaining actions of the rule are abandoned; committed mutations stay.
    Abort,
}

/// Outcome of executing one action.
#[derive(Debug)]
pub enum StepResult {
    Applied {
        /// True when the action rewrote message text (as opposed to only
        /// producing a side effect like a delivery request).
        mutated: bool,
        delivery: Option<DeliveryRequest>,
    },
    /// Precondition failed; nothing was committed.
    Skipped,
}

/// A compiled, immutable filter action.
#[derive(Debug, Clone)]
pub enum Action {
    /// Substitute the matched span with a fixed string.
    Replace { text: String },
    /// Substitute the matched span with one alternative drawn uniformly at
    /// random from a `|`-separated list.
    RandomReplace { choices: Vec<String> },
    /// Fold the matched span to lowercase.
    Lowercase,
    /// Warn the message's author with an expanded template.
    Warn { template: String },
}

const DEFAULT_WARN_TEMPLATE: &str = "&cPlease watch your language, {name}.";

impl Action {
    /// Build an action from its rule-file form. Formatting shorthand is
    /// normalized here, once; malformed configuration is rejected here and
    /// never reaches a pipeline.
    pub fn parse(kind: &str, value: &str) -> Result<Self> {
        match kind {
            "replace" => Ok(Action::Replace {
                text: normalize_codes(value),
            }),
            "random" => {
                // Interior empty alternatives are legitimate
                // replace-with-nothing choices; only trailing empties are
                // separator artifacts.
                let mut choices: Vec<String> = value.split('|').map(normalize_codes).collect();
                while choices.last().is_some_and(String::is_empty) {
                    choices.pop();
                }
                if choices.is_empty() {
                    bail!("random action needs at least one alternative");
                }
                Ok(Action::RandomReplace { choices })
            }
            "lowercase" => Ok(Action::Lowercase),
            "warn" => {
                let template = if value.is_empty() { DEFAULT_WARN_TEMPLATE } else { value };
                Ok(Action::Warn {
                    template: normalize_codes(template),
                })
            }
            other => bail!("unknown action kind: {other}"),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::Replace { .. } => "replace",
            Action::RandomReplace { .. } => "random",
            Action::Lowercase => "lowercase",
            Action::Warn { .. } => "warn",
        }
    }

    /// Whether this action operates on the match span (and therefore needs
    /// the span re-validated before it runs).
    pub fn needs_span(&self) -> bool {
        !matches!(self, Action::Warn { .. })
    }

    /// Pipeline policy when this action's own precondition fails.
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            // A span action without a usable span means earlier mutations
            // invalidated the match; nothing later in the rule can be
            // trusted to line up either.
            Action::Replace { .. } | Action::RandomReplace { .. } | Action::Lowercase => {
                FailurePolicy::Abort
            }
            Action::Warn { .. } => FailurePolicy::Continue,
        }
    }

    /// Run the action against `state`. Mutates the message text and appends
    /// one log entry on success; commits nothing when the precondition fails.
    pub fn execute(&self, state: &mut MessageState, ctx: &FilterCtx<'_>) -> StepResult {
        match self {
            Action::Replace { text } => Self::substitute(state, text),
            Action::RandomReplace { choices } => {
                let pick = rand::rng().random_range(0..choices.len());
                Self::substitute(state, &choices[pick])
            }
            Action::Lowercase => {
                let Some(span) = state.match_span.clone() else {
                    return StepResult::Skipped;
                };
                let (folded, new_span) = lowercase_span(&state.current_text, &span);
                state.current_text = folded;
                state.match_span = Some(new_span);
                if state.modify_raw
                    && let Some(raw_span) = state.raw_span.clone()
                    && span_is_usable(&state.original_text, &raw_span)
                {
                    let (raw_folded, new_raw) = lowercase_span(&state.original_text, &raw_span);
                    state.original_text = raw_folded;
                    state.raw_span = Some(new_raw);
                }
                state.push_log("converted match to lowercase");
                StepResult::Applied {
                    mutated: true,
                    delivery: None,
                }
            }
            Action::Warn { template } => {
                let Some(actor) = state.actor else {
                    debug!("warn action skipped: no actor on message");
                    state.push_log("warn skipped: message has no author");
                    return StepResult::Skipped;
                };
                let text = ctx.expander.expand(template, state, ctx.cache);
                state.push_log(format!("warned {actor}: {text}"));
                StepResult::Applied {
                    mutated: false,
                    delivery: Some(DeliveryRequest { actor, text }),
                }
            }
        }
    }

    fn substitute(state: &mut MessageState, replacement: &str) -> StepResult {
        let Some(span) = state.match_span.clone() else {
            return StepResult::Skipped;
        };
        let (next, new_span) = replace_span(&state.current_text, &span, replacement);
        if !text_is_clean(&next) {
            // Committing would leave a truncated formatting escape.
            return StepResult::Skipped;
        }
        state.push_log(format!("replaced '{}' with '{}'", &state.current_text[span], replacement));
        state.current_text = next;
        state.match_span = Some(new_span);
        StepResult::Applied {
            mutated: true,
            delivery: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ActorSnapshotCache;
    use crate::shared::StandardExpander;

    fn ctx_parts() -> (ActorSnapshotCache, StandardExpander) {
        (ActorSnapshotCache::default(), StandardExpander)
    }

    fn matched(text: &str, span: std::ops::Range<usize>) -> MessageState {
        let mut state = MessageState::new(text, None, false);
        state.match_span = Some(span);
        state
    }

    #[test]
    fn test_parse_rejects_empty_random_list() {
        assert!(Action::parse("random", "").is_err());
        assert!(Action::parse("random", "|").is_err());
    }

    #[test]
    fn test_random_keeps_interior_empty_alternatives() {
        match Action::parse("random", "yes||no").unwrap() {
            Action::RandomReplace { choices } => assert_eq!(choices, ["yes", "", "no"]),
            other => panic!("unexpected action: {other:?}"),
        }
        // Trailing separators are artifacts, not alternatives.
        match Action::parse("random", "only|").unwrap() {
            Action::RandomReplace { choices } => assert_eq!(choices, ["only"]),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_random_empty_alternative_deletes_match() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let action = Action::RandomReplace { choices: vec![String::new()] };
        let mut state = matched("drop X here", 5..6);

        action.execute(&mut state, &ctx);
        assert_eq!(state.current_text, "drop  here");
        assert_eq!(state.match_span, Some(5..5));
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        assert!(Action::parse("explode", "x").is_err());
    }

    #[test]
    fn test_parse_normalizes_codes_once() {
        let action = Action::parse("replace", "&4removed").unwrap();
        match action {
            Action::Replace { text } => assert_eq!(text, "\u{00A7}4removed"),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_replace_substitutes_span_and_logs() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let action = Action::parse("replace", "****").unwrap();
        let mut state = matched("say badword now", 4..11);

        let result = action.execute(&mut state, &ctx);
        assert!(matches!(result, StepResult::Applied { mutated: true, .. }));
        assert_eq!(state.current_text, "say **** now");
        assert_eq!(state.match_span, Some(4..8));
        assert_eq!(state.log().len(), 1);
    }

    #[test]
    fn test_random_singleton_is_deterministic() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let action = Action::parse("random", "only").unwrap();
        let mut state = matched("the sky is X", 11..12);

        action.execute(&mut state, &ctx);
        assert_eq!(state.current_text, "the sky is only");
    }

    #[test]
    fn test_random_draws_from_alternatives() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let action = Action::parse("random", "red|green|blue").unwrap();

        for _ in 0..32 {
            let mut state = matched("the sky is X", 11..12);
            action.execute(&mut state, &ctx);
            assert!(
                ["the sky is red", "the sky is green", "the sky is blue"]
                    .contains(&state.current_text.as_str()),
                "unexpected output: {}",
                state.current_text
            );
        }
    }

    #[test]
    fn test_lowercase_folds_span_only() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let mut state = matched("STOP shouting NOW", 0..4);

        Action::Lowercase.execute(&mut state, &ctx);
        assert_eq!(state.current_text, "stop shouting NOW");
        // Raw text untouched without modify_raw
        assert_eq!(state.original_text, "STOP shouting NOW");
    }

    #[test]
    fn test_lowercase_respects_modify_raw() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let mut state = MessageState::new("STOP it", None, true);
        state.match_span = Some(0..4);
        state.raw_span = Some(0..4);

        Action::Lowercase.execute(&mut state, &ctx);
        assert_eq!(state.current_text, "stop it");
        assert_eq!(state.original_text, "stop it");
    }

    #[test]
    fn test_warn_without_actor_skips_without_delivery() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let action = Action::parse("warn", "Warning, {name}!").unwrap();
        let mut state = matched("bad", 0..3);

        let result = action.execute(&mut state, &ctx);
        assert!(matches!(result, StepResult::Skipped));
        assert_eq!(action.failure_policy(), FailurePolicy::Continue);
    }

    #[test]
    fn test_warn_with_actor_produces_delivery_request() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let action = Action::parse("warn", "Warning, {name}!").unwrap();
        let actor = ActorRef::new();
        let mut state = MessageState::new("bad", Some(actor), false);
        state.match_span = Some(0..3);

        match action.execute(&mut state, &ctx) {
            StepResult::Applied { mutated: false, delivery: Some(request) } => {
                assert_eq!(request.actor, actor);
                assert_eq!(request.text, "Warning, unknown!");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // The pipeline, not the action, talks to the bridge; text unchanged.
        assert_eq!(state.current_text, "bad");
    }
}
