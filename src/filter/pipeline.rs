//! Rule application
//!
//! A compiled rule is a regex pattern plus an ordered list of actions.
//! Applying a rule to a message selects the match span and runs the actions
//! strictly in configured order, re-validating the span before every
//! span-dependent action; a span invalidated by an earlier mutation aborts
//! the rest of that rule (keeping whatever already committed) rather than
//! corrupting state.

use anyhow::{Context, Result, ensure};
use regex::Regex;
use tracing::{debug, warn};

use super::FilterCtx;
use super::action::{Action, DeliveryRequest, FailurePolicy, StepResult};
use super::state::MessageState;
use crate::config::RuleConfig;
use crate::shared::format::span_is_usable;

/// One compiled filter rule, shared read-only across all filtering passes.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub name: String,
    pattern: Regex,
    actions: Vec<Action>,
    modify_raw: bool,
}

/// What applying one rule to one message did.
#[derive(Debug, Default)]
pub struct RuleApplication {
    pub matched: bool,
    /// True when a span violation or fatal skip abandoned the rule's
    /// remaining actions.
    pub aborted: bool,
    /// True when any action rewrote message text.
    pub mutated: bool,
    pub deliveries: Vec<DeliveryRequest>,
}

impl FilterRule {
    /// Compile a rule from its configured form. All validation happens here;
    /// a rule that compiles never re-parses configuration at execute time.
    pub fn compile(config: &RuleConfig) -> Result<Self> {
        let name = if config.name.is_empty() {
            config.pattern.clone()
        } else {
            config.name.clone()
        };
        let pattern = Regex::new(&config.pattern)
            .with_context(|| format!("invalid pattern in rule '{name}'"))?;
        ensure!(!config.actions.is_empty(), "rule '{name}' has no actions");

        let actions = config
            .actions
            .iter()
            .enumerate()
            .map(|(i, action)| {
                Action::parse(&action.kind, &action.value)
                    .with_context(|| format!("action {} of rule '{name}'", i + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            pattern,
            actions,
            modify_raw: config.modify_raw,
        })
    }

    /// Build a rule directly from parts (mainly for tests and embedders that
    /// compile their own configuration).
    pub fn from_parts(name: &str, pattern: Regex, actions: Vec<Action>, modify_raw: bool) -> Self {
        Self {
            name: name.to_string(),
            pattern,
            actions,
            modify_raw,
        }
    }

    /// Apply this rule to one message.
    pub fn apply(&self, state: &mut MessageState, ctx: &FilterCtx<'_>) -> RuleApplication {
        let mut outcome = RuleApplication::default();
        let Some(found) = self.pattern.find(&state.current_text) else {
            return outcome;
        };
        outcome.matched = true;
        state.match_span = Some(found.range());
        state.raw_span = self.pattern.find(&state.original_text).map(|m| m.range());
        state.modify_raw = self.modify_raw;

        for action in &self.actions {
            if action.needs_span() {
                let usable = state
                    .match_span
                    .as_ref()
                    .is_some_and(|span| span_is_usable(&state.current_text, span));
                if !usable {
                    warn!(rule = %self.name, "match span no longer valid, aborting remaining actions");
                    state.push_log(format!("rule '{}' aborted: match span invalid", self.name));
                    outcome.aborted = true;
                    break;
                }
            }
            match action.execute(state, ctx) {
                StepResult::Applied { mutated, delivery } => {
                    outcome.mutated |= mutated;
                    if let Some(request) = delivery {
                        outcome.deliveries.push(request);
                    }
                }
                StepResult::Skipped => match action.failure_policy() {
                    FailurePolicy::Continue => {
                        debug!(rule = %self.name, kind = action.kind_name(), "action skipped");
                    }
                    FailurePolicy::Abort => {
                        warn!(rule = %self.name, kind = action.kind_name(), "action refused to commit, aborting rule");
                        state.push_log(format!(
                            "rule '{}' aborted: {} action refused to commit",
                            self.name,
                            action.kind_name()
                        ));
                        outcome.aborted = true;
                        break;
                    }
                },
            }
        }
        outcome
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

    fn rule(pattern: &str, actions: Vec<Action>) -> FilterRule {
        FilterRule::from_parts("test", Regex::new(pattern).unwrap(), actions, false)
    }

    #[test]
    fn test_no_match_is_a_noop() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        let rule = rule("badword", vec![Action::parse("replace", "***").unwrap()]);
        let mut state = MessageState::new("all clean here", None, false);

        let outcome = rule.apply(&mut state, &ctx);
        assert!(!outcome.matched);
        assert_eq!(state.current_text, "all clean here");
        assert!(state.log().is_empty());
    }

    #[test]
    fn test_actions_run_in_order_on_shifting_span() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        // Replace re-anchors the span; lowercase then folds the replacement.
        let rule = rule(
            "HEY",
            vec![
                Action::parse("replace", "CENSORED").unwrap(),
                Action::parse("lowercase", "").unwrap(),
            ],
        );
        let mut state = MessageState::new("well HEY there", None, false);

        let outcome = rule.apply(&mut state, &ctx);
        assert!(outcome.matched && outcome.mutated && !outcome.aborted);
        assert_eq!(state.current_text, "well censored there");
        assert_eq!(state.log().len(), 2);
    }

    #[test]
    fn test_uncommittable_step_aborts_remaining_actions() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        // First replacement would leave a dangling formatting escape, so it
        // refuses to commit; the second replacement must never run.
        let rule = rule(
            "X",
            vec![
                Action::Replace { text: "oops\u{00A7}".to_string() },
                Action::parse("replace", "never").unwrap(),
            ],
        );
        let mut state = MessageState::new("mark X here", None, false);

        let outcome = rule.apply(&mut state, &ctx);
        assert!(outcome.matched);
        assert!(outcome.aborted);
        assert_eq!(state.current_text, "mark X here");
        // The abort leaves a trace in the action log, like span aborts do.
        assert!(
            state.log().last().is_some_and(|entry| entry.contains("aborted")),
            "missing abort log entry: {:?}",
            state.log()
        );
    }

    #[test]
    fn test_benign_skip_continues() {
        let (cache, expander) = ctx_parts();
        let ctx = FilterCtx { cache: &cache, expander: &expander };
        // Warn skips without an actor, but the rule keeps going.
        let rule = rule(
            "badword",
            vec![
                Action::parse("warn", "Warning, {name}!").unwrap(),
                Action::parse("replace", "***").unwrap(),
            ],
        );
        let mut state = MessageState::new("badword", None, false);

        let outcome = rule.apply(&mut state, &ctx);
        assert!(!outcome.aborted);
        assert!(outcome.deliveries.is_empty());
        assert_eq!(state.current_text, "***");
    }

    #[test]
    fn test_compile_rejects_bad_configuration() {
        use crate::config::{ActionConfig, RuleConfig};

        let bad_regex = RuleConfig {
            name: String::new(),
            pattern: "([unclosed".into(),
            modify_raw: false,
            actions: vec![ActionConfig { kind: "lowercase".into(), value: String::new() }],
        };
        assert!(FilterRule::compile(&bad_regex).is_err());

        let no_actions = RuleConfig {
            name: "empty".into(),
            pattern: "x".into(),
            modify_raw: false,
            actions: vec![],
        };
        assert!(FilterRule::compile(&no_actions).is_err());

        let empty_random = RuleConfig {
            name: "rand".into(),
            pattern: "x".into(),
            modify_raw: false,
            actions: vec![ActionConfig { kind: "random".into(), value: String::new() }],
        };
        let err = FilterRule::compile(&empty_random).unwrap_err();
        assert!(format!("{err:#}").contains("alternative"));
    }
}
