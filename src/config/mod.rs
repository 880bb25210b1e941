//! Configuration
//!
//! Two pieces live here: engine settings (cadence, batch bound, worker
//! count), merged figment-style from embedded defaults, an optional settings
//! file and `CHATSIEVE_`-prefixed environment variables; and the serde
//! representation of the rule list, compiled into [`FilterRule`]s with all
//! validation up front. A rule that fails validation is rejected at load time
//! and never reaches a pipeline.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::filter::FilterRule;

// Embed the default settings at compile time
const DEFAULT_SETTINGS: &str = include_str!("../../default-settings.toml");

/// Engine-wide tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Length of one host scheduler tick, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Snapshot refresh cadence, in ticks.
    #[serde(default = "default_refresh_interval_ticks")]
    pub refresh_interval_ticks: u64,

    /// Maximum actors refreshed per cycle.
    #[serde(default = "default_refresh_batch_size")]
    pub refresh_batch_size: usize,

    /// Worker threads for batch filtering (0 = derive from cores).
    #[serde(default)]
    pub max_workers: usize,
}

fn default_tick_ms() -> u64 {
    50
}

fn default_refresh_interval_ticks() -> u64 {
    20
}

fn default_refresh_batch_size() -> usize {
    20
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            refresh_interval_ticks: default_refresh_interval_ticks(),
            refresh_batch_size: default_refresh_batch_size(),
            max_workers: 0,
        }
    }
}

impl EngineSettings {
    /// Load settings: embedded defaults, then `chatsieve.toml` if present,
    /// then environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_custom_file(None)
    }

    /// Same as [`load`](Self::load) but reading the given file instead of
    /// `chatsieve.toml`.
    pub fn load_with_custom_file(custom_file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_SETTINGS));

        if let Some(path) = custom_file {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("chatsieve.toml"));
        }

        // Environment variables always have highest priority
        figment = figment.merge(Env::prefixed("CHATSIEVE_"));

        figment.extract().context("invalid engine settings")
    }
}

/// One rule as it appears in a rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Optional label used in logs; defaults to the pattern text.
    #[serde(default)]
    pub name: String,

    /// Regex selecting the match span.
    pub pattern: String,

    /// Whether raw-aware actions also rewrite the original text.
    #[serde(default)]
    pub modify_raw: bool,

    /// Actions applied in order on a match.
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

/// One action as it appears in a rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Action kind: `replace`, `random`, `lowercase` or `warn`.
    pub kind: String,

    /// Kind-specific parameter (replacement text, `|`-separated
    /// alternatives, warn template).
    #[serde(default)]
    pub value: String,
}

/// Compile parsed rule configs, rejecting any malformed rule with context.
pub fn compile_rules(configs: &[RuleConfig]) -> Result<Vec<FilterRule>> {
    configs.iter().map(FilterRule::compile).collect()
}

/// Parse and compile a YAML rule list.
pub fn compile_rules_str(yaml: &str) -> Result<Vec<FilterRule>> {
    let configs: Vec<RuleConfig> = serde_yml::from_str(yaml).context("parsing rule list")?;
    compile_rules(&configs)
}

/// Load and compile a YAML rule file.
pub fn load_rules(path: &Path) -> Result<Vec<FilterRule>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rule file {}", path.display()))?;
    compile_rules_str(&text).with_context(|| format!("in rule file {}", path.display()))
}
