//! Processing rules.
//!
//! User-configured processors run between framing and batching. The built-in
//! rule engine covers the three filtering primitives:
//!
//! 1. **ExcludeAtMatch**: drop records matching a pattern
//! 2. **IncludeAtMatch**: keep only records matching a pattern
//! 3. **MaskSequences**: replace matched spans with a placeholder
//!
//! Rules run sequentially in configuration order; the first failed filter
//! drops the record, and every mask rule is applied to survivors.

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

/// Kind of a processing rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    ExcludeAtMatch,
    IncludeAtMatch,
    MaskSequences,
}

/// A rule as it appears in the processor `detail` object.
#[derive(Clone, Debug, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "Kind")]
    pub kind: RuleKind,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Pattern")]
    pub pattern: String,
    #[serde(rename = "ReplacePlaceholder", default)]
    pub replace_placeholder: Option<String>,
}

/// A compiled rule.
#[derive(Clone, Debug)]
pub struct Rule {
    pub kind: RuleKind,
    pub regex: Regex,
    pub placeholder: String,
}

/// Compiles configured rules. An invalid pattern is logged and skipped so
/// the remaining rules still apply.
#[must_use]
pub fn compile_rules(configs: &[RuleConfig]) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(configs.len());
    for config in configs {
        match Regex::new(&config.pattern) {
            Ok(regex) => rules.push(Rule {
                kind: config.kind,
                regex,
                placeholder: config.replace_placeholder.clone().unwrap_or_default(),
            }),
            Err(e) => {
                warn!("failed to compile rule {:?}: {}", config.name, e);
            }
        }
    }
    rules
}

/// Applies rules to a record in place. Returns `false` when the record
/// should be dropped.
#[must_use]
pub fn apply_rules(rules: &[Rule], message: &mut String) -> bool {
    for rule in rules {
        match rule.kind {
            RuleKind::ExcludeAtMatch => {
                if rule.regex.is_match(message) {
                    return false;
                }
            }
            RuleKind::IncludeAtMatch => {
                if !rule.regex.is_match(message) {
                    return false;
                }
            }
            RuleKind::MaskSequences => {
                *message = rule
                    .regex
                    .replace_all(message, rule.placeholder.as_str())
                    .into_owned();
            }
        }
    }
    true
}
