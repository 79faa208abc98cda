//! Window-to-action resolution using the configured `[[app]]` rules.

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, RuleConfig};
use crate::domain::{ResolvedAction, WindowState};

/// Rule compilation errors. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("Invalid config: rule #{rule} has an invalid {field} pattern: {source}")]
    InvalidPattern {
        rule: usize,
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid config: rule #{rule} has a blank virtual key name")]
    BlankVirtualKey { rule: usize },
}

/// Compiled `[[app]]` rule. `None` patterns match anything.
#[derive(Debug)]
struct CompiledRule {
    name: Option<Regex>,
    class: Option<Regex>,
    caption: Option<Regex>,
    action: ResolvedAction,
}

impl CompiledRule {
    fn matches(&self, state: &WindowState) -> bool {
        field_matches(self.name.as_ref(), &state.name)
            && field_matches(self.class.as_ref(), &state.class)
            && field_matches(self.caption.as_ref(), &state.caption)
    }
}

fn field_matches(pattern: Option<&Regex>, value: &str) -> bool {
    pattern.is_none_or(|re| re.is_match(value))
}

/// Resolves window states to kanata actions, first match wins.
#[derive(Debug)]
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
    default_layer: String,
}

impl RuleMatcher {
    /// Build from config, compiling every pattern up front.
    pub fn from_config(config: &Config) -> Result<Self, MatcherError> {
        Self::new(&config.rules, &config.kanata.default_layer)
    }

    /// Build from a rule list and the layer used when nothing matches.
    pub fn new(rules: &[RuleConfig], default_layer: &str) -> Result<Self, MatcherError> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| compile_rule(i + 1, rule))
            .collect::<Result<Vec<_>, _>>()?;

        for rule in &rules {
            debug!(
                "Loaded rule: name={:?} class={:?} caption={:?} -> layer={:?} virtual_keys={:?}",
                rule.name.as_ref().map(Regex::as_str),
                rule.class.as_ref().map(Regex::as_str),
                rule.caption.as_ref().map(Regex::as_str),
                rule.action.layer,
                rule.action.virtual_keys
            );
        }

        Ok(Self {
            rules,
            default_layer: default_layer.to_string(),
        })
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Layer returned when no rule matches.
    pub fn default_layer(&self) -> &str {
        &self.default_layer
    }

    /// Action of the first rule whose patterns all match, or the default layer
    /// with no virtual keys.
    pub fn resolve(&self, state: &WindowState) -> ResolvedAction {
        match self.rules.iter().position(|rule| rule.matches(state)) {
            Some(index) => {
                debug!("Window matched rule #{}", index + 1);
                self.rules[index].action.clone()
            }
            None => ResolvedAction::layer(self.default_layer.clone()),
        }
    }
}

/// Compile one rule. `rule_no` is 1-based for error messages.
fn compile_rule(rule_no: usize, rule: &RuleConfig) -> Result<CompiledRule, MatcherError> {
    let compile = |field: &'static str, pattern: Option<&String>| {
        pattern
            .map(|p| Regex::new(p))
            .transpose()
            .map_err(|source| MatcherError::InvalidPattern {
                rule: rule_no,
                field,
                source,
            })
    };

    if rule.virtual_keys.iter().any(|vk| vk.trim().is_empty()) {
        return Err(MatcherError::BlankVirtualKey { rule: rule_no });
    }

    Ok(CompiledRule {
        name: compile("name", rule.name.as_ref())?,
        class: compile("class", rule.class.as_ref())?,
        caption: compile("caption", rule.caption.as_ref())?,
        action: ResolvedAction::new(rule.layer.clone(), rule.virtual_keys.iter().cloned()),
    })
}
