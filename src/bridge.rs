//! Focus event pipeline: match, deduplicate, transmit.

use tracing::{debug, warn};

use crate::backend::FocusEvent;
use crate::config::Config;
use crate::dedup::{Deduplicator, ServiceState};
use crate::domain::{Command, ResolvedAction};
use crate::kanata::{KanataClient, KanataError};
use crate::matcher::{MatcherError, RuleMatcher};

/// Owns the rule matcher, the last-sent state and the kanata connection.
///
/// Events must be handled one at a time; the bridge is the only writer of
/// its [`ServiceState`].
#[derive(Debug)]
pub struct Bridge {
    matcher: RuleMatcher,
    dedup: Deduplicator,
    state: ServiceState,
    client: KanataClient,
}

/// Outcome of handling one event.
#[derive(Debug)]
pub struct Handled {
    /// What the rules resolved the window to.
    pub action: ResolvedAction,

    /// Commands that were handed to the client.
    pub commands: Vec<Command>,

    /// Transmission error, if the batch was dropped.
    pub error: Option<KanataError>,
}

impl Bridge {
    /// Assemble a bridge from its parts.
    pub fn new(matcher: RuleMatcher, dedup: Deduplicator, client: KanataClient) -> Self {
        Self {
            matcher,
            dedup,
            state: ServiceState::default(),
            client,
        }
    }

    /// Build from config. Fails on invalid rules.
    pub fn from_config(config: &Config) -> Result<Self, MatcherError> {
        Ok(Self::new(
            RuleMatcher::from_config(config)?,
            Deduplicator::from_config(&config.kanata),
            KanataClient::from_config(&config.kanata),
        ))
    }

    /// Resolve the event's window and send whatever changed.
    ///
    /// Send failures are logged and reported in the result but never
    /// propagate; the state already records the action either way.
    pub async fn handle(&mut self, event: &FocusEvent) -> Handled {
        let action = self.matcher.resolve(&event.window);
        debug!(
            "{} event resolved: layer={:?} virtual_keys={:?}",
            event.kind.as_str(),
            action.layer,
            action.virtual_keys
        );

        let commands = self.dedup.apply(&action, &mut self.state);
        let error = match self.client.send(&commands).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Dropped {} kanata command(s): {}", commands.len(), e);
                Some(e)
            }
        };

        Handled {
            action,
            commands,
            error,
        }
    }

    /// Connect to kanata ahead of the first event.
    pub async fn connect(&mut self) -> Result<(), KanataError> {
        self.client.connect().await
    }

    /// Close the kanata connection.
    pub async fn close(&mut self) {
        self.client.close().await;
    }

    /// Last action accepted for transmission.
    pub fn state(&self) -> &ServiceState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FocusKind;
    use crate::config::RuleConfig;
    use crate::domain::WindowState;
    use std::time::Duration;

    fn dry_bridge(rules: &[RuleConfig]) -> Bridge {
        Bridge::new(
            RuleMatcher::new(rules, "base").unwrap(),
            Deduplicator::default(),
            KanataClient::new("127.0.0.1:1", Duration::from_millis(100)).with_dry_run(true),
        )
    }

    fn focus(name: &str, caption: &str) -> FocusEvent {
        FocusEvent::new(FocusKind::Activated, WindowState::new(name, "", caption))
    }

    #[tokio::test]
    async fn test_focus_churn_is_deduplicated() {
        let mut bridge = dry_bridge(&[RuleConfig {
            name: Some("firefox".to_string()),
            layer: Some("browser".to_string()),
            ..Default::default()
        }]);

        let first = bridge.handle(&focus("firefox", "a")).await;
        assert_eq!(first.commands, vec![Command::change_layer("browser")]);

        let second = bridge.handle(&focus("firefox", "b")).await;
        assert!(second.commands.is_empty());
        assert!(second.error.is_none());

        let third = bridge.handle(&focus("konsole", "")).await;
        assert_eq!(third.commands, vec![Command::change_layer("base")]);
        assert_eq!(bridge.state().last_layer.as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn test_send_failure_still_updates_state() {
        let mut bridge = Bridge::new(
            RuleMatcher::new(&[], "base").unwrap(),
            Deduplicator::default(),
            KanataClient::new("127.0.0.1:1", Duration::from_millis(100)),
        );

        let handled = bridge.handle(&focus("anything", "")).await;
        assert_eq!(handled.commands, vec![Command::change_layer("base")]);
        assert!(handled.error.is_some());
        assert_eq!(bridge.state().last_layer.as_deref(), Some("base"));

        // Same action again: nothing to send, so nothing can fail.
        let again = bridge.handle(&focus("anything", "")).await;
        assert!(again.commands.is_empty());
        assert!(again.error.is_none());
    }

    #[tokio::test]
    async fn test_empty_window_uses_catchall() {
        let mut bridge = dry_bridge(&[
            RuleConfig {
                name: Some("foot".to_string()),
                layer: Some("term".to_string()),
                ..Default::default()
            },
            RuleConfig {
                layer: Some("fallback".to_string()),
                ..Default::default()
            },
        ]);

        let handled = bridge
            .handle(&FocusEvent::new(FocusKind::Activated, WindowState::default()))
            .await;
        assert_eq!(handled.action.layer.as_deref(), Some("fallback"));
    }
}
