//! Redundant command suppression.
//!
//! Rules:
//! - Switch layer only when the resolved layer differs from the last one sent
//! - Activate only virtual keys that were not already active
//! - Optionally release virtual keys that dropped out of the active set

use tracing::debug;

use crate::config::KanataConfig;
use crate::domain::{Command, FakeKeyAction, ResolvedAction};

/// Last action accepted for transmission.
///
/// Reflects what was handed to the kanata client, not what kanata acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceState {
    /// Last layer sent.
    pub last_layer: Option<String>,

    /// Virtual keys of the last action, compared as a set.
    pub last_virtual_keys: Vec<String>,
}

/// Turns resolved actions into the commands that actually need sending.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    /// Action used to activate a virtual key.
    activate: FakeKeyAction,

    /// Whether keys leaving the active set get a `Release`.
    release_stale: bool,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(FakeKeyAction::Tap, false)
    }
}

impl Deduplicator {
    /// Create a deduplicator.
    pub fn new(activate: FakeKeyAction, release_stale: bool) -> Self {
        Self {
            activate,
            release_stale,
        }
    }

    /// Build from the kanata section of the config.
    pub fn from_config(config: &KanataConfig) -> Self {
        Self::new(config.virtual_key_action, config.release_virtual_keys)
    }

    /// Compute the commands for `action` and record it in `state`.
    ///
    /// Order within the batch: layer change, releases, activations. Keys keep
    /// their declared order. Two identical consecutive actions yield an empty
    /// batch for the second one.
    pub fn apply(&self, action: &ResolvedAction, state: &mut ServiceState) -> Vec<Command> {
        let mut commands = Vec::new();

        if let Some(layer) = &action.layer
            && state.last_layer.as_ref() != Some(layer)
        {
            debug!("Layer changed: {:?} -> {}", state.last_layer, layer);
            commands.push(Command::change_layer(layer.clone()));
            state.last_layer = Some(layer.clone());
        }

        if self.release_stale {
            commands.extend(
                state
                    .last_virtual_keys
                    .iter()
                    .filter(|vk| !action.virtual_keys.contains(vk))
                    .map(|vk| Command::fake_key(vk.clone(), FakeKeyAction::Release)),
            );
        }

        commands.extend(
            action
                .virtual_keys
                .iter()
                .filter(|vk| !state.last_virtual_keys.contains(vk))
                .map(|vk| Command::fake_key(vk.clone(), self.activate)),
        );

        state.last_virtual_keys.clone_from(&action.virtual_keys);

        if commands.is_empty() {
            debug!("Action unchanged, nothing to send");
        }

        commands
    }
}
