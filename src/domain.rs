//! Domain types shared by the matcher, the deduplicator and the kanata client.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Snapshot of the focused window at the moment of a focus or caption event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowState {
    /// Process id of the window's client, if KWin reported a parseable one.
    pub pid: Option<u32>,

    /// KWin resource name.
    pub name: String,

    /// KWin resource class.
    pub class: String,

    /// Window caption (title).
    pub caption: String,
}

impl WindowState {
    /// Create a window state without a pid.
    pub fn new(
        name: impl Into<String>,
        class: impl Into<String>,
        caption: impl Into<String>,
    ) -> Self {
        Self {
            pid: None,
            name: name.into(),
            class: class.into(),
            caption: caption.into(),
        }
    }

    /// Returns true if no field carries any information.
    pub fn is_empty(&self) -> bool {
        self.pid.is_none()
            && self.name.is_empty()
            && self.class.is_empty()
            && self.caption.is_empty()
    }
}

/// Result of matching a window state against the rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAction {
    /// Layer to switch to. `None` leaves the current layer alone.
    pub layer: Option<String>,

    /// Virtual keys to activate, in the rule's declared order without duplicates.
    pub virtual_keys: Vec<String>,
}

impl ResolvedAction {
    /// Create an action, dropping repeated virtual keys but keeping first-seen order.
    pub fn new(layer: Option<String>, virtual_keys: impl IntoIterator<Item = String>) -> Self {
        let mut keys: Vec<String> = Vec::new();
        for key in virtual_keys {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Self {
            layer,
            virtual_keys: keys,
        }
    }

    /// Action that only switches layer.
    pub fn layer(layer: impl Into<String>) -> Self {
        Self::new(Some(layer.into()), Vec::new())
    }
}

/// Fake key action understood by kanata's `ActOnFakeKey` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum FakeKeyAction {
    Press,
    Release,
    #[default]
    Tap,
    Toggle,
}

impl FakeKeyAction {
    /// Name of the action on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Press => "Press",
            Self::Release => "Release",
            Self::Tap => "Tap",
            Self::Toggle => "Toggle",
        }
    }
}

impl fmt::Display for FakeKeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised fake key action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid virtual key action '{0}': must be one of Press, Release, Tap, Toggle")]
pub struct InvalidFakeKeyAction(String);

impl FromStr for FakeKeyAction {
    type Err = InvalidFakeKeyAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "press" => Ok(Self::Press),
            "release" => Ok(Self::Release),
            "tap" => Ok(Self::Tap),
            "toggle" => Ok(Self::Toggle),
            _ => Err(InvalidFakeKeyAction(s.to_string())),
        }
    }
}

impl TryFrom<String> for FakeKeyAction {
    type Error = InvalidFakeKeyAction;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single command in kanata's line-delimited JSON TCP protocol.
///
/// Serializes to the externally tagged form kanata expects, e.g.
/// `{"ChangeLayer":{"new":"browser"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Command {
    ChangeLayer { new: String },
    ActOnFakeKey { name: String, action: FakeKeyAction },
    RequestCurrentLayerName {},
}

impl Command {
    /// Layer change command.
    pub fn change_layer(layer: impl Into<String>) -> Self {
        Self::ChangeLayer { new: layer.into() }
    }

    /// Fake key command.
    pub fn fake_key(name: impl Into<String>, action: FakeKeyAction) -> Self {
        Self::ActOnFakeKey {
            name: name.into(),
            action,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangeLayer { new } => write!(f, "ChangeLayer({new})"),
            Self::ActOnFakeKey { name, action } => write!(f, "ActOnFakeKey({name}, {action})"),
            Self::RequestCurrentLayerName {} => f.write_str("RequestCurrentLayerName"),
        }
    }
}

/// Messages kanata pushes back over the same connection.
///
/// Only the ones worth logging are modelled; anything else fails to parse and
/// is logged raw.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum ServerMessage {
    LayerChange { new: String },
    CurrentLayerName { name: String },
}
