//! Focus event backends.
//!
//! KWin cannot be queried for focus changes directly. Instead a listener
//! script is injected into KWin, and it calls back into this process over the
//! session bus with a small text payload for every activation or caption
//! change.

mod dbus;
mod kwin;
mod payload;

use async_trait::async_trait;
pub use dbus::{BUS_NAME, DbusFocusSource, FocusService, INTERFACE_NAME, OBJECT_PATH};
pub use kwin::{
    KwinScript, KwinScripting, ScriptError, ScriptHost, discard_listener_script,
    listener_script_source, render_listener_script,
};
pub use payload::parse_payload;
use thiserror::Error;

use crate::domain::WindowState;

/// What triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusKind {
    /// A window was activated.
    Activated,
    /// The active window's caption changed.
    CaptionChanged,
}

impl FocusKind {
    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activated => "focus",
            Self::CaptionChanged => "caption",
        }
    }
}

/// Backend-agnostic focus event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEvent {
    /// Notification type.
    pub kind: FocusKind,

    /// Window metadata carried by the notification.
    pub window: WindowState,
}

impl FocusEvent {
    /// Create a new focus event.
    pub fn new(kind: FocusKind, window: WindowState) -> Self {
        Self { kind, window }
    }
}

/// Trait for focus event sources.
#[async_trait]
pub trait FocusSource: Send {
    /// Get the next focus event.
    ///
    /// Waits until a notification arrives or the source shuts down.
    async fn next_event(&mut self) -> Result<FocusEvent, FocusError>;
}

/// Errors that can occur in focus detection.
#[derive(Error, Debug)]
pub enum FocusError {
    #[error("Focus event channel closed")]
    Disconnected,

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
}
