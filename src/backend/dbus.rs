//! Session bus endpoint called by the KWin listener script.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::Connection;
use zbus::interface;

use super::payload::parse_payload;
use super::{FocusError, FocusEvent, FocusKind, FocusSource};

/// Well-known bus name the listener script calls.
pub const BUS_NAME: &str = "io.github.KanataFocusd";

/// Object path of the notification endpoint.
pub const OBJECT_PATH: &str = "/io/github/KanataFocusd";

/// Interface name of the notification endpoint.
pub const INTERFACE_NAME: &str = "io.github.KanataFocusd";

/// Queued notifications before bus callers start waiting.
const EVENT_QUEUE: usize = 64;

/// Bus-facing object. Parses payloads and queues them for the event loop.
#[derive(Debug)]
pub struct FocusService {
    events: mpsc::Sender<FocusEvent>,
}

impl FocusService {
    async fn forward(&self, kind: FocusKind, payload: &str) {
        debug!("{} notification: {:?}", kind.as_str(), payload);
        let event = FocusEvent::new(kind, parse_payload(payload));
        if self.events.send(event).await.is_err() {
            warn!("Dropping {} notification: event loop has stopped", kind.as_str());
        }
    }
}

#[interface(name = "io.github.KanataFocusd")]
impl FocusService {
    #[zbus(name = "notifyFocusChanged")]
    async fn notify_focus_changed(&self, payload: &str) {
        self.forward(FocusKind::Activated, payload).await;
    }

    #[zbus(name = "notifyCaptionChanged")]
    async fn notify_caption_changed(&self, payload: &str) {
        self.forward(FocusKind::CaptionChanged, payload).await;
    }

    #[zbus(name = "DEBUG")]
    async fn debug_message(&self, payload: &str) {
        info!("[KWin] {}", payload);
    }
}

/// Focus source fed by [`FocusService`].
#[derive(Debug)]
pub struct DbusFocusSource {
    events: mpsc::Receiver<FocusEvent>,
}

impl DbusFocusSource {
    /// Create a connected service/source pair.
    pub fn channel() -> (FocusService, Self) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        (FocusService { events: tx }, Self { events: rx })
    }

    /// Export the service on `connection` and claim [`BUS_NAME`].
    pub async fn serve(connection: &Connection) -> Result<Self, FocusError> {
        let (service, source) = Self::channel();

        connection.object_server().at(OBJECT_PATH, service).await?;
        connection.request_name(BUS_NAME).await?;

        info!("Listening on D-Bus as {} at {}", BUS_NAME, OBJECT_PATH);
        Ok(source)
    }
}

#[async_trait]
impl FocusSource for DbusFocusSource {
    async fn next_event(&mut self) -> Result<FocusEvent, FocusError> {
        self.events.recv().await.ok_or(FocusError::Disconnected)
    }
}
