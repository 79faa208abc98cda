//! Kanata TCP client.
//!
//! Kanata speaks newline-delimited JSON: one object per command or message.
//! The client keeps one persistent connection, writes one command per line,
//! and reconnects once per batch when the connection turns out to be dead.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::KanataConfig;
use crate::domain::{Command, ServerMessage};

/// Errors talking to kanata.
#[derive(Error, Debug)]
pub enum KanataError {
    #[error(
        "Cannot connect to kanata at {addr}: {source}. Make sure kanata is running with the -p option"
    )]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out after {0:?} talking to kanata")]
    Timeout(Duration),

    #[error("Failed to write to kanata: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Partial line kept from kanata before it is discarded.
const MAX_INBOX: usize = 64 * 1024;

/// Persistent connection to kanata's TCP server.
#[derive(Debug)]
pub struct KanataClient {
    /// `host:port` of kanata.
    addr: String,

    /// Bound on connect and each write.
    timeout: Duration,

    /// Log commands instead of sending them.
    dry_run: bool,

    /// Live connection, `None` when dead or never opened.
    stream: Option<TcpStream>,

    /// Bytes received from kanata that do not yet form a complete line.
    inbox: Vec<u8>,
}

impl KanataClient {
    /// Create a client. Nothing is connected until `connect` or `send`.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            dry_run: false,
            stream: None,
            inbox: Vec::new(),
        }
    }

    /// Create a client from the kanata section of the config.
    pub fn from_config(config: &KanataConfig) -> Self {
        Self::new(config.address(), config.timeout()).with_dry_run(config.dry_run)
    }

    /// Enable or disable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns true while a connection is believed to be alive.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open a fresh connection, replacing any existing one.
    ///
    /// Kanata logs an error for clients that disconnect without sending
    /// anything, so a harmless layer-name query is sent right away.
    pub async fn connect(&mut self) -> Result<(), KanataError> {
        if self.dry_run {
            return Ok(());
        }

        self.stream = None;
        self.inbox.clear();

        debug!("Connecting to kanata at {}", self.addr);
        let stream = timeout(self.timeout, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| KanataError::Timeout(self.timeout))?
            .map_err(|source| KanataError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        self.stream = Some(stream);
        self.write_command(&Command::RequestCurrentLayerName {})
            .await
            .inspect_err(|_| self.stream = None)?;

        info!("Connected to kanata at {}", self.addr);
        Ok(())
    }

    /// Send a batch of commands in order.
    ///
    /// A dead connection is re-established before writing. If a write fails,
    /// the client reconnects once and resumes with the failed command. A second
    /// failure, or a failed reconnect, drops the rest of the batch.
    pub async fn send(&mut self, commands: &[Command]) -> Result<(), KanataError> {
        if commands.is_empty() {
            return Ok(());
        }

        if self.dry_run {
            for command in commands {
                info!("[DRY RUN] Would send: {}", serde_json::to_string(command)?);
            }
            return Ok(());
        }

        self.drain_incoming();

        let mut retried = false;
        let mut next = 0;
        while let Some(command) = commands.get(next) {
            if self.stream.is_none() {
                self.connect().await?;
            }

            match self.write_command(command).await {
                Ok(()) => next += 1,
                Err(e) if !retried => {
                    warn!("Kanata connection lost ({}), reconnecting", e);
                    self.stream = None;
                    retried = true;
                }
                Err(e) => {
                    self.stream = None;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Shut the connection down.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing kanata connection to {}", self.addr);
            if let Err(e) = stream.shutdown().await {
                trace!("Shutdown of kanata socket failed: {}", e);
            }
        }
    }

    /// Write one command as a JSON line.
    async fn write_command(&mut self, command: &Command) -> Result<(), KanataError> {
        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');

        let Some(stream) = self.stream.as_mut() else {
            return Err(KanataError::Write(io::ErrorKind::NotConnected.into()));
        };

        timeout(self.timeout, stream.write_all(&line))
            .await
            .map_err(|_| KanataError::Timeout(self.timeout))?
            .map_err(KanataError::Write)?;

        debug!("Sent to kanata: {}", command);
        Ok(())
    }

    /// Read whatever kanata pushed since the last batch without waiting.
    ///
    /// EOF or a read error marks the connection dead.
    fn drain_incoming(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };

        let mut buf = [0u8; 1024];
        let lost = loop {
            match stream.try_read(&mut buf) {
                Ok(0) => break Some("closed by kanata".to_string()),
                Ok(n) => self.inbox.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break None,
                Err(e) => break Some(e.to_string()),
            }
        };

        self.process_inbox();

        if let Some(reason) = lost {
            warn!("Kanata connection lost: {}", reason);
            self.stream = None;
            self.inbox.clear();
        }
    }

    /// Log complete lines in the inbox, keeping any trailing partial line
    /// up to [`MAX_INBOX`] bytes.
    fn process_inbox(&mut self) {
        while let Some(pos) = self.inbox.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.inbox.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<ServerMessage>(line) {
                Ok(ServerMessage::LayerChange { new }) => debug!("Kanata layer changed to '{}'", new),
                Ok(ServerMessage::CurrentLayerName { name }) => {
                    debug!("Kanata current layer is '{}'", name);
                }
                Err(_) => trace!("Kanata message: {}", line),
            }
        }

        if self.inbox.len() > MAX_INBOX {
            debug!("Discarding {} bytes of unterminated kanata output", self.inbox.len());
            self.inbox.clear();
        }
    }
}
