//! kanata-focusd binary: D-Bus service, KWin script injection and event loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kanata_focusd::backend::{
    self, DbusFocusSource, FocusEvent, FocusSource, KwinScript, KwinScripting,
};
use kanata_focusd::bridge::Bridge;
use kanata_focusd::config::{self, Config};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// KWin focus to kanata bridge.
///
/// Switches kanata layers and virtual keys based on the focused window.
#[derive(Parser, Debug)]
#[command(name = "kanata-focusd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kanata host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Kanata port, or IP:PORT (overrides config).
    #[arg(long)]
    port: Option<String>,

    /// Layer used when no rule matches (overrides config).
    #[arg(short = 'l', long)]
    default_layer: Option<String>,

    /// KWin listener script to inject instead of the embedded one.
    #[arg(long)]
    kwin_script: Option<PathBuf>,

    /// Log commands instead of sending them to kanata.
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug.
    #[arg(short, long)]
    verbose: bool,

    /// Print received window states to stdout.
    #[arg(long)]
    print_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    init_logging(level)?;

    info!("kanata-focusd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    info!(
        "Configuration loaded: {} rule(s), kanata at {}, default layer '{}' (dry_run={})",
        config.rules.len(),
        config.kanata.address(),
        config.kanata.default_layer,
        config.kanata.dry_run
    );

    let mut bridge = Bridge::from_config(&config).context("Invalid rule configuration")?;

    // Installed before injection so a signal cannot skip the unload below.
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let connection = zbus::Connection::session()
        .await
        .context("Failed to connect to the session D-Bus")?;
    let mut source = DbusFocusSource::serve(&connection)
        .await
        .context("Failed to register D-Bus service")?;

    if let Err(e) = bridge.connect().await {
        warn!("{}. Will retry on the next focus change.", e);
    }

    // Inject the listener only once the D-Bus service can receive its calls.
    let (script_path, rendered) = match &config.kwin.script_path {
        Some(path) => (path.clone(), false),
        None => (
            backend::render_listener_script(&runtime_script_dir())
                .context("Failed to write KWin listener script")?,
            true,
        ),
    };
    let scripting = KwinScripting::new(connection.clone());
    let script = match KwinScript::install(&scripting, &script_path, &config.kwin.plugin_name).await
    {
        Ok(script) => script,
        Err(e) => {
            if rendered {
                backend::discard_listener_script(&script_path);
            }
            return Err(e).context("Failed to inject KWin script");
        }
    };

    info!("Listening for KWin focus events, forwarding to kanata at {}", config.kanata.address());
    let result = run_daemon(&mut source, &mut bridge, &shutdown, args.print_events).await;

    if let Err(e) = script.remove(&scripting).await {
        warn!("Failed to unload KWin script: {}", e);
    }
    if rendered {
        backend::discard_listener_script(&script_path);
    }
    bridge.close().await;

    info!("kanata-focusd stopped");
    result
}

/// Initialize logging at the given level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("kanata_focusd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Load the config file and apply command line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(host) = &args.host {
        config.kanata.host.clone_from(host);
    }
    if let Some(port) = &args.port {
        let (host, port) = config::parse_endpoint(port, &config.kanata.host)?;
        config.kanata.host = host;
        config.kanata.port = port;
    }
    if let Some(layer) = &args.default_layer {
        config.kanata.default_layer.clone_from(layer);
    }
    if let Some(script) = &args.kwin_script {
        config.kwin.script_path = Some(script.clone());
    }
    if args.dry_run {
        config.kanata.dry_run = true;
    }

    Ok(config)
}

/// Directory the embedded listener script is written to.
fn runtime_script_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(env!("CARGO_PKG_NAME"))
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        shutdown.cancel();
    });

    Ok(())
}

/// Run the event loop until shutdown.
///
/// Events are handled one at a time; shutdown is only observed between events.
async fn run_daemon(
    source: &mut impl FocusSource,
    bridge: &mut Bridge,
    shutdown: &CancellationToken,
    print_events: bool,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => return Ok(()),

            event = source.next_event() => {
                match event {
                    Ok(event) => handle_focus_event(&event, bridge, print_events).await,
                    Err(e) => {
                        error!("Focus event error: {}", e);
                        return Err(e).context("Focus event source failed");
                    }
                }
            }
        }
    }
}

/// Handle a focus event.
async fn handle_focus_event(event: &FocusEvent, bridge: &mut Bridge, print_events: bool) {
    if print_events {
        let w = &event.window;
        println!(
            "[{}] | pid={:?} name={:?} class={:?} caption={:?}",
            event.kind.as_str().to_uppercase(),
            w.pid,
            w.name,
            w.class,
            w.caption
        );
    }

    let handled = bridge.handle(event).await;
    if handled.error.is_none() && !handled.commands.is_empty() {
        debug!("Sent {} command(s) to kanata", handled.commands.len());
    }
}
