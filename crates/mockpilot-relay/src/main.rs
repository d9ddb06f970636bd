//! # mockpilot-relay
//!
//! Relay binary: wires the event bus, the trigger engine and the session
//! hub together and serves the client gateway.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mockpilot_bus::{BufferedPublisher, BusStatus, LocalBus, SharedBus};
use mockpilot_core::logging::init_subscriber;
use mockpilot_server::auth::{self, JwtVerifier};
use mockpilot_server::hub::liveness::LivenessMonitor;
use mockpilot_server::websocket::bridge::{HubBridge, spawn_bus_watch};
use mockpilot_server::{Hub, HubConfig, RelayServer};
use mockpilot_settings::MockpilotSettings;
use mockpilot_trigger::TriggerService;
use tokio::sync::watch;

/// MockPilot real-time relay.
#[derive(Parser, Debug)]
#[command(name = "mockpilot-relay", about = "MockPilot real-time relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve(ServeArgs),
    /// Mint a session token for local development.
    IssueToken(IssueTokenArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Settings file (defaults to `~/.mockpilot/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Args, Debug)]
struct IssueTokenArgs {
    /// Session the token grants.
    #[arg(long)]
    session: String,

    /// Token lifetime in minutes.
    #[arg(long, default_value_t = 60)]
    ttl_minutes: u64,

    /// Settings file holding the signing secret.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_settings(path: Option<&PathBuf>) -> Result<MockpilotSettings> {
    match path {
        Some(path) => mockpilot_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => mockpilot_settings::load_settings().context("Failed to load settings"),
    }
}

impl ServeArgs {
    fn apply(&self, settings: &mut MockpilotSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::IssueToken(args) => issue_token(&args),
    }
}

fn issue_token(args: &IssueTokenArgs) -> Result<()> {
    let settings = load_settings(args.config.as_ref())?;
    let session_id = auth::parse_session_id(&args.session).context("Invalid session id")?;
    let token = auth::issue_token(
        &settings.auth,
        &session_id,
        Duration::from_secs(args.ttl_minutes.saturating_mul(60)),
    )
    .context("Failed to sign token")?;
    println!("{token}");
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = load_settings(args.config.as_ref())?;
    args.apply(&mut settings);
    let settings = mockpilot_settings::init_settings(settings);

    init_subscriber(&settings.logging.level, settings.logging.format);
    if settings.auth.uses_dev_secret() {
        tracing::warn!("using the built-in development JWT secret; set MOCKPILOT_JWT_SECRET");
    }

    let metrics = match mockpilot_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    // Bus
    let bus: SharedBus = Arc::new(LocalBus::new(settings.bus.capacity));
    let bus_settings = Arc::new(settings.bus.clone());

    // Hub + gateway
    let hub = Arc::new(Hub::new(
        HubConfig::from_settings(&settings),
        Arc::new(BufferedPublisher::new(Arc::clone(&bus), settings.bus.hold_buffer)),
    ));
    let verifier = Arc::new(
        JwtVerifier::from_settings(&settings.auth).context("Invalid auth settings")?,
    );
    let server = RelayServer::new(&settings, Arc::clone(&hub), Arc::clone(&bus), verifier, metrics);
    let cancel = server.shutdown().token();

    // Trigger engine
    let trigger = Arc::new(TriggerService::spawn(
        &settings.trigger,
        Arc::new(BufferedPublisher::new(Arc::clone(&bus), settings.bus.hold_buffer)),
        &bus_settings.channels,
        &cancel,
    ));
    let (trigger_status_tx, trigger_status) = watch::channel(BusStatus::Connecting);
    let trigger_consumer = trigger.spawn_consumer(
        Arc::clone(&bus),
        Arc::clone(&bus_settings),
        trigger_status_tx,
        cancel.clone(),
    );

    // Bus → clients
    let liveness = Arc::new(LivenessMonitor::new(
        settings.hub.liveness_interval(),
        settings.hub.liveness_max_missed,
        &settings.hub.expected_producers,
    ));
    let bridge = Arc::new(HubBridge::new(
        Arc::clone(&hub),
        Arc::clone(&liveness),
        settings.bus.channels.clone(),
    ));
    let (hub_status_tx, hub_status) = watch::channel(BusStatus::Connecting);
    let bridge_task = bridge.spawn(
        Arc::clone(&bus),
        settings.bus.backoff,
        hub_status_tx,
        cancel.clone(),
    );
    let bus_watch = spawn_bus_watch(
        Arc::clone(&hub),
        vec![trigger_status, hub_status],
        cancel.clone(),
    );
    let liveness_task = liveness.spawn(Arc::clone(&hub), cancel.clone());
    let sweeper = hub.spawn_sweeper(settings.hub.sweep_interval(), cancel.clone());

    let (addr, server_task) = server
        .listen(&settings.server.bind_addr())
        .await
        .context("Failed to bind server")?;
    tracing::info!(
        "MockPilot relay listening on http://{addr} ({} trigger shards)",
        trigger.shard_count()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let coordinator = Arc::clone(server.shutdown());
    let _ = coordinator.drain(&hub, settings.server.drain_grace()).await;
    let timeout = Some(settings.server.shutdown_timeout());
    coordinator
        .graceful_shutdown(
            vec![
                server_task,
                trigger_consumer,
                bridge_task,
                bus_watch,
                liveness_task,
                sweeper,
            ],
            timeout,
        )
        .await;
    // the consumer held the last other reference
    if let Ok(trigger) = Arc::try_unwrap(trigger) {
        coordinator
            .graceful_shutdown(trigger.into_handles(), timeout)
            .await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn serve_defaults_to_no_overrides() {
        let cli = Cli::parse_from(["mockpilot-relay", "serve"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.config.is_none());
        assert!(args.port.is_none());

        let mut settings = MockpilotSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings, MockpilotSettings::default());
    }

    #[test]
    fn serve_overrides_apply() {
        let cli = Cli::parse_from([
            "mockpilot-relay",
            "serve",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--log-level",
            "debug",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let mut settings = MockpilotSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.server.bind_addr(), "127.0.0.1:9000");
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn issue_token_args() {
        let cli = Cli::parse_from(["mockpilot-relay", "issue-token", "--session", "room-1"]);
        let Command::IssueToken(args) = cli.command else {
            panic!("expected issue-token");
        };
        assert_eq!(args.session, "room-1");
        assert_eq!(args.ttl_minutes, 60);
    }

    #[test]
    fn issue_token_requires_session() {
        assert!(Cli::try_parse_from(["mockpilot-relay", "issue-token"]).is_err());
    }

    #[test]
    fn config_file_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"port": 8123}}}}"#).unwrap();
        let settings = load_settings(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(settings.server.port, 8123);
    }

    #[test]
    fn bad_config_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();
        assert!(load_settings(Some(&file.path().to_path_buf())).is_err());
    }

    #[test]
    fn issue_token_rejects_bad_session() {
        let args = IssueTokenArgs {
            session: "has space".into(),
            ttl_minutes: 5,
            config: None,
        };
        assert!(issue_token(&args).is_err());
    }
}
