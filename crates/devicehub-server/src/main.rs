//! `DeviceHub` Device Server
//!
//! Accepts device connections, keeps the device registry in step with the
//! database, and publishes connectivity events.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use devicehub_core::config::{self, Config};
use devicehub_core::tracing_init::{default_filter, init_tracing};
use devicehub_crypto::{Provisioned, ensure_server_identity, server_fingerprint};
use devicehub_server::events::BroadcastNotifier;
use devicehub_server::lifecycle::Coordinator;
use devicehub_server::protocol::LineHandshake;
use devicehub_server::registry::DeviceRegistry;
use devicehub_server::storage::DeviceDatabase;
use devicehub_server::sync::PersistenceSync;

/// Pending write-backs before attribute setters wait for the worker.
const WRITE_BACK_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "devicehub")]
#[command(version, about = "DeviceHub device server - registry and connection lifecycle")]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long, env = "DEVICEHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Host to listen on.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the server private key (PEM).
    #[arg(long)]
    server_key_file: Option<PathBuf>,

    /// Directory of `<core_id>.pub.pem` device keys to import at startup.
    #[arg(long)]
    core_keys_dir: Option<PathBuf>,

    /// Log level for the server crates.
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = self.db_path {
            config.storage.database_path = Some(path);
        }
        if let Some(path) = self.server_key_file {
            config.keys.server_key_file = path;
        }
        if let Some(dir) = self.core_keys_dir {
            config.keys.core_keys_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_json = args.log_json;

    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);

    init_tracing(
        &default_filter("devicehub_server", &config.log_level),
        log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting devicehub"
    );

    let key_file = &config.keys.server_key_file;
    match ensure_server_identity(key_file) {
        Ok(Provisioned::Generated) => {}
        Ok(Provisioned::Existing) => match server_fingerprint(key_file) {
            Ok(fingerprint) => info!(path = %key_file.display(), fingerprint = %fingerprint, "Using existing server key"),
            Err(e) => warn!(path = %key_file.display(), error = %e, "Server key present but unreadable"),
        },
        Err(e) => {
            error!(path = %key_file.display(), error = %e, "Failed to provision server identity");
            return Err(e.into());
        }
    }

    let db_path = match &config.storage.database_path {
        Some(path) => path.clone(),
        None => config::database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?,
    };
    info!(path = %db_path.display(), "Opening device database");
    let db = DeviceDatabase::open(&db_path).await?;
    let store = Arc::new(db);

    let (registry, write_back) = DeviceRegistry::with_write_back(WRITE_BACK_CAPACITY);
    let registry = Arc::new(registry);
    let sync = Arc::new(PersistenceSync::new(Arc::clone(&registry), store));

    if let Err(e) = sync.bulk_load().await {
        warn!(error = %e, "Starting with an empty device registry");
    }
    if let Err(e) = sync.import_key_dir(&config.keys.core_keys_dir).await {
        warn!(dir = %config.keys.core_keys_dir.display(), error = %e, "Failed to import device keys");
    }
    let writer = sync.spawn(write_back);

    let notifier = Arc::new(BroadcastNotifier::new(config.events.channel_capacity));
    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(core_id = %event.core_id, name = %event.name, data = %event.data, "Status event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let engine = Arc::new(LineHandshake::new(Duration::from_secs(
        config.server.handshake_timeout_secs,
    )));
    let coordinator = Arc::new(Coordinator::new(
        registry,
        notifier,
        engine,
        config.events.ttl_secs,
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match Coordinator::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "Device listener failed to start");
            return Err(e.into());
        }
    };

    coordinator
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    writer.abort();
    info!("devicehub stopped");
    Ok(())
}
