//! # bluebridge-bridge
//!
//! Bridge process between a native messaging companion and federated rooms.
//!
//! This binary:
//! - connects to the **companion process** over a Unix socket and speaks the
//!   line-delimited JSON command protocol
//! - keeps the **portal store** mapping native chats to rooms, following
//!   merged chat identifiers
//! - decodes **rich-text bodies** to order inline attachments when a native
//!   decoder is available

mod config;
mod router;

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bluebridge_ipc::{ClientConfig, CompanionClient};
use bluebridge_store::Database;

use crate::config::BridgeConfig;
use crate::router::Router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bluebridge_bridge=debug")),
        )
        .init();

    info!("Starting bluebridge v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = BridgeConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the portal store
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), portals = db.count_portals()?, "Portal store ready");

    // -----------------------------------------------------------------------
    // 4. Connect to the companion
    // -----------------------------------------------------------------------
    let stream = UnixStream::connect(&config.companion_socket)
        .await
        .with_context(|| {
            format!(
                "connecting to companion at {}",
                config.companion_socket.display()
            )
        })?;
    let (reader, writer) = stream.into_split();
    let (client, mut events) = CompanionClient::start(
        reader,
        writer,
        ClientConfig {
            request_timeout: config.request_timeout,
        },
    );
    info!(socket = %config.companion_socket.display(), "Connected to companion");

    // No native rich-text facility is linked into this build; bodies fall
    // back to their plain text and attachment order.
    let router = Router::new(db, Arc::clone(&client), None, &config);

    // -----------------------------------------------------------------------
    // 5. Startup sync
    // -----------------------------------------------------------------------
    if let Err(e) = router.startup_sync().await {
        warn!(error = %e, "Startup sync failed, continuing with live events");
    }

    // -----------------------------------------------------------------------
    // 6. Route companion events and outgoing texts until the companion
    //    goes away or Ctrl+C
    // -----------------------------------------------------------------------
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let mut outgoing_open = config.outgoing_from_stdin;
    if outgoing_open {
        tokio::spawn(read_outgoing_lines(outgoing_tx));
        info!("Reading outgoing texts from stdin");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(notification) => router.handle(notification).await,
                None => {
                    warn!("Companion disconnected");
                    break;
                }
            },
            line = outgoing.recv(), if outgoing_open => match line {
                Some(line) => router.handle_outgoing(&line).await,
                None => {
                    info!("Outgoing feed closed");
                    outgoing_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    info!(pending = client.pending_requests(), "Bridge stopped");
    Ok(())
}

/// Forward stdin lines to the event loop until EOF.
async fn read_outgoing_lines(tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read outgoing feed");
                break;
            }
        }
    }
}
