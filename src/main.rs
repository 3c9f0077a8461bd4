//! Kiosk hardware bridge.
//!
//! Relays hardware events to stdout as JSON lines and forwards JSON commands
//! read from stdin to the controller. The line `status` prints the last
//! relayed event type.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use recycle_bridge::{Bridge, BridgeConfig, Error, EventRelay, RealtimeHub, RelayMessage};

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn print(stdout: &mut Stdout, message: &RelayMessage) -> Result<(), Error> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

async fn handle_line(relay: &EventRelay, stdout: &mut Stdout, line: &str) -> Result<(), Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    if line == "status" {
        return print(stdout, &relay.status().await).await;
    }

    match serde_json::from_str::<Value>(line) {
        Ok(command) => {
            if let Err(e) = relay.command(&command).await {
                tracing::warn!("command not delivered: {}", e);
            }
        }
        Err(e) => tracing::warn!("ignoring input that is not JSON: {}", e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = BridgeConfig::from_env()?;
    init_tracing(&config.log_level);

    let bridge = Bridge::from_config(&config)?;
    let hub = RealtimeHub::new();
    let mut messages = hub.subscribe(&config.page).await;
    let relay = EventRelay::spawn(&bridge, hub.clone(), config.page.clone());

    bridge.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Ok(message) => print(&mut stdout, &message).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("stdout fell behind, skipped {} messages", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => handle_line(&relay, &mut stdout, &line).await?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("shutting down");
    bridge.disconnect().await
}
