//! `PairChat` relay server.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin pairchat-relay
//!
//! # Run on custom address, keeping 100 messages per room
//! cargo run --bin pairchat-relay -- --bind 127.0.0.1:8080 --history-limit 100
//! ```

use std::sync::Arc;

use clap::Parser;
use pairchat_relay::config::{RelayCliArgs, RelayConfig};
use pairchat_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        history_limit = config.history_limit,
        "starting pairchat relay server"
    );

    let state = Arc::new(RelayState::with_directory(config.directory()));
    match relay::start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
