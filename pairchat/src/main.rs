//! `PairChat`: line-oriented two-party chat client.
//!
//! Reads lines from stdin and prints the conversation to stdout. Plain lines
//! are sent as messages; lines starting with `/` are commands:
//!
//! ```text
//! /user <email>   set your identity
//! /peer <email>   set who to chat with
//! /join           start the session
//! /status         print connection and presence state
//! /quit           leave
//! ```
//!
//! ```bash
//! cargo run --bin pairchat -- --relay-url ws://127.0.0.1:9000/ws \
//!     --user a@x.com --peer b@x.com
//! ```

use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;

use pairchat::chat::ChatSnapshot;
use pairchat::config::{CliArgs, ClientConfig};
use pairchat::net::{self, ChatHandle};
use pairchat_proto::identity::Identity;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("pairchat starting");

    let net_config = config.to_net_config()?;
    let handle = net::spawn_chat(net_config);
    let printer = tokio::spawn(print_updates(handle.subscribe()));

    let result = read_commands(&handle).await;

    handle.shutdown().await;
    printer.abort();
    tracing::info!("pairchat stopped");
    result
}

/// Initialize file-based logging. Logs never go to stdout, which carries
/// the conversation.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("pairchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn read_commands(handle: &ChatHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();
        let snap = handle.snapshot();

        match command {
            "/quit" => break,
            "/user" => {
                handle
                    .set_identities(Some(Identity::from(arg)), snap.peer)
                    .await?;
            }
            "/peer" => {
                handle
                    .set_identities(snap.user, Some(Identity::from(arg)))
                    .await?;
            }
            "/join" => handle.initialize_chat().await?,
            "/status" => println!("{}", status_line(&snap)),
            "" => {}
            _ if command.starts_with('/') => println!("unknown command {command}"),
            _ => handle.send_message(line).await?,
        }
    }
    Ok(())
}

async fn print_updates(mut rx: watch::Receiver<ChatSnapshot>) {
    let mut printed = 0usize;
    let mut last_status = String::new();
    let mut dropped = rx.borrow().dropped_sends;

    loop {
        let snap = rx.borrow_and_update().clone();

        let status = status_line(&snap);
        if status != last_status {
            println!("-- {status}");
            last_status = status;
        }

        if snap.messages.len() < printed {
            println!("-- conversation reset");
            printed = 0;
        }
        for message in &snap.messages[printed..] {
            let marker = if message.pending { " (pending)" } else { "" };
            println!(
                "[{}] {}: {}{marker}",
                message.timestamp.as_datetime().format("%H:%M:%S"),
                message.author,
                message.text
            );
        }
        printed = snap.messages.len();

        if snap.dropped_sends > dropped {
            if let Some(reason) = snap.last_drop {
                println!("-- message not sent: {reason}");
            }
            dropped = snap.dropped_sends;
        }

        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn status_line(snap: &ChatSnapshot) -> String {
    let peer = snap
        .peer
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    format!(
        "{} (retries {}), session {}, peer {peer} {}{}",
        snap.connection,
        snap.reconnect_attempts,
        snap.negotiation,
        snap.peer_status,
        if snap.queued > 0 {
            format!(", {} queued", snap.queued)
        } else {
            String::new()
        }
    )
}
