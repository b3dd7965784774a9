// src/main.rs

//! A small command-line client built on the bridge: connects with a config
//! file, runs one command, and prints its outcome.

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use spinel_bridge::config::Config;
use spinel_bridge::core::logging;
use spinel_bridge::core::metrics::gather_metrics;
use spinel_bridge::{Client, CompletionCallbacks, ErrorKind, Outcome, RequestType};
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "Usage: spinel-bridge [--config bridge.toml] [--metrics] COMMAND [ARGS...]";

/// Forwards completions to the main thread.
struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<(u64, Outcome)>,
}

impl CompletionCallbacks for ChannelCallbacks {
    fn on_success(&self, token: u64, payload: Option<&[u8]>) {
        let _ = self.tx.send((
            token,
            Outcome::Success(payload.map(Bytes::copy_from_slice)),
        ));
    }

    fn on_failure(&self, token: u64, message: &str, kind: ErrorKind) {
        let _ = self.tx.send((
            token,
            Outcome::Failure {
                kind,
                message: message.to_string(),
            },
        ));
    }
}

// The client owns its own runtime, so `main` stays synchronous.
fn main() {
    if let Err(e) = run_app() {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version") {
        println!("spinel-bridge version {VERSION}");
        return Ok(());
    }

    let mut config_path = "bridge.toml".to_string();
    let mut print_metrics = false;
    let mut command = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" if command.is_empty() => {
                config_path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config flag requires a value"))?;
            }
            "--metrics" if command.is_empty() => print_metrics = true,
            _ => command.push(Bytes::from(arg)),
        }
    }
    if command.is_empty() {
        return Err(anyhow!(USAGE));
    }

    let config = Config::from_file(&config_path)?;

    logging::init(Some(config.log_level), config.log_file.as_deref());
    info!("Loaded configuration from {config_path}.");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::create(&config.connection, Arc::new(ChannelCallbacks { tx }))
        .with_context(|| "Failed to connect")?;

    const TOKEN: u64 = 1;
    client
        .submit(TOKEN, RequestType::CustomCommand, command)
        .context("Command rejected")?;

    let outcome = rx.blocking_recv();
    client.close();

    match outcome {
        Some((_, Outcome::Success(Some(payload)))) => {
            println!("{}", String::from_utf8_lossy(&payload));
        }
        Some((_, Outcome::Success(None))) => println!("(nil)"),
        Some((_, Outcome::Failure { kind, message })) => {
            println!("({kind}) {message}");
        }
        None => return Err(anyhow!("client closed without delivering a reply")),
    }

    if print_metrics {
        print!("{}", gather_metrics());
    }
    Ok(())
}
