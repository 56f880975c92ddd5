// src/main.rs

//! Command-line driver for the tcpbridge engine: opens one connection, sends
//! to it as asked, and logs everything that comes back.

use anyhow::{Result, anyhow};
use std::env;
use std::time::Duration;
use tcpbridge::config::Config;
use tcpbridge::{Engine, Event};
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str = "Usage: tcpbridge --connect <host[:port]> [--config <path>] \
[--send <text>] [--keep-send <text> [--duration <e.g. 10s>]]";

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

/// The parsed command line.
struct CliArgs {
    config_path: Option<String>,
    connect: String,
    send: Option<String>,
    keep_send: Option<String>,
    duration: Option<Duration>,
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|arg| arg == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| anyhow!("{flag} flag requires a value")),
        None => Ok(None),
    }
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let connect = flag_value(args, "--connect")?
        .ok_or_else(|| anyhow!("--connect is required"))?
        .to_string();
    let duration = match flag_value(args, "--duration")? {
        Some(text) => Some(
            humantime::parse_duration(text)
                .map_err(|e| anyhow!("Invalid duration '{text}': {e}"))?,
        ),
        None => None,
    };
    let keep_send = flag_value(args, "--keep-send")?.map(str::to_string);
    if duration.is_some() && keep_send.is_none() {
        return Err(anyhow!("--duration only applies to --keep-send"));
    }

    Ok(CliArgs {
        config_path: flag_value(args, "--config")?.map(str::to_string),
        connect,
        send: flag_value(args, "--send")?.map(str::to_string),
        keep_send,
        duration,
    })
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("tcpbridge version {VERSION}");
        return Ok(());
    }

    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(1);
        }
    };

    let config = match &cli.config_path {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{path}\": {e:#}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true),
        )
        .init();

    let (host, port) = config.engine.parse_address(&cli.connect)?;
    let engine = Engine::new(config.engine.clone());
    let (mut events, _listener) = engine.subscribe();

    info!("tcpbridge {} connecting to {}:{}", VERSION, host, port);
    let connected = match engine.connect(&host, port).await {
        Ok(connected) => connected,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    let id = connected.id;

    if let Some(text) = &cli.send {
        let result = engine.send_once(id, text).await?;
        if !result.success {
            warn!("Send on connection {} failed: {}", id, result.message);
        }
    }
    if let Some(text) = &cli.keep_send {
        engine.keep_send(id, text, cli.duration).await?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; closing connection {}.", id);
                break;
            }
            event = events.recv() => match event {
                Some(Event::Data(data)) => {
                    info!("[{}] received {} bytes: {}", data.connection_id, data.data.len(), data.text());
                }
                Some(Event::State(state)) => {
                    info!("[{}] connected={} {}", state.connection_id, state.connected, state.data);
                    if state.connection_id == id && !state.connected {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
