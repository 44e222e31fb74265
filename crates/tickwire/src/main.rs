//! # tickwire
//!
//! Command-line driver for the venue client: loads settings, initializes
//! logging, opens a supervised connection and runs one command.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tickwire_client::{
    ClientConfig, ContractParams, Listener, SubscribeOutcome, Supervisor, VenueClient,
};
use tickwire_settings::TickwireSettings;
use tokio::sync::mpsc;

/// Correlated WebSocket client for trading venues.
#[derive(Parser, Debug)]
#[command(
    name = "tickwire",
    version,
    about = "Correlated WebSocket client for trading venues"
)]
struct Cli {
    /// WebSocket endpoint (overrides settings).
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Settings file (defaults to `~/.tickwire/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset (overrides settings).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// How long to wait for the connection to open, in milliseconds.
    #[arg(long, global = true, default_value_t = 10_000)]
    open_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one JSON request and print the reply.
    Send {
        /// Request body, a JSON object.
        body: String,
    },
    /// Stream ticks for a symbol until interrupted.
    Ticks {
        /// Underlying symbol, e.g. `R_100`.
        symbol: String,
        /// Stop after this many ticks.
        #[arg(long, short = 'n')]
        count: Option<usize>,
    },
    /// Authorize with an API token and print the account.
    Authorize {
        /// API token.
        #[arg(long)]
        token: String,
    },
    /// Print account status.
    Status {
        /// API token to authorize with first.
        #[arg(long)]
        token: Option<String>,
    },
    /// Buy a contract.
    Buy {
        /// API token.
        #[arg(long)]
        token: String,
        /// Contract kind, e.g. `CALL` or `PUT`.
        #[arg(long)]
        contract_type: String,
        /// Underlying symbol.
        #[arg(long)]
        symbol: String,
        /// Stake.
        #[arg(long)]
        amount: f64,
        /// Contract length.
        #[arg(long)]
        duration: u32,
        /// Duration unit (`t`, `s`, `m`, `h`, `d`).
        #[arg(long, default_value = "t")]
        duration_unit: String,
        /// Account currency.
        #[arg(long, default_value = "USD")]
        currency: String,
    },
}

fn load_settings(cli: &Cli) -> Result<TickwireSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(tickwire_settings::settings_path);
    let mut settings = tickwire_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    apply_cli_overrides(&mut settings, cli);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn apply_cli_overrides(settings: &mut TickwireSettings, cli: &Cli) {
    if let Some(endpoint) = &cli.endpoint {
        settings.connection.endpoint.clone_from(endpoint);
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(client: &VenueClient, command: Command) -> Result<()> {
    match command {
        Command::Send { body } => {
            let body: Value =
                serde_json::from_str(&body).context("Request body is not valid JSON")?;
            let reply = client.supervisor().send(body).await?;
            print_json(&reply)
        }
        Command::Ticks { symbol, count } => stream_ticks(client, &symbol, count).await,
        Command::Authorize { token } => {
            let reply = client.authorize(&token).await.context("Authorization failed")?;
            print_json(&reply)
        }
        Command::Status { token } => {
            if let Some(token) = token {
                let _ = client.authorize(&token).await.context("Authorization failed")?;
            }
            let reply = client.account_status().await?;
            print_json(&reply)
        }
        Command::Buy {
            token,
            contract_type,
            symbol,
            amount,
            duration,
            duration_unit,
            currency,
        } => {
            let _ = client.authorize(&token).await.context("Authorization failed")?;
            let params = ContractParams {
                contract_type,
                symbol,
                amount,
                duration,
                duration_unit,
                currency,
            };
            let reply = client.buy_contract(&params).await.context("Purchase failed")?;
            print_json(&reply)
        }
    }
}

async fn stream_ticks(client: &VenueClient, symbol: &str, count: Option<usize>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener: Listener = Arc::new(move |tick| {
        let _ = tx.send(tick);
    });

    let outcome = client.subscribe_ticks(symbol, listener).await?;
    if outcome == SubscribeOutcome::Deferred {
        bail!("connection closed before the subscription was sent");
    }
    tracing::info!(symbol, "streaming ticks");

    let mut states = client.supervisor().watch_state();
    let mut received = 0usize;
    loop {
        tokio::select! {
            tick = rx.recv() => {
                let Some(tick) = tick else { break };
                print_json(&tick)?;
                received += 1;
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            }
            changed = states.wait_for(|s| !s.is_open()) => {
                if changed.is_ok() {
                    bail!("connection lost after {received} ticks");
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(&cli)?;
    tickwire_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    tracing::debug!(endpoint = %settings.connection.endpoint, "settings loaded");

    let client = VenueClient::new(Supervisor::new(ClientConfig::from(&settings)));
    client.supervisor().start();

    let open_timeout = Duration::from_millis(cli.open_timeout_ms);
    if !client.supervisor().wait_until_open(open_timeout).await {
        client.supervisor().stop().await;
        bail!(
            "Could not connect to {} within {}ms",
            settings.connection.endpoint,
            cli.open_timeout_ms
        );
    }

    let result = run(&client, cli.command).await;
    client.supervisor().stop().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_send_with_globals() {
        let cli = Cli::try_parse_from([
            "tickwire",
            "--endpoint",
            "ws://127.0.0.1:9000",
            "send",
            r#"{"ping": 1}"#,
        ])
        .unwrap();
        assert_eq!(cli.endpoint.as_deref(), Some("ws://127.0.0.1:9000"));
        assert!(matches!(cli.command, Command::Send { ref body } if body.contains("ping")));
    }

    #[test]
    fn parses_ticks_with_count() {
        let cli = Cli::try_parse_from(["tickwire", "ticks", "R_100", "-n", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Ticks { ref symbol, count: Some(3) } if symbol == "R_100"
        ));
    }

    #[test]
    fn buy_defaults() {
        let cli = Cli::try_parse_from([
            "tickwire",
            "buy",
            "--token",
            "t",
            "--contract-type",
            "CALL",
            "--symbol",
            "R_100",
            "--amount",
            "10",
            "--duration",
            "5",
        ])
        .unwrap();
        let Command::Buy {
            duration_unit,
            currency,
            ..
        } = cli.command
        else {
            panic!("expected buy");
        };
        assert_eq!(duration_unit, "t");
        assert_eq!(currency, "USD");
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::try_parse_from([
            "tickwire",
            "--endpoint",
            "ws://localhost:1",
            "--log-level",
            "debug",
            "status",
        ])
        .unwrap();
        let mut settings = TickwireSettings::default();
        apply_cli_overrides(&mut settings, &cli);
        assert_eq!(settings.connection.endpoint, "ws://localhost:1");
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn load_settings_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"endpoint": "ws://10.0.0.1:8080"}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "tickwire",
            "--settings",
            path.to_str().unwrap(),
            "status",
        ])
        .unwrap();
        let settings = load_settings(&cli).unwrap();
        assert!(settings.connection.endpoint.starts_with("ws://"));
    }

    #[test]
    fn invalid_endpoint_override_is_rejected() {
        let cli = Cli::try_parse_from([
            "tickwire",
            "--settings",
            "/nonexistent/settings.json",
            "--endpoint",
            "http://example.com",
            "status",
        ])
        .unwrap();
        assert!(load_settings(&cli).is_err());
    }
}
