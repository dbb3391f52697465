// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gatelink: pinned, paired access to a self-hosted gateway.
//
// Entry point. Initialises logging and backend services, then runs one
// command against them.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use gatelink_core::error::Result;
use gatelink_core::human_errors::humanize_error;
use gatelink_core::{EventType, GatewayId, Severity};
use gatelink_pairing::{GatewayChannel, PairingCode};
use gatelink_security::AuditFilter;

use services::app_services::{AppServices, PairResult};
use services::gateway_client::ConnectOptions;

#[derive(Debug, Parser)]
#[command(name = "gatelink", version, about = "Pinned, paired access to a self-hosted gateway")]
struct Cli {
    /// Data directory (defaults to $XDG_DATA_HOME/gatelink).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct Endpoint {
    /// Gateway id, `host[:port]`.
    gateway: GatewayId,
    /// Address to dial instead of the gateway id.
    #[arg(long)]
    addr: Option<String>,
    /// TLS server name instead of the gateway host.
    #[arg(long)]
    server_name: Option<String>,
    /// Connect timeout in seconds.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

impl Endpoint {
    fn options(&self) -> ConnectOptions {
        ConnectOptions {
            address: self.addr.clone(),
            server_name: self.server_name.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List pinned gateway certificates.
    Pins,
    /// Forget a gateway's pinned certificate.
    Unpin { gateway: GatewayId },
    /// Show the audit trail, most recent first.
    Audit {
        #[arg(long = "type")]
        event_type: Option<EventType>,
        #[arg(long)]
        min_severity: Option<Severity>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Delete the audit trail.
    AuditClear,
    /// Connect to a gateway and report its trust state.
    Connect {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Pair this device using the code shown on the gateway.
    Pair {
        #[command(flatten)]
        endpoint: Endpoint,
        code: String,
    },
    /// Delete every credential stored for a gateway.
    Logout { gateway: GatewayId },
    /// Print a fresh pairing code (for test gateways).
    GenerateCode,
    /// Print the configuration, applying any changes given.
    Config {
        /// Pin unknown gateways on first contact.
        #[arg(long)]
        tofu: Option<bool>,
        /// Pairing timeout in seconds.
        #[arg(long)]
        pairing_timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let human = humanize_error(&e);
            tracing::debug!(error = %e, "command failed");
            eprintln!("{}\n{}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Command::GenerateCode = cli.command {
        println!("{}", PairingCode::generate()?.as_str());
        return Ok(ExitCode::SUCCESS);
    }

    let svc = match cli.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            AppServices::init_in(dir)?
        }
        None => AppServices::init()?,
    };
    tracing::info!(data_dir = %svc.data_dir().display(), "gatelink starting");

    let code = match cli.command {
        Command::Pins => {
            for pin in svc.pinned_certificates() {
                println!(
                    "{}\t{}\t{}",
                    pin.gateway,
                    pin.truncated_fingerprint,
                    pin.pinned_at.to_rfc3339()
                );
            }
            ExitCode::SUCCESS
        }
        Command::Unpin { gateway } => {
            if svc.remove_pin(&gateway)? {
                println!("removed pin for {gateway}");
            } else {
                println!("{gateway} was not pinned");
            }
            ExitCode::SUCCESS
        }
        Command::Audit {
            event_type,
            min_severity,
            search,
            limit,
        } => {
            let mut filter = AuditFilter::default().limit(limit);
            if let Some(t) = event_type {
                filter = filter.event_type(t);
            }
            if let Some(s) = min_severity {
                filter = filter.min_severity(s);
            }
            if let Some(needle) = search {
                filter = filter.search(needle);
            }
            for event in svc.audit_events(&filter) {
                println!(
                    "{}\t{}\t{}\t{}",
                    event.timestamp().to_rfc3339(),
                    event.severity(),
                    event.event_type(),
                    event.redacted_details()
                );
            }
            ExitCode::SUCCESS
        }
        Command::AuditClear => {
            if svc.clear_audit() {
                ExitCode::SUCCESS
            } else {
                eprintln!("the audit trail was cleared in memory but not on disk");
                ExitCode::FAILURE
            }
        }
        Command::Connect { endpoint } => {
            let client = svc.connect(endpoint.gateway.clone(), &endpoint.options()).await?;
            let fingerprint = client
                .fingerprint()
                .map(|fp| fp.truncated())
                .unwrap_or_default();
            println!("{}\t{:?}\t{}", endpoint.gateway, client.trust_state(), fingerprint);
            ExitCode::SUCCESS
        }
        Command::Pair { endpoint, code } => {
            let client = svc.connect(endpoint.gateway.clone(), &endpoint.options()).await?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            match svc.pair(Some(&client), &code, &cancel).await {
                PairResult::Success {
                    gateway,
                    token,
                    persisted,
                } => {
                    tracing::debug!(token_bytes = token.len(), "device token received");
                    println!("paired with {gateway}");
                    if !persisted {
                        eprintln!("the device token could not be saved and will be lost on exit");
                    }
                    ExitCode::SUCCESS
                }
                PairResult::Failed { message } => {
                    eprintln!("{message}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Logout { gateway } => {
            svc.logout(&gateway)?;
            println!("logged out of {gateway}");
            ExitCode::SUCCESS
        }
        Command::Config {
            tofu,
            pairing_timeout,
        } => {
            let mut config = svc.config();
            if tofu.is_some() || pairing_timeout.is_some() {
                if let Some(enabled) = tofu {
                    config.tofu_enabled = enabled;
                }
                if let Some(secs) = pairing_timeout {
                    config.pairing_timeout_secs = secs;
                }
                svc.save_config(&config)?;
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            ExitCode::SUCCESS
        }
        Command::GenerateCode => ExitCode::SUCCESS,
    };

    svc.shutdown();
    Ok(code)
}
