#![forbid(unsafe_code)]

use silentc::config::{load_config, ClientConfig, Cli};
use silentc::connection::{connection_manager, ConnStatus};
use silentc::operator::{forward_lines, render_inbound, LoginSource, TerminalLogin};
use silentc::pump::InboundChat;
use silentc::tls::TlsDialer;

use clap::Parser;
use silent_common::fingerprint::{format_fingerprint, normalize_pin};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI style helpers ──────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => {
            let level = match cli.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            };
            // Dependencies (rustls, tokio) stay at warn unless RUST_LOG says otherwise.
            EnvFilter::new(format!("warn,silentc={level},silent_common={level}"))
        }
    };

    if let Some(path) = cli.log_file.as_deref() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("cannot open log file {}: {e}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

fn print_banner(config: &ClientConfig) {
    let pin = config.pinned_fingerprint().map(normalize_pin);

    if std::io::stderr().is_terminal() {
        let v = env!("CARGO_PKG_VERSION");
        eprintln!();
        eprintln!("  {BOLD}◈ Silent Chat{RESET} {DIM}v{v}{RESET}");
        match pin {
            Some(ref pin) => {
                eprintln!("  {GREEN}●{RESET} Secure mode: certificate pinned");
                eprintln!("  {DIM}Fingerprint{RESET} {CYAN}{}{RESET}", format_fingerprint(pin));
            }
            None => {
                eprintln!("  {YELLOW}●{RESET} No certificate fingerprint pinned");
                eprintln!("  {DIM}The connection can be intercepted. Pin the fingerprint shown{RESET}");
                eprintln!("  {DIM}after connecting with --fingerprint or CHAT_SERVER_FINGERPRINT.{RESET}");
            }
        }
        eprintln!("  {DIM}Type /quit to leave, /kill to stop the server.{RESET}");
        eprintln!();
    }

    match pin {
        Some(pin) => info!(fingerprint = %format_fingerprint(&pin), "certificate pinning enabled"),
        None => warn!("no certificate fingerprint pinned, server identity is not verified"),
    }
}

// ── Client ──────────────────────────────────────────────────────────

async fn run_client(cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(ref fingerprint) = cli.fingerprint {
        config.fingerprint = Some(fingerprint.clone());
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    print_banner(&config);

    let mut login = TerminalLogin::new(cli.host.clone(), cli.port, cli.username.clone());
    let details = tokio::task::spawn_blocking(move || login.login()).await??;

    let dialer = TlsDialer::new(
        details.host.clone(),
        details.port,
        config.pinned_fingerprint().map(str::to_owned),
        config.timeouts.dial(),
    )?;
    info!(server = %dialer.addr(), username = %details.credentials.username, "starting silent chat client");

    let config = Arc::new(config);

    let (outbox_tx, outbox_rx) = mpsc::channel::<String>(64);
    let (inbox_tx, inbox_rx) = mpsc::channel::<InboundChat>(256);
    let (status_tx, status_rx) = watch::channel(ConnStatus::Disconnected);

    // Same buffered std handle the login prompts read from, so piped input
    // after the username is not lost.
    tokio::task::spawn_blocking(move || forward_lines(std::io::stdin().lock(), outbox_tx));

    let renderer = tokio::spawn(async move {
        if let Err(e) = render_inbound(inbox_rx, status_rx, std::io::stdout()).await {
            error!("chat renderer error: {}", e);
        }
    });

    tokio::select! {
        outcome = connection_manager(
            config,
            &dialer,
            &details.credentials,
            outbox_rx,
            inbox_tx,
            status_tx,
        ) => {
            info!(?outcome, "chat client exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    renderer.abort();
    Ok(())
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider - may already be installed or unsupported platform");
    }

    let cli = Cli::parse();

    init_tracing(&cli)?;

    let result = run_client(&cli).await;

    // The stdin reader sits on a blocking thread that would hold up runtime
    // shutdown, so leave explicitly.
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "fatal error");
            eprintln!("silentc: {e:#}");
            std::process::exit(1);
        }
    }
}
