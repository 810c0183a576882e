//! NDT CLI - Command-line client for NDT (Network Diagnostic Tool) servers
//!
//! Runs one control session against a server and prints what it reported.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ndt_client::{ClientError, NdtClient, SessionResult};
use ndt_core::{TestKind, DEFAULT_PATH, DEFAULT_PORT, SERVER_VERSION, WS_SUBPROTOCOL};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::{FileConfig, RunArgs};

/// NDT - Network Diagnostic Tool client
#[derive(Parser)]
#[command(name = "ndt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "NDT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test session against a server
    Run {
        /// Server host name or address
        #[arg(env = "NDT_SERVER")]
        host: Option<String>,

        /// Control port
        #[arg(short, long)]
        port: Option<u16>,

        /// WebSocket resource path
        #[arg(long)]
        path: Option<String>,

        /// Connect with wss://
        #[arg(short, long)]
        secure: bool,

        /// Connection timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Tests to request (c2s, s2c, meta)
        #[arg(short, long, value_delimiter = ',')]
        tests: Vec<TestKind>,

        /// Extra metadata (key=value), may be repeated
        #[arg(short, long)]
        meta: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version and protocol info
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli.log_level, cli.json_logs) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            if let Some(client_err) = e.downcast_ref::<ClientError>() {
                if client_err.is_recoverable() {
                    let hint = match client_err.retry_after() {
                        Some(after) => format!("Server is busy, try again in {}s", after.as_secs()),
                        None => "Server is busy, try again later".to_string(),
                    };
                    eprintln!("{}", hint.yellow());
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    match cli.command {
        Commands::Run {
            host,
            port,
            path,
            secure,
            timeout,
            tests,
            meta,
            json,
        } => {
            let args = RunArgs {
                host,
                port,
                path,
                secure,
                connect_timeout_secs: timeout,
                tests,
                meta,
            };
            let client = config::resolve(file, args)?;
            run_session(client, json).await?;
        }

        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

async fn run_session(client: NdtClient, json: bool) -> Result<()> {
    let url = client.config().url().context("Invalid server address")?;
    if !json {
        println!("{} Testing against {}", "NDT".cyan().bold(), url);
    }

    let result = tokio::select! {
        result = client.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl+c")?;
            warn!("Interrupted, abandoning session");
            anyhow::bail!("Session interrupted");
        }
    };
    let result = result.with_context(|| format!("Session with {} failed", url))?;
    info!("Session finished with {} test(s)", result.tests_run.len());

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &SessionResult) {
    println!();
    if let Some(version) = &result.server_version {
        println!("Server:     {}", version);
    }
    if result.tests_run.contains(&TestKind::C2s) {
        println!("Upload:     {}", format_rate(result.upload_rate).green());
    }
    if result.tests_run.contains(&TestKind::S2c) {
        println!("Download:   {}", format_rate(result.download_rate).green());
    }
    if result.tests_run.contains(&TestKind::Meta) {
        let meta = if result.meta_accepted { "accepted" } else { "not accepted" };
        println!("Metadata:   {}", meta);
    }

    if !result.server_results.is_empty() {
        println!();
        println!("{}", "Server results:".green());
        for (key, value) in &result.server_results {
            println!("  {:<24} {}", key, value);
        }
    }
}

fn format_rate(kbps: Option<f64>) -> String {
    match kbps {
        Some(kbps) if kbps >= 1000.0 => format!("{:.2} Mbit/s", kbps / 1000.0),
        Some(kbps) => format!("{:.0} kbit/s", kbps),
        None => "n/a".to_string(),
    }
}

fn print_info() {
    println!("{}", "NDT - Network Diagnostic Tool client".cyan().bold());
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    println!();
    println!("{}", "Protocol:".green());
    println!("  Server version:  {}", SERVER_VERSION);
    println!("  Transport:       WebSocket, subprotocol \"{}\"", WS_SUBPROTOCOL);
    println!("  Default target:  ws://<host>:{}{}", DEFAULT_PORT, DEFAULT_PATH);
    println!(
        "  Tests:           {}",
        TestKind::ALL
            .iter()
            .map(|kind| format!("{} ({})", kind, kind.id()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("{}", "Examples:".green());
    println!("  ndt run ndt.example.net                   # Run every test");
    println!("  ndt run ndt.example.net --tests s2c,meta  # Download and metadata only");
    println!("  ndt run localhost -p 3010 --json          # Machine-readable result");
}
