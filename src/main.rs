use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use webpilot::config::PilotConfig;
use webpilot::driver::{BrowserDriver, MarionetteDriver};
use webpilot::locator::TextLocator;
use webpilot::oracle::{ChatOracle, ChatOracleConfig, DecisionOracle};
use webpilot::orchestrator::Orchestrator;
use webpilot::server::{self, ObserveState};
use webpilot::session::OutcomeStatus;

#[derive(Debug, Parser)]
#[command(name = "webpilot", about = "Browser automation with natural language commands")]
struct Cli {
    /// Marionette host.
    #[arg(long)]
    host: Option<String>,

    /// Marionette port.
    #[arg(long)]
    port: Option<u16>,

    /// Path to a YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address for the DOM observation endpoint.
    #[arg(long)]
    serve_addr: Option<String>,

    /// Skip starting the observation endpoint.
    #[arg(long)]
    no_serve: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webpilot=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PilotConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.host {
        config.marionette.host = host;
    }
    if let Some(port) = cli.port {
        config.marionette.port = port;
    }
    if let Some(addr) = cli.serve_addr {
        config.server.addr = addr;
    }

    let driver = MarionetteDriver::connect(
        &config.marionette.host,
        config.marionette.port,
        Duration::from_secs(config.marionette.connect_timeout_secs),
    )
    .await
    .context("connecting to Firefox")?;
    let driver: Arc<dyn BrowserDriver> = Arc::new(driver);
    println!("Connected to Firefox. Enter commands or 'exit' to quit.");

    if !cli.no_serve {
        let state = ObserveState::new(driver.clone(), config.server.snapshot_log.clone());
        let addr = config.server.addr.clone();
        tokio::spawn(async move {
            if let Err(err) = server::serve(&addr, state).await {
                warn!(%err, "observation endpoint stopped");
            }
        });
    }

    let oracle: Arc<dyn DecisionOracle> =
        Arc::new(ChatOracle::new(ChatOracleConfig::from_settings(&config.oracle)?)?);
    let locator = build_locator(driver.clone(), &config);
    let mut orchestrator = Orchestrator::new(driver, oracle, locator, config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nEnter command: ");
        std::io::stdout().flush()?;
        let Some(command) = lines.next_line().await? else {
            break;
        };
        let command = command.trim();
        if command.is_empty() {
            continue;
        }
        if command.eq_ignore_ascii_case("exit") {
            break;
        }

        println!("Executing command...");
        let report = orchestrator.run(command).await;

        if report.is_success() {
            println!(
                "✅ Command executed successfully ({}/{} steps)",
                report.steps_completed, report.total_steps
            );
        } else {
            println!("❌ Command execution failed");
        }
        println!("\nResults:");
        for (i, step) in report.results.iter().enumerate() {
            let mark = match step.outcome.status {
                OutcomeStatus::Success => "✓",
                OutcomeStatus::Error => "✗",
            };
            println!("  {}. [{}] {}", i + 1, mark, step.outcome.message);
            if let Some(data) = &step.outcome.data {
                if data.chars().count() > 100 {
                    let preview: String = data.chars().take(100).collect();
                    println!("    Extracted data: {preview}...");
                } else {
                    println!("    Extracted data: {data}");
                }
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

#[cfg(feature = "ocr")]
fn build_locator(driver: Arc<dyn BrowserDriver>, config: &PilotConfig) -> Arc<dyn TextLocator> {
    use webpilot::locator::{OcrTextLocator, TesseractBackend};
    Arc::new(OcrTextLocator::new(
        driver,
        TesseractBackend::new(config.ocr.language.clone()),
    ))
}

#[cfg(not(feature = "ocr"))]
fn build_locator(_driver: Arc<dyn BrowserDriver>, _config: &PilotConfig) -> Arc<dyn TextLocator> {
    use webpilot::locator::DisabledOcr;
    Arc::new(DisabledOcr)
}
