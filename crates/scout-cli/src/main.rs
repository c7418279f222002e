// ============================================================================
// macroscout - helper console for FairFetch licensed content
// ============================================================================
// Usage:
//   macroscout run --url URL [--license summary|display]   Mint, redeem, show receipt
//   macroscout mint --url URL                               Create a usage credit only
//   macroscout redeem --token TOKEN --url URL               Open content with a credit
//   macroscout history [show ID]                            Recent receipts (last 5)
//   macroscout settings show|set                            Stored setup details
//   macroscout check                                        Test backend connection
//   macroscout url --url URL                                Preview the request URL
//   macroscout relay [--bind ADDR]                          Serve the relay fallback
// ============================================================================

use anyhow::Result;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use scout_core::flow::{messages, proof_block, receipt_block};
use scout_core::relay::DEFAULT_RELAY_BIND;
use scout_core::{
    build_licensed_url, mask_api_key, view_label, AccessFlowOrchestrator, ConsoleConfig,
    ConsoleDb, License, MintRequest, RelayServer, RelayService, ReqwestTransport, RunInput,
    RunRecord, RunReport, Settings, SettingsOverrides,
};
use tracing::info;

/// MacroScout helper console
#[derive(Parser)]
#[command(
    name = "macroscout",
    version,
    about = "Request paid content through FairFetch and review receipts"
)]
struct Cli {
    /// Path to the local store (default: ~/.macroscout/console.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Service URL for this invocation (overrides stored settings)
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Relay base URL used when direct calls fail
    #[arg(long, global = true)]
    relay_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct TargetArgs {
    /// Content URL to open
    #[arg(long)]
    url: String,

    /// Access type: summary or display
    #[arg(long, default_value = "summary")]
    license: String,

    /// Send the URL as-is, without the licensed access marker
    #[arg(long)]
    no_marker: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a usage credit, open the content, and write a receipt
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Spending limit in micro-units
        #[arg(long)]
        max_price: Option<u64>,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a usage credit only
    Mint {
        #[command(flatten)]
        target: TargetArgs,

        /// Spending limit in micro-units
        #[arg(long)]
        max_price: Option<u64>,
    },

    /// Open content with an existing usage credit (not saved to history)
    Redeem {
        /// Usage credit code
        #[arg(long)]
        token: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show recent activity (last 5)
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or change stored setup details
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Check that the service is reachable
    Check,

    /// Show the final request URL and which view it gets
    Url {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Serve the relay used when direct calls are blocked
    Relay {
        /// Address to listen on
        #[arg(long, default_value = DEFAULT_RELAY_BIND)]
        bind: String,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show one saved run with its receipt and proof block
    Show { id: String },
    /// Forget all saved runs
    Clear,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings (access key masked)
    Show,
    /// Save settings locally
    Set {
        #[arg(long)]
        backend_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        agent_label: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
    },
}

fn parse_license(s: &str) -> Result<License> {
    s.parse::<License>().map_err(anyhow::Error::msg)
}

fn format_timestamp(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S %Z")
                .to_string()
        })
        .unwrap_or_else(|_| ts.to_string())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scout_core=info,macroscout=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Could not load .env file: {}", e);
        }
    }
    init_logging();

    let cli = Cli::parse();
    let config = ConsoleConfig::from_env();

    if let Commands::Relay { bind } = &cli.command {
        return cmd_relay(bind).await;
    }

    let db_path = cli.db_path.clone().or_else(|| config.db_path.clone());
    let db = ConsoleDb::open(db_path.as_deref())?;

    let overrides = SettingsOverrides {
        backend_url: cli.backend_url.clone(),
        ..Default::default()
    };
    let settings = config.effective_settings(db.load_settings()?, &overrides);
    let relay_url = cli.relay_url.clone().unwrap_or_else(|| config.relay_url.clone());
    let flow = AccessFlowOrchestrator::new(ReqwestTransport::new(), &settings.backend_url, &relay_url);

    match cli.command {
        Commands::Run {
            target,
            max_price,
            json,
        } => cmd_run(&flow, &db, &settings, &target, max_price, json).await,
        Commands::Mint { target, max_price } => cmd_mint(&flow, &settings, &target, max_price).await,
        Commands::Redeem { token, target } => cmd_redeem(&flow, &token, &target).await,
        Commands::History { action, json } => match action {
            None => cmd_history(&db, json),
            Some(HistoryAction::Show { id }) => cmd_history_show(&db, &id),
            Some(HistoryAction::Clear) => cmd_history_clear(&db),
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => cmd_settings_show(&db, &settings, &relay_url),
            SettingsAction::Set {
                backend_url,
                api_key,
                agent_label,
                user_agent,
            } => {
                let changes = SettingsOverrides {
                    backend_url,
                    api_key,
                    agent_label,
                    user_agent,
                };
                cmd_settings_set(&db, &changes)
            }
        },
        Commands::Check => cmd_check(&flow).await,
        Commands::Url { target } => cmd_url(&target),
        Commands::Relay { .. } => Ok(()),
    }
}

fn request_url(target: &TargetArgs) -> Result<(License, String)> {
    let license = parse_license(&target.license)?;
    Ok((license, build_licensed_url(&target.url, license, !target.no_marker)))
}

async fn cmd_run(
    flow: &AccessFlowOrchestrator<ReqwestTransport>,
    db: &ConsoleDb,
    settings: &Settings,
    target: &TargetArgs,
    max_price: Option<u64>,
    json: bool,
) -> Result<()> {
    let license = parse_license(&target.license)?;
    let input = RunInput {
        target_url: target.url.clone(),
        license,
        use_marker: !target.no_marker,
        max_price_micros: max_price,
        credentials: settings.credentials(),
    };

    info!("Starting licensed fetch for {}", input.target_url);
    let report = flow.run(&input, db).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let Some(message) = report.error_message() {
        anyhow::bail!("{}", message);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Final request URL: {} ({})", report.request_url, view_label(&report.request_url));
    println!();
    for line in &report.status {
        println!("  {}", line);
    }

    if let Some(record) = &report.record {
        println!();
        print_record(record);
    }

    if let Some(message) = report.error_message() {
        println!();
        println!("Error: {}", message);
        let technical = &report.technical;
        if let Some(status) = technical.mint_status {
            println!("  mint status:   HTTP {}", status);
        }
        if let Some(status) = technical.redeem_status {
            println!("  redeem status: HTTP {}", status);
        }
        if let Some(id) = &technical.request_id {
            println!("  request id:    {}", id);
        }
        for detail in [&technical.mint_error, &technical.redeem_error].into_iter().flatten() {
            println!("  {}", detail);
        }
    }
}

fn print_record(record: &RunRecord) {
    println!("=== Receipt ===");
    println!("{}", receipt_block(&record.receipt, record.license));
    println!("Time: {}", format_timestamp(&record.timestamp));
    println!();
    println!("=== Proof block ===");
    println!("{}", proof_block(record));
    println!();
    println!("=== Content preview ===");
    println!("{}", record.content_preview);
}

async fn cmd_mint(
    flow: &AccessFlowOrchestrator<ReqwestTransport>,
    settings: &Settings,
    target: &TargetArgs,
    max_price: Option<u64>,
) -> Result<()> {
    let (license, url) = request_url(target)?;
    let request = MintRequest::new(url, license).with_max_price(max_price);

    match flow.mint(&request, &settings.credentials()).await {
        Ok(minted) => {
            println!("{}", messages::step_succeeded(scout_core::FlowStep::Mint, minted.route));
            println!("Usage credit code: {}", minted.token);
            if let Some(id) = &minted.request_id {
                println!("Request id: {}", id);
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("{} ({})", messages::user_message(&e), e),
    }
}

async fn cmd_redeem(
    flow: &AccessFlowOrchestrator<ReqwestTransport>,
    token: &str,
    target: &TargetArgs,
) -> Result<()> {
    let (license, url) = request_url(target)?;

    match flow.redeem(token, &url, license).await {
        Ok(redeemed) => {
            println!("{}", messages::step_succeeded(scout_core::FlowStep::Redeem, redeemed.route));
            println!();
            println!("=== Receipt ===");
            println!("{}", receipt_block(&redeemed.receipt, license));
            println!();
            println!("=== Content preview ===");
            println!("{}", redeemed.preview);
            Ok(())
        }
        Err(e) => anyhow::bail!("{} ({})", messages::user_message(&e), e),
    }
}

fn cmd_history(db: &ConsoleDb, json: bool) -> Result<()> {
    let runs = db.list_runs()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No saved activity yet. Complete a run to save your first receipt.");
        return Ok(());
    }

    println!(
        "{:<40}  {:<8}  {:>12}  {}",
        "REFERENCE", "LICENSE", "MICROS", "SOURCE"
    );
    println!("{}", "-".repeat(100));

    for run in &runs {
        println!(
            "{:<40}  {:<8}  {:>12}  {}",
            run.id,
            run.license.as_str(),
            run.receipt.price_micros,
            run.resource_url
        );
    }

    println!("\nTotal: {} runs", runs.len());
    Ok(())
}

fn cmd_history_show(db: &ConsoleDb, id: &str) -> Result<()> {
    let run = db
        .get_run(id)?
        .ok_or_else(|| anyhow::anyhow!("No saved run with reference '{}'", id))?;

    println!("Source URL:  {}", run.resource_url);
    println!("Request URL: {}", run.request_url);
    println!("Access type: {}", run.license.label());
    println!();
    print_record(&run);
    Ok(())
}

fn cmd_history_clear(db: &ConsoleDb) -> Result<()> {
    let removed = db.clear_runs()?;
    println!("Cleared {} saved runs", removed);
    Ok(())
}

fn cmd_settings_show(db: &ConsoleDb, settings: &Settings, relay_url: &str) -> Result<()> {
    println!("=== Helper Console Settings ===");
    println!("Store:       {}", db.path().display());
    println!();
    println!(
        "Service URL: {}",
        if settings.backend_url.is_empty() { "Not set" } else { &settings.backend_url }
    );
    println!("Access key:  {}", mask_api_key(&settings.api_key));
    println!("App name:    {}", settings.user_agent);
    println!("Helper name: {}", settings.agent_label);
    println!("Relay URL:   {}", relay_url);
    Ok(())
}

/// Save `changes` on top of what is already stored. Environment defaults and
/// global flags only apply to the current invocation and are never written.
fn cmd_settings_set(db: &ConsoleDb, changes: &SettingsOverrides) -> Result<()> {
    if changes.is_empty() {
        anyhow::bail!("Nothing to change. Pass at least one of --backend-url, --api-key, --agent-label, --user-agent");
    }
    let mut stored = db.load_settings()?.unwrap_or_default();
    changes.apply(&mut stored);
    db.save_settings(&stored)?;
    println!("Settings saved locally.");
    Ok(())
}

async fn cmd_check(flow: &AccessFlowOrchestrator<ReqwestTransport>) -> Result<()> {
    if flow.backend_url().is_empty() {
        anyhow::bail!("Enter a backend URL first.");
    }
    println!("Checking {} ...", flow.backend_url());
    let status = flow.test_connection().await;
    println!("{}", status.describe());
    Ok(())
}

fn cmd_url(target: &TargetArgs) -> Result<()> {
    let (_, url) = request_url(target)?;
    println!("{}", url);
    println!("{}", view_label(&url));
    Ok(())
}

async fn cmd_relay(bind: &str) -> Result<()> {
    let server = RelayServer::bind(bind, RelayService::new(ReqwestTransport::new()))?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping relay");
            shutdown.shutdown();
        }
    });
    server.serve().await
}
