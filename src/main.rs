//! Pulseline - deterministic control plane for marketing analytics
//!
//! A CLI tool that routes natural-language analysis requests through a
//! fixed nine-stage pipeline: classify, preprocess, validate, dispatch
//! channel analyses to an external reasoning collaborator, synthesize,
//! hypothesize, format, and update memory.
//!
//! Exit codes:
//!   0 - Run completed (possibly with caveats or degraded coverage)
//!   1 - Runtime error (connection, config, unplaceable query, etc.)
//!   2 - Quality gate blocked the run

mod cli;
mod collab;
mod config;
mod error;
mod gate;
mod kernel;
mod models;
mod pipeline;
mod report;
mod router;
mod scanner;
mod store;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use collab::HttpCollaborator;
use config::Config;
use pipeline::{RunRequest, RunResponse, Scheduler};
use scanner::DataScanner;
use std::path::{Path, PathBuf};
use store::MemoryStore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Pulseline v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    // Handle --resolve-decision: ledger update only, no pipeline run
    if let Some(spec) = args.resolve_decision.clone() {
        match handle_resolve_decision(&args, &spec) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("\n❌ Error: {}", e);
                std::process::exit(1);
            }
        }
    }

    match run_pipeline(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .pulseline.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(".pulseline.toml");

    if path.exists() {
        eprintln!("⚠️  .pulseline.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .pulseline.toml")?;

    println!("✅ Created .pulseline.toml with default settings.");
    println!("   Edit it to customize the collaborator, gate thresholds, and directories.");
    Ok(())
}

/// Handle --resolve-decision: record a decision outcome in the ledger.
fn handle_resolve_decision(args: &Args, spec: &str) -> Result<()> {
    let mut config = load_config(args)?;
    config.merge_with_args(args);

    let (id, status) = spec
        .split_once(':')
        .context("expected ID:STATUS, e.g. 4:confirmed")?;
    let id: u64 = id.trim().parse().context("decision id must be a number")?;
    let status: models::DecisionStatus = status
        .trim()
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let mut store = MemoryStore::load(Path::new(&config.general.memory_dir))?;
    store.update_decision_status(id, status)?;
    store.save()?;

    println!("✅ Decision {id} marked {status}.");
    println!("   {} decision(s) still open.", store.open_decisions().len());
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete pipeline workflow. Returns the exit code.
async fn run_pipeline(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let query = args.query.clone().unwrap_or_default();

    // Step 1: Discover export files
    let data_dir = PathBuf::from(&config.general.data_dir);
    println!("📂 Scanning data directory: {}", data_dir.display());
    let data_scanner = DataScanner::new(data_dir, config.general.max_file_size);
    let files = data_scanner.scan()?;
    info!("Found {} export files", files.len());

    // Handle --dry-run: scan and classify, no collaborator calls
    if args.dry_run {
        return handle_dry_run(&args, &query, &files);
    }

    // Step 2: Wire up the collaborator and memory store
    println!("🤖 Connecting collaborator...");
    println!("   Model: {}", config.collaborator.model);
    println!("   Endpoint: {}", config.collaborator.url);
    println!("   Timeout: {}s", config.collaborator.timeout_seconds);

    let collaborator = HttpCollaborator::new(
        config.collaborator.url.clone(),
        config.collaborator.model.clone(),
        config.collaborator.temperature,
        config.collaborator.timeout_seconds,
    );
    let store = MemoryStore::load(Path::new(&config.general.memory_dir))?;

    // Step 3: Run the pipeline
    println!("\n🔬 Running analysis pipeline...\n");
    let mut scheduler = Scheduler::new(
        collaborator,
        store,
        config.gate.clone(),
        config.analysis.clone(),
    );
    let response = scheduler
        .run(RunRequest {
            query,
            channels: args.channels.clone(),
            period: args.period,
            geo: args.geo,
            comparison: args.comparison,
            files,
        })
        .await?;

    // Step 4: Render and save the report
    let output_path = PathBuf::from(&config.general.output);
    match response {
        RunResponse::NoMatch { query, detail } => {
            eprintln!("\n⛔ Could not place the request: {detail}");
            eprintln!("   Query: {query}");
            eprintln!("   Try --channels to name channels explicitly.");
            Ok(1)
        }
        RunResponse::Blocked { transcript, gate } => {
            let output = report::generate_block_report(&transcript, &gate);
            report::write_report(&output_path, &output)?;

            eprintln!("\n⛔ Quality gate blocked the run:");
            for fix in &gate.fix_list {
                eprintln!("   - {fix}");
            }
            println!("\n📝 Block report saved to: {}", output_path.display());
            Ok(2)
        }
        RunResponse::Completed(run) => {
            let output = match args.format {
                OutputFormat::Json => report::generate_json_report(&run)?,
                OutputFormat::Markdown => report::generate_markdown_report(&run),
            };
            report::write_report(&output_path, &output)?;

            println!("\n📊 Run Summary:");
            println!("   Template: {}", run.template);
            println!(
                "   Channels analyzed: {}/{}",
                run.records.channels.len(),
                run.working_set.channels.len()
            );
            println!("   Coverage: {:.0}%", run.coverage.attributed_pct);
            for (channel, reason) in &run.unanalyzed {
                warn!("channel '{channel}' not analyzed: {reason}");
            }
            if !run.gate.caveats.is_empty() {
                println!("   Caveats: {}", run.gate.caveats.len());
            }
            let open = scheduler.store().open_decisions().len();
            if open > 0 {
                println!("   Open decisions in the log: {open}");
            }
            println!(
                "\n✅ Run complete! Report saved to: {}",
                output_path.display()
            );
            Ok(0)
        }
    }
}

/// Handle --dry-run: classify the query, list discovered files, exit.
fn handle_dry_run(args: &Args, query: &str, files: &[scanner::DataFile]) -> Result<i32> {
    println!("\n🔍 Dry run: routing and scanning only (no collaborator calls)...\n");

    match router::classify(query, args.channels.as_deref(), args.period)? {
        router::Classification::Resolved(ws) => {
            println!("   Channels: {}", ws.channels.join(", "));
            println!("   Groups: {}", ws.distinct_groups().join(", "));
            println!("   Template: {}", ws.template);
            println!(
                "   Comparison: {} | Geo: {}",
                ws.comparison_type, ws.geo
            );
            if let Some(range) = ws.date_range {
                println!("   Period: {range}");
            }
        }
        router::Classification::PendingExternal { .. } => {
            println!("   No keyword rule matched; a full run would ask the classifier.");
        }
    }

    if files.is_empty() {
        println!("\n   No export files found.");
    } else {
        println!("\n   Found {} export files:", files.len());
        for file in files {
            println!(
                "     📄 {} ({}, {} bytes)",
                file.path,
                file.channel.as_deref().unwrap_or("unrecognized"),
                file.size
            );
        }
        println!(
            "   Channels with data: {}",
            DataScanner::available_channels(files).join(", ")
        );
    }

    println!("\n✅ Dry run complete. No collaborator calls were made.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from .pulseline.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
