//! Patentgraph CLI - resumable LLM enrichment of patent records

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use patentgraph_core::catalog::WorkCatalog;
use patentgraph_core::config::Config;
use patentgraph_core::domain::ResultKind;
use patentgraph_core::enrich::{EnrichOptions, Orchestrator, RunReport};
use patentgraph_core::llm::{LlmClient, RetryPolicy};
use patentgraph_core::session::SessionManager;
use patentgraph_core::shutdown::{ShutdownSignal, install_signal_handlers};
use patentgraph_core::storage::DurableStore;
use patentgraph_core::taxonomy::Taxonomy;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "patentgraph")]
#[command(author, version, about = "Resumable LLM enrichment of patent records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify patents and locate entities with the LLM
    Enrich(EnrichArgs),

    /// List resumable sessions
    Sessions {
        /// Directory holding session files
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Show the progress of one session
    Status {
        /// Session ID
        id: String,
        /// Directory holding session files
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct EnrichArgs {
    /// Resume (or start) the session with this ID
    #[arg(long, conflicts_with = "new")]
    session: Option<String>,

    /// Start a fresh session instead of resuming the latest one
    #[arg(long)]
    new: bool,

    /// Normalized records (.json array or .jsonl)
    #[arg(long)]
    records: Option<PathBuf>,

    /// Directory for session files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Patents per prompt
    #[arg(long)]
    batch_size: Option<usize>,

    /// Maximum requests in flight
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Skip patent classification
    #[arg(long)]
    skip_patents: bool,

    /// Skip entity location extraction
    #[arg(long)]
    skip_entities: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "patentgraph=warn"
    } else {
        "patentgraph=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Enrich(args) => cmd_enrich(args, cli.format, cli.quiet).await,
        Commands::Sessions { output_dir } => cmd_sessions(output_dir, cli.format),
        Commands::Status { id, output_dir } => cmd_status(&id, output_dir, cli.format),
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

/// Attach the error code and remediation hint to a core error
fn describe(err: patentgraph_core::Error) -> anyhow::Error {
    match err.suggestion() {
        Some(hint) => anyhow!("[{}] {}\n  Try: {}", err.code(), err, hint),
        None => anyhow!("[{}] {}", err.code(), err),
    }
}

fn output_dir(config: &Config, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| config.enrich.output_dir.clone())
}

/// Fold command-line overrides into the loaded configuration
fn apply_overrides(config: &mut Config, args: &EnrichArgs) -> anyhow::Result<()> {
    if let Some(dir) = &args.output_dir {
        config.enrich.output_dir = dir.clone();
    }
    if let Some(n) = args.batch_size {
        config.enrich.batch_size = n;
    }
    if let Some(n) = args.max_concurrent {
        config.enrich.max_concurrent_requests = n;
    }
    if args.skip_patents {
        config.enrich.enable_green_classification = false;
        config.enrich.enable_tech_classification = false;
    }
    if args.skip_entities {
        config.enrich.enable_location_extraction = false;
    }
    config.validate()
}

fn resolve_session(manager: &SessionManager, args: &EnrichArgs) -> anyhow::Result<String> {
    let requested = match (&args.session, args.new) {
        (Some(id), _) => Some(id.clone()),
        (None, true) => None,
        (None, false) => {
            let latest = manager.latest().map_err(describe)?;
            if let Some(id) = &latest {
                info!(session_id = %id, "Resuming latest session");
            }
            latest
        }
    };
    manager
        .create_or_resume(requested.as_deref())
        .map_err(describe)
}

async fn cmd_enrich(args: EnrichArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    apply_overrides(&mut config, &args)?;

    let records_path = args
        .records
        .clone()
        .or_else(|| config.data.records_path.clone())
        .ok_or_else(|| {
            anyhow!("No records file given. Pass --records or set data.records_path.")
        })?;

    let api_key = config.llm.resolved_api_key()?.ok_or_else(|| {
        anyhow!("No API key found. Set the PATENTGRAPH_API_KEY environment variable.")
    })?;

    let taxonomy = match &config.data.taxonomy_path {
        Some(path) => Taxonomy::from_toml_file(path).map_err(describe)?,
        None => Taxonomy::builtin(),
    };

    let catalog = WorkCatalog::load(&records_path).map_err(describe)?;
    let summary = catalog.summary();
    if summary.missing_key + summary.missing_text + summary.duplicates > 0 {
        warn!(
            missing_key = summary.missing_key,
            missing_text = summary.missing_text,
            duplicates = summary.duplicates,
            "Some records were skipped"
        );
    }

    let manager = SessionManager::new(&config.enrich.output_dir);
    let session_id = resolve_session(&manager, &args)?;
    let store = DurableStore::open(&config.enrich.output_dir, &session_id).map_err(describe)?;

    let client = LlmClient::builder()
        .config(config.llm.clone())
        .api_key(api_key)
        .max_concurrent(config.enrich.max_concurrent_requests)
        .retry_policy(RetryPolicy::new(
            config.enrich.max_retries,
            config.enrich.retry_delay(),
        ))
        .build()
        .map_err(describe)?;

    let shutdown = ShutdownSignal::new();
    let handlers = install_signal_handlers(shutdown.clone());

    let orchestrator = Orchestrator::new(
        client,
        Arc::new(store),
        Arc::new(catalog),
        Arc::new(taxonomy),
        EnrichOptions::from_config(&config.enrich),
        shutdown,
    );
    let report = orchestrator.run().await;
    handlers.abort();

    print_report(&report, format, quiet)?;

    if !report.fully_persisted {
        return Err(anyhow!(
            "Some results could not be written to {}",
            config.enrich.output_dir.display()
        ));
    }
    Ok(())
}

fn print_report(report: &RunReport, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        let mut value = serde_json::to_value(report).context("Failed to serialize report")?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "resume_hint".to_string(),
                serde_json::Value::String(report.resume_hint()),
            );
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if !quiet {
        let status = if report.cancelled {
            "interrupted"
        } else {
            "complete"
        };
        println!("Session {} {}", report.session_id, status);
        println!();
        println!(
            "Patents:  {}/{} processed",
            report.processed_patents, report.total_patents
        );
        println!(
            "Entities: {}/{} processed",
            report.processed_entities, report.total_entities
        );
        println!();
        println!("Records saved this run:");
        for kind in ResultKind::ALL {
            println!(
                "  {:<22} {}",
                kind.file_stem(),
                report.records_persisted.get(kind)
            );
        }
        for phase in [&report.patents, &report.entities] {
            if !phase.enabled {
                continue;
            }
            println!(
                "{}: {} cycles, {} calls ({} failed, {} malformed), {} records rejected",
                phase.kind,
                phase.cycles,
                phase.calls_dispatched,
                phase.calls_failed,
                phase.malformed_responses,
                phase.records_rejected
            );
        }
        println!();
        let stats = &report.stats;
        println!(
            "Requests: {} total, {} ok, {} failed, {} retried, {:.2}s avg latency",
            stats.total_requests,
            stats.successful_requests,
            stats.failed_requests,
            stats.retried_requests,
            stats.avg_latency_secs
        );
        println!("Elapsed:  {:.1}s", report.elapsed_secs);
        println!();
    }
    println!("Resume with: {}", report.resume_hint());
    Ok(())
}

fn cmd_sessions(dir: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let manager = SessionManager::new(output_dir(&config, dir));
    let sessions = manager.list_sessions().map_err(describe)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions in {}", manager.output_dir().display());
        return Ok(());
    }

    println!(
        "{:<24} {:>8} {:>9}  LAST UPDATE",
        "SESSION", "PATENTS", "ENTITIES"
    );
    for session in sessions {
        println!(
            "{:<24} {:>8} {:>9}  {}",
            session.id,
            session.processed_patents,
            session.processed_entities,
            session.last_update.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn cmd_status(id: &str, dir: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let manager = SessionManager::new(output_dir(&config, dir));
    let summary = manager.summary(id).map_err(describe)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Session: {}", summary.id);
    println!(
        "Last update: {}",
        summary.last_update.as_deref().unwrap_or("never")
    );
    println!("Processed patents:  {}", summary.processed_patents);
    println!("Processed entities: {}", summary.processed_entities);
    for kind in ResultKind::ALL {
        println!("  {:<22} {}", kind.file_stem(), summary.record_count(kind));
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enrich_flags() {
        let cli = Cli::try_parse_from([
            "patentgraph",
            "--format",
            "json",
            "enrich",
            "--session",
            "run1",
            "--batch-size",
            "4",
            "--skip-entities",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Enrich(args) = cli.command else {
            panic!("expected enrich");
        };
        assert_eq!(args.session.as_deref(), Some("run1"));
        assert_eq!(args.batch_size, Some(4));
        assert!(args.skip_entities);
        assert!(!args.new);
    }

    #[test]
    fn test_session_and_new_conflict() {
        let result = Cli::try_parse_from(["patentgraph", "enrich", "--session", "a", "--new"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_apply_and_validate() {
        let mut config = Config::default();
        let args = EnrichArgs {
            batch_size: Some(3),
            max_concurrent: Some(2),
            skip_patents: true,
            ..EnrichArgs::default()
        };
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.enrich.batch_size, 3);
        assert_eq!(config.enrich.max_concurrent_requests, 2);
        assert!(!config.enrich.enable_green_classification);
        assert!(!config.enrich.enable_tech_classification);
        assert!(config.enrich.enable_location_extraction);

        let zero = EnrichArgs {
            max_concurrent: Some(0),
            ..EnrichArgs::default()
        };
        assert!(apply_overrides(&mut Config::default(), &zero).is_err());
    }

    #[test]
    fn test_describe_includes_code_and_hint() {
        let err = describe(patentgraph_core::Error::SessionNotFound("x".to_string()));
        let text = err.to_string();
        assert!(text.starts_with("[E001]"));
        assert!(text.contains("patentgraph sessions"));
    }
}
