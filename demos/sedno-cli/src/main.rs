//! Command-line client: run an analysis, follow its reasoning trace and
//! browse saved history.
//!
//! Run with: cargo run -p sedno-cli -- analyze "Energy security in the Baltics" --region europe

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use sedno_core::progress::format_duration;
use sedno_core::{AnalysisBackend, AnalysisConfig, ReasoningStep, SednoConfig, StepStatus};
use sedno_session::storage::FileStore;
use sedno_session::{HistoryEntry, HistoryStore, SessionCoordinator, SessionPhase, SessionState};
use sedno_transport::{HttpBackend, ScriptedBackend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sedno", version, about = "Multi-agent scenario analysis client")]
struct Cli {
    /// Config file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an analysis and follow it live.
    Analyze(AnalyzeArgs),
    /// Browse saved analyses.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Check that the backend is reachable.
    Health,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    query: String,

    #[arg(long = "region")]
    regions: Vec<String>,

    #[arg(long = "country")]
    countries: Vec<String>,

    #[arg(long = "sector")]
    sectors: Vec<String>,

    /// Factor weight as `name=value`.
    #[arg(long = "weight", value_parser = parse_weight)]
    weights: Vec<(String, f64)>,

    /// Replay a recorded SSE transcript instead of contacting the backend.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Do not save the finished analysis to history.
    #[arg(long)]
    no_save: bool,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    List,
    Show { id: String },
    Delete { id: String },
    Clear,
}

fn parse_weight(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid weight `{value}`: {e}"))?;
    Ok((name.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SednoConfig::load(cli.config.as_deref()).context("loading config")?;

    match cli.command {
        Command::Analyze(args) => analyze(&config, args).await,
        Command::History { action } => history(&config, action).await,
        Command::Health => {
            let backend = HttpBackend::from_config(&config)?;
            let health = backend.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
    }
}

async fn open_history(config: &SednoConfig) -> anyhow::Result<HistoryStore<FileStore>> {
    let storage = FileStore::from_settings(&config.history)?;
    tracing::debug!(dir = %storage.dir().display(), "Opening history");
    Ok(HistoryStore::with_settings(storage, &config.history).await)
}

async fn analyze(config: &SednoConfig, args: AnalyzeArgs) -> anyhow::Result<()> {
    let backend: Arc<dyn AnalysisBackend> = match &args.replay {
        Some(path) => {
            let transcript = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            Arc::new(ScriptedBackend::from_transcript("replay", transcript))
        }
        None => Arc::new(HttpBackend::from_config(config)?),
    };

    let mut analysis = AnalysisConfig::new();
    analysis.regions = args.regions;
    analysis.countries = args.countries;
    analysis.sectors = args.sectors;
    for (name, weight) in args.weights {
        analysis.set_weight(name, weight);
    }

    let mut coordinator = SessionCoordinator::new(backend, config.session.clone());
    let mut updates = coordinator.updates();
    let progress = coordinator.progress();

    let session_id = coordinator.start_session(&args.query, &analysis).await?;
    println!("Session {session_id}");

    let mut printed = 0;
    let mut interrupted = false;
    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(state) = update else { break };
                for step in state.steps.iter().skip(printed) {
                    print_step(step);
                }
                printed = state.steps.len();
                if let Some(estimate) = *progress.borrow() {
                    let remaining = estimate
                        .remaining
                        .map_or_else(|| "-".to_string(), format_duration);
                    eprintln!(
                        "  {:>3.0}%  elapsed {}  remaining {remaining}",
                        state.progress,
                        format_duration(estimate.elapsed),
                    );
                }
                if state.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                coordinator.stop();
            }
        }
    }

    let state = coordinator.snapshot();
    print_outcome(&state);

    match state.phase {
        SessionPhase::Completed if !args.no_save => {
            let history = open_history(config).await?;
            if let Some(entry) = coordinator.commit(&history).await {
                println!("Saved to history as {}", entry.id);
            }
            Ok(())
        }
        SessionPhase::Failed => bail!(state.error.unwrap_or_else(|| "analysis failed".to_string())),
        _ => Ok(()),
    }
}

const fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Thinking => "thinking",
        StepStatus::Searching => "searching",
        StepStatus::Analyzing => "analyzing",
        StepStatus::Complete => "done",
        StepStatus::Error => "error",
    }
}

fn print_step(step: &ReasoningStep) {
    println!(
        "[{:>3}] {:<9} {}: {}",
        step.id,
        status_label(step.status),
        step.title,
        step.content
    );
    for doc in &step.documents {
        println!("        - {} ({}, {:.2})", doc.title, doc.source, doc.relevance);
    }
}

fn print_outcome(state: &SessionState) {
    match state.phase {
        SessionPhase::Completed => println!("\nAnalysis complete: {} steps", state.steps.len()),
        SessionPhase::Stopped => println!("\nAnalysis stopped"),
        SessionPhase::Failed => println!(
            "\nAnalysis failed: {}",
            state.error.as_deref().unwrap_or("unknown error")
        ),
        _ => {}
    }
    for scenario in &state.scenarios {
        println!(
            "\n== {} / {} ({:.0}%) {}\n{}",
            scenario.timeframe,
            scenario.variant,
            scenario.confidence * 100.0,
            scenario.title,
            scenario.content
        );
    }
}

fn print_entry(entry: &HistoryEntry) {
    println!(
        "{}  {}  {:?}  {} scenarios  {}",
        entry.id,
        entry.created_at.format("%Y-%m-%d %H:%M"),
        entry.status,
        entry.scenarios.len(),
        entry.query
    );
}

async fn history(config: &SednoConfig, action: HistoryAction) -> anyhow::Result<()> {
    let history = open_history(config).await?;
    match action {
        HistoryAction::List => {
            let entries = history.list().await;
            if entries.is_empty() {
                println!("No saved analyses");
            }
            for entry in &entries {
                print_entry(entry);
            }
        }
        HistoryAction::Show { id } => {
            let entry = history
                .get(&id)
                .await
                .with_context(|| format!("no history entry {id}"))?;
            print_entry(&entry);
            for step in &entry.steps {
                print_step(step);
            }
            for scenario in &entry.scenarios {
                println!("\n== {} / {}: {}\n{}", scenario.timeframe, scenario.variant, scenario.title, scenario.content);
            }
        }
        HistoryAction::Delete { id } => history.delete(&id).await,
        HistoryAction::Clear => history.clear().await,
    }
    Ok(())
}
