//! Interpretation Engine - CLI
//!
//! Runs YAML scenarios through the engine and prints the outcomes as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interpretation_engine::batch::{self, BatchReport};
use interpretation_engine::{EngineConfig, Scenario};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "interpret")]
#[command(about = "Search the best interpretation of scenario documents")]
struct Cli {
    /// Engine configuration file (defaults to ./config.yaml if present)
    #[arg(long, global = true, env = "ENGINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the documents of a scenario one after the other
    Run {
        /// Scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Only process the document with this name
        #[arg(short, long)]
        document: Option<String>,

        /// Print every activation with its rounds to stderr
        #[arg(long)]
        dump: bool,
    },

    /// Process all documents of a scenario in parallel
    Batch {
        /// Scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,
    },
}

fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,interpretation_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            scenario,
            document,
            dump,
        } => run(&config, &scenario, document.as_deref(), dump),
        Commands::Batch { scenario } => run_batch(&config, &scenario),
    }
}

fn run(config: &EngineConfig, path: &Path, only: Option<&str>, dump: bool) -> Result<()> {
    let scenario = Scenario::load(path)?;
    let model = Arc::new(scenario.build_model()?);
    tracing::info!(
        "Loaded scenario {} ({} neurons, {} synapses, {} documents)",
        path.display(),
        model.neuron_count(),
        model.synapse_count(),
        scenario.documents.len()
    );

    let mut outcomes = Vec::new();
    for spec in scenario
        .documents
        .iter()
        .filter(|d| only.map_or(true, |name| d.name == name))
    {
        let mut doc = Scenario::build_document(spec, Arc::clone(&model), config.clone())?;
        let outcome = doc
            .process()
            .with_context(|| format!("Document '{}' failed", spec.name))?;
        if dump {
            eprintln!("# {}\n{}", spec.name, doc.activations_to_string(true));
        }
        outcomes.push(outcome);
    }

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}

fn run_batch(config: &EngineConfig, path: &Path) -> Result<()> {
    let scenario = Scenario::load(path)?;
    let items = batch::run_scenario(&scenario, config)?;
    let report = BatchReport::from_items(items);

    tracing::info!(
        "Batch complete: {} documents, {} succeeded, {} failed",
        report.documents,
        report.succeeded,
        report.failed
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
