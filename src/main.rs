//! Command-line entry point for the coding-dependency analysis pipeline.
//!
//! Usage:
//!   llm-coding-analysis coding-dependencies --num-ideas 10
//!   llm-coding-analysis coding-dependencies --working-dir 20250101_120000 --start-step code
//!   llm-coding-analysis coding-dependencies --models openai/gpt-4o,mistralai/mixtral-8x7b

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use llm_coding_analysis::clients::{LlmClient, OpenRouterClient};
use llm_coding_analysis::config::Config;
use llm_coding_analysis::interpreter::Interpreter;
use llm_coding_analysis::pipeline::{
    Coordinator, RunReport, Stage, Target, TargetOutcome, run_targets,
};
use llm_coding_analysis::prompts::PromptSet;
use llm_coding_analysis::store::FileStore;

const TOP_FRAMEWORKS: usize = 10;

#[derive(Parser)]
#[command(name = "llm-coding-analysis")]
#[command(about = "Measure which frameworks LLM-generated code depends on", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate ideas, requirements and code, then rank the frameworks the code uses
    CodingDependencies(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// OpenRouter API key (defaults to OPENROUTER_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Base directory for run outputs
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Working directory name inside the output directory (default: current timestamp)
    #[arg(long)]
    working_dir: Option<String>,
    /// Number of product ideas to generate
    #[arg(long)]
    num_ideas: Option<usize>,
    /// Model to use for a single-target run
    #[arg(long)]
    model: Option<String>,
    /// Comma-separated models; each gets its own subdirectory
    #[arg(long, value_delimiter = ',', conflicts_with = "model")]
    models: Vec<String>,
    /// Stage to start from: 1|ideas, 2|requirements, 3|code, 4|dependencies
    #[arg(long, default_value = "1")]
    start_step: Stage,
    /// Maximum concurrent LLM tasks per stage
    #[arg(long)]
    max_parallel: Option<usize>,
    /// Maximum replies evaluated per LLM interaction
    #[arg(long)]
    retry_budget: Option<u32>,
    /// Tracing filter, e.g. "llm_coding_analysis=debug"
    #[arg(long)]
    log_level: Option<String>,
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::CodingDependencies(args) => coding_dependencies(args).await,
    }
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter)
        .unwrap_or_else(|_| EnvFilter::new("llm_coding_analysis=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(key) = &args.api_key {
        config.runtime.api_key = Some(key.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.output.base_dir = dir.clone();
    }
    if let Some(n) = args.num_ideas {
        config.pipeline.num_ideas = n;
    }
    if let Some(model) = &args.model {
        config.openrouter.default_model = model.clone();
    }
    if let Some(n) = args.max_parallel {
        config.pipeline.max_parallelism = n;
    }
    if let Some(n) = args.retry_budget {
        config.pipeline.retry_budget = n;
    }
    config.validate();
    Ok(config)
}

async fn coding_dependencies(args: RunArgs) -> Result<()> {
    let env_file = llm_coding_analysis::load_env();
    let filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "llm_coding_analysis=info".to_string());
    init_tracing(&filter);
    if let Some(path) = env_file {
        debug!("Loaded environment from {}", path.display());
    }

    let config = load_config(&args)?;
    let working_dir = args
        .working_dir
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());
    let root = FileStore::new(config.output.base_dir.join(&working_dir)).with_filenames(
        config.output.ideas_filename.clone(),
        config.output.dependencies_filename.clone(),
    );
    let prompts = Arc::new(PromptSet::load(config.prompts.dir.as_deref())?);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received: finishing in-flight tasks, dispatching no more");
            signal_token.cancel();
        }
    });

    info!(
        "Run directory {}, starting at {} stage",
        root.root().display(),
        args.start_step
    );

    if args.models.is_empty() {
        let client = OpenRouterClient::new(config.runtime.api_key.clone(), &config.openrouter)?;
        let interpreter = Arc::new(Interpreter::new(
            Arc::new(client),
            prompts,
            config.pipeline.retry_budget,
        ));
        let coordinator =
            Coordinator::new(root, interpreter, config.pipeline.clone(), cancel.clone());
        match coordinator.run(args.start_step).await {
            Ok(report) => {
                print_report(&report);
                Ok(())
            }
            Err(e) => {
                eprintln!("Run FAILED ({}): {}", e.kind(), e);
                Err(e.into())
            }
        }
    } else {
        let mut targets = Vec::with_capacity(args.models.len());
        for model in &args.models {
            let client = OpenRouterClient::new(config.runtime.api_key.clone(), &config.openrouter)?
                .with_model(model.trim());
            targets.push(Target {
                model: client.model().to_string(),
                client: Arc::new(client),
            });
        }

        let runs = run_targets(
            &root,
            targets,
            prompts,
            &config.pipeline,
            args.start_step,
            &cancel,
        )
        .await;

        let mut failed = 0usize;
        for run in &runs {
            println!("=== {} ===", run.model);
            match &run.outcome {
                TargetOutcome::Completed(report) => print_report(report),
                TargetOutcome::Skipped { reason } => println!("skipped: {}", reason),
                TargetOutcome::Failed(e) => {
                    failed += 1;
                    println!("FAILED ({}): {}", e.kind(), e);
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} of {} model run(s) failed", failed, runs.len());
        }
        Ok(())
    }
}

fn print_report(report: &RunReport) {
    println!("Output: {}", report.root.display());
    for stage in &report.stages {
        println!(
            "  {:<13} total={} succeeded={} failed={}",
            stage.stage.to_string(),
            stage.total,
            stage.succeeded,
            stage.failed
        );
        for failure in &stage.failures {
            println!("    - {}", failure);
        }
    }
    let frameworks = report.report.top(TOP_FRAMEWORKS);
    if !frameworks.is_empty() {
        println!("Top frameworks:");
        for (name, count) in frameworks {
            println!("  {:>4}  {}", count, name);
        }
    }
    let models = report.report.top_models(TOP_FRAMEWORKS);
    if !models.is_empty() {
        println!("Top models:");
        for (name, count) in models {
            println!("  {:>4}  {}", count, name);
        }
    }
}
