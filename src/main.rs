//! Fusion CLI - Entry Point
//!
//! Commands:
//! - run <agent> <prompt...>: single agent
//! - pipeline <prompt...>: configured agent sequence
//! - route <prompt...>: dispatcher + pattern fallback
//! - promote / patterns / stats / reset: registry and session maintenance

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fusion_orchestrator::agent::builtin::register_builtins;
use fusion_orchestrator::{
    Config, ContextStore, Dispatcher, ExecutionOrchestrator, PatternPromoter, PatternRegistry,
};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "fusion", version, about = "Keyword-routed agent orchestration")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run a single agent")]
    Run {
        agent: String,
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
        /// Tool to hand to the agent (repeatable)
        #[arg(long = "tool")]
        tools: Vec<String>,
    },
    #[command(about = "Run the agent pipeline, feeding each output into the next agent")]
    Pipeline {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
        /// Comma-separated agent sequence (defaults to FUSION_PIPELINE)
        #[arg(long, value_delimiter = ',')]
        agents: Option<Vec<String>>,
    },
    #[command(about = "Dispatch the prompt and execute with pattern fallback")]
    Route {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    #[command(about = "Promote high-scoring history into patterns")]
    Promote {
        #[arg(long)]
        threshold: Option<f64>,
    },
    #[command(about = "Show registered patterns")]
    Patterns {
        #[arg(long)]
        category: Option<String>,
        /// Show the N best-performing patterns
        #[arg(long)]
        top: Option<usize>,
    },
    #[command(about = "Show session statistics")]
    Stats,
    #[command(about = "Clear memory, pattern statistics and shared state")]
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn joined(prompt: &[String]) -> anyhow::Result<String> {
    let prompt = prompt.join(" ").trim().to_string();
    if prompt.is_empty() {
        bail!("empty input");
    }
    Ok(prompt)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging(cli.json_logs || config.log_json)?;
    info!("Fusion v{}", env!("CARGO_PKG_VERSION"));

    let mut registry = PatternRegistry::new().with_default_pattern(&config.default_pattern);
    let library = &config.pattern_library;
    if library.exists() {
        if let Err(e) = registry.load_library(library) {
            warn!("Failed to load pattern library {}: {}", library.display(), e);
        }
    }
    registry.validate().context("invalid pattern configuration")?;

    let dispatcher = match &config.scorecard_path {
        Some(path) => Dispatcher::default().with_scorecard_file(path),
        None => Dispatcher::default(),
    };
    let dispatcher = Arc::new(dispatcher);

    let mut orchestrator = ExecutionOrchestrator::new(config.orchestrator_config(), registry.shared())
        .with_dispatcher(Arc::clone(&dispatcher));
    register_builtins(&mut orchestrator, dispatcher);

    let mut ctx = ContextStore::open(&config.store_path, config.context_config());

    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    match cli.command {
        Commands::Run { agent, prompt, tools } => {
            let prompt = joined(&prompt)?;
            let result = orchestrator.execute_agent(&agent, &prompt, &tools, &mut ctx).await?;
            println!("{}", result.output);
        }
        Commands::Pipeline { prompt, agents } => {
            let prompt = joined(&prompt)?;
            let sequence = agents.unwrap_or_else(|| config.pipeline.clone());
            let result = orchestrator
                .execute_pipeline(&prompt, Some(sequence.as_slice()), &HashMap::new(), &mut ctx)
                .await;

            for stage in &result.stages {
                eprintln!("[{}] {}", stage.state.as_str(), stage.agent);
            }
            println!("{}", result.final_output);
            if let Some(error) = result.error {
                bail!("pipeline failed: {}", error);
            }
        }
        Commands::Route { prompt } => {
            let prompt = joined(&prompt)?;
            let routed = orchestrator.route_and_execute(&prompt, &mut ctx).await?;
            eprintln!(
                "type={} confidence={:.2} agent={} pattern={}",
                routed.decision.prompt_type, routed.decision.confidence, routed.agent, routed.pattern
            );
            println!("{}", routed.result.output);

            if let Err(e) = orchestrator.patterns().read().save_library(library) {
                warn!("Failed to save pattern library {}: {}", library.display(), e);
            }
        }
        Commands::Promote { threshold } => {
            let promoter = PatternPromoter::new(threshold.unwrap_or(config.promotion_threshold));
            let report = promoter.analyze_memory_quality(ctx.entries());
            println!(
                "{} runs, {} promotable, average score {:.2}",
                report.total_runs, report.promotable_runs, report.avg_score
            );

            let patterns = orchestrator.patterns();
            let mut registry = patterns.write();
            let promoted = promoter.promote_from_memory(ctx.entries(), &mut registry);
            for pattern in &promoted {
                println!("promoted {}", pattern.name);
            }
            registry
                .save_library(library)
                .with_context(|| format!("failed to save {}", library.display()))?;
        }
        Commands::Patterns { category, top } => {
            let patterns = orchestrator.patterns();
            let registry = patterns.read();
            match (top, category) {
                (Some(n), _) => {
                    for (pattern, stats) in registry.top_patterns(n) {
                        println!(
                            "{}: {} uses, {:.2} success rate",
                            pattern.name,
                            stats.usage_count,
                            stats.success_rate()
                        );
                    }
                }
                (None, Some(category)) => {
                    for name in registry.list(Some(&category)) {
                        println!("{}", name);
                    }
                }
                (None, None) => println!("{}", registry.summary()),
            }
        }
        Commands::Stats => {
            let stats = orchestrator.stats(&ctx);
            println!("Agents: {}", stats.agents.join(", "));
            println!("Tools: {}", stats.tools.join(", "));
            println!("Patterns: {}", stats.patterns);
            println!("{}", ctx.context_summary());
        }
        Commands::Reset => {
            ctx.clear();
            println!("session cleared");
        }
    }

    Ok(())
}
