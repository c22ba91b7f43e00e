//! Strata CLI - validate and run workflow blueprints

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;

use strata::builtin;
use strata::{
    Blueprint, Event, FailurePolicy, Observer, RunCoordinator, RunOptions, RunResult, StrataError,
    Validator,
};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - DAG workflow orchestration runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a blueprint file (compile only)
    Validate {
        /// Path to a YAML or JSON blueprint
        file: String,
    },

    /// Validate and execute a blueprint
    Run {
        /// Path to a YAML or JSON blueprint
        file: String,

        /// Concurrent node executions per level (1..=20)
        #[arg(short = 'p', long, default_value_t = 5)]
        max_parallel: usize,

        /// Failure policy: halt, continue_possible or always
        #[arg(long, default_value = "continue_possible")]
        policy: FailurePolicy,

        /// Whole-run timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Disable the result cache for this run
        #[arg(long)]
        no_cache: bool,

        /// Explicit run id (generated when absent)
        #[arg(long)]
        run_id: Option<String>,

        /// Print lifecycle events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },
}

/// Observer that mirrors the event stream to stderr
struct StderrEvents;

#[async_trait]
impl Observer for StderrEvents {
    async fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        eprintln!("{}", serde_json::to_string(event)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Run {
            file,
            max_parallel,
            policy,
            timeout,
            no_cache,
            run_id,
            events,
        } => run(&file, max_parallel, policy, timeout, no_cache, run_id, events).await,
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{} {}", "Error:".red().bold(), err);
            std::process::exit(2);
        }
    }
}

fn compile(file: &str) -> Result<(strata::Plan, Vec<strata::validate::ValidationWarning>), StrataError> {
    let blueprint = Blueprint::from_file(file)?;
    let report = Validator::new().validate(&blueprint)?;
    Ok((report.plan, report.warnings))
}

fn validate(file: &str) -> Result<i32, StrataError> {
    match compile(file) {
        Ok((plan, warnings)) => {
            for warning in &warnings {
                println!(
                    "{} node '{}': {}",
                    "warning:".yellow().bold(),
                    warning.node_id,
                    warning.message
                );
            }
            println!(
                "{} {} ({} nodes)",
                "Valid:".green().bold(),
                file,
                plan.len()
            );
            Ok(0)
        }
        Err(StrataError::Validation(err)) => {
            eprintln!("{} {}", "Invalid:".red().bold(), file);
            for issue in &err.issues {
                eprintln!("  {} {}", "-".red(), issue);
            }
            Ok(1)
        }
        Err(other) => Err(other),
    }
}

async fn run(
    file: &str,
    max_parallel: usize,
    policy: FailurePolicy,
    timeout: Option<f64>,
    no_cache: bool,
    run_id: Option<String>,
    events: bool,
) -> Result<i32, StrataError> {
    let (plan, warnings) = match compile(file) {
        Ok(compiled) => compiled,
        Err(StrataError::Validation(err)) => {
            eprintln!("{} {}", "Invalid:".red().bold(), file);
            for issue in &err.issues {
                eprintln!("  {} {}", "-".red(), issue);
            }
            return Ok(1);
        }
        Err(other) => return Err(other),
    };
    for warning in &warnings {
        eprintln!(
            "{} node '{}': {}",
            "warning:".yellow().bold(),
            warning.node_id,
            warning.message
        );
    }

    let (registry, _workflows) = builtin::default_registry();
    let coordinator = RunCoordinator::new(registry);

    let mut options = RunOptions::default()
        .with_max_parallel(max_parallel)
        .with_failure_policy(policy);
    if let Some(seconds) = timeout {
        options = options.with_timeout(Duration::from_secs_f64(seconds.max(0.0)));
    }
    if let Some(id) = run_id {
        options = options.with_run_id(id);
    }
    if no_cache {
        options = options.without_cache();
    }
    if events {
        options = options.with_observer(Arc::new(StderrEvents));
    }

    let result = coordinator.run(Arc::new(plan), options).await?;
    print_summary(&result);
    Ok(if result.success { 0 } else { 1 })
}

fn print_summary(result: &RunResult) {
    println!("run {} ({:.2}s)", result.run_id.bold(), result.duration_seconds);

    let mut node_ids: Vec<&String> = result.outputs.keys().collect();
    node_ids.sort();
    for node_id in node_ids {
        let node = &result.outputs[node_id];
        if node.success {
            let cached = if node.metadata.cached { " (cached)" } else { "" };
            println!(
                "  {} {}{} [{:.2}s]",
                "ok".green().bold(),
                node_id,
                cached,
                node.metadata.duration_seconds
            );
        } else {
            println!(
                "  {} {} [{}] {}",
                "fail".red().bold(),
                node_id,
                node.error_kind()
                    .map(|k| k.as_str())
                    .unwrap_or("unknown"),
                node.error.as_deref().unwrap_or("")
            );
        }
    }

    if result.token_stats.total_tokens > 0 {
        println!(
            "  tokens: {}  cost: ${:.4}",
            result.token_stats.total_tokens, result.token_stats.total_cost
        );
    }

    match (&result.error, result.success) {
        (_, true) => println!("{}", "Run succeeded".green().bold()),
        (Some(error), false) => {
            println!("{}", "Run failed".red().bold());
            eprintln!("{}", error);
        }
        (None, false) => println!("{}", "Run failed".red().bold()),
    }
}
