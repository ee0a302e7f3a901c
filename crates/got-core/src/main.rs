//! got-analyze - run the video-analysis pipeline from a terminal

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use got_core::{AnalysisConfig, AnalysisOrchestrator, AnalysisResult, AnalysisRun};
use got_kernel::run::RunOutcome;
use got_kernel::StageStatus;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "got-analyze")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Graph-of-Thoughts video analysis: speakers, emotions, claims and biases")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a video file or YouTube link
    Run {
        /// File path or YouTube URL
        reference: String,

        /// TOML configuration file
        #[arg(short, long, env = "GOT_CONFIG")]
        config: Option<PathBuf>,

        /// Use the built-in demo services instead of remote APIs
        #[arg(long)]
        offline: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the stage graph in execution order
    Stages {
        #[arg(long)]
        json: bool,
    },

    /// Report configuration problems and missing API keys
    CheckConfig {
        #[arg(short, long, env = "GOT_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Run {
            reference,
            config,
            offline,
            json,
        } => run(&reference, config, offline, json).await,
        Commands::Stages { json } => {
            stages(json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn run(reference: &str, config: Option<PathBuf>, offline: bool, json: bool) -> Result<ExitCode> {
    let config = AnalysisConfig::load(config.as_deref()).context("loading configuration")?;
    let orchestrator = if offline {
        AnalysisOrchestrator::offline(&config)?
    } else {
        let missing = config.missing_credentials();
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "API keys not configured; stages calling those services will fail");
        }
        AnalysisOrchestrator::from_config(&config)?
    };

    let run = orchestrator.start_run(reference).await?;
    let printer = (!json).then(|| tokio::spawn(print_events(run.clone(), names(&orchestrator))));

    let outcome = tokio::select! {
        outcome = run.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(run = %run.id(), "interrupted, cancelling");
            orchestrator.cancel(run.id())?;
            run.wait().await
        }
    };
    if let Some(printer) = printer {
        printer.await.context("event printer")?;
    }
    orchestrator.reset(run.id());

    match outcome {
        RunOutcome::Succeeded(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(result.as_ref())?);
            } else {
                print_result(&result);
            }
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Failed(err) => {
            tracing::error!(error = %err, "analysis failed");
            for state in run.states().iter().filter(|s| s.status != StageStatus::Completed) {
                eprintln!(
                    "  {:<4} {:<10} {}",
                    state.stage_id,
                    state.status,
                    state.error.as_deref().unwrap_or("")
                );
            }
            Ok(ExitCode::FAILURE)
        }
        RunOutcome::Cancelled => {
            eprintln!("analysis cancelled");
            Ok(ExitCode::from(130))
        }
    }
}

fn names(orchestrator: &AnalysisOrchestrator) -> HashMap<String, String> {
    orchestrator
        .stages()
        .into_iter()
        .map(|def| (def.id.to_string(), def.name))
        .collect()
}

async fn print_events(run: AnalysisRun, names: HashMap<String, String>) {
    let mut events = run.subscribe();
    while let Some(event) = events.next().await {
        let name = names.get(event.stage_id.as_str()).map_or("", String::as_str);
        match (&event.status, &event.error) {
            (StageStatus::Running, _) if event.progress > 0 => {
                println!("{:<4} {name:<24} {:>3}%", event.stage_id, event.progress);
            }
            (status, Some(error)) => println!("{:<4} {name:<24} {status}: {error}", event.stage_id),
            (status, None) => println!("{:<4} {name:<24} {status}", event.stage_id),
        }
    }
}

fn print_result(result: &AnalysisResult) {
    println!();
    println!("{} ({}s)", result.title, result.duration_secs);
    if let Some(summary) = &result.summary {
        println!("\n{summary}");
    }
    println!("\nSpeakers");
    for speaker in &result.speakers {
        println!(
            "  {:<24} {:<10} {:>4}s  {}",
            speaker.name,
            format!("{:?}", speaker.role).to_lowercase(),
            speaker.time_spoken,
            speaker.emotion_profile.dominant
        );
    }
    println!("\nFact checks");
    for check in &result.fact_checks {
        println!("  [{}] {} ({:.0}%)", check.verdict, check.claim, check.confidence * 100.0);
    }
    println!("\nBiases");
    for bias in &result.biases {
        println!("  {} ({:?}, {:.0}%)", bias.kind, bias.severity, bias.confidence * 100.0);
    }
    println!("\nOverall sentiment {:+.2}, processed in {:.1}s", result.overall_sentiment, result.processing_time_secs);
}

fn stages(json: bool) -> Result<()> {
    let orchestrator = AnalysisOrchestrator::offline(&AnalysisConfig::default())?;
    let stages = orchestrator.stages();
    if json {
        println!("{}", serde_json::to_string_pretty(&stages)?);
        return Ok(());
    }
    for def in stages {
        let deps: Vec<&str> = def.depends_on.iter().map(|d| d.as_str()).collect();
        println!(
            "{:<4} {:<24} {:<40} <- {}",
            def.id,
            def.name,
            def.service_label,
            if deps.is_empty() { "-".to_string() } else { deps.join(", ") }
        );
    }
    Ok(())
}

fn check_config(path: Option<PathBuf>) -> Result<ExitCode> {
    let config = match AnalysisConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let missing = config.missing_credentials();
    if missing.is_empty() {
        println!("configuration ok");
        return Ok(ExitCode::SUCCESS);
    }
    for key in missing {
        println!("missing {key}");
    }
    Ok(ExitCode::FAILURE)
}
