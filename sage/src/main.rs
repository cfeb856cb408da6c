use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use sage_core::error::{ErrorNormalizer, RequestMeta};
use sage_core::handler::ChannelExporter;
use sage_core::monitoring::{PerformanceSummary, RegressionAnalyzer};
use sage_core::observability::{init_tracing, session_span};
use sage_core::session::{ContextUpdate, LearningContext, LearningEventType};
use sage_core::{DiagnosticsRuntime, DomainError, Environment, ErrorHandler, SageConfig};

#[derive(Parser)]
#[command(name = "sage")]
#[command(about = "Error diagnostics toolkit for the Sage learning assistant", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Classify an error message and print the response it would produce
    Classify {
        /// Raw error message
        message: String,

        /// Render the response as in production
        #[arg(long)]
        production: bool,

        /// Transport status observed alongside the error
        #[arg(long)]
        status: Option<u16>,
    },
    /// Performance tooling
    Perf {
        #[command(subcommand)]
        command: PerfCommands,
    },
    /// Run a synthetic learning session and print what gets exported
    Demo,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load and validate the configuration
    Check,
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Subcommand)]
enum PerfCommands {
    /// Compare two performance summaries (JSON)
    Regress {
        #[arg(long)]
        baseline: PathBuf,

        #[arg(long)]
        current: PathBuf,

        /// Relative increase counted as a regression
        #[arg(long, default_value = "0.1")]
        threshold: f64,
    },
}

/// An error of unknown origin, as a third-party library might raise it
#[derive(Debug)]
struct RawError(String);

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RawError {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SageConfig::load(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("loading {}", path.display()),
            None => "loading default configuration".to_string(),
        })?;
    init_tracing(&config.observability)?;

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Check => {
                println!(
                    "Configuration OK ({} environment)",
                    config.environment.as_str()
                );
            }
            ConfigCommands::Show => print!("{}", config.to_toml()?),
        },
        Commands::Classify {
            message,
            production,
            status,
        } => classify(config, &message, production, status)?,
        Commands::Perf { command } => match command {
            PerfCommands::Regress {
                baseline,
                current,
                threshold,
            } => regress(&baseline, &current, threshold)?,
        },
        Commands::Demo => demo(config).await?,
    }
    Ok(())
}

fn classify(
    mut config: SageConfig,
    message: &str,
    production: bool,
    status: Option<u16>,
) -> anyhow::Result<()> {
    if production {
        config.environment = Environment::Production;
    }
    let handler_config = config.handler_config();
    let runtime = DiagnosticsRuntime::new(config)?;
    let handler: &ErrorHandler = runtime.handler();

    let error = RawError(message.to_string());
    let meta = RequestMeta::new().with_path("/cli/classify").with_method("CLI");
    let normalized = ErrorNormalizer::new()
        .with_sanitized_messages(handler_config.sanitize_error_messages)
        .normalize(&error, &meta);
    let response = match status {
        Some(status) => handler.handle_with_status(normalized.clone(), &meta, status),
        None => handler.handle_app_error(normalized.clone(), &meta),
    };

    let output = json!({
        "code": normalized.code(),
        "family": normalized.family(),
        "statusCode": normalized.status_code(),
        "retryable": normalized.is_retryable(),
        "captured": response.captured,
        "errorId": response.error_id,
        "response": response.body,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn regress(baseline: &Path, current: &Path, threshold: f64) -> anyhow::Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 {
        bail!("threshold must be a positive number, got {threshold}");
    }
    let read = |path: &Path| -> anyhow::Result<PerformanceSummary> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        PerformanceSummary::from_json(&text)
            .with_context(|| format!("parsing {}", path.display()))
    };
    let report = RegressionAnalyzer::new(threshold).analyze(&read(baseline)?, &read(current)?);

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.has_critical() {
        std::process::exit(2);
    }
    Ok(())
}

async fn demo(mut config: SageConfig) -> anyhow::Result<()> {
    config.environment = Environment::Production;
    let (exporter, mut exported) = ChannelExporter::new(64);
    let runtime = DiagnosticsRuntime::builder(config)
        .exporter(Arc::new(exporter))
        .build()?;
    runtime.start()?;

    run_session(&runtime)
        .instrument(session_span("demo-learner", "demo-session"))
        .await?;

    // Exports run on spawned tasks
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.dispose();
    while let Ok(event) = exported.try_recv() {
        println!("Exported: {}", serde_json::to_string(&event)?);
    }
    println!(
        "Metrics:\n{}",
        serde_json::to_string_pretty(&runtime.metrics().snapshot())?
    );
    Ok(())
}

async fn run_session(runtime: &DiagnosticsRuntime) -> anyhow::Result<()> {
    let sessions = runtime.sessions();
    let monitor = runtime.monitor();

    {
        let load = monitor.measure_session_load("demo-session");
        sessions.set_context(
            LearningContext::new("demo-learner", "demo-session")
                .with_module("fractions")
                .with_learning_style("visual")
                .with_total_lessons(3),
        );
        load.complete();
    }

    for (correct, seconds) in [(true, 12.0), (false, 30.5), (true, 8.2)] {
        let quiz = monitor.measure_quiz_response("q-1");
        sessions.track_event(
            LearningEventType::QuestionAnswered,
            Some(json!({"correct": correct, "timeSpent": seconds})),
        );
        quiz.complete();
    }
    sessions.track_event(LearningEventType::HintUsed, None);
    sessions.track_event(LearningEventType::LessonCompleted, None);
    sessions.update_context(ContextUpdate {
        lesson_id: Some("lesson-2".to_string()),
        ..Default::default()
    })?;

    let mut attempts = 0;
    let hint = runtime
        .retry()
        .run_default("generate_hint", || {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt < 2 {
                    Err(DomainError::network("tutor model busy", Some(503)))
                } else {
                    Ok("Try finding a common denominator first.")
                }
            }
        })
        .await?;
    println!("Hint after {attempts} attempts: {hint}");

    sessions.capture_error(
        DomainError::external_service("speech", "transcription backend unavailable").into(),
        serde_json::Map::new(),
    );
    monitor.record_known("api_response", 850.0);

    if let Some(stats) = sessions.end_session() {
        println!("Session stats:\n{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
