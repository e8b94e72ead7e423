//! `quarry ask`: run one message and print the stream.
//!
//! Model text goes to stdout as it arrives; tool activity and the run
//! summary go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quarry_config::AppConfig;
use quarry_core::message::Message;
use quarry_core::tool::{Credentials, ToolService};
use quarry_orchestrator::{Orchestrator, RunRequest, StreamEvent};
use quarry_providers::OpenAiCompatProvider;
use quarry_tools::HttpToolService;

pub async fn run(
    message: String,
    history: Option<PathBuf>,
    token: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set QUARRY_API_KEY (or OPENAI_API_KEY), or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let history = match history {
        Some(path) => load_history(&path)?,
        None => Vec::new(),
    };
    let credentials = token.map(Credentials::bearer).unwrap_or_default();

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let tools: Arc<dyn ToolService> =
        Arc::new(HttpToolService::from_config(&config.tool_service).await?);
    let orchestrator = Orchestrator::from_config(provider, tools, &config);
    tracing::debug!(
        model = %config.model,
        history_turns = history.len(),
        "Starting run from the command line"
    );

    let request = RunRequest::new(message)
        .with_history(history)
        .with_credentials(credentials);
    let mut rx = orchestrator.run_stream(request);

    let mut stdout = std::io::stdout();
    let mut failed = false;
    while let Some(event) = rx.recv().await {
        match &event {
            StreamEvent::Content { text } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            StreamEvent::Error { .. } => failed = true,
            _ => {}
        }
        if let Some(line) = describe(&event) {
            eprintln!("{line}");
        }
    }
    println!();

    if failed {
        return Err("run failed".into());
    }
    Ok(())
}

/// Read a JSON array of prior turns.
fn load_history(path: &Path) -> Result<Vec<Message>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read history {}: {e}", path.display()))?;
    let turns: Vec<Message> = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid history file {}: {e}", path.display()))?;
    Ok(turns)
}

/// One stderr line for every non-content event.
fn describe(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Content { .. } => None,
        StreamEvent::ToolStarted {
            name,
            parameters,
            duplicate,
            ..
        } => Some(format!(
            "  [tool] {name} {parameters}{}",
            if *duplicate { " (repeat)" } else { "" }
        )),
        StreamEvent::ToolFinished {
            name,
            quality,
            record_count,
            duration_ms,
            error,
            ..
        } => Some(match error {
            Some(error) => format!("  [tool] {name} failed after {duration_ms}ms: {error}"),
            None => format!(
                "  [tool] {name} -> {record_count} records ({}) in {duration_ms}ms",
                quality.as_str()
            ),
        }),
        StreamEvent::Error {
            category,
            message,
            retry_after_secs,
        } => Some(match retry_after_secs {
            Some(secs) => format!("\n  [error:{}] {message} (retry in {secs}s)", category.as_str()),
            None => format!("\n  [error:{}] {message}", category.as_str()),
        }),
        StreamEvent::Done {
            iterations,
            tool_calls_made,
            total_records,
            budget_exhausted,
            ..
        } => Some(format!(
            "\n  [done] {iterations} iteration(s), {tool_calls_made} tool call(s), {total_records} record(s){}",
            if *budget_exhausted { ", budget exhausted" } else { "" }
        )),
    }
}
