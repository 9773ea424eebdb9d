//! Run command implementation for Aster CLI.
//!
//! Loads a notebook with the built-in extensions and executes every
//! executable cell in order.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use aster_core::{
    AbortHandle, CapabilityRegistry, CellOutput, ExecutionOutcome, ExecutionStatus, Scaffold,
};

use crate::colors;

const FORMAT: &str = "json";

/// Execute a notebook.
pub async fn execute(
    notebook_path: &str,
    default_language: Option<String>,
    output_path: Option<&str>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let path = Path::new(notebook_path);
    if !path.exists() {
        anyhow::bail!("Notebook not found: {}", notebook_path);
    }
    let bytes = std::fs::read(path)?;

    let extensions = Arc::new(CapabilityRegistry::new());
    extensions.load_catalog(&aster_server::builtin_catalog()).await;
    let serializer = extensions
        .find_serializer(FORMAT)
        .ok_or_else(|| anyhow::anyhow!("No serializer for format '{}'", FORMAT))?;
    let document = serializer.deserialize(&bytes)?;

    let scaffold = Scaffold::from_document(document, extensions.clone());
    if default_language.is_some() {
        scaffold.set_default_language(default_language);
    }

    println!("\n{}Running{} {}", colors::BOLD, colors::RESET, path.display());
    println!("{}", "─".repeat(50));

    if scaffold.cell_count() == 0 {
        println!("\n{}No cells found in notebook.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }

    let abort = AbortHandle::new();
    let interrupt = abort.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling execution");
            interrupt.abort();
        }
    });

    let outcomes = scaffold.execute_all(&abort).await;
    ctrl_c.abort();
    let outcomes = outcomes?;

    for outcome in &outcomes {
        print_outcome(outcome);
    }

    if let Some(output) = output_path {
        std::fs::write(output, scaffold.export(FORMAT)?)?;
        println!("\n{}Wrote{} {}", colors::DIM, colors::RESET, output);
    }

    scaffold.shutdown().await;
    extensions.unload_all().await;

    let failed = outcomes
        .iter()
        .filter(|o| o.status == ExecutionStatus::Failed)
        .count();
    let cancelled = outcomes.iter().any(ExecutionOutcome::is_cancelled);

    println!("\n{}", "─".repeat(50));
    if cancelled {
        anyhow::bail!("Execution cancelled after {} cell(s)", outcomes.len());
    }
    if failed > 0 {
        anyhow::bail!("{} of {} cell(s) failed", failed, outcomes.len());
    }
    println!(
        "{}Completed{} {} cells in {:.2}s",
        colors::GREEN,
        colors::RESET,
        outcomes.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

fn print_outcome(outcome: &ExecutionOutcome) {
    let (color, label) = match outcome.status {
        ExecutionStatus::Success => (colors::GREEN, "ok"),
        ExecutionStatus::Failed => (colors::RED, "failed"),
        ExecutionStatus::Cancelled => (colors::YELLOW, "cancelled"),
    };
    println!(
        "\n{}[{}]{} {}{}{} {}({:.1}ms){}",
        colors::CYAN,
        outcome.execution_count,
        colors::RESET,
        color,
        label,
        colors::RESET,
        colors::DIM,
        outcome.duration.as_secs_f64() * 1000.0,
        colors::RESET
    );

    for output in &outcome.outputs {
        let Some(text) = output.plain_text() else {
            continue;
        };
        let text = text.trim_end();
        match output {
            CellOutput::Error { .. } => println!("  {}{}{}", colors::RED, text, colors::RESET),
            _ => {
                for line in text.lines() {
                    println!("  {line}");
                }
            }
        }
    }
}
