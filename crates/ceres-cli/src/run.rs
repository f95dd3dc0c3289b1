//! Run command implementation for ceres CLI.
//!
//! Opens a notebook, executes its code cells in order and saves the outputs.
//! Stops at the first cell that fails or records an error.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;

use ceres_core::{CellKind, DocumentRegistry, EngineConfig, Output};

use crate::colors;

/// Execute a notebook.
pub async fn execute(notebook: &Path, config: EngineConfig) -> anyhow::Result<()> {
    let registry = DocumentRegistry::new(config);
    let path = registry
        .open(notebook)
        .await
        .with_context(|| format!("Failed to open {}", notebook.display()))?;

    let result = run_cells(&registry, &path).await;
    registry.shutdown_all().await;
    result
}

async fn run_cells(registry: &DocumentRegistry, path: &Path) -> anyhow::Result<()> {
    let start = Instant::now();
    let handle = registry.get(path).await?;
    let mut document = handle.lock().await;

    println!("\n{}Running{} {}", colors::BOLD, colors::RESET, path.display());
    println!("{}", "─".repeat(50));

    let code_cells: Vec<_> = document
        .cells()
        .into_iter()
        .filter(|cell| cell.kind == CellKind::Code)
        .collect();
    if code_cells.is_empty() {
        println!("{}No code cells found in notebook.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }

    for (n, cell) in code_cells.iter().enumerate() {
        println!(
            "{}[{}/{}]{} {}{}{}",
            colors::CYAN,
            n + 1,
            code_cells.len(),
            colors::RESET,
            colors::DIM,
            cell.id,
            colors::RESET
        );

        let executed = document
            .execute_cell(cell.id.as_str())
            .await
            .with_context(|| format!("Cell {} failed", cell.id))?;
        for fragment in &executed.output {
            if fragment.ends_with('\n') {
                print!("{}", fragment);
            } else {
                println!("{}", fragment);
            }
        }

        let raised = document
            .cell(cell.id.as_str())?
            .outputs
            .iter()
            .any(|output| matches!(output, Output::Error { .. }));
        if raised {
            println!("{}✗ Cell {} raised an error{}", colors::RED, cell.id, colors::RESET);
            anyhow::bail!("Cell {} raised an error", cell.id);
        }
    }

    println!("{}", "─".repeat(50));
    println!(
        "{}Completed{} {} cells in {:.2}s",
        colors::GREEN,
        colors::RESET,
        code_cells.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
