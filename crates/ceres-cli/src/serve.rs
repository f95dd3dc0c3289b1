//! Serve command implementation for ceres CLI.

use std::sync::Arc;

use ceres_core::{DocumentRegistry, EngineConfig};
use ceres_server::ServerConfig;

use crate::colors;

/// Start the HTTP server.
pub async fn execute(host: String, port: u16, config: EngineConfig) -> anyhow::Result<()> {
    println!("\n{}ceres server{}", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));

    match config.kernel.resolve_program() {
        Ok(program) => println!(
            "{}  ◆ Kernel:{} {}",
            colors::CYAN,
            colors::RESET,
            program.display()
        ),
        Err(e) => println!("{}  ◆ Kernel:{} {}", colors::YELLOW, colors::RESET, e),
    }
    match config.execution_timeout {
        Some(timeout) => println!(
            "{}  ◆ Timeout:{} {}s per cell",
            colors::CYAN,
            colors::RESET,
            timeout.as_secs()
        ),
        None => println!("{}  ◆ Timeout:{} none", colors::CYAN, colors::RESET),
    }

    let server = ServerConfig { host, port };
    println!(
        "{}  ◆ Server:{} http://{}:{}",
        colors::CYAN,
        colors::RESET,
        server.host,
        server.port
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    let registry = Arc::new(DocumentRegistry::new(config));
    ceres_server::serve(registry, server).await?;

    Ok(())
}
