//! ceres CLI - programmable notebooks backed by a live interpreter.

mod colors;
mod run;
mod serve;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use ceres_core::{EngineConfig, KernelSpec};

#[derive(Parser)]
#[command(name = "ceres")]
#[command(about = "Programmable notebooks backed by a live interpreter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP notebook server
    Serve {
        /// Host address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        #[command(flatten)]
        kernel: KernelArgs,
    },

    /// Execute every code cell of a notebook and save the outputs
    Run {
        /// Path to the notebook (.ipynb file)
        notebook: PathBuf,

        #[command(flatten)]
        kernel: KernelArgs,
    },
}

/// Kernel options shared by all commands.
#[derive(Args)]
struct KernelArgs {
    /// Seconds a cell may run before it is interrupted
    #[arg(long, default_value = "120")]
    timeout: u64,

    /// Let cells run without a deadline
    #[arg(long, conflicts_with = "timeout")]
    no_timeout: bool,

    /// Python interpreter for the kernel (default: $CERES_PYTHON, then python3)
    #[arg(long)]
    python: Option<PathBuf>,
}

impl KernelArgs {
    fn engine_config(&self) -> EngineConfig {
        let kernel = match &self.python {
            Some(python) => KernelSpec::python_at(python),
            None => KernelSpec::python(),
        };
        EngineConfig {
            kernel,
            execution_timeout: (!self.no_timeout).then(|| Duration::from_secs(self.timeout)),
            ..EngineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => tracing::Level::DEBUG,
        (Commands::Serve { .. }, false) => tracing::Level::INFO,
        (Commands::Run { .. }, false) => tracing::Level::WARN,
    };
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { host, port, kernel } => {
            serve::execute(host, port, kernel.engine_config()).await?;
        }

        Commands::Run { notebook, kernel } => {
            run::execute(&notebook, kernel.engine_config()).await?;
        }
    }

    Ok(())
}
