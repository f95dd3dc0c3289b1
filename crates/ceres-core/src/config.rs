//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::kernel::PYTHON_BRIDGE;

/// Environment variable naming the Python interpreter for the default kernel.
pub const PYTHON_ENV_VAR: &str = "CERES_PYTHON";

/// How to launch an interpreter process.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    /// Program to run. `None` means "find a Python interpreter".
    pub program: Option<PathBuf>,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables for the process.
    pub env: Vec<(String, String)>,
}

impl KernelSpec {
    /// The embedded Python bridge, run by whichever interpreter resolves first.
    pub fn python() -> Self {
        Self {
            program: None,
            args: vec!["-u".to_string(), "-c".to_string(), PYTHON_BRIDGE.to_string()],
            env: Vec::new(),
        }
    }

    /// The embedded Python bridge run by a specific interpreter.
    pub fn python_at(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(interpreter.into()),
            ..Self::python()
        }
    }

    /// An arbitrary command that speaks the kernel protocol on stdio.
    pub fn command(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: Some(program.into()),
            args,
            env: Vec::new(),
        }
    }

    /// Resolve the program path.
    ///
    /// Looks in the following order:
    /// 1. The explicit `program` (as a path, then on `PATH`)
    /// 2. `CERES_PYTHON` environment variable
    /// 3. `python3` on `PATH`
    /// 4. `python` on `PATH`
    pub fn resolve_program(&self) -> Result<PathBuf> {
        if let Some(program) = &self.program {
            if program.exists() {
                return Ok(program.clone());
            }
            return which::which(program).map_err(|e| {
                Error::KernelStart(format!(
                    "kernel program '{}' not found: {}",
                    program.display(),
                    e
                ))
            });
        }

        if let Ok(path) = std::env::var(PYTHON_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
            tracing::warn!(
                "{} points to missing interpreter {}, searching PATH",
                PYTHON_ENV_VAR,
                path.display()
            );
        }

        for candidate in ["python3", "python"] {
            if let Ok(path) = which::which(candidate) {
                return Ok(path);
            }
        }

        Err(Error::KernelStart(format!(
            "could not find a Python interpreter. Set {} or ensure python3 is in PATH.",
            PYTHON_ENV_VAR
        )))
    }
}

impl Default for KernelSpec {
    fn default() -> Self {
        Self::python()
    }
}

/// Engine-wide settings shared by every document.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interpreter command.
    pub kernel: KernelSpec,
    /// Budget for a kernel to report readiness after launch.
    pub startup_timeout: Duration,
    /// Deadline for a single cell execution. `None` waits forever.
    pub execution_timeout: Option<Duration>,
    /// How long recovery waits for idle after interrupting a timed-out cell.
    pub interrupt_grace: Duration,
    /// How long shutdown waits for the process to exit before killing it.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kernel: KernelSpec::default(),
            startup_timeout: Duration::from_secs(30),
            execution_timeout: Some(Duration::from_secs(120)),
            interrupt_grace: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
