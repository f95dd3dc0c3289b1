//! Launching kernel processes.
//!
//! A launcher produces a `KernelConnection`: a request sender, an event
//! receiver and a handle to the process behind them. `ProcessLauncher`
//! spawns a child speaking the line protocol on stdio; tests substitute an
//! in-process kernel.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::KernelSpec;
use crate::error::{Error, Result};

use super::protocol::KernelMessage;

/// Channel ends and process handle for one running kernel.
pub struct KernelConnection {
    /// Requests to the kernel.
    pub requests: mpsc::UnboundedSender<KernelMessage>,
    /// Events from the kernel. Closes when the kernel goes away.
    pub events: mpsc::UnboundedReceiver<KernelMessage>,
    /// The process (or task) running the kernel.
    pub process: Box<dyn KernelProcess>,
}

/// Control over a running kernel beyond its message channel.
pub trait KernelProcess: Send {
    /// OS process id, if there is one.
    fn id(&self) -> Option<u32>;

    /// Ask the kernel to abandon its current computation.
    fn interrupt(&mut self) -> Result<()>;

    /// Terminate the kernel immediately. Idempotent.
    fn kill(&mut self);
}

/// Starts kernels. One launcher serves every session of a registry.
pub trait KernelLauncher: Send + Sync {
    /// Launch a kernel and connect to it. Does not wait for readiness.
    fn launch(&self) -> Result<KernelConnection>;
}

/// Launches kernels as child processes.
pub struct ProcessLauncher {
    spec: KernelSpec,
}

impl ProcessLauncher {
    /// Create a launcher for the given command.
    pub fn new(spec: KernelSpec) -> Self {
        Self { spec }
    }

    /// The command this launcher runs.
    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }
}

impl KernelLauncher for ProcessLauncher {
    fn launch(&self) -> Result<KernelConnection> {
        let program = self.spec.resolve_program()?;

        let mut child = Command::new(&program)
            .args(&self.spec.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::KernelStart(format!(
                    "failed to spawn kernel process '{}': {}",
                    program.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::KernelStart("failed to get kernel stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::KernelStart("failed to get kernel stdout".to_string()))?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(forward_requests(request_rx, BufWriter::new(stdin)));
        tokio::spawn(forward_events(BufReader::new(stdout), event_tx, pid));
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(BufReader::new(stderr), pid));
        }

        tracing::debug!(?pid, "Spawned kernel process {}", program.display());

        Ok(KernelConnection {
            requests: request_tx,
            events: event_rx,
            process: Box::new(ChildProcess { child }),
        })
    }
}

/// Write requests to the kernel's stdin, one JSON document per line.
///
/// Ends (closing stdin) when the session drops its sender.
async fn forward_requests(
    mut requests: mpsc::UnboundedReceiver<KernelMessage>,
    mut stdin: BufWriter<tokio::process::ChildStdin>,
) {
    while let Some(message) = requests.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Dropping request: {}", e);
                continue;
            }
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            tracing::debug!("Kernel stdin closed: {}", e);
            break;
        }
    }
}

/// Read protocol lines from the kernel's stdout.
///
/// Ends (closing the event channel) at EOF, which is how the session
/// notices a kernel exit.
async fn forward_events(
    stdout: BufReader<tokio::process::ChildStdout>,
    events: mpsc::UnboundedSender<KernelMessage>,
    pid: Option<u32>,
) {
    let mut lines = stdout.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match KernelMessage::from_line(&line) {
                    Ok(message) => {
                        if events.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(?pid, "Skipping kernel stdout line: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(?pid, "Failed to read kernel stdout: {}", e);
                break;
            }
        }
    }
    tracing::debug!(?pid, "Kernel event stream closed");
}

/// Forward the kernel's stderr to the log.
async fn forward_stderr(stderr: BufReader<tokio::process::ChildStderr>, pid: Option<u32>) {
    let mut lines = stderr.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(?pid, "kernel stderr: {}", line);
    }
}

/// A kernel running as a child process.
struct ChildProcess {
    child: Child,
}

impl KernelProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn interrupt(&mut self) -> Result<()> {
        let pid = self
            .child
            .id()
            .ok_or_else(|| Error::Kernel("kernel process already exited".to_string()))?;

        #[cfg(unix)]
        {
            // SIGINT surfaces as KeyboardInterrupt inside the interpreter
            let rc = unsafe { libc::kill(pid as i32, libc::SIGINT) };
            if rc != 0 {
                return Err(Error::Kernel(format!(
                    "failed to interrupt kernel {}: {}",
                    pid,
                    std::io::Error::last_os_error()
                )));
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            Err(Error::Kernel(format!(
                "interrupting kernel {} is not supported on this platform",
                pid
            )))
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // InvalidInput means the process was already reaped
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill kernel: {}", e);
            }
        }
    }
}
