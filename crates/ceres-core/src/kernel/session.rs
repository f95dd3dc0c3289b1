//! Kernel session: one interpreter process plus its message channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout, timeout_at};

use ceres_ipynb::Output;

use crate::config::EngineConfig;
use crate::error::{Error, Result};

use super::launcher::{KernelConnection, KernelLauncher};
use super::protocol::{KernelEvent, KernelMessage};

/// Lifecycle of a kernel session.
///
/// `Starting → Ready → (Busy ⇄ Ready) → ShuttingDown → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Starting,
    Ready,
    Busy,
    ShuttingDown,
    Stopped,
}

/// One live interpreter process and its channel.
///
/// Not safe for concurrent executions: the channel is shared and events of
/// other correlations are discarded, not queued. Callers serialize access
/// (a `Document` is only reachable through a mutex).
pub struct KernelSession {
    launcher: Arc<dyn KernelLauncher>,
    startup_timeout: Duration,
    interrupt_grace: Duration,
    shutdown_grace: Duration,
    state: KernelState,
    connection: Option<KernelConnection>,
    /// Correlation id of the execution submitted last and not yet idle.
    in_flight: Option<String>,
    restarts: u32,
}

impl KernelSession {
    /// Launch a kernel and wait until it reports ready.
    ///
    /// Fails with `KernelStart` if the process cannot be launched or does
    /// not answer the readiness probe within `startup_timeout`.
    pub async fn start(launcher: Arc<dyn KernelLauncher>, config: &EngineConfig) -> Result<Self> {
        let mut session = Self {
            launcher,
            startup_timeout: config.startup_timeout,
            interrupt_grace: config.interrupt_grace,
            shutdown_grace: config.shutdown_grace,
            state: KernelState::Stopped,
            connection: None,
            in_flight: None,
            restarts: 0,
        };
        session.connect().await?;
        Ok(session)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> KernelState {
        self.state
    }

    /// OS process id of the kernel, if running as a process.
    pub fn pid(&self) -> Option<u32> {
        self.connection.as_ref().and_then(|c| c.process.id())
    }

    /// Number of restarts since the session was created.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = KernelState::Starting;

        let mut connection = match self.launcher.launch() {
            Ok(connection) => connection,
            Err(e) => {
                self.state = KernelState::Stopped;
                return Err(match e {
                    Error::KernelStart(_) => e,
                    other => Error::KernelStart(other.to_string()),
                });
            }
        };

        if let Err(e) = wait_for_ready(&mut connection, self.startup_timeout).await {
            connection.process.kill();
            self.state = KernelState::Stopped;
            return Err(e);
        }

        tracing::info!(pid = ?connection.process.id(), "Kernel ready");
        self.connection = Some(connection);
        self.in_flight = None;
        self.state = KernelState::Ready;
        Ok(())
    }

    /// Send an execute request. Returns its correlation id without waiting.
    pub fn submit(&mut self, code: &str) -> Result<String> {
        match self.state {
            KernelState::Ready | KernelState::Busy => {}
            state => {
                return Err(Error::Kernel(format!(
                    "kernel is not running ({:?}); restart it first",
                    state
                )));
            }
        }

        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| Error::Kernel("kernel has no channel".to_string()))?;

        let request = KernelMessage::execute_request(code);
        let msg_id = request.msg_id().to_string();
        if connection.requests.send(request).is_err() {
            self.mark_exited();
            return Err(Error::Kernel("kernel stopped accepting requests".to_string()));
        }

        if let Some(previous) = self.in_flight.replace(msg_id.clone()) {
            tracing::debug!(previous, "Abandoning unfinished execution");
        }
        self.state = KernelState::Busy;
        tracing::debug!(msg_id, "Submitted execute request");
        Ok(msg_id)
    }

    /// Events of one correlation, ending at its idle status.
    ///
    /// `budget` bounds the whole drain; when it expires the drain yields
    /// `ExecutionTimeout` once and ends.
    pub fn drain(&mut self, msg_id: &str, budget: Option<Duration>) -> Drain<'_> {
        Drain {
            session: self,
            msg_id: msg_id.to_string(),
            budget,
            deadline: budget.map(|b| Instant::now() + b),
            finished: false,
        }
    }

    /// Ask the kernel to abandon its current computation.
    pub fn interrupt(&mut self) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::Kernel("kernel is not running".to_string()))?;
        connection.process.interrupt()
    }

    /// Bring a session back to `Ready` after `msg_id` timed out.
    ///
    /// Interrupts the kernel and waits `interrupt_grace` for the execution
    /// to go idle; restarts the kernel when that fails. Outputs produced
    /// meanwhile are discarded.
    pub async fn recover(&mut self, msg_id: &str) -> Result<()> {
        match self.interrupt() {
            Ok(()) => {
                if self.await_idle(msg_id, self.interrupt_grace).await {
                    tracing::info!(msg_id, "Interrupted timed-out execution");
                    return Ok(());
                }
                tracing::warn!(
                    msg_id,
                    "Kernel ignored interrupt for {:?}, restarting",
                    self.interrupt_grace
                );
            }
            Err(e) => tracing::warn!(msg_id, "Interrupt failed ({}), restarting kernel", e),
        }
        self.restart().await
    }

    async fn await_idle(&mut self, msg_id: &str, grace: Duration) -> bool {
        let mut drain = self.drain(msg_id, Some(grace));
        loop {
            match drain.next().await {
                None => return true,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return false,
            }
        }
    }

    /// Replace the kernel with a fresh one. Interpreter state is lost.
    pub async fn restart(&mut self) -> Result<()> {
        self.shutdown().await;
        self.connect().await?;
        self.restarts += 1;
        tracing::info!(restarts = self.restarts, "Kernel restarted");
        Ok(())
    }

    /// Stop the kernel. Idempotent.
    ///
    /// Sends a shutdown request and closes stdin, waits `shutdown_grace`
    /// for the process to close its output, then kills it.
    pub async fn shutdown(&mut self) {
        let Some(connection) = self.connection.take() else {
            self.state = KernelState::Stopped;
            return;
        };
        self.state = KernelState::ShuttingDown;

        let KernelConnection {
            requests,
            mut events,
            mut process,
        } = connection;
        let pid = process.id();

        let _ = requests.send(KernelMessage::shutdown_request());
        drop(requests);

        let drained = timeout(self.shutdown_grace, async {
            while events.recv().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::debug!(?pid, "Kernel still running after {:?}", self.shutdown_grace);
        }
        process.kill();

        self.in_flight = None;
        self.state = KernelState::Stopped;
        tracing::info!(?pid, "Kernel stopped");
    }

    fn finish(&mut self, msg_id: &str) {
        if self.in_flight.as_deref() == Some(msg_id) {
            self.in_flight = None;
            self.state = KernelState::Ready;
        }
    }

    fn mark_exited(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            tracing::warn!(pid = ?connection.process.id(), "Kernel exited unexpectedly");
            connection.process.kill();
        }
        self.in_flight = None;
        self.state = KernelState::Stopped;
    }
}

impl Drop for KernelSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.process.kill();
        }
    }
}

/// Send the readiness probe and wait for its idle status.
async fn wait_for_ready(connection: &mut KernelConnection, budget: Duration) -> Result<()> {
    let probe = KernelMessage::kernel_info_request();
    let probe_id = probe.msg_id().to_string();
    connection
        .requests
        .send(probe)
        .map_err(|_| Error::KernelStart("kernel closed its input during startup".to_string()))?;

    let deadline = Instant::now() + budget;
    loop {
        let message = match timeout_at(deadline, connection.events.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(Error::KernelStart(
                    "kernel exited during startup".to_string(),
                ));
            }
            Err(_) => {
                return Err(Error::KernelStart(format!(
                    "kernel did not become ready within {:?}",
                    budget
                )));
            }
        };

        if message.parent_id() != Some(probe_id.as_str()) {
            continue;
        }
        if KernelEvent::classify(&message).is_ok_and(|event| event.is_idle()) {
            return Ok(());
        }
    }
}

/// Lazy, finite, non-restartable sequence of one correlation's outputs.
///
/// Events for other correlations are discarded. Status, input and other
/// non-output events are consumed silently. The idle status for this
/// correlation ends the sequence.
pub struct Drain<'a> {
    session: &'a mut KernelSession,
    msg_id: String,
    budget: Option<Duration>,
    deadline: Option<Instant>,
    finished: bool,
}

impl Drain<'_> {
    /// Correlation id being drained.
    pub fn correlation_id(&self) -> &str {
        &self.msg_id
    }

    /// Next output, `None` once the correlation is idle.
    ///
    /// Errors end the sequence: `ExecutionTimeout` when the budget runs
    /// out, `Kernel` when the kernel exits or sends a malformed event.
    pub async fn next(&mut self) -> Option<Result<Output>> {
        if self.finished {
            return None;
        }

        loop {
            let received = {
                let Some(connection) = self.session.connection.as_mut() else {
                    self.finished = true;
                    return Some(Err(Error::Kernel("kernel is not running".to_string())));
                };
                match self.deadline {
                    Some(deadline) => match timeout_at(deadline, connection.events.recv()).await {
                        Ok(received) => received,
                        Err(_) => {
                            self.finished = true;
                            return Some(Err(Error::ExecutionTimeout(
                                self.budget.unwrap_or_default(),
                            )));
                        }
                    },
                    None => connection.events.recv().await,
                }
            };

            let Some(message) = received else {
                self.finished = true;
                self.session.mark_exited();
                return Some(Err(Error::Kernel(
                    "kernel exited while executing".to_string(),
                )));
            };

            if message.parent_id() != Some(self.msg_id.as_str()) {
                tracing::debug!(
                    msg_type = message.msg_type(),
                    parent = ?message.parent_id(),
                    "Discarding event for another execution"
                );
                continue;
            }

            let event = match KernelEvent::classify(&message) {
                Ok(event) => event,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            if event.is_idle() {
                self.finished = true;
                self.session.finish(&self.msg_id);
                return None;
            }
            if let Some(output) = event.into_output() {
                return Some(Ok(output));
            }
        }
    }

    /// Drain to the end, collecting every output.
    pub async fn collect(mut self) -> Result<Vec<Output>> {
        let mut outputs = Vec::new();
        while let Some(output) = self.next().await {
            outputs.push(output?);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedKernel;

    fn config() -> EngineConfig {
        EngineConfig {
            startup_timeout: Duration::from_secs(5),
            interrupt_grace: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(200),
            ..EngineConfig::default()
        }
    }

    async fn start() -> KernelSession {
        KernelSession::start(Arc::new(ScriptedKernel::new()), &config())
            .await
            .unwrap()
    }

    fn texts(outputs: &[Output]) -> Vec<String> {
        outputs.iter().map(Output::text).collect()
    }

    #[tokio::test]
    async fn test_start_reaches_ready() {
        let session = start().await;
        assert_eq!(session.state(), KernelState::Ready);
    }

    #[tokio::test]
    async fn test_submit_then_drain() {
        let mut session = start().await;
        let msg_id = session.submit("2+2").unwrap();
        assert_eq!(session.state(), KernelState::Busy);

        let outputs = session.drain(&msg_id, None).collect().await.unwrap();
        assert_eq!(texts(&outputs), vec!["4"]);
        assert_eq!(session.state(), KernelState::Ready);
    }

    #[tokio::test]
    async fn test_drain_skips_stray_events_of_earlier_execution() {
        let mut session = start().await;

        let first = session.submit("late(\"stale\")").unwrap();
        let first_outputs = session.drain(&first, None).collect().await.unwrap();
        assert!(first_outputs.is_empty());

        let second = session.submit("print(\"fresh\")").unwrap();
        let outputs = session.drain(&second, None).collect().await.unwrap();
        assert_eq!(texts(&outputs), vec!["fresh\n"]);
    }

    #[tokio::test]
    async fn test_drain_is_not_restartable() {
        let mut session = start().await;
        let msg_id = session.submit("1").unwrap();
        let mut drain = session.drain(&msg_id, None);
        assert!(drain.next().await.unwrap().is_ok());
        assert!(drain.next().await.is_none());
        assert!(drain.next().await.is_none());
    }

    #[tokio::test]
    async fn test_timeout_then_interrupt_recovers() {
        let mut session = start().await;
        let msg_id = session.submit("spin()").unwrap();

        let err = session
            .drain(&msg_id, Some(Duration::from_millis(50)))
            .collect()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionTimeout(_)));

        session.recover(&msg_id).await.unwrap();
        assert_eq!(session.state(), KernelState::Ready);
        assert_eq!(session.restarts(), 0);
    }

    #[tokio::test]
    async fn test_timeout_without_interrupt_restarts() {
        let mut session = start().await;
        let msg_id = session.submit("stall()").unwrap();

        let err = session
            .drain(&msg_id, Some(Duration::from_millis(50)))
            .collect()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionTimeout(_)));

        session.recover(&msg_id).await.unwrap();
        assert_eq!(session.state(), KernelState::Ready);
        assert_eq!(session.restarts(), 1);
    }

    #[tokio::test]
    async fn test_restart_loses_interpreter_state() {
        let mut session = start().await;
        let id = session.submit("x = 5").unwrap();
        session.drain(&id, None).collect().await.unwrap();

        session.restart().await.unwrap();

        let id = session.submit("x").unwrap();
        let outputs = session.drain(&id, None).collect().await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(matches!(&outputs[0], Output::Error { ename, .. } if ename == "NameError"));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut session = start().await;
        session.shutdown().await;
        assert_eq!(session.state(), KernelState::Stopped);
        session.shutdown().await;
        assert_eq!(session.state(), KernelState::Stopped);

        let err = session.submit("1").unwrap_err();
        assert!(matches!(err, Error::Kernel(_)));
    }

    #[tokio::test]
    async fn test_kernel_exit_mid_drain() {
        let mut session = start().await;
        let msg_id = session.submit("exit()").unwrap();

        let err = session.drain(&msg_id, None).collect().await.unwrap_err();
        assert!(matches!(err, Error::Kernel(_)));
        assert_eq!(session.state(), KernelState::Stopped);

        session.restart().await.unwrap();
        assert_eq!(session.state(), KernelState::Ready);
    }

    #[tokio::test]
    async fn test_start_fails_when_kernel_never_ready() {
        let config = EngineConfig {
            startup_timeout: Duration::from_millis(50),
            ..config()
        };
        let err = KernelSession::start(Arc::new(ScriptedKernel::unresponsive()), &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::KernelStart(_)));
    }
}
