//! Worker process lifecycle management
//!
//! Launches every manifest entry in order, completes the MCP handshake and
//! registers the worker. Each worker gets a supervisor task that owns the
//! child process: it notices unsolicited exits and performs the graceful
//! shutdown sequence (close stdin, SIGTERM, wait, kill) when asked to stop.

use super::error::StartupError;
use super::handle::WorkerHandle;
use super::registry::SessionRegistry;
use crate::config::OrchestratorConfig;
use crate::{Error, Result, StartupPolicy};
use parking_lot::Mutex;
use reppo_core::{Manifest, ManifestEntry};
use reppo_mcp::client::McpClient;
use reppo_mcp::protocol::ClientInfo;
use reppo_mcp::transport::TransportFactory;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Extra time a supervisor gets beyond the grace period before it is aborted
const STOP_MARGIN: Duration = Duration::from_secs(1);

/// Client name announced to workers during the handshake
pub const CLIENT_NAME: &str = "reppo-orchestrator";

/// Timing and policy knobs for the lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
    pub startup_policy: StartupPolicy,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
            startup_policy: StartupPolicy::FailFast,
        }
    }
}

impl From<&OrchestratorConfig> for LifecycleOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            shutdown_grace: config.shutdown_grace(),
            startup_policy: config.startup_policy,
        }
    }
}

struct Supervisor {
    handle: Arc<WorkerHandle>,
    stop_tx: oneshot::Sender<Duration>,
    task: JoinHandle<()>,
}

/// Starts, supervises and stops worker processes
pub struct LifecycleManager {
    registry: Arc<SessionRegistry>,
    options: LifecycleOptions,
    supervisors: Mutex<Vec<Supervisor>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl LifecycleManager {
    pub fn new(registry: Arc<SessionRegistry>, options: LifecycleOptions) -> Self {
        Self {
            registry,
            options,
            supervisors: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    /// Number of workers with a live supervisor
    pub fn supervised(&self) -> usize {
        self.supervisors.lock().len()
    }

    /// Launch every manifest entry, in manifest order
    ///
    /// Under [`StartupPolicy::FailFast`] the first failure stops every worker
    /// launched so far and empties the registry before the error is returned.
    /// A manager that has been stopped never launches anything again; a
    /// `stop` that lands mid-startup ends the startup with an error.
    pub async fn start(&self, manifest: &Manifest) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Configuration(
                "Orchestrator has already been stopped".to_string(),
            ));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::Configuration(
                "Orchestrator has already been started".to_string(),
            ));
        }
        manifest.validate()?;

        info!("Starting {} workers", manifest.len());
        for entry in manifest {
            if self.stopped.load(Ordering::Acquire) {
                return Err(Error::Configuration(
                    "Orchestrator stopped during startup".to_string(),
                ));
            }
            if let Err(e) = self.launch(entry).await {
                if self.stopped.load(Ordering::Acquire) {
                    return Err(e);
                }
                match self.options.startup_policy {
                    StartupPolicy::FailFast => {
                        error!("Startup failed, stopping launched workers: {}", e);
                        self.stop().await;
                        for handle in self.registry.list() {
                            self.registry.unregister(handle.identity());
                        }
                        return Err(e);
                    }
                    StartupPolicy::SkipFailed => {
                        warn!(identity = %entry.identity, "Skipping worker: {}", e);
                    }
                }
            }
        }

        info!(
            "Startup complete: {} of {} workers ready",
            self.supervised(),
            manifest.len()
        );
        Ok(())
    }

    async fn launch(&self, entry: &ManifestEntry) -> Result<()> {
        let identity = entry.identity.clone();
        info!(identity = %identity, "Launching worker: {}", entry.command_line());

        let mut command = Command::new(&entry.command);
        command
            .args(&entry.args)
            .envs(&entry.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &entry.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| StartupError::Spawn {
            identity: identity.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let pipes = child.stdin.take().zip(child.stdout.take());
        let Some((stdin, stdout)) = pipes else {
            return Err(StartupError::Spawn {
                identity,
                reason: "worker stdio was not captured".to_string(),
            }
            .into());
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(identity.clone(), stderr));
        }

        let client = McpClient::connect(TransportFactory::child(stdin, stdout), identity.clone());
        let handle = Arc::new(WorkerHandle::new(entry, pid, client));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(
            child,
            handle.clone(),
            stop_rx,
            self.options.shutdown_grace,
        ));
        let supervisor = Supervisor {
            handle: handle.clone(),
            stop_tx,
            task,
        };

        let client_info = ClientInfo {
            name: CLIENT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let handshake_timeout = self.options.handshake_timeout;
        let timed_out = || StartupError::HandshakeTimeout {
            identity: identity.clone(),
            timeout_ms: handshake_timeout.as_millis() as u64,
        };
        let outcome = match timeout(
            handshake_timeout,
            handle.handshake(client_info, handshake_timeout),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_timeout() => Err(timed_out()),
            Ok(Err(e)) => Err(StartupError::Handshake {
                identity: identity.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(timed_out()),
        };

        if let Err(e) = outcome {
            terminate(supervisor, self.options.shutdown_grace).await;
            return Err(e.into());
        }
        if let Err(e) = self.registry.register(handle) {
            terminate(supervisor, self.options.shutdown_grace).await;
            return Err(e.into());
        }

        // checked under the lock so a concurrent stop either sees this
        // supervisor or we see the stop
        let rejected = {
            let mut supervisors = self.supervisors.lock();
            if self.stopped.load(Ordering::Acquire) {
                Some(supervisor)
            } else {
                supervisors.push(supervisor);
                None
            }
        };
        if let Some(supervisor) = rejected {
            warn!(identity = %identity, "Stopped during startup, terminating worker");
            self.registry.unregister(&identity);
            terminate(supervisor, self.options.shutdown_grace).await;
            return Err(Error::Configuration(format!(
                "Orchestrator stopped while starting '{}'",
                identity
            )));
        }
        Ok(())
    }

    /// Stop every worker in reverse start order
    ///
    /// Idempotent; failures are logged and never abort the remaining stops.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Lifecycle manager already stopped");
            return;
        }

        let supervisors = std::mem::take(&mut *self.supervisors.lock());
        info!("Stopping {} workers", supervisors.len());
        for supervisor in supervisors.into_iter().rev() {
            terminate(supervisor, self.options.shutdown_grace).await;
        }
        info!("All workers stopped");
    }
}

/// Ask a supervisor to stop its worker and wait for it
async fn terminate(supervisor: Supervisor, grace: Duration) {
    let Supervisor {
        handle,
        stop_tx,
        mut task,
    } = supervisor;

    // fails only when the supervisor already finished
    let _ = stop_tx.send(grace);

    match timeout(grace + STOP_MARGIN, &mut task).await {
        Ok(Ok(())) => debug!(identity = %handle.identity(), "Supervisor finished"),
        Ok(Err(e)) => warn!(identity = %handle.identity(), "Supervisor failed: {}", e),
        Err(_) => {
            warn!(identity = %handle.identity(), "Supervisor hung, aborting");
            task.abort();
        }
    }
    handle.mark_terminated("stopped");
}

async fn supervise(
    mut child: Child,
    handle: Arc<WorkerHandle>,
    stop_rx: oneshot::Receiver<Duration>,
    default_grace: Duration,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => warn!(identity = %handle.identity(), "Worker exited unexpectedly: {}", status),
                Err(e) => error!(identity = %handle.identity(), "Failed to wait on worker: {}", e),
            }
            handle.mark_terminated("process exited");
            handle.client().close().await;
        }
        grace = stop_rx => {
            shutdown_child(&mut child, &handle, grace.unwrap_or(default_grace)).await;
        }
    }
}

async fn shutdown_child(child: &mut Child, handle: &WorkerHandle, grace: Duration) {
    debug!(identity = %handle.identity(), "Shutting down worker");
    handle.client().close().await;
    send_terminate(child);

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(identity = %handle.identity(), "Worker exited: {}", status),
        Ok(Err(e)) => warn!(identity = %handle.identity(), "Failed to wait on worker: {}", e),
        Err(_) => {
            warn!(
                identity = %handle.identity(),
                "Worker did not exit within {}ms, killing",
                grace.as_millis()
            );
            if let Err(e) = child.kill().await {
                error!(identity = %handle.identity(), "Failed to kill worker: {}", e);
            }
        }
    }
    handle.mark_terminated("stopped");
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: the pid belongs to our child, which has not been reaped yet
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!("SIGTERM to pid {} failed", pid);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child) {}

async fn forward_stderr(identity: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(identity = %identity, "stderr: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(identity = %identity, "stderr read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn manager(policy: StartupPolicy) -> (Arc<SessionRegistry>, LifecycleManager) {
        let registry = Arc::new(SessionRegistry::new());
        let options = LifecycleOptions {
            handshake_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_millis(500),
            startup_policy: policy,
        };
        (registry.clone(), LifecycleManager::new(registry, options))
    }

    #[tokio::test]
    async fn test_spawn_failure_is_startup_error() {
        let (registry, manager) = manager(StartupPolicy::FailFast);
        let manifest = Manifest::new(vec![ManifestEntry::new(
            "ghost",
            "/nonexistent/reppo-worker-binary",
            vec![],
        )])
        .unwrap();

        let err = manager.start(&manifest).await.unwrap_err();
        assert_matches!(
            err,
            Error::Startup(StartupError::Spawn { ref identity, .. }) if identity == "ghost"
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_skip_failed_continues() {
        let (registry, manager) = manager(StartupPolicy::SkipFailed);
        let manifest = Manifest::new(vec![ManifestEntry::new(
            "ghost",
            "/nonexistent/reppo-worker-binary",
            vec![],
        )])
        .unwrap();

        manager.start(&manifest).await.unwrap();
        assert!(registry.is_empty());
        assert_eq!(manager.supervised(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_mcp_process_fails_handshake() {
        let (registry, manager) = manager(StartupPolicy::FailFast);
        let manifest =
            Manifest::new(vec![ManifestEntry::new("silent", "true", vec![])]).unwrap();

        let err = manager.start(&manifest).await.unwrap_err();
        assert_matches!(
            err,
            Error::Startup(ref e) if e.identity() == "silent"
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (_, manager) = manager(StartupPolicy::FailFast);
        manager.start(&Manifest::default()).await.unwrap();
        assert_matches!(
            manager.start(&Manifest::default()).await,
            Err(Error::Configuration(_))
        );
        manager.stop().await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_start_after_stop_rejected() {
        let (registry, manager) = manager(StartupPolicy::SkipFailed);
        manager.stop().await;

        let manifest = Manifest::new(vec![ManifestEntry::new("late", "true", vec![])]).unwrap();
        assert_matches!(manager.start(&manifest).await, Err(Error::Configuration(_)));
        assert!(registry.is_empty());
        assert_eq!(manager.supervised(), 0);
    }
}
