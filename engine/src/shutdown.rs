// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Shutdown coordinator
//! Escalation ladder for stopping a managed process: in-band `stop` command,
//! bounded graceful wait, termination signal, bounded wait, forced kill with
//! an unconditional final wait. Timeouts on the early rungs are routine, not
//! errors. The registry entry is removed on every exit path.

use crate::error::StopError;
use crate::registry::{ProcessRegistry, RunningEntry};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

pub const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// The in-band console command a server interprets as a clean shutdown.
const STOP_COMMAND: &[u8] = b"stop\n";

/// Which rung of the ladder achieved exit. Diagnostic only; the contract is
/// identical on all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful,
    Terminated,
    Killed,
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopOutcome::Graceful => write!(f, "graceful"),
            StopOutcome::Terminated => write!(f, "terminated"),
            StopOutcome::Killed => write!(f, "killed"),
        }
    }
}

pub struct ShutdownCoordinator {
    registry: Arc<ProcessRegistry>,
    graceful_timeout: Duration,
    terminate_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self::with_timeouts(registry, GRACEFUL_STOP_TIMEOUT, TERMINATE_TIMEOUT)
    }

    /// Timeouts are injectable so tests do not sit through the production
    /// ladder.
    pub fn with_timeouts(
        registry: Arc<ProcessRegistry>,
        graceful_timeout: Duration,
        terminate_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            graceful_timeout,
            terminate_timeout,
        }
    }

    /// Stop a running server. Exactly one ladder runs per identifier at a
    /// time; a second concurrent call is rejected rather than stacking a
    /// second escalation.
    pub async fn stop(&self, identifier: &str) -> Result<StopOutcome, StopError> {
        let entry = self
            .registry
            .get(identifier)
            .ok_or_else(|| StopError::NotRunning(identifier.to_string()))?;

        if entry.stopping.swap(true, Ordering::SeqCst) {
            return Err(StopError::StopInProgress(identifier.to_string()));
        }

        let outcome = self.run_ladder(identifier, &entry).await;
        // Must run on every exit path, whichever rung got us here.
        self.registry.remove(identifier);
        info!(server = identifier, %outcome, "server stopped");
        Ok(outcome)
    }

    async fn run_ladder(&self, identifier: &str, entry: &RunningEntry) -> StopOutcome {
        let mut child = entry.child.lock().await;

        // Already dead: the monitor may not have observed EOF yet.
        if let Ok(Some(status)) = child.try_wait() {
            debug!(server = identifier, %status, "process already exited");
            return StopOutcome::Graceful;
        }

        // Rung 1: in-band stop. Stdin may already be closed; that is fine
        // and must not abort the ladder.
        if let Some(stdin) = child.stdin.as_mut() {
            if let Err(e) = stdin.write_all(STOP_COMMAND).await {
                debug!(server = identifier, error = %e, "stop command write failed");
            } else if let Err(e) = stdin.flush().await {
                debug!(server = identifier, error = %e, "stop command flush failed");
            }
        }
        if timeout(self.graceful_timeout, child.wait()).await.is_ok() {
            return StopOutcome::Graceful;
        }

        // Rung 2: termination signal.
        warn!(
            server = identifier,
            timeout_secs = self.graceful_timeout.as_secs(),
            "graceful stop timed out, sending terminate signal"
        );
        send_terminate(identifier, &mut child, entry.pid);
        if timeout(self.terminate_timeout, child.wait()).await.is_ok() {
            return StopOutcome::Terminated;
        }

        // Rung 3: forced kill. This wait is unconditional and must not fail.
        warn!(
            server = identifier,
            timeout_secs = self.terminate_timeout.as_secs(),
            "terminate timed out, killing"
        );
        if let Err(e) = child.kill().await {
            warn!(server = identifier, error = %e, "kill failed, waiting anyway");
        }
        let _ = child.wait().await;
        // The pipes are dead; no point leaving the monitor to linger.
        if let Some(handle) = entry.monitor.get() {
            handle.abort();
        }
        StopOutcome::Killed
    }
}

#[cfg(unix)]
fn send_terminate(identifier: &str, _child: &mut Child, pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(server = identifier, pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(windows)]
fn send_terminate(identifier: &str, child: &mut Child, pid: u32) {
    // No SIGTERM equivalent; TerminateProcess is the only escalation.
    if let Err(e) = child.start_kill() {
        warn!(server = identifier, pid, error = %e, "failed to terminate process");
    }
}
