// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Port conflict resolution
//! Builds the who-holds-this-port report and exposes the two remediation
//! actions: kill the occupying process, or move the managed server to a new
//! free port and persist the change. The occupant belongs to some other
//! application, so killing it mirrors the shutdown ladder but over a bare
//! PID, and permission refusals surface distinctly.

use crate::config;
use crate::error::{KillError, ReassignError};
use crate::probe::{GameServerProcess, PortOccupant, PortProbe};
use crate::store::ServerStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// How long to wait for the occupant after the polite signal, then after
/// the forced kill.
const OCCUPANT_TERM_TIMEOUT: Duration = Duration::from_secs(5);
const OCCUPANT_KILL_TIMEOUT: Duration = Duration::from_secs(3);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Everything known about a contended port at the moment of the query.
/// Built fresh each time; the state it reflects is transient by nature.
#[derive(Debug, Clone, Serialize)]
pub struct PortConflictReport {
    pub port: u16,
    pub occupying_process: Option<PortOccupant>,
    pub candidate_listeners: Vec<GameServerProcess>,
}

pub struct ConflictResolver {
    probe: Arc<dyn PortProbe>,
    store: Arc<ServerStore>,
}

impl ConflictResolver {
    pub fn new(probe: Arc<dyn PortProbe>, store: Arc<ServerStore>) -> Self {
        Self { probe, store }
    }

    /// Assemble the conflict context for `port`. Never fails; whatever the
    /// OS refuses to reveal is simply absent from the report.
    pub async fn build_report(&self, port: u16) -> PortConflictReport {
        let occupying_process = self.probe.identify_occupant(port).await;
        let candidate_listeners = self.probe.list_game_server_processes().await;
        PortConflictReport {
            port,
            occupying_process,
            candidate_listeners,
        }
    }

    /// Terminate the process named in the report, escalating politely:
    /// terminate signal, bounded wait, forced kill, bounded wait.
    pub async fn kill_occupant(&self, report: &PortConflictReport) -> Result<(), KillError> {
        let occupant = report.occupying_process.as_ref().ok_or(KillError::NoPidKnown)?;
        let pid = occupant.pid;

        info!(pid, port = report.port, "terminating port occupant");
        if signal_pid(pid, false)? {
            // Already gone before we signalled.
            return Ok(());
        }
        if wait_for_exit(pid, OCCUPANT_TERM_TIMEOUT).await {
            info!(pid, "occupant exited after terminate signal");
            return Ok(());
        }

        warn!(pid, "occupant ignored terminate signal, killing");
        if signal_pid(pid, true)? {
            return Ok(());
        }
        if wait_for_exit(pid, OCCUPANT_KILL_TIMEOUT).await {
            return Ok(());
        }
        Err(KillError::StillAlive(pid))
    }

    /// Move `identifier` to the next free port above `from_port`: persist
    /// the new port in the server list and patch the properties file in
    /// place when one exists.
    pub async fn reassign_port(
        &self,
        identifier: &str,
        from_port: u16,
    ) -> Result<u16, ReassignError> {
        let start = from_port.saturating_add(1);
        let new_port = self
            .probe
            .find_free_port(start)
            .await
            .ok_or(ReassignError::NoFreePortFound {
                start,
                attempts: crate::probe::PORT_SCAN_ATTEMPTS,
            })?;

        let server = self.store.get(identifier);
        self.store.update_port(identifier, new_port)?;
        if let Some(server) = server {
            config::rewrite_properties_port(&server.working_dir, new_port)
                .map_err(ReassignError::Properties)?;
        }

        info!(server = identifier, from_port, new_port, "port reassigned");
        Ok(new_port)
    }
}

/// Send the terminate (or kill) signal to a foreign PID. Returns Ok(true)
/// when the process was already gone. Permission refusals map to their own
/// error so a caller can suggest re-running elevated.
#[cfg(unix)]
fn signal_pid(pid: u32, force: bool) -> Result<bool, KillError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(false),
        Err(Errno::ESRCH) => Ok(true),
        Err(Errno::EPERM) => Err(KillError::PermissionDenied(pid)),
        Err(e) => Err(KillError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}

#[cfg(windows)]
fn signal_pid(pid: u32, force: bool) -> Result<bool, KillError> {
    // taskkill without /F asks politely; with /F it terminates outright.
    let mut cmd = std::process::Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string()]);
    if force {
        cmd.arg("/F");
    }
    let output = cmd.output().map_err(|e| KillError::Signal {
        pid,
        message: e.to_string(),
    })?;
    if output.status.success() {
        return Ok(false);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("Access is denied") {
        return Err(KillError::PermissionDenied(pid));
    }
    if stderr.contains("not found") {
        return Ok(true);
    }
    Err(KillError::Signal {
        pid,
        message: stderr.trim().to_string(),
    })
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(windows)]
fn pid_is_alive(pid: u32) -> bool {
    let mut system = sysinfo::System::new();
    system.refresh_process(sysinfo::Pid::from_u32(pid))
}

/// Poll until the PID is gone or the deadline passes.
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !pid_is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MockPortProbe;

    fn make_resolver(probe: MockPortProbe) -> ConflictResolver {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ServerStore::load(dir.path().join("servers.json")).unwrap());
        ConflictResolver::new(Arc::new(probe), store)
    }

    #[tokio::test]
    async fn test_build_report_with_unknown_occupant() {
        let mut probe = MockPortProbe::new();
        probe.expect_identify_occupant().returning(|_| None);
        probe
            .expect_list_game_server_processes()
            .returning(Vec::new);

        let resolver = make_resolver(probe);
        let report = resolver.build_report(25565).await;
        assert_eq!(report.port, 25565);
        assert!(report.occupying_process.is_none());
        assert!(report.candidate_listeners.is_empty());
    }

    #[tokio::test]
    async fn test_kill_occupant_requires_pid() {
        let probe = MockPortProbe::new();
        let resolver = make_resolver(probe);
        let report = PortConflictReport {
            port: 25565,
            occupying_process: None,
            candidate_listeners: Vec::new(),
        };
        assert!(matches!(
            resolver.kill_occupant(&report).await,
            Err(KillError::NoPidKnown)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_occupant_terminates_real_process() {
        let mut child = std::process::Command::new("/bin/sleep")
            .arg("300")
            .spawn()
            .unwrap();
        let pid = child.id();
        // Reap on exit so the PID does not linger as a zombie, which would
        // keep pid_is_alive true forever.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        let probe = MockPortProbe::new();
        let resolver = make_resolver(probe);
        let report = PortConflictReport {
            port: 25565,
            occupying_process: Some(PortOccupant {
                pid,
                process_name: "sleep".to_string(),
                command_line: "/bin/sleep 300".to_string(),
            }),
            candidate_listeners: Vec::new(),
        };

        resolver.kill_occupant(&report).await.unwrap();
        assert!(wait_for_exit(pid, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_reassign_port_no_free_port() {
        let mut probe = MockPortProbe::new();
        probe.expect_find_free_port().returning(|_| None);

        let resolver = make_resolver(probe);
        assert!(matches!(
            resolver.reassign_port("alpha", 25565).await,
            Err(ReassignError::NoFreePortFound { start: 25566, .. })
        ));
    }
}
