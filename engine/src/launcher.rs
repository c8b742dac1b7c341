// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process launcher
//! Locates the runnable jar, runs the pre-flight port probe, spawns the
//! child with stdin writable and both output pipes captured, and hands the
//! streams to the output monitor. The pre-flight probe is advisory: a bind
//! race after it is caught by the monitor's signature scan.

use crate::config::{self, ManagedServer, FALLBACK_JAR};
use crate::conflict::ConflictResolver;
use crate::error::StartError;
use crate::monitor::{self, EventSender};
use crate::probe::PortProbe;
use crate::registry::{ProcessRegistry, RunningEntry};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

/// Returned by a successful start. Purely informational; all control goes
/// through the registry by identifier.
#[derive(Debug, Clone, Serialize)]
pub struct ServerHandle {
    pub identifier: String,
    pub pid: u32,
    pub port: u16,
}

pub struct ProcessLauncher {
    registry: Arc<ProcessRegistry>,
    probe: Arc<dyn PortProbe>,
    resolver: Arc<ConflictResolver>,
}

impl ProcessLauncher {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        probe: Arc<dyn PortProbe>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self {
            registry,
            probe,
            resolver,
        }
    }

    /// Start a managed server. Fails fast on a duplicate identifier, a
    /// missing artifact or an occupied port; nothing is spawned on any
    /// failure path.
    pub async fn start(
        &self,
        server: &ManagedServer,
        events: EventSender,
    ) -> Result<ServerHandle, StartError> {
        self.registry.reserve(&server.identifier)?;
        match self.prepare_and_spawn(server, events).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.registry.release(&server.identifier);
                Err(e)
            }
        }
    }

    async fn prepare_and_spawn(
        &self,
        server: &ManagedServer,
        events: EventSender,
    ) -> Result<ServerHandle, StartError> {
        let jar = locate_server_jar(server)?;

        // Pre-flight check. Cheap to detect and cheap to recover from here,
        // since no process has been spawned yet.
        if self.probe.is_port_occupied(server.port).await {
            let report = self.resolver.build_report(server.port).await;
            return Err(StartError::PortConflict(Box::new(report)));
        }

        config::write_default_properties(server).map_err(|source| StartError::Properties {
            path: server.properties_path(),
            source,
        })?;

        let args = build_command_args(server, &jar);
        debug!(server = %server.identifier, command = %server.java_path, ?args, "launching");

        let mut child = Command::new(&server.java_path)
            .args(&args)
            .current_dir(&server.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| StartError::Spawn {
                command: server.java_path.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child = Arc::new(tokio::sync::Mutex::new(child));

        let entry = RunningEntry {
            pid,
            bound_port: server.port,
            started_at: Instant::now(),
            child: Arc::clone(&child),
            monitor: Arc::new(OnceLock::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        };
        let monitor_slot = Arc::clone(&entry.monitor);
        self.registry.activate(&server.identifier, entry);

        let handle = monitor::spawn_monitor(
            Arc::clone(&self.registry),
            server.identifier.clone(),
            server.port,
            stdout,
            stderr,
            child,
            events,
        );
        let _ = monitor_slot.set(handle.abort_handle());

        info!(
            server = %server.identifier,
            pid,
            port = server.port,
            jar = %jar,
            "server started"
        );
        Ok(ServerHandle {
            identifier: server.identifier.clone(),
            pid,
            port: server.port,
        })
    }
}

/// Pick the runnable jar for the server's type from the jars actually in
/// the working directory, falling back to the conventional `server.jar`.
/// The error carries everything found, for the caller's diagnostics.
fn locate_server_jar(server: &ManagedServer) -> Result<String, StartError> {
    let candidates = list_jars(&server.working_dir);

    if let Some(jar) = candidates
        .iter()
        .find(|name| server.server_type.matches_jar(&name.to_lowercase()))
    {
        return Ok(jar.clone());
    }
    if candidates.iter().any(|name| name == FALLBACK_JAR) {
        return Ok(FALLBACK_JAR.to_string());
    }
    Err(StartError::ArtifactNotFound {
        dir: server.working_dir.clone(),
        expected: FALLBACK_JAR.to_string(),
        candidates,
    })
}

fn list_jars(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut jars: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".jar"))
        .collect();
    jars.sort();
    jars
}

/// Full argument vector after the interpreter: memory flags, the fixed
/// per-type flag table, then `-jar <artifact> nogui`.
fn build_command_args(server: &ManagedServer, jar: &str) -> Vec<String> {
    let mut args = vec![
        format!("-Xmx{}", server.memory),
        format!("-Xms{}", server.memory),
    ];
    args.extend(server.server_type.jvm_flags().iter().map(|f| f.to_string()));
    args.push("-jar".to_string());
    args.push(jar.to_string());
    args.push("nogui".to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerType;
    use crate::probe::MockPortProbe;
    use crate::store::ServerStore;
    use tokio::sync::mpsc;

    fn make_server(dir: &Path, ty: ServerType) -> ManagedServer {
        ManagedServer {
            identifier: "alpha".to_string(),
            server_type: ty,
            version: "1.21.1".to_string(),
            port: 25565,
            memory: "2G".to_string(),
            java_path: "java".to_string(),
            working_dir: dir.to_path_buf(),
            gamemode: "survival".to_string(),
            difficulty: "normal".to_string(),
        }
    }

    fn make_launcher(probe: MockPortProbe, dir: &Path) -> (ProcessLauncher, Arc<ProcessRegistry>) {
        let registry = Arc::new(ProcessRegistry::new());
        let probe: Arc<dyn PortProbe> = Arc::new(probe);
        let store = Arc::new(ServerStore::load(dir.join("servers.json")).unwrap());
        let resolver = Arc::new(ConflictResolver::new(Arc::clone(&probe), store));
        (
            ProcessLauncher::new(Arc::clone(&registry), probe, resolver),
            registry,
        )
    }

    #[test]
    fn test_build_command_args_vanilla() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path(), ServerType::Vanilla);
        assert_eq!(
            build_command_args(&server, "server.jar"),
            vec!["-Xmx2G", "-Xms2G", "-jar", "server.jar", "nogui"]
        );
    }

    #[test]
    fn test_build_command_args_fabric() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path(), ServerType::Fabric);
        assert_eq!(
            build_command_args(&server, "fabric-server-launch.jar"),
            vec![
                "-Xmx2G",
                "-Xms2G",
                "-Dfabric.systemLibDir=fabric-server-libraries",
                "-DFabricMcEmu=net.minecraft.server.MinecraftServer",
                "-jar",
                "fabric-server-launch.jar",
                "nogui"
            ]
        );
    }

    #[test]
    fn test_locate_server_jar_prefers_type_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.jar"), b"").unwrap();
        std::fs::write(dir.path().join("forge-1.20.1-47.2.0.jar"), b"").unwrap();
        std::fs::write(dir.path().join("forge-1.20.1-installer.jar"), b"").unwrap();

        let forge = make_server(dir.path(), ServerType::Forge);
        assert_eq!(locate_server_jar(&forge).unwrap(), "forge-1.20.1-47.2.0.jar");

        let vanilla = make_server(dir.path(), ServerType::Vanilla);
        assert_eq!(locate_server_jar(&vanilla).unwrap(), "server.jar");
    }

    #[test]
    fn test_locate_server_jar_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path(), ServerType::Vanilla);
        match locate_server_jar(&server) {
            Err(StartError::ArtifactNotFound { candidates, .. }) => {
                assert!(candidates.is_empty());
            }
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_fails_preflight_on_occupied_port() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.jar"), b"").unwrap();

        let mut probe = MockPortProbe::new();
        probe.expect_is_port_occupied().returning(|_| true);
        probe.expect_identify_occupant().returning(|_| None);
        probe
            .expect_list_game_server_processes()
            .returning(Vec::new);

        let (launcher, registry) = make_launcher(probe, dir.path());
        let server = make_server(dir.path(), ServerType::Vanilla);
        let (tx, _rx) = mpsc::channel(16);

        match launcher.start(&server, tx).await {
            Err(StartError::PortConflict(report)) => {
                assert_eq!(report.port, 25565);
                assert!(report.occupying_process.is_none());
            }
            other => panic!("expected PortConflict, got {other:?}"),
        }
        // Nothing spawned, nothing registered, and the slot is free again.
        assert!(!registry.is_running("alpha"));
        registry.reserve("alpha").unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = MockPortProbe::new();
        // The artifact check runs before the probe; no expectations needed.
        probe.expect_is_port_occupied().never();

        let (launcher, registry) = make_launcher(probe, dir.path());
        let server = make_server(dir.path(), ServerType::Vanilla);
        let (tx, _rx) = mpsc::channel(16);

        assert!(matches!(
            launcher.start(&server, tx).await,
            Err(StartError::ArtifactNotFound { .. })
        ));
        assert!(!registry.is_running("alpha"));
    }

    #[tokio::test]
    async fn test_start_rejects_duplicate_identifier() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.jar"), b"").unwrap();

        let mut probe = MockPortProbe::new();
        probe.expect_is_port_occupied().never();

        let (launcher, registry) = make_launcher(probe, dir.path());
        registry.reserve("alpha").unwrap();

        let server = make_server(dir.path(), ServerType::Vanilla);
        let (tx, _rx) = mpsc::channel(16);
        assert!(matches!(
            launcher.start(&server, tx).await,
            Err(StartError::AlreadyRunning(_))
        ));
    }
}
