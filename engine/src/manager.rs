// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Server manager facade
//! Wires the registry, probe, store and the three lifecycle components into
//! the surface a GUI layer calls. Every operation here is async and safe to
//! dispatch from an interactive caller.

use crate::config::ManagedServer;
use crate::conflict::{ConflictResolver, PortConflictReport};
use crate::error::{ConsoleError, KillError, ReassignError, StartError, StopError};
use crate::launcher::{ProcessLauncher, ServerHandle};
use crate::monitor::EventSender;
use crate::probe::{PortProbe, SystemPortProbe};
use crate::registry::{ProcessRegistry, RunningServer};
use crate::shutdown::{ShutdownCoordinator, StopOutcome};
use crate::store::ServerStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Live resource usage for a running server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

pub struct ServerManager {
    registry: Arc<ProcessRegistry>,
    store: Arc<ServerStore>,
    launcher: ProcessLauncher,
    shutdown: ShutdownCoordinator,
    resolver: Arc<ConflictResolver>,
}

impl ServerManager {
    pub fn new(store: Arc<ServerStore>) -> Self {
        Self::with_probe(store, Arc::new(SystemPortProbe::new()))
    }

    /// The probe seam exists for tests and for platforms that need a
    /// different socket-table strategy.
    pub fn with_probe(store: Arc<ServerStore>, probe: Arc<dyn PortProbe>) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let resolver = Arc::new(ConflictResolver::new(Arc::clone(&probe), Arc::clone(&store)));
        Self {
            launcher: ProcessLauncher::new(
                Arc::clone(&registry),
                Arc::clone(&probe),
                Arc::clone(&resolver),
            ),
            shutdown: ShutdownCoordinator::new(Arc::clone(&registry)),
            registry,
            store,
            resolver,
        }
    }

    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Start the named server; its definition comes from the store.
    pub async fn start(
        &self,
        identifier: &str,
        events: EventSender,
    ) -> Result<ServerHandle, StartError> {
        let server = self
            .store
            .get(identifier)
            .ok_or_else(|| StartError::UnknownServer(identifier.to_string()))?;
        self.launcher.start(&server, events).await
    }

    /// Start from an explicit definition, bypassing the store lookup.
    pub async fn start_server(
        &self,
        server: &ManagedServer,
        events: EventSender,
    ) -> Result<ServerHandle, StartError> {
        self.launcher.start(server, events).await
    }

    pub async fn stop(&self, identifier: &str) -> Result<StopOutcome, StopError> {
        self.shutdown.stop(identifier).await
    }

    /// Write one console command line to the server's stdin.
    pub async fn send_command(&self, identifier: &str, command: &str) -> Result<(), ConsoleError> {
        let entry = self
            .registry
            .get(identifier)
            .ok_or_else(|| ConsoleError::NotRunning(identifier.to_string()))?;
        let mut child = entry.child.lock().await;
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| ConsoleError::StdinClosed(identifier.to_string()))?;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    pub fn is_running(&self, identifier: &str) -> bool {
        self.registry.is_running(identifier)
    }

    pub fn running_servers(&self) -> Vec<RunningServer> {
        self.registry.running()
    }

    /// Uptime plus CPU and memory usage read from the process table.
    /// None when the server is not running; zeros when the process table
    /// cannot be read.
    pub async fn stats(&self, identifier: &str) -> Option<ServerStats> {
        let entry = self.registry.get(identifier)?;
        let uptime_secs = entry.started_at.elapsed().as_secs();
        let pid = sysinfo::Pid::from_u32(entry.pid);

        let mut system = sysinfo::System::new();
        system.refresh_process(pid);
        // CPU usage needs two samples a beat apart.
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_process(pid);

        let (cpu_percent, memory_mb) = match system.process(pid) {
            Some(process) => (
                process.cpu_usage(),
                process.memory() as f64 / 1024.0 / 1024.0,
            ),
            None => (0.0, 0.0),
        };
        Some(ServerStats {
            uptime_secs,
            cpu_percent,
            memory_mb,
        })
    }

    pub async fn build_conflict_report(&self, port: u16) -> PortConflictReport {
        self.resolver.build_report(port).await
    }

    pub async fn kill_occupant(&self, report: &PortConflictReport) -> Result<(), KillError> {
        self.resolver.kill_occupant(report).await
    }

    pub async fn reassign_port(
        &self,
        identifier: &str,
        from_port: u16,
    ) -> Result<u16, ReassignError> {
        self.resolver.reassign_port(identifier, from_port).await
    }
}
