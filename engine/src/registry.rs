// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Running process registry
//! The one piece of shared mutable state in this engine: identifier -> live
//! process entry. Constructed once and shared by the launcher, the output
//! monitors and the shutdown coordinator. A slot is reserved before any
//! launch work happens, which is what makes concurrent duplicate starts
//! fail fast instead of racing.

use crate::error::StartError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::task::AbortHandle;
use tracing::debug;

/// Live process entry. Exists only between a successful spawn and the
/// confirmed exit of that process.
#[derive(Clone)]
pub struct RunningEntry {
    pub pid: u32,
    pub bound_port: u16,
    pub started_at: Instant,
    pub(crate) child: Arc<tokio::sync::Mutex<Child>>,
    pub(crate) monitor: Arc<OnceLock<AbortHandle>>,
    pub(crate) stopping: Arc<AtomicBool>,
}

/// Snapshot of a running server for callers (GUI listings).
#[derive(Debug, Clone, Serialize)]
pub struct RunningServer {
    pub identifier: String,
    pub pid: u32,
    pub bound_port: u16,
    pub uptime_secs: u64,
}

enum Slot {
    /// Reserved by a launch in flight; no process exists yet.
    Launching,
    Running(RunningEntry),
}

pub struct ProcessRegistry {
    servers: Mutex<HashMap<String, Slot>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the identifier slot before any launch work. Fails when a launch
    /// is in flight or a process is already running under this identifier.
    pub(crate) fn reserve(&self, identifier: &str) -> Result<(), StartError> {
        let mut servers = self.servers.lock().unwrap();
        if servers.contains_key(identifier) {
            return Err(StartError::AlreadyRunning(identifier.to_string()));
        }
        servers.insert(identifier.to_string(), Slot::Launching);
        Ok(())
    }

    /// Drop a reservation after a failed launch. Leaves a Running slot alone.
    pub(crate) fn release(&self, identifier: &str) {
        let mut servers = self.servers.lock().unwrap();
        if matches!(servers.get(identifier), Some(Slot::Launching)) {
            servers.remove(identifier);
        }
    }

    /// Swap a reservation for the live entry once the process is spawned.
    pub(crate) fn activate(&self, identifier: &str, entry: RunningEntry) {
        let mut servers = self.servers.lock().unwrap();
        debug!(server = identifier, pid = entry.pid, "registering running server");
        servers.insert(identifier.to_string(), Slot::Running(entry));
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<RunningEntry> {
        let servers = self.servers.lock().unwrap();
        match servers.get(identifier) {
            Some(Slot::Running(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Remove an entry once its process is confirmed gone. Idempotent: the
    /// monitor and the shutdown coordinator may both get here.
    pub fn remove(&self, identifier: &str) -> bool {
        let mut servers = self.servers.lock().unwrap();
        let removed = servers.remove(identifier).is_some();
        if removed {
            debug!(server = identifier, "removed from registry");
        }
        removed
    }

    pub fn is_running(&self, identifier: &str) -> bool {
        self.servers.lock().unwrap().contains_key(identifier)
    }

    pub fn uptime(&self, identifier: &str) -> Option<Duration> {
        self.get(identifier).map(|e| e.started_at.elapsed())
    }

    pub fn running(&self) -> Vec<RunningServer> {
        let servers = self.servers.lock().unwrap();
        let mut out: Vec<RunningServer> = servers
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Running(entry) => Some(RunningServer {
                    identifier: id.clone(),
                    pid: entry.pid,
                    bound_port: entry.bound_port,
                    uptime_secs: entry.started_at.elapsed().as_secs(),
                }),
                Slot::Launching => None,
            })
            .collect();
        out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        out
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(pid: u32, port: u16) -> RunningEntry {
        // A child handle is required by the type but irrelevant to registry
        // behavior; park a trivial exited process in it.
        let child = tokio::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        RunningEntry {
            pid,
            bound_port: port,
            started_at: Instant::now(),
            child: Arc::new(tokio::sync::Mutex::new(child)),
            monitor: Arc::new(OnceLock::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_reserve_rejects_duplicate() {
        let registry = ProcessRegistry::new();
        registry.reserve("alpha").unwrap();
        assert!(matches!(
            registry.reserve("alpha"),
            Err(StartError::AlreadyRunning(_))
        ));
        registry.release("alpha");
        registry.reserve("alpha").unwrap();
    }

    #[tokio::test]
    async fn test_activate_then_remove() {
        let registry = ProcessRegistry::new();
        registry.reserve("alpha").unwrap();
        registry.activate("alpha", make_entry(42, 25565));

        assert!(registry.is_running("alpha"));
        assert_eq!(registry.get("alpha").unwrap().pid, 42);
        assert_eq!(registry.running().len(), 1);

        assert!(registry.remove("alpha"));
        assert!(!registry.is_running("alpha"));
        assert!(!registry.remove("alpha"));
    }

    #[tokio::test]
    async fn test_release_leaves_running_slot() {
        let registry = ProcessRegistry::new();
        registry.reserve("alpha").unwrap();
        registry.activate("alpha", make_entry(42, 25565));

        registry.release("alpha");
        assert!(registry.is_running("alpha"));
    }

    #[tokio::test]
    async fn test_concurrent_reserve_single_winner() {
        let registry = Arc::new(ProcessRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(
                async move { registry.reserve("alpha").is_ok() },
            ));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
