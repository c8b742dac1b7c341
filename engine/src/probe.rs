// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Port probing and listener attribution
//! Answers "is this port bound locally" and "who holds it". Probing is a
//! loopback connect, not a bind reservation: a racing bind between probe and
//! launch is possible and handled downstream by the output monitor.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::System;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
pub const PORT_SCAN_ATTEMPTS: u16 = 100;

/// Process names that can host a managed server runtime.
const RUNTIME_NAMES: &[&str] = &["java", "javaw"];

/// Command-line substrings that mark a process as a game server rather than
/// some unrelated JVM.
const SERVER_INDICATORS: &[&str] = &[
    "server.jar",
    "minecraft",
    "forge",
    "fabric",
    "spigot",
    "paper",
    "purpur",
    "quilt",
    "neoforge",
];

#[derive(Debug, Clone, Serialize)]
pub struct PortOccupant {
    pub pid: u32,
    pub process_name: String,
    pub command_line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameServerProcess {
    pub pid: u32,
    pub process_name: String,
    pub command_line: String,
    pub listening_ports: Vec<u16>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Loopback connect with a short timeout. True means something accepted;
    /// anything else (refused, timed out) counts as free.
    async fn is_port_occupied(&self, port: u16) -> bool;

    /// Map a listening port to its owning process. Returns None when no
    /// listener is found or the OS refuses to attribute it; never errors.
    async fn identify_occupant(&self, port: u16) -> Option<PortOccupant>;

    /// First unoccupied port scanning upward from `start`, bounded by
    /// [`PORT_SCAN_ATTEMPTS`].
    async fn find_free_port(&self, start: u16) -> Option<u16>;

    /// Every process that looks like a game server, with its listening
    /// ports attached. Diagnostics only.
    async fn list_game_server_processes(&self) -> Vec<GameServerProcess>;
}

/// Probe backed by real sockets, the OS socket table and the process table.
pub struct SystemPortProbe;

impl SystemPortProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemPortProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortProbe for SystemPortProbe {
    async fn is_port_occupied(&self, port: u16) -> bool {
        matches!(
            timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }

    async fn identify_occupant(&self, port: u16) -> Option<PortOccupant> {
        let table = listening_table().await;
        let pid = table
            .iter()
            .find(|(_, ports)| ports.contains(&port))
            .map(|(pid, _)| *pid)?;

        let mut system = System::new();
        system.refresh_process(sysinfo::Pid::from_u32(pid));
        let process = system.process(sysinfo::Pid::from_u32(pid));
        match process {
            Some(process) => Some(PortOccupant {
                pid,
                process_name: process.name().to_string(),
                command_line: process.cmd().join(" "),
            }),
            // The socket table knows the PID but the process table refuses
            // to describe it (permissions, or it exited between the two
            // reads). Still better than nothing.
            None => Some(PortOccupant {
                pid,
                process_name: String::new(),
                command_line: String::new(),
            }),
        }
    }

    async fn find_free_port(&self, start: u16) -> Option<u16> {
        for offset in 0..PORT_SCAN_ATTEMPTS {
            let port = start.checked_add(offset)?;
            if !self.is_port_occupied(port).await {
                debug!(port, "found free port");
                return Some(port);
            }
        }
        None
    }

    async fn list_game_server_processes(&self) -> Vec<GameServerProcess> {
        let table = listening_table().await;
        let system = System::new_all();

        let mut found = Vec::new();
        for (pid, process) in system.processes() {
            let name = process.name().to_lowercase();
            if !RUNTIME_NAMES.iter().any(|r| name.contains(r)) {
                continue;
            }
            let command_line = process.cmd().join(" ");
            let lowered = command_line.to_lowercase();
            if !SERVER_INDICATORS.iter().any(|k| lowered.contains(k)) {
                continue;
            }
            let pid = pid.as_u32();
            found.push(GameServerProcess {
                pid,
                process_name: process.name().to_string(),
                command_line,
                listening_ports: table.get(&pid).cloned().unwrap_or_default(),
            });
        }
        found.sort_by_key(|p| p.pid);
        found
    }
}

/// One pass over the OS listening-socket table: PID -> listening TCP ports.
/// Failures degrade to an empty table so callers always have something.
async fn listening_table() -> HashMap<u32, Vec<u16>> {
    match read_listening_table().await {
        Ok(table) => table,
        Err(e) => {
            warn!(error = %e, "failed to read listening socket table");
            HashMap::new()
        }
    }
}

#[cfg(unix)]
async fn read_listening_table() -> std::io::Result<HashMap<u32, Vec<u16>>> {
    let output = tokio::process::Command::new("lsof")
        .args(["-nP", "-iTCP", "-sTCP:LISTEN"])
        .output()
        .await?;
    Ok(parse_lsof_table(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(windows)]
async fn read_listening_table() -> std::io::Result<HashMap<u32, Vec<u16>>> {
    let output = tokio::process::Command::new("netstat")
        .args(["-ano", "-p", "tcp"])
        .output()
        .await?;
    Ok(parse_netstat_table(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `lsof -nP -iTCP -sTCP:LISTEN` output. Column 1 is the PID, the NAME
/// column holds `addr:port`.
#[cfg(unix)]
fn parse_lsof_table(output: &str) -> HashMap<u32, Vec<u16>> {
    let mut table: HashMap<u32, Vec<u16>> = HashMap::new();
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(pid) = parts.get(1).and_then(|p| p.parse::<u32>().ok()) else {
            continue;
        };
        let Some(addr) = parts.iter().rev().find(|p| p.contains(':')) else {
            continue;
        };
        let Some(port) = addr.rsplit(':').next().and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };
        let ports = table.entry(pid).or_default();
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    table
}

/// Parse `netstat -ano -p tcp` output, keeping LISTENING rows. Column 2 is
/// the local address, the last column is the PID.
#[cfg(windows)]
fn parse_netstat_table(output: &str) -> HashMap<u32, Vec<u16>> {
    let mut table: HashMap<u32, Vec<u16>> = HashMap::new();
    for line in output.lines() {
        if !line.contains("LISTENING") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (Some(local), Some(pid)) = (parts.get(1), parts.last()) else {
            continue;
        };
        let Some(pid) = pid.parse::<u32>().ok() else {
            continue;
        };
        let Some(port) = local.rsplit(':').next().and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };
        let ports = table.entry(pid).or_default();
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    table
}
