// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-operation error types
//! Precondition failures and port conflicts are expected outcomes, not crashes.

use crate::conflict::PortConflictReport;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("server '{0}' is not defined")]
    UnknownServer(String),

    #[error("server '{0}' is already running")]
    AlreadyRunning(String),

    #[error("server jar '{expected}' not found in {} (jars present: {candidates:?})", .dir.display())]
    ArtifactNotFound {
        dir: PathBuf,
        expected: String,
        candidates: Vec<String>,
    },

    #[error("port {} is already in use", .0.port)]
    PortConflict(Box<PortConflictReport>),

    #[error("failed to write {}: {source}", .path.display())]
    Properties {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("server '{0}' is not running")]
    NotRunning(String),

    #[error("a stop for server '{0}' is already in flight")]
    StopInProgress(String),
}

/// Errors from terminating a process this manager does not own.
#[derive(Debug, Error)]
pub enum KillError {
    #[error("no PID is known for the occupying process")]
    NoPidKnown,

    #[error("permission denied killing pid {0}; re-running elevated may help")]
    PermissionDenied(u32),

    #[error("failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("pid {0} is still alive after forced kill")]
    StillAlive(u32),
}

#[derive(Debug, Error)]
pub enum ReassignError {
    #[error("no free port found scanning {attempts} ports from {start}")]
    NoFreePortFound { start: u16, attempts: u16 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to rewrite server.properties: {0}")]
    Properties(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("server '{0}' is not defined")]
    UnknownServer(String),

    #[error("failed to read server list: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed server list: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from writing a console command to a running server's stdin.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("server '{0}' is not running")]
    NotRunning(String),

    #[error("stdin for server '{0}' is closed")]
    StdinClosed(String),

    #[error("failed to write to server stdin: {0}")]
    Io(#[from] std::io::Error),
}
