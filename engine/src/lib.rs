// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process lifecycle and port-conflict resolution for managed Minecraft
//! servers.
//!
//! The engine launches server processes, streams their output to a caller's
//! event channel, detects port-bind failures both before launch (loopback
//! probe) and after (log signature scan), stops processes through an
//! escalating ladder, and offers two remediations for a contended port:
//! kill the occupant or move the server to a free port. It is a library;
//! the GUI layer that consumes it lives elsewhere.

pub mod config;
pub mod conflict;
pub mod error;
pub mod launcher;
pub mod manager;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod shutdown;
pub mod store;

pub use config::{ManagedServer, ServerType, DEFAULT_GAME_PORT};
pub use conflict::{ConflictResolver, PortConflictReport};
pub use error::{ConsoleError, KillError, ReassignError, StartError, StopError, StoreError};
pub use launcher::{ProcessLauncher, ServerHandle};
pub use manager::{ServerManager, ServerStats};
pub use monitor::{EventSender, ServerEvent};
pub use probe::{GameServerProcess, PortOccupant, PortProbe, SystemPortProbe};
pub use registry::{ProcessRegistry, RunningServer};
pub use shutdown::{ShutdownCoordinator, StopOutcome};
pub use store::ServerStore;
