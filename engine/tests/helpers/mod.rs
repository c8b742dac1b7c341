// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use mcsrv_engine::{ManagedServer, ServerEvent, ServerType};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a fmt subscriber once so `RUST_LOG=debug cargo test` shows the
/// engine's tracing output. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A fake "java" that prints a couple of startup lines and exits cleanly
/// when it reads the in-band stop command (or its stdin closes).
pub const RESPONSIVE_SERVER: &str = r#"#!/bin/sh
echo "[Server thread/INFO]: Starting minecraft server version 1.21.1"
echo "[Server thread/INFO]: Done (1.234s)! For help, type \"help\""
while read line; do
  if [ "$line" = "stop" ]; then
    echo "[Server thread/INFO]: Stopping server"
    exit 0
  fi
done
exit 0
"#;

/// A fake "java" that loses the bind race and dies, the way a real server
/// logs it.
pub const BIND_FAILURE_SERVER: &str = r#"#!/bin/sh
echo "[Server thread/INFO]: Starting Minecraft server on *:25565"
echo "[Server thread/WARN]: **** FAILED TO BIND TO PORT!"
echo "[Server thread/WARN]: Perhaps a server is already running on that port?"
exit 1
"#;

/// A fake "java" that ignores both the stop command and SIGTERM; only
/// SIGKILL takes it down.
pub const STUBBORN_SERVER: &str = r#"#!/bin/sh
echo "up"
trap '' TERM
while :; do sleep 1; done
"#;

/// A fake "java" that prints numbered lines in a known order, then exits.
pub const COUNTING_SERVER: &str = r#"#!/bin/sh
i=1
while [ $i -le 20 ]; do
  echo "line $i"
  i=$((i + 1))
done
exit 0
"#;

/// Write an executable fake-java script into `dir` and return its path.
pub fn write_fake_java(dir: &Path, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-java");
    std::fs::write(&path, script).expect("write fake java");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake java");
    path
}

/// Build a server definition whose working directory holds a dummy
/// `server.jar` and whose interpreter is the given fake-java script.
pub fn make_server(identifier: &str, workdir: &Path, port: u16, java: &Path) -> ManagedServer {
    std::fs::write(workdir.join("server.jar"), b"").expect("write dummy jar");
    ManagedServer {
        identifier: identifier.to_string(),
        server_type: ServerType::Vanilla,
        version: "1.21.1".to_string(),
        port,
        memory: "2G".to_string(),
        java_path: java.to_string_lossy().into_owned(),
        working_dir: workdir.to_path_buf(),
        gamemode: "survival".to_string(),
        difficulty: "normal".to_string(),
    }
}

/// A port that was free a moment ago. Races are possible but good enough
/// for tests that only need "very likely free".
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    listener.local_addr().expect("local addr").port()
}

/// Receive the next event or panic after a bounded wait.
pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("event channel closed")
}

/// Drain events until the terminal Stopped/PortConflict event, returning
/// the raw output lines seen on the way plus the terminal event itself.
pub async fn drain_until_terminal(
    rx: &mut mpsc::Receiver<ServerEvent>,
) -> (Vec<String>, ServerEvent) {
    let mut lines = Vec::new();
    loop {
        match next_event(rx).await {
            ServerEvent::Line { line, .. } => lines.push(line),
            terminal => return (lines, terminal),
        }
    }
}
