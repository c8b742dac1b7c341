// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Output monitor
//! One task per running process. Forwards every output line, in order, to
//! the caller's event channel while scanning for the known bind-failure
//! signatures. Registry cleanup on stream end is unconditional: it happens
//! for clean exits, crashes and pipe errors alike.

use crate::registry::ProcessRegistry;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Log phrases a server emits when it lost the race for its port. Literal
/// substring matching against upstream signatures; deliberately not a parser.
const BIND_FAILURE_SIGNATURES: &[&str] = &[
    "FAILED TO BIND TO PORT",
    "Address already in use",
    "Port already in use",
];

/// Delay between process exit and the conflict notification, so the OS
/// process table has settled by the time a handler inspects it.
const CONFLICT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Capacity of the internal pipe-reader channel. Backpressure here slows
/// the reader down rather than reordering or dropping lines.
const LINE_BUFFER: usize = 64;

/// Events delivered to the caller's sink channel.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// One raw line of process output, delivered in stream order.
    Line { identifier: String, line: String },
    /// The process exited without a detected port conflict.
    Stopped { identifier: String },
    /// The process exited after logging a bind failure on `port`.
    PortConflict { identifier: String, port: u16 },
}

pub type EventSender = mpsc::Sender<ServerEvent>;

pub(crate) fn is_bind_failure(line: &str) -> bool {
    BIND_FAILURE_SIGNATURES.iter().any(|sig| line.contains(sig))
}

/// Spawn the monitoring task for a freshly launched process. The returned
/// handle is kept in the registry entry so a forced stop can cancel it.
pub(crate) fn spawn_monitor(
    registry: Arc<ProcessRegistry>,
    identifier: String,
    port: u16,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    child: Arc<tokio::sync::Mutex<Child>>,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Both pipes funnel into one channel; per-pipe ordering is the order
        // the process wrote, which is all the merged-stream contract needs.
        let (line_tx, mut line_rx) = mpsc::channel(LINE_BUFFER);
        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            readers.push(tokio::spawn(forward_lines(stdout, line_tx.clone())));
        }
        if let Some(stderr) = stderr {
            readers.push(tokio::spawn(forward_lines(stderr, line_tx.clone())));
        }
        drop(line_tx);

        let mut conflict_detected = false;
        let mut read_failed = false;
        while let Some(read) = line_rx.recv().await {
            let line = match read {
                Ok(line) => line,
                Err(e) => {
                    warn!(server = %identifier, error = %e, "output stream read failed");
                    read_failed = true;
                    continue;
                }
            };
            if !conflict_detected && is_bind_failure(&line) {
                // Flag it but keep streaming; the process decides when to die.
                warn!(server = %identifier, port, "bind failure signature in output");
                conflict_detected = true;
            }
            let _ = events
                .send(ServerEvent::Line {
                    identifier: identifier.clone(),
                    line,
                })
                .await;
        }
        for reader in readers {
            let _ = reader.await;
        }

        // Stream end: the process closed its output, which happens at or
        // after exit. Cleanup must run on every path, including read errors.
        registry.remove(&identifier);
        match child.lock().await.wait().await {
            Ok(status) => debug!(server = %identifier, %status, "process reaped"),
            Err(e) => warn!(server = %identifier, error = %e, "failed to reap process"),
        }

        if conflict_detected {
            // Let the process table settle before anyone inspects it.
            sleep(CONFLICT_SETTLE_DELAY).await;
            info!(server = %identifier, port, "exited after port bind failure");
            let _ = events
                .send(ServerEvent::PortConflict {
                    identifier: identifier.clone(),
                    port,
                })
                .await;
        } else {
            if read_failed {
                warn!(server = %identifier, "monitor ended on stream error");
            } else {
                info!(server = %identifier, "server has stopped");
            }
            let _ = events
                .send(ServerEvent::Stopped {
                    identifier: identifier.clone(),
                })
                .await;
        }
    })
}

async fn forward_lines<R>(pipe: R, tx: mpsc::Sender<Result<String, std::io::Error>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(Ok(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}
