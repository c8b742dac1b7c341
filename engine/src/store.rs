// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Persisted server list
//! Flat JSON file holding the ManagedServer definitions. The only write this
//! engine performs is the port update during conflict remediation.

use crate::config::ManagedServer;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    servers: Vec<ManagedServer>,
}

pub struct ServerStore {
    path: PathBuf,
    servers: Mutex<Vec<ManagedServer>>,
}

impl ServerStore {
    /// Load the store from `path`. A missing file is an empty server list,
    /// not an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let servers = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let file: StoreFile = serde_json::from_str(&contents)?;
            file.servers
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), count = servers.len(), "loaded server list");
        Ok(Self {
            path,
            servers: Mutex::new(servers),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, identifier: &str) -> Option<ManagedServer> {
        let servers = self.servers.lock().unwrap();
        servers.iter().find(|s| s.identifier == identifier).cloned()
    }

    pub fn servers(&self) -> Vec<ManagedServer> {
        self.servers.lock().unwrap().clone()
    }

    /// Insert or replace a server definition and persist the list.
    pub fn upsert(&self, server: ManagedServer) -> Result<(), StoreError> {
        let mut servers = self.servers.lock().unwrap();
        match servers.iter().position(|s| s.identifier == server.identifier) {
            Some(i) => servers[i] = server,
            None => servers.push(server),
        }
        self.persist(&servers)
    }

    /// Update the configured port of one server and persist the list.
    pub fn update_port(&self, identifier: &str, port: u16) -> Result<(), StoreError> {
        let mut servers = self.servers.lock().unwrap();
        let server = servers
            .iter_mut()
            .find(|s| s.identifier == identifier)
            .ok_or_else(|| StoreError::UnknownServer(identifier.to_string()))?;
        server.port = port;
        debug!(server = identifier, port, "updating configured port");
        self.persist(&servers)
    }

    fn persist(&self, servers: &[ManagedServer]) -> Result<(), StoreError> {
        let file = StoreFile {
            servers: servers.to_vec(),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}
