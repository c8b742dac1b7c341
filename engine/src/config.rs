// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Managed server configuration
//! Server definitions, the per-type launch flag table, and the
//! `server.properties` file this engine creates and edits.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_GAME_PORT: u16 = 25565;
pub const PROPERTIES_FILE: &str = "server.properties";
pub const FALLBACK_JAR: &str = "server.jar";

fn default_memory() -> String {
    "2G".to_string()
}

fn default_java() -> String {
    "java".to_string()
}

fn default_gamemode() -> String {
    "survival".to_string()
}

fn default_difficulty() -> String {
    "normal".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Vanilla,
    Forge,
    Fabric,
    Paper,
    Spigot,
    Purpur,
    Quilt,
    NeoForge,
}

impl ServerType {
    /// Extra JVM flags appended between the memory flags and `-jar`.
    /// This table is fixed launch data keyed on server type, not logic.
    pub fn jvm_flags(self) -> &'static [&'static str] {
        match self {
            ServerType::Fabric => &[
                "-Dfabric.systemLibDir=fabric-server-libraries",
                "-DFabricMcEmu=net.minecraft.server.MinecraftServer",
            ],
            ServerType::Forge => &["-Dfml.queryResult=confirm"],
            ServerType::Paper | ServerType::Spigot | ServerType::Purpur => &[
                "-DIReallyKnowWhatIAmDoingISwear=true",
                "-Dfile.encoding=UTF-8",
            ],
            ServerType::Vanilla | ServerType::Quilt | ServerType::NeoForge => &[],
        }
    }

    /// Whether a jar filename (lowercased) looks like this type's runnable
    /// artifact. Vanilla has no pattern of its own and relies on the
    /// `server.jar` fallback.
    pub(crate) fn matches_jar(self, name: &str) -> bool {
        match self {
            ServerType::Fabric => {
                name.contains("fabric-server-launch") || name.contains("fabric-launcher")
            }
            ServerType::NeoForge => name.contains("neoforge") && !name.contains("installer"),
            ServerType::Forge => name.contains("forge") && !name.contains("installer"),
            ServerType::Paper | ServerType::Spigot | ServerType::Purpur => {
                name.contains("paper") || name.contains("spigot") || name.contains("purpur")
            }
            ServerType::Quilt => name.contains("quilt") && !name.contains("installer"),
            ServerType::Vanilla => false,
        }
    }
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ServerType::Vanilla => "vanilla",
            ServerType::Forge => "forge",
            ServerType::Fabric => "fabric",
            ServerType::Paper => "paper",
            ServerType::Spigot => "spigot",
            ServerType::Purpur => "purpur",
            ServerType::Quilt => "quilt",
            ServerType::NeoForge => "neoforge",
        };
        write!(f, "{tag}")
    }
}

/// A user-defined server this engine can launch. The working directory and
/// the runnable artifact inside it are provisioned by the external download
/// collaborator before launch is attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedServer {
    pub identifier: String,
    pub server_type: ServerType,
    pub version: String,
    pub port: u16,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_java")]
    pub java_path: String,
    pub working_dir: PathBuf,
    #[serde(default = "default_gamemode")]
    pub gamemode: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

impl ManagedServer {
    pub fn properties_path(&self) -> PathBuf {
        self.working_dir.join(PROPERTIES_FILE)
    }
}

/// Write a minimal `server.properties` when none exists. A no-op when the
/// file is already present, so repeated launches never clobber user edits.
pub fn write_default_properties(server: &ManagedServer) -> std::io::Result<()> {
    let path = server.properties_path();
    if path.exists() {
        return Ok(());
    }
    let mut file = std::fs::File::create(&path)?;
    writeln!(file, "server-port={}", server.port)?;
    writeln!(file, "level-name=world")?;
    writeln!(file, "gamemode={}", server.gamemode)?;
    writeln!(file, "difficulty={}", server.difficulty)?;
    writeln!(file, "enable-command-block=false")?;
    writeln!(file, "spawn-protection=16")?;
    Ok(())
}

/// Rewrite the `server-port=` line of an existing properties file in place,
/// leaving every other line (and the line order) untouched. Returns false if
/// the file does not exist.
pub fn rewrite_properties_port(working_dir: &Path, port: u16) -> std::io::Result<bool> {
    let path = working_dir.join(PROPERTIES_FILE);
    if !path.exists() {
        return Ok(false);
    }
    let contents = std::fs::read_to_string(&path)?;
    let rewritten: Vec<String> = contents
        .lines()
        .map(|line| {
            if line.starts_with("server-port=") {
                format!("server-port={port}")
            } else {
                line.to_string()
            }
        })
        .collect();
    let mut out = rewritten.join("\n");
    if contents.ends_with('\n') {
        out.push('\n');
    }
    std::fs::write(&path, out)?;
    Ok(true)
}
