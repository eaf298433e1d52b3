//! Machine configuration.
//!
//! Configuration is resolved from, in priority order:
//!
//! 1. Environment variables (`AURELIA_RAM_SIZE`, `AURELIA_RAM_LATENCY`,
//!    `AURELIA_NAND_BLOCKS`)
//! 2. Project-local config file (`./aurelia.toml`)
//! 3. Built-in defaults (the address map in [`memory_map`])
//!
//! # Config file format
//!
//! ```toml
//! # aurelia.toml
//! ram_size = 268435456      # bytes
//! ram_latency = 0           # wait cycles per RAM access
//! nand_blocks = 1024        # 1024 blocks * 64 pages * 4 KiB = 256 MiB
//! storage_base = 0xF0000000
//! ```
//!
//! [`memory_map`]: crate::system::memory_map

use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::Address;
use crate::system::memory_map;

/// Tunable machine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// RAM size in bytes.
    pub ram_size: usize,
    /// RAM access latency in wait cycles (0 = single-cycle memory).
    pub ram_latency: u64,
    /// Number of NAND blocks behind the storage controller.
    pub nand_blocks: usize,
    /// Storage controller MMIO base address.
    pub storage_base: Address,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_size: memory_map::RAM_SIZE,
            ram_latency: 0,
            nand_blocks: 1024,
            storage_base: memory_map::STORAGE_BASE,
        }
    }
}

impl MachineConfig {
    /// Resolve configuration from all sources.
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Some(file_config) = Self::load_local_file() {
            config = file_config;
        }
        config.apply_env_overrides();
        debug!("machine config: {config:?}");
        config
    }

    fn load_local_file() -> Option<Self> {
        let path = Path::new("aurelia.toml");
        if !path.exists() {
            return None;
        }
        let text = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&text) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!("ignoring malformed aurelia.toml: {err}");
                None
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_number("AURELIA_RAM_SIZE") {
            self.ram_size = value as usize;
        }
        if let Some(value) = env_number("AURELIA_RAM_LATENCY") {
            self.ram_latency = value;
        }
        if let Some(value) = env_number("AURELIA_NAND_BLOCKS") {
            self.nand_blocks = value as usize;
        }
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring non-numeric {name}={raw}");
            None
        }
    }
}
