// In: src/config.rs

//! The single source of truth for runtime tuning of the cml core.
//!
//! `CmlConfig` is created once at the application boundary (usually from a JSON
//! document) and then shared read-only. Every field has a serde default so an
//! empty document `{}` is a valid configuration.
//!
//! Pipeline step declarations are *not* part of this struct; they live in
//! [`crate::pipeline::PipelineConfig`] because they are reloaded independently.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CmlError;

//==================================================================================
// I. Decode Settings
//==================================================================================

/// Controls how batches of raw messages are fanned out across worker threads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DecodeConfig {
    /// Number of worker threads for batch decode. `0` means "one per available core".
    #[serde(default)]
    pub parallelism: usize,

    /// Records handed to a worker per unit of work.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    5_000
}

//==================================================================================
// II. Engine Settings
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Worker threads for item-wise steps. `0` means "one per available core",
    /// `1` forces sequential execution.
    #[serde(default)]
    pub item_parallelism: usize,

    /// Batches smaller than this run item-wise steps on the calling thread.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// When true the run report is logged with ANSI colours.
    #[serde(default)]
    pub colorize_report: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            item_parallelism: 0,
            parallel_threshold: default_parallel_threshold(),
            colorize_report: false,
        }
    }
}

fn default_parallel_threshold() -> usize {
    2_048
}

//==================================================================================
// III. Top-Level Config
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CmlConfig {
    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Zone used by timestamp conversion when a step does not name one,
    /// e.g. `"UTC"`, `"Europe/Prague"` or `"+02:00"`.
    #[serde(default = "default_utc_offset")]
    pub default_utc_offset: String,
}

fn default_utc_offset() -> String {
    "UTC".to_string()
}

impl Default for CmlConfig {
    fn default() -> Self {
        Self {
            decode: DecodeConfig::default(),
            engine: EngineConfig::default(),
            default_utc_offset: default_utc_offset(),
        }
    }
}

impl CmlConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CmlError> {
        let config: CmlConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, CmlError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), CmlError> {
        if self.decode.chunk_size == 0 {
            return Err(CmlError::InvalidConfig(
                "decode.chunk_size must be greater than zero".to_string(),
            ));
        }
        crate::utils::ReportZone::parse(&self.default_utc_offset)?;
        Ok(())
    }

    /// Resolves `decode.parallelism`, substituting the core count for `0`.
    pub fn decode_workers(&self) -> usize {
        resolve_workers(self.decode.parallelism)
    }

    /// Resolves `engine.item_parallelism`, substituting the core count for `0`.
    pub fn item_workers(&self) -> usize {
        resolve_workers(self.engine.item_parallelism)
    }
}

pub(crate) fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
