//! Bridge configuration
//!
//! ```json
//! {
//!   "drain_mode": "deferred",
//!   "heap_limit": 1048576,
//!   "vector_types": [
//!     { "name": "VectorInt", "kind": "int32" },
//!     { "name": "VectorDouble", "kind": "float64" },
//!     { "name": "VectorUchar", "kind": "uint8" }
//!   ]
//! }
//! ```
//!
//! Every key is optional. Environment variables override defaults in
//! [`BridgeConfig::from_env`].

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vipsbind_core::handle::DrainMode;
use vipsbind_core::marshal::{default_vector_types, VectorType};

use crate::error::{Error, Result};

/// Environment variable selecting the drain mode.
pub const ENV_DRAIN_MODE: &str = "VIPSBIND_DRAIN_MODE";
/// Environment variable capping the native heap, in bytes. `none` lifts the cap.
pub const ENV_HEAP_LIMIT: &str = "VIPSBIND_HEAP_LIMIT";

/// Configuration of a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// When queued handles are released
    pub drain_mode: DrainMode,
    /// Byte cap of the native heap; `None` is unbounded
    pub heap_limit: Option<usize>,
    /// Vector types registered at init
    pub vector_types: Vec<VectorType>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            drain_mode: DrainMode::Immediate,
            heap_limit: None,
            vector_types: default_vector_types(),
        }
    }
}

impl BridgeConfig {
    /// Deferred draining, everything else default
    pub fn deferred() -> Self {
        Self {
            drain_mode: DrainMode::Deferred,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Defaults overridden by `VIPSBIND_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_DRAIN_MODE) {
            self.drain_mode = parse_drain_mode(&mode)?;
        }
        if let Some(limit) = lookup(ENV_HEAP_LIMIT) {
            self.heap_limit = parse_heap_limit(&limit)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check vector type names: non-empty and unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for ty in &self.vector_types {
            if ty.name.trim().is_empty() {
                return Err(Error::Config("vector type with empty name".to_string()));
            }
            if !seen.insert(ty.name.as_str()) {
                return Err(Error::Config(format!(
                    "vector type {} listed twice",
                    ty.name
                )));
            }
        }
        Ok(())
    }
}

fn parse_drain_mode(value: &str) -> Result<DrainMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "immediate" => Ok(DrainMode::Immediate),
        "deferred" => Ok(DrainMode::Deferred),
        other => Err(Error::Config(format!(
            "{}: expected immediate or deferred, got {:?}",
            ENV_DRAIN_MODE, other
        ))),
    }
}

fn parse_heap_limit(value: &str) -> Result<Option<usize>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| {
        Error::Config(format!(
            "{}: expected a byte count, got {:?}",
            ENV_HEAP_LIMIT, value
        ))
    })
}
