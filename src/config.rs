use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::query::LimitPolicy;

/// Paging bounds for each endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Fixed cap on the subject listing.
    pub subjects: u64,
    pub cones: LimitPolicy,
    pub plot: LimitPolicy,
    pub export: LimitPolicy,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            subjects: 1000,
            cones: LimitPolicy::new(100, 1000),
            plot: LimitPolicy::new(2000, 5000),
            export: LimitPolicy::new(10_000, 100_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connections in the store's pool.
    pub pool_size: usize,
    pub limits: Limits,
    /// Fail exports whose rows disagree with the representative metadata.
    pub verify_export_metadata: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pool_size: 10,
            limits: Limits::default(),
            verify_export_metadata: false,
        }
    }
}

impl Settings {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_str(&text).context("parsing settings JSON")
    }
}
