//! JSON manifest describing a collect run, written next to the stored data
//! for downstream tooling (analysis and battery stages, reporting).

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nem_core::{ImputeStrategy, Region, Resolution, TimeRange};

use crate::job::SubRangeRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectManifest {
    pub created_at: DateTime<Utc>,
    pub region: Region,
    pub resolution: Resolution,
    pub strategy: ImputeStrategy,
    pub requested: TimeRange,
    pub records: Vec<SubRangeRecord>,
}

pub fn write_collect_manifest(path: &Path, manifest: &CollectManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest dir '{}'", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("creating manifest '{}'", path.display()))?;
    serde_json::to_writer_pretty(file, manifest).context("serializing collect manifest")?;
    Ok(())
}
