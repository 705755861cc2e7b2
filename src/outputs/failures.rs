//! Failure worklist shared by every source.
//!
//! `failed_urls.csv` is the durable record of items a run could not
//! crawl. It is merged, never truncated: prior rows come first, new rows
//! are appended, and repeated `(source_name, item_key)` pairs keep only
//! their first occurrence.

use super::LocalStore;
use crate::error::Result;
use crate::models::FailedItem;
use itertools::Itertools;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Concatenate and deduplicate, keeping first occurrences in order.
pub fn merge_failures(existing: Vec<FailedItem>, new: &[FailedItem]) -> Vec<FailedItem> {
    existing
        .into_iter()
        .chain(new.iter().cloned())
        .unique_by(|item| (item.source_name.clone(), item.item_key.clone()))
        .collect()
}

impl LocalStore {
    /// Merge `items` into the failure file. Returns the number of rows in
    /// the file afterwards, or 0 when nothing was written.
    #[instrument(level = "info", skip_all, fields(new = items.len()))]
    pub async fn store_failures(&self, items: &[FailedItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let path = self.failures_path();
        let existing = read_failures(&path).await?;
        let prior = existing.len();
        let merged = merge_failures(existing, items);
        if merged.is_empty() {
            return Ok(0);
        }

        fs::create_dir_all(self.data_dir()).await?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        for item in &merged {
            writer.serialize(item)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::write(&path, bytes).await?;

        info!(
            path = %path.display(),
            prior,
            total = merged.len(),
            "Merged failure log"
        );
        Ok(merged.len())
    }
}

/// Rows of the failure file; a missing file reads as empty.
pub async fn read_failures(path: &Path) -> Result<Vec<FailedItem>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let mut out = Vec::new();
    for row in reader.deserialize() {
        out.push(row?);
    }
    Ok(out)
}
