//! Record tables written after every run.
//!
//! Both files are overwritten, not appended: the source table holds the
//! latest run and each period table holds the latest run's rows for that
//! period.

use super::LocalStore;
use crate::error::Result;
use crate::models::Record;
use itertools::Itertools;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

impl LocalStore {
    /// Write the full table and one table per period. Returns the number of
    /// files written; empty input writes nothing.
    #[instrument(level = "info", skip_all, fields(%source_name, rows = records.len()))]
    pub async fn store(&self, records: &[Record], source_name: &str) -> Result<usize> {
        if records.is_empty() {
            info!("No records to store");
            return Ok(0);
        }
        fs::create_dir_all(self.data_dir()).await?;

        write_records(&self.source_path(source_name), records).await?;
        let mut written = 1;

        let by_period = records.iter().into_group_map_by(|r| r.period().to_string());
        for (period, rows) in by_period.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            let rows: Vec<Record> = rows.into_iter().cloned().collect();
            write_records(&self.period_path(source_name, &period), &rows).await?;
            written += 1;
        }

        info!(files = written, "Stored record tables");
        Ok(written)
    }
}

async fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    fs::write(path, bytes).await?;
    info!(path = %path.display(), rows = records.len(), "Wrote CSV");
    Ok(())
}

#[cfg(test)]
pub async fn read_records(path: &Path) -> Result<Vec<Record>> {
    let bytes = fs::read(path).await?;
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let mut out = Vec::new();
    for row in reader.deserialize() {
        out.push(row?);
    }
    Ok(out)
}
