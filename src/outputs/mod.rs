//! Local CSV audit trail.
//!
//! # Submodules
//!
//! - [`tables`]: record tables, one per source and one per source + period
//! - [`failures`]: the cumulative, deduplicated failure worklist
//!
//! # Output Structure
//!
//! ```text
//! data_dir/
//! ├── greenhousegas_datas.csv       # latest run, whole table
//! ├── greenhousegas-111_datas.csv   # latest run, period 111
//! └── failed_urls.csv               # every failure ever seen, deduplicated
//! ```

pub mod failures;
pub mod tables;

use std::path::{Path, PathBuf};

/// File-backed sink rooted at the configured data directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    data_dir: PathBuf,
}

impl LocalStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn source_path(&self, source_name: &str) -> PathBuf {
        self.data_dir.join(format!("{source_name}_datas.csv"))
    }

    pub fn period_path(&self, source_name: &str, period: &str) -> PathBuf {
        self.data_dir.join(format!("{source_name}-{period}_datas.csv"))
    }

    pub fn failures_path(&self) -> PathBuf {
        self.data_dir.join("failed_urls.csv")
    }
}
