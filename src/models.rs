//! Data models for crawled disclosures and the outcome of a crawl run.
//!
//! - [`Article`]: what a site variant parses out of a detail page
//! - [`Record`]: an article enriched with provenance by the normalizer
//! - [`FailedItem`]: one natural key that could not be crawled
//! - [`RunReport`]: what a run hands back to the scheduler

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A parsed detail page, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    /// Company code on the disclosure site.
    pub co_id: String,
    /// Reporting period (ROC calendar year for the greenhouse-gas site).
    pub year: String,
    pub company_name: Option<String>,
    /// Category or industry label.
    pub industry: Option<String>,
    pub url: String,
    pub content: String,
    /// Nominal date of the record, e.g. `2022-06-01 00:00:00`.
    pub datetime: String,
}

/// A normalized record. This is the row written to CSV and, minus `id`,
/// the payload stored next to its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub source_name: String,
    pub co_id: String,
    pub year: String,
    pub company_name: Option<String>,
    pub industry: Option<String>,
    pub url: String,
    pub content: String,
    pub datetime: String,
    /// Seconds since the Unix epoch, parsed from `datetime`.
    pub timestamp: i64,
    /// Write time in the configured timezone, `YYYY-MM-DD HH:MM:SS`.
    pub updated_at: String,
}

impl Record {
    /// Partition value for the period-specific CSV file.
    pub fn period(&self) -> &str {
        &self.year
    }

    /// Text submitted to the embedding provider.
    pub fn full_text(&self) -> String {
        [
            Some(self.year.as_str()),
            Some(self.co_id.as_str()),
            self.company_name.as_deref(),
            self.industry.as_deref(),
            Some(self.content.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
    }

    /// Vector-store payload: every field except `id`.
    pub fn payload(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.remove("id");
        map
    }
}

/// A natural key that failed to crawl, parse or normalize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailedItem {
    pub source_name: String,
    pub item_key: String,
}

/// Outcome of one sink stage of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Nothing to do (no records).
    Skipped,
    /// Stage completed; number of files or points written.
    Done(usize),
    Failed(String),
}

/// Result of a crawl that got past item enumeration.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source_name: String,
    pub period: String,
    pub listed: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedItem>,
    pub local: StageOutcome,
    pub vector: StageOutcome,
}

impl RunReport {
    /// True when every listed item made it to both sinks.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && !matches!(self.local, StageOutcome::Failed(_))
            && !matches!(self.vector, StageOutcome::Failed(_))
    }
}
