//! Provenance metadata attached to every parsed article.
//!
//! The record `id` doubles as the vector-store point id, so [`hash_to_id`]
//! must keep producing the same number for the same natural key across
//! runs, processes and implementations: MD5 of the UTF-8 key, read as an
//! unsigned 128-bit integer, keep the first 12 decimal digits.

use crate::error::{Error, Result};
use crate::models::{Article, Record};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;

const UPDATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ID_DIGITS: usize = 12;

/// Deterministic 12-digit identifier for a natural key.
pub fn hash_to_id(natural_key: &str) -> u64 {
    let digest = md5::compute(natural_key.as_bytes());
    let decimal = u128::from_be_bytes(digest.0).to_string();
    let end = decimal.len().min(ID_DIGITS);
    // at most 12 ASCII digits always fit in a u64
    decimal[..end].parse().unwrap_or_default()
}

/// Unix seconds for the datetime strings the sites produce.
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(datetime: &str) -> Result<i64> {
    let s = datetime.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc().timestamp());
    }
    Err(Error::Timestamp(datetime.to_string()))
}

/// Turns [`Article`]s into [`Record`]s for one source.
#[derive(Debug, Clone)]
pub struct Normalizer {
    source_name: String,
    tz: Tz,
}

impl Normalizer {
    pub fn new(source_name: impl Into<String>, tz: Tz) -> Self {
        Self {
            source_name: source_name.into(),
            tz,
        }
    }

    pub fn normalize(&self, article: Article, natural_key: &str) -> Result<Record> {
        self.normalize_at(article, natural_key, Utc::now())
    }

    pub fn normalize_at(
        &self,
        article: Article,
        natural_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Record> {
        let timestamp = parse_timestamp(&article.datetime)?;
        let id = hash_to_id(natural_key);
        debug!(natural_key, id, "Normalized record");
        Ok(Record {
            id,
            source_name: self.source_name.clone(),
            co_id: article.co_id,
            year: article.year,
            company_name: article.company_name,
            industry: article.industry,
            url: article.url,
            content: article.content,
            datetime: article.datetime,
            timestamp,
            updated_at: now.with_timezone(&self.tz).format(UPDATED_AT_FORMAT).to_string(),
        })
    }
}
