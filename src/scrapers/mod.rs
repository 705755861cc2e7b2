//! Source sites.
//!
//! Each site follows the same two-phase pattern:
//!
//! 1. **Listing**: enumerate the item keys for one period
//! 2. **Detail**: fetch and parse one item into an [`Article`]
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Greenhouse-gas disclosures | [`greenhousegas`] | Form POST + HTML | Periods are ROC calendar years |
//!
//! The crawl loop in [`crate::crawler`] is generic over [`Site`]; sites never
//! persist anything themselves.

pub mod greenhousegas;

use crate::error::Result;
use crate::fetcher::{Fetcher, Transport};
use crate::models::Article;

pub use greenhousegas::{GreenhouseGasSite, GreenhouseParams};

/// Capabilities a source site provides to the crawl loop.
pub trait Site {
    /// Per-run parameters, e.g. the reporting year.
    type Params;

    /// Source name used in file names, payloads and failure rows.
    fn name(&self) -> &str;

    /// Period partition for a run.
    fn period(&self, params: &Self::Params) -> String;

    /// Natural key of one listed item; hashed into the record id.
    fn natural_key(&self, item_key: &str, params: &Self::Params) -> String;

    async fn list_items<T: Transport>(
        &self,
        fetcher: &Fetcher<T>,
        params: &Self::Params,
    ) -> Result<Vec<String>>;

    async fn fetch_item<T: Transport>(
        &self,
        fetcher: &Fetcher<T>,
        item_key: &str,
        params: &Self::Params,
    ) -> Result<Article>;
}
