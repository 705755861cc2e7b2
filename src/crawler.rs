//! The crawl run: list → detail per item → normalize → sinks.
//!
//! # Failure Policy
//!
//! - Listing fails: the run is abandoned and nothing is written.
//! - One item fails (fetch, parse or normalize): it is logged, recorded as a
//!   [`FailedItem`] and the loop moves on.
//! - Local persistence always runs first. The embedding and vector stage
//!   runs after it and a failure there is reported, never rolled back into
//!   the CSV files.

use crate::embedding::{Embed, EmbeddingClient};
use crate::error::Result;
use crate::fetcher::{Fetcher, Transport};
use crate::models::{FailedItem, Record, RunReport, StageOutcome};
use crate::normalizer::Normalizer;
use crate::outputs::LocalStore;
use crate::scrapers::Site;
use crate::utils::truncate_for_log;
use crate::vector_store::{self, VectorStore};
use chrono_tz::Tz;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Everything a run needs, built once at startup.
pub struct Pipeline<T, E, V> {
    fetcher: Fetcher<T>,
    local: LocalStore,
    embedder: EmbeddingClient<E>,
    store: V,
    tz: Tz,
}

impl<T, E, V> Pipeline<T, E, V>
where
    T: Transport,
    E: Embed,
    V: VectorStore,
{
    pub fn new(
        fetcher: Fetcher<T>,
        local: LocalStore,
        embedder: EmbeddingClient<E>,
        store: V,
        tz: Tz,
    ) -> Self {
        Self {
            fetcher,
            local,
            embedder,
            store,
            tz,
        }
    }

    /// Crawl one period of one site into `collection`.
    ///
    /// `Err` only when the item list could not be obtained; every other
    /// failure is reported inside the [`RunReport`].
    #[instrument(level = "info", skip_all, fields(site = %site.name(), %collection))]
    pub async fn run<S: Site>(
        &self,
        site: &S,
        params: &S::Params,
        collection: &str,
    ) -> Result<RunReport> {
        let t0 = Instant::now();
        let source_name = site.name().to_string();
        let period = site.period(params);
        info!(%period, "Crawl starting");

        let item_keys = match site.list_items(&self.fetcher, params).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(%period, error = %e, "Listing failed; abandoning run");
                return Err(e);
            }
        };

        let normalizer = Normalizer::new(source_name.as_str(), self.tz);
        let mut records: Vec<Record> = Vec::with_capacity(item_keys.len());
        let mut failed: Vec<FailedItem> = Vec::new();

        for (i, item_key) in item_keys.iter().enumerate() {
            let natural_key = site.natural_key(item_key, params);
            let outcome = match site.fetch_item(&self.fetcher, item_key, params).await {
                Ok(article) => normalizer.normalize(article, &natural_key),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(index = i, %natural_key, error = %e, "Item failed");
                    failed.push(FailedItem {
                        source_name: source_name.clone(),
                        item_key: natural_key,
                    });
                }
            }
            if i + 1 < item_keys.len() {
                self.fetcher.throttle().pause().await;
            }
        }

        info!(
            listed = item_keys.len(),
            succeeded = records.len(),
            failed = failed.len(),
            "Crawl loop finished"
        );

        let local = self.persist_locally(&records, &failed, &source_name).await;
        let vector = self.persist_vectors(&records, collection).await;

        let report = RunReport {
            source_name,
            period,
            listed: item_keys.len(),
            succeeded: records.len(),
            failed,
            local,
            vector,
        };
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            clean = report.is_clean(),
            local = ?report.local,
            vector = ?report.vector,
            "Crawl complete"
        );
        Ok(report)
    }

    async fn persist_locally(
        &self,
        records: &[Record],
        failed: &[FailedItem],
        source_name: &str,
    ) -> StageOutcome {
        let stored = if records.is_empty() {
            warn!("No successful records; skipping record tables");
            Ok(0)
        } else {
            self.local.store(records, source_name).await
        };
        let failures = self.local.store_failures(failed).await;

        match (stored, failures) {
            (Ok(tables), Ok(failure_rows)) => {
                let files = tables + usize::from(failure_rows > 0);
                if files == 0 {
                    StageOutcome::Skipped
                } else {
                    StageOutcome::Done(files)
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Local persistence failed");
                StageOutcome::Failed(e.to_string())
            }
        }
    }

    async fn persist_vectors(&self, records: &[Record], collection: &str) -> StageOutcome {
        if records.is_empty() {
            return StageOutcome::Skipped;
        }
        let texts: Vec<String> = records.iter().map(Record::full_text).collect();
        let result = async {
            let embeddings = self.embedder.embed(&texts).await?;
            vector_store::upsert(&self.store, collection, records, &embeddings).await
        }
        .await;

        match result {
            Ok(written) => StageOutcome::Done(written),
            Err(e) => {
                error!(
                    %collection,
                    error = %truncate_for_log(&e.to_string(), 300),
                    "Vector stage failed; local files are kept"
                );
                StageOutcome::Failed(e.to_string())
            }
        }
    }
}
