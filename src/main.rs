//! # ESG Crawler
//!
//! Crawls government ESG disclosure pages, keeps a CSV audit trail of every
//! run and upserts embedded records into a Qdrant collection for semantic
//! search.
//!
//! ## Usage
//!
//! ```sh
//! esg_crawler --config config.yaml run --site greenhousegas --year 111
//! esg_crawler schedule --site greenhousegas --years 109,110,111,112 --at 00:00
//! esg_crawler update-payload --collection greenhousegas --id 270878621762 --key industry --value Cement
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Listing**: enumerate the company codes disclosed for a year
//! 2. **Fetching**: download and parse each disclosure, isolating failures
//! 3. **Normalizing**: derive the record id, timestamp and write time
//! 4. **Local output**: CSV tables per source and per year, plus a merged
//!    failure log
//! 5. **Vector output**: embed each record and upsert only ids the
//!    collection does not have yet

use clap::Parser;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod crawler;
mod embedding;
mod error;
mod fetcher;
mod models;
mod normalizer;
mod outputs;
mod schedule;
mod scrapers;
#[cfg(test)]
mod testing;
mod utils;
mod vector_store;

use cli::{Cli, Command};
use config::Config;
use crawler::Pipeline;
use embedding::{EmbeddingClient, OpenAiEmbedder};
use error::{Error, Result};
use fetcher::{FetchRequest, Fetcher, ReqwestTransport, Throttle};
use outputs::LocalStore;
use scrapers::greenhousegas::page_text;
use scrapers::{GreenhouseGasSite, GreenhouseParams};
use utils::{ensure_writable_dir, truncate_for_log};
use vector_store::{QdrantClient, VectorStore};

type LivePipeline = Pipeline<ReqwestTransport, OpenAiEmbedder, QdrantClient>;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("esg_crawler starting up");

    let args = Cli::parse();
    let config = Config::load(&args.config).inspect_err(|e| {
        error!(path = %args.config, error = %e, "Failed to load configuration");
    })?;
    let qdrant = &config.database.qdrant;
    let store = QdrantClient::new(&qdrant.url(), &qdrant.api_key, config.crawler.timeout())?;

    match args.command {
        Command::Run { site, year } => {
            let (pipeline, site_impl, collection) = prepare_crawl(&config, store, &site).await?;
            let report = pipeline
                .run(&site_impl, &GreenhouseParams { year }, &collection)
                .await?;
            schedule::log_report(&Ok(report));
        }
        Command::Schedule { site, years, at } => {
            let tz = config.crawler.tz()?;
            let (pipeline, site_impl, collection) = prepare_crawl(&config, store, &site).await?;
            let (pipeline, site_impl, collection, years) =
                (&pipeline, &site_impl, collection.as_str(), &years);
            info!(?years, %at, "Scheduler started");
            schedule::run_daily(at, tz, move || async move {
                for year in years {
                    let params = GreenhouseParams { year: year.clone() };
                    let outcome = pipeline.run(site_impl, &params, collection).await;
                    schedule::log_report(&outcome);
                }
            })
            .await;
        }
        Command::Repair { collection, field } => {
            let removed = vector_store::repair(&store, &collection, &field).await?;
            info!(%collection, removed = removed.len(), "Repair complete");
        }
        Command::Dedupe { collection, fields } => {
            let removed = vector_store::dedupe(&store, &collection, &fields).await?;
            info!(%collection, removed = removed.len(), "Dedupe complete");
        }
        Command::Search {
            collection,
            query,
            limit,
        } => search(&config, &store, &collection, query, limit).await?,
        Command::UpdatePayload {
            collection,
            id,
            key,
            value,
        } => {
            let point = vector_store::update_payload(&store, &collection, id, &key, value)
                .await?
                .ok_or_else(|| Error::VectorStore {
                    operation: "update_payload",
                    status: 404,
                    body: format!("point {id} not found in {collection}"),
                })?;
            info!(
                %collection,
                id,
                vector_len = point.vector.as_ref().map(Vec::len),
                "Payload updated"
            );
            let payload = point.payload.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Metrics => {
            for (name, value) in store.metrics().await? {
                println!("{name} {value}");
            }
        }
        Command::Page { url, user_agent } => {
            let fetcher = live_fetcher(&config)?;
            let mut request = FetchRequest::get(url.clone());
            if let Some(ua) = user_agent {
                request = request.with_header("user-agent", ua);
            }
            let doc = fetcher
                .fetch(request)
                .await
                .ok_or_else(|| Error::EmptyResponse {
                    url,
                    attempts: fetcher.retries(),
                })?;
            println!("{}", page_text(&doc.html()));
        }
    }

    info!(
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "esg_crawler finished"
    );
    Ok(())
}

/// Build the live pipeline and the site it crawls.
#[instrument(level = "info", skip(config, store))]
async fn prepare_crawl(
    config: &Config,
    store: QdrantClient,
    site: &str,
) -> Result<(LivePipeline, GreenhouseGasSite, String)> {
    let site_impl = match site {
        GreenhouseGasSite::NAME => GreenhouseGasSite::new(site, config.site(site)?),
        other => return Err(Error::Config(format!("unknown site {other:?}"))),
    };

    let crawler = &config.crawler;
    if let Err(e) = ensure_writable_dir(&crawler.data_dir).await {
        error!(
            path = %crawler.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different DATA_DIR)"
        );
        return Err(e);
    }

    let pipeline = Pipeline::new(
        live_fetcher(config)?,
        LocalStore::new(crawler.data_dir.clone()),
        embedding_client(config)?,
        store,
        crawler.tz()?,
    );
    Ok((pipeline, site_impl, config.collection_for(site)))
}

fn live_fetcher(config: &Config) -> Result<Fetcher<ReqwestTransport>> {
    let crawler = &config.crawler;
    Ok(Fetcher::new(
        ReqwestTransport::new(crawler.timeout())?,
        crawler.retry,
        Throttle::from_millis(crawler.min_wait_ms, crawler.max_wait_ms),
    ))
}

fn embedding_client(config: &Config) -> Result<EmbeddingClient<OpenAiEmbedder>> {
    let e = &config.embedding;
    let provider = OpenAiEmbedder::new(
        &e.api_key,
        &e.base_url,
        &e.model,
        e.dimensions,
        Duration::from_secs(e.timeout_secs.max(1)),
        e.max_retries,
    )?;
    Ok(EmbeddingClient::new(provider, e.max_chunk_length, e.batch_size))
}

/// Embed `query` and print the closest records, best first.
async fn search(
    config: &Config,
    store: &QdrantClient,
    collection: &str,
    query: String,
    limit: usize,
) -> Result<()> {
    let client = embedding_client(config)?;
    let vector = client
        .embed(&[query])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("no vector returned for query".to_string()))?;

    let hits = store.search(collection, &vector, limit).await?;
    info!(%collection, hits = hits.len(), "Search complete");
    for hit in hits {
        let payload = hit.payload.unwrap_or_default();
        let field = |key: &str| {
            let value = payload.get(key).and_then(|v| v.as_str());
            value.unwrap_or("-").to_string()
        };
        let content = field("content").replace('\n', " ");
        println!(
            "{:.4}  {}  {}  {}  {}",
            hit.score,
            hit.id,
            field("year"),
            field("co_id"),
            truncate_for_log(&content, 120)
        );
    }
    Ok(())
}
