//! Error type shared by every pipeline stage.

use thiserror::Error;

/// Everything that can go wrong between fetching a page and writing a point.
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("config error: {0}")]
    Config(String),

    #[error("no usable response from {url} after {attempts} attempts")]
    EmptyResponse { url: String, attempts: usize },

    #[error("failed to parse page {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("unrecognised datetime {0:?}")]
    Timestamp(String),

    #[error("{records} records but {embeddings} embeddings")]
    LengthMismatch { records: usize, embeddings: usize },

    #[error("duplicate id {0} in upsert batch")]
    DuplicateId(u64),

    #[error(
        "collection {collection} expects {expected_size}-d {expected_distance} vectors, got {actual_size}-d {actual_distance}"
    )]
    DimensionMismatch {
        collection: String,
        expected_size: usize,
        expected_distance: String,
        actual_size: usize,
        actual_distance: String,
    },

    #[error("embedding provider: {0}")]
    Embedding(String),

    #[error("vector store request {operation} failed ({status}): {body}")]
    VectorStore {
        operation: &'static str,
        status: u16,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
