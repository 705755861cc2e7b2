//! Qdrant REST client.
//!
//! Talks to the HTTP API (`/collections/...`) with the `api-key` header.
//! Writes pass `wait=true` so a following scroll sees them.

use super::{
    CollectionInfo, Distance, Point, PointId, ScoredPoint, ScrollPage, StoredPoint, VectorStore,
};
use crate::error::{Error, Result};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// [`VectorStore`] over the Qdrant REST API.
#[derive(Clone)]
pub struct QdrantClient {
    client: reqwest::Client,
    base_url: String,
}

impl QdrantClient {
    /// Build a client for the Qdrant instance at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Scheme, host and port, e.g. `http://localhost:6333`
    /// * `api_key` - Sent as the `api-key` header; blank disables it
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse, the key is not a valid
    /// header value, or the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let base = url::Url::parse(base_url)?;
        let mut headers = HeaderMap::new();
        if !api_key.trim().is_empty() {
            headers.insert(
                "api-key",
                HeaderValue::from_str(api_key.trim())
                    .map_err(|_| Error::Config("invalid Qdrant API key".to_string()))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        info!(url = %base, "Connecting to Qdrant");
        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn points_url(&self, collection: &str, suffix: &str) -> String {
        format!(
            "{}/collections/{}/points{}",
            self.base_url,
            urlencoding::encode(collection),
            suffix
        )
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/collections/{}",
            self.base_url,
            urlencoding::encode(collection)
        )
    }

    /// Scrape the Prometheus `/metrics` endpoint.
    ///
    /// # Returns
    ///
    /// Metric name (with labels) → sample value, for every sample line.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx status.
    #[instrument(level = "info", skip(self))]
    pub async fn metrics(&self) -> Result<BTreeMap<String, String>> {
        let resp = self
            .client
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::VectorStore {
                operation: "metrics",
                status: status.as_u16(),
                body,
            });
        }
        let metrics = parse_metrics(&body);
        info!(samples = metrics.len(), "Scraped metrics");
        Ok(metrics)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::VectorStore {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ApiResponse<T> = resp.json().await?;
        debug!(operation, time = parsed.time, "Qdrant call finished");
        Ok(parsed.result)
    }
}

impl VectorStore for QdrantClient {
    #[instrument(level = "debug", skip(self))]
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let resp = self.client.get(self.collection_url(collection)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::VectorStore {
                operation: "get_collection",
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ApiResponse<CollectionDescription> = resp.json().await?;
        let vectors = parsed.result.config.params.vectors;
        Ok(Some(CollectionInfo {
            size: vectors.size,
            distance: vectors.distance,
        }))
    }

    #[instrument(level = "info", skip(self))]
    async fn create_collection(&self, collection: &str, info: CollectionInfo) -> Result<()> {
        let body = CreateCollection {
            vectors: VectorParams {
                size: info.size,
                distance: info.distance,
            },
        };
        let _: bool = self
            .call(
                "create_collection",
                self.client.put(self.collection_url(collection)).json(&body),
            )
            .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let result: CountResult = self
            .call(
                "count",
                self.client
                    .post(self.points_url(collection, "/count"))
                    .json(&json!({ "exact": true })),
            )
            .await?;
        Ok(result.count)
    }

    async fn scroll(
        &self,
        collection: &str,
        offset: Option<PointId>,
        limit: usize,
        with_payload: bool,
    ) -> Result<ScrollPage> {
        let body = ScrollRequest {
            limit,
            offset,
            with_payload,
            with_vector: false,
        };
        let result: ScrollResult = self
            .call(
                "scroll",
                self.client
                    .post(self.points_url(collection, "/scroll"))
                    .json(&body),
            )
            .await?;
        Ok(ScrollPage {
            points: result.points,
            next_offset: result.next_page_offset,
        })
    }

    #[instrument(level = "info", skip(self, points), fields(points = points.len()))]
    async fn upsert_points(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let _: Value = self
            .call(
                "upsert",
                self.client
                    .put(self.points_url(collection, "?wait=true"))
                    .json(&json!({ "points": points })),
            )
            .await?;
        Ok(())
    }

    async fn retrieve(&self, collection: &str, ids: &[PointId]) -> Result<Vec<StoredPoint>> {
        self.call(
            "retrieve",
            self.client.post(self.points_url(collection, "")).json(&json!({
                "ids": ids,
                "with_payload": true,
                "with_vector": true,
            })),
        )
        .await
    }

    #[instrument(level = "info", skip(self, ids), fields(ids = ids.len()))]
    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<()> {
        let _: Value = self
            .call(
                "delete",
                self.client
                    .post(self.points_url(collection, "/delete?wait=true"))
                    .json(&json!({ "points": ids })),
            )
            .await?;
        Ok(())
    }

    async fn overwrite_payload(
        &self,
        collection: &str,
        id: &PointId,
        payload: Map<String, Value>,
    ) -> Result<()> {
        let _: Value = self
            .call(
                "overwrite_payload",
                self.client
                    .put(self.points_url(collection, "/payload?wait=true"))
                    .json(&json!({ "payload": payload, "points": [id] })),
            )
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        self.call(
            "search",
            self.client
                .post(self.points_url(collection, "/search"))
                .json(&json!({
                    "vector": vector,
                    "limit": limit,
                    "with_payload": true,
                })),
        )
        .await
    }
}

/// Sample lines of a Prometheus text exposition. Comment lines and
/// samples carrying a timestamp are skipped.
pub fn parse_metrics(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split(' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(value), None) => Some((name.to_string(), value.to_string())),
                _ => None,
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
    #[serde(default)]
    time: f64,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: Distance,
}

#[derive(Debug, Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct ScrollRequest {
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<PointId>,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<StoredPoint>,
    #[serde(default)]
    next_page_offset: Option<PointId>,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}
