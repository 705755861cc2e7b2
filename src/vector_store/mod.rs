//! Vector store gateway.
//!
//! [`VectorStore`] is the raw point API of the remote store (implemented
//! for Qdrant in [`qdrant`]). The free functions on top of it carry the
//! pipeline's rules:
//!
//! - [`ensure_collection`]: reuse or create, never silently re-shape
//! - [`upsert`]: write only ids the collection does not hold yet, so a
//!   re-run over already ingested data leaves the store unchanged
//! - [`repair`] / [`dedupe`]: maintenance passes over the whole collection
//!
//! Finding existing ids scrolls the entire collection, which is fine for a
//! daily batch and wrong for anything high-frequency.

pub mod qdrant;

use crate::error::{Error, Result};
use crate::models::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, instrument, warn};

pub use qdrant::QdrantClient;

const SCROLL_PAGE: usize = 256;
const UPSERT_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Euclid,
    Dot,
    Manhattan,
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Distance::Cosine => "Cosine",
            Distance::Euclid => "Euclid",
            Distance::Dot => "Dot",
            Distance::Manhattan => "Manhattan",
        };
        f.write_str(s)
    }
}

/// Vector parameters fixed when a collection is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub size: usize,
    pub distance: Distance,
}

/// Point ids are unsigned integers for everything this crate writes; other
/// writers may have used UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

impl PointId {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PointId::Num(n) => Some(*n),
            PointId::Uuid(_) => None,
        }
    }
}

impl From<u64> for PointId {
    fn from(n: u64) -> Self {
        PointId::Num(n)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{n}"),
            PointId::Uuid(s) => f.write_str(s),
        }
    }
}

/// A point on its way into the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A point as the store returns it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredPoint {
    pub id: PointId,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredPoint {
    pub id: PointId,
    pub score: f32,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<StoredPoint>,
    pub next_offset: Option<PointId>,
}

/// Point-level operations of the remote store.
///
/// Implementations map one method to one remote call and do not retry.
/// Every method except [`VectorStore::collection_info`] fails with
/// [`Error::VectorStore`] when the collection does not exist.
pub trait VectorStore {
    /// Vector parameters of `collection`.
    ///
    /// # Returns
    ///
    /// `None` when the collection does not exist.
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>>;

    /// Create `collection` with fixed vector parameters.
    async fn create_collection(&self, collection: &str, info: CollectionInfo) -> Result<()>;

    /// Exact number of points in `collection`.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// One page of points, without vectors.
    ///
    /// # Arguments
    ///
    /// * `offset` - Id to start from, as returned in the previous page's
    ///   `next_offset`; `None` for the first page
    /// * `limit` - Maximum number of points in the page
    /// * `with_payload` - Whether payloads are returned; id-only scans pass
    ///   `false` so stored documents are not downloaded
    async fn scroll(
        &self,
        collection: &str,
        offset: Option<PointId>,
        limit: usize,
        with_payload: bool,
    ) -> Result<ScrollPage>;

    /// Insert or replace `points`. Returns once the write is visible.
    async fn upsert_points(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    /// Points with payloads and vectors; unknown ids are left out.
    async fn retrieve(&self, collection: &str, ids: &[PointId]) -> Result<Vec<StoredPoint>>;

    /// Delete `ids`. Unknown ids are ignored.
    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<()>;

    /// Replace the whole payload of one point.
    async fn overwrite_payload(
        &self,
        collection: &str,
        id: &PointId,
        payload: Map<String, Value>,
    ) -> Result<()>;

    /// The `limit` points closest to `vector`, best first, with payloads.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;
}

/// Reuse the collection if present, create it otherwise. An existing
/// collection with different vector parameters is an error.
#[instrument(level = "info", skip(store))]
pub async fn ensure_collection<V: VectorStore>(
    store: &V,
    collection: &str,
    size: usize,
    distance: Distance,
) -> Result<CollectionInfo> {
    let wanted = CollectionInfo { size, distance };
    match store.collection_info(collection).await? {
        Some(existing) if existing == wanted => Ok(existing),
        Some(existing) => Err(Error::DimensionMismatch {
            collection: collection.to_string(),
            expected_size: existing.size,
            expected_distance: existing.distance.to_string(),
            actual_size: size,
            actual_distance: distance.to_string(),
        }),
        None => {
            store.create_collection(collection, wanted).await?;
            info!("Created collection");
            Ok(wanted)
        }
    }
}

/// Every point in the collection, following scroll offsets to the end.
pub async fn scroll_all<V: VectorStore>(
    store: &V,
    collection: &str,
    with_payload: bool,
) -> Result<Vec<StoredPoint>> {
    let mut out = Vec::new();
    let mut offset = None;
    loop {
        let page = store
            .scroll(collection, offset, SCROLL_PAGE, with_payload)
            .await?;
        out.extend(page.points);
        match page.next_offset {
            Some(next) => offset = Some(next),
            None => break,
        }
    }
    Ok(out)
}

/// Numeric ids currently stored in the collection.
pub async fn existing_ids<V: VectorStore>(store: &V, collection: &str) -> Result<HashSet<u64>> {
    Ok(scroll_all(store, collection, false)
        .await?
        .iter()
        .filter_map(|p| p.id.as_u64())
        .collect())
}

/// Insert the records whose `id` the collection does not hold yet.
///
/// # Arguments
///
/// * `records` - Records with their ids already derived
/// * `embeddings` - One vector per record, in the same order
///
/// # Returns
///
/// The number of points written. Records already stored are skipped.
///
/// # Errors
///
/// [`Error::LengthMismatch`] when the two slices differ in length,
/// [`Error::DuplicateId`] when two records share an id, or the first failing
/// store call. Batches written before that call stay written.
#[instrument(level = "info", skip(store, records, embeddings), fields(records = records.len()))]
pub async fn upsert<V: VectorStore>(
    store: &V,
    collection: &str,
    records: &[Record],
    embeddings: &[Vec<f32>],
) -> Result<usize> {
    if records.len() != embeddings.len() {
        return Err(Error::LengthMismatch {
            records: records.len(),
            embeddings: embeddings.len(),
        });
    }
    let mut seen = HashSet::with_capacity(records.len());
    if let Some(dup) = records.iter().find(|r| !seen.insert(r.id)) {
        return Err(Error::DuplicateId(dup.id));
    }
    let Some(first) = embeddings.first() else {
        return Ok(0);
    };

    let size = first.len();
    let info = ensure_collection(store, collection, size, Distance::Cosine).await?;
    if let Some(bad) = embeddings.iter().find(|e| e.len() != info.size) {
        return Err(Error::DimensionMismatch {
            collection: collection.to_string(),
            expected_size: info.size,
            expected_distance: info.distance.to_string(),
            actual_size: bad.len(),
            actual_distance: Distance::Cosine.to_string(),
        });
    }

    let existing = existing_ids(store, collection).await?;
    info!(existing = existing.len(), "Loaded existing ids");

    let fresh: Vec<Point> = records
        .iter()
        .zip(embeddings)
        .filter(|(r, _)| !existing.contains(&r.id))
        .map(|(r, e)| Point {
            id: PointId::Num(r.id),
            vector: e.clone(),
            payload: r.payload(),
        })
        .collect();
    let written = fresh.len();

    let mut batch = Vec::with_capacity(UPSERT_BATCH.min(written));
    for point in fresh {
        batch.push(point);
        if batch.len() == UPSERT_BATCH {
            store
                .upsert_points(collection, std::mem::take(&mut batch))
                .await?;
        }
    }
    if !batch.is_empty() {
        store.upsert_points(collection, batch).await?;
    }

    info!(
        written,
        skipped = records.len() - written,
        "Upserted new points"
    );
    Ok(written)
}

/// Delete points whose payload lacks `required_field`. Returns the ids
/// removed.
///
/// # Errors
///
/// Fails on the first scroll or delete the store rejects.
#[instrument(level = "info", skip(store))]
pub async fn repair<V: VectorStore>(
    store: &V,
    collection: &str,
    required_field: &str,
) -> Result<Vec<PointId>> {
    let broken: Vec<PointId> = scroll_all(store, collection, true)
        .await?
        .into_iter()
        .filter(|p| {
            p.payload
                .as_ref()
                .is_none_or(|payload| !payload.contains_key(required_field))
        })
        .map(|p| p.id)
        .collect();
    if !broken.is_empty() {
        warn!(count = broken.len(), "Deleting points with malformed payload");
        store.delete(collection, &broken).await?;
    }
    Ok(broken)
}

/// Delete every point whose values for `fields` repeat those of an earlier
/// point in scroll order. Returns the ids removed.
///
/// # Errors
///
/// Fails on the first scroll or delete the store rejects. Nothing is
/// deleted when the scroll fails.
#[instrument(level = "info", skip(store))]
pub async fn dedupe<V: VectorStore>(
    store: &V,
    collection: &str,
    fields: &[String],
) -> Result<Vec<PointId>> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for point in scroll_all(store, collection, true).await? {
        let key: Vec<Value> = fields
            .iter()
            .map(|f| {
                point
                    .payload
                    .as_ref()
                    .and_then(|p| p.get(f))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        if !seen.insert(Value::Array(key).to_string()) {
            duplicates.push(point.id);
        }
    }
    if !duplicates.is_empty() {
        info!(count = duplicates.len(), "Deleting duplicate payloads");
        store.delete(collection, &duplicates).await?;
    }
    Ok(duplicates)
}

/// Set one payload key on one point and return the point as stored
/// afterwards.
///
/// # Returns
///
/// `None` when no point has `id`; the store is left untouched then.
///
/// # Errors
///
/// Any failed retrieve or payload overwrite.
#[instrument(level = "info", skip(store, value))]
pub async fn update_payload<V: VectorStore>(
    store: &V,
    collection: &str,
    id: u64,
    key: &str,
    value: Value,
) -> Result<Option<StoredPoint>> {
    let id = PointId::Num(id);
    let Some(point) = store.retrieve(collection, &[id.clone()]).await?.pop() else {
        warn!("Point not found");
        return Ok(None);
    };
    let mut payload = point.payload.unwrap_or_default();
    payload.insert(key.to_string(), value);
    store.overwrite_payload(collection, &id, payload).await?;
    Ok(store.retrieve(collection, &[id]).await?.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryStore, record};
    use serde_json::json;

    fn vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32; dim]).collect()
    }

    #[tokio::test]
    async fn test_upsert_creates_collection_and_writes_all() {
        let store = InMemoryStore::default();
        let records = vec![record("111", "2330"), record("111", "1101")];

        let written = upsert(&store, "esg", &records, &vectors(2, 3)).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.count("esg").await.unwrap(), 2);
        assert_eq!(
            store.collection_info("esg").await.unwrap(),
            Some(CollectionInfo {
                size: 3,
                distance: Distance::Cosine
            })
        );
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        let store = InMemoryStore::default();
        let records = vec![record("111", "2330"), record("111", "1101")];

        upsert(&store, "esg", &records, &vectors(2, 3)).await.unwrap();
        let after_first = store.count("esg").await.unwrap();
        let written = upsert(&store, "esg", &records, &vectors(2, 3)).await.unwrap();

        assert_eq!(written, 0);
        assert_eq!(store.count("esg").await.unwrap(), after_first);
        // the id scan never pulls stored documents
        assert_eq!(store.payload_scrolls(), 0);
    }

    #[tokio::test]
    async fn test_upsert_only_writes_new_ids() {
        let store = InMemoryStore::default();
        upsert(&store, "esg", &[record("111", "2330")], &vectors(1, 3))
            .await
            .unwrap();

        let records = vec![record("111", "2330"), record("111", "2454")];
        let written = upsert(&store, "esg", &records, &vectors(2, 3)).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.count("esg").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_length_mismatch_fails_fast() {
        let store = InMemoryStore::default();
        let records = vec![record("111", "2330"), record("111", "1101")];

        let err = upsert(&store, "esg", &records, &vectors(1, 3)).await;
        assert!(matches!(
            err,
            Err(Error::LengthMismatch {
                records: 2,
                embeddings: 1
            })
        ));
        assert_eq!(store.collection_info("esg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_rejects_duplicate_ids() {
        let store = InMemoryStore::default();
        let records = vec![record("111", "2330"), record("111", "2330")];
        let err = upsert(&store, "esg", &records, &vectors(2, 3)).await;
        assert!(matches!(err, Err(Error::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_upsert_dimension_mismatch_is_fatal() {
        let store = InMemoryStore::default();
        upsert(&store, "esg", &[record("111", "2330")], &vectors(1, 3))
            .await
            .unwrap();

        let err = upsert(&store, "esg", &[record("111", "1101")], &vectors(1, 5)).await;
        assert!(matches!(
            err,
            Err(Error::DimensionMismatch {
                expected_size: 3,
                actual_size: 5,
                ..
            })
        ));
        assert_eq!(store.count("esg").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_payload_excludes_id() {
        let store = InMemoryStore::default();
        let rec = record("111", "2330");
        upsert(&store, "esg", &[rec.clone()], &vectors(1, 2))
            .await
            .unwrap();

        let got = store.retrieve("esg", &[rec.id.into()]).await.unwrap();
        let payload = got[0].payload.as_ref().unwrap();
        assert!(!payload.contains_key("id"));
        assert_eq!(payload["co_id"], "2330");
    }

    #[tokio::test]
    async fn test_scroll_all_follows_pages() {
        let store = InMemoryStore::default();
        let records: Vec<Record> = (0..600)
            .map(|i| record("111", &format!("{i:04}")))
            .collect();
        upsert(&store, "esg", &records, &vectors(600, 2)).await.unwrap();

        assert_eq!(existing_ids(&store, "esg").await.unwrap().len(), 600);
    }

    #[tokio::test]
    async fn test_id_scan_skips_payloads() {
        let store = InMemoryStore::default();
        upsert(&store, "esg", &[record("111", "2330")], &vectors(1, 2))
            .await
            .unwrap();

        let bare = scroll_all(&store, "esg", false).await.unwrap();
        assert!(bare.iter().all(|p| p.payload.is_none()));
        assert_eq!(store.payload_scrolls(), 0);

        let full = scroll_all(&store, "esg", true).await.unwrap();
        assert!(full[0].payload.is_some());
        assert_eq!(store.payload_scrolls(), 1);
    }

    #[tokio::test]
    async fn test_repair_deletes_points_missing_field() {
        let store = InMemoryStore::default();
        upsert(&store, "esg", &[record("111", "2330")], &vectors(1, 2))
            .await
            .unwrap();
        store
            .upsert_points(
                "esg",
                vec![Point {
                    id: PointId::Num(7),
                    vector: vec![0.0, 0.0],
                    payload: Map::new(),
                }],
            )
            .await
            .unwrap();

        let removed = repair(&store, "esg", "source_name").await.unwrap();
        assert_eq!(removed, vec![PointId::Num(7)]);
        assert_eq!(store.count("esg").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dedupe_keeps_first_by_field_subset() {
        let store = InMemoryStore::default();
        let payload = |co: &str| {
            let mut m = Map::new();
            m.insert("co_id".to_string(), json!(co));
            m.insert("year".to_string(), json!("111"));
            m
        };
        let point = |id: u64, co: &str| Point {
            id: PointId::Num(id),
            vector: vec![0.0],
            payload: payload(co),
        };
        let points = vec![point(1, "2330"), point(2, "2330"), point(3, "1101")];
        store
            .create_collection(
                "esg",
                CollectionInfo {
                    size: 1,
                    distance: Distance::Cosine,
                },
            )
            .await
            .unwrap();
        store.upsert_points("esg", points).await.unwrap();

        let fields = vec!["co_id".to_string(), "year".to_string()];
        let removed = dedupe(&store, "esg", &fields).await.unwrap();
        assert_eq!(removed, vec![PointId::Num(2)]);
        assert_eq!(store.count("esg").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_payload_round_trip() {
        let store = InMemoryStore::default();
        let rec = record("111", "2330");
        upsert(&store, "esg", &[rec.clone()], &vectors(1, 2))
            .await
            .unwrap();

        let updated = update_payload(&store, "esg", rec.id, "industry", json!("Chips"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.vector.as_ref().map(Vec::len), Some(2));
        let payload = updated.payload.unwrap();
        assert_eq!(payload["industry"], "Chips");
        assert_eq!(payload["co_id"], "2330");

        assert!(update_payload(&store, "esg", 1, "k", json!(1)).await.unwrap().is_none());
    }
}
