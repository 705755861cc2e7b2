//! In-memory stand-ins for the network seams, shared by unit tests.

use crate::embedding::Embed;
use crate::error::{Error, Result};
use crate::fetcher::{FetchRequest, RawResponse, Transport};
use crate::models::Record;
use crate::normalizer::hash_to_id;
use crate::vector_store::{
    CollectionInfo, Point, PointId, ScoredPoint, ScrollPage, StoredPoint, VectorStore,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

pub fn ok(body: &str) -> Result<RawResponse> {
    status(200, body)
}

pub fn status(code: u16, body: &str) -> Result<RawResponse> {
    Ok(RawResponse {
        status: code,
        body: body.to_string(),
    })
}

/// A record whose id is derived from `"{year}-{co_id}"`.
pub fn record(year: &str, co_id: &str) -> Record {
    Record {
        id: hash_to_id(&format!("{year}-{co_id}")),
        source_name: "greenhousegas".to_string(),
        co_id: co_id.to_string(),
        year: year.to_string(),
        company_name: None,
        industry: Some("Cement".to_string()),
        url: "https://example.org/detail".to_string(),
        content: format!("disclosure of {co_id}\nscope 1: 10"),
        datetime: "2022-06-01 00:00:00".to_string(),
        timestamp: 1654041600,
        updated_at: "2024-01-01 08:00:00".to_string(),
    }
}

/// Replays scripted responses per URL; unscripted calls get a 404.
#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<RawResponse>>>>,
    sent: Mutex<Vec<FetchRequest>>,
}

impl FakeTransport {
    pub fn script(&self, url: &str, responses: Vec<Result<RawResponse>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|r| r.url == url).count()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse> {
        self.sent.lock().unwrap().push(request.clone());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| status(404, ""))
    }
}

/// Deterministic embedder: the vector depends only on the text.
pub struct FakeEmbedder {
    dim: usize,
    fail: bool,
    batches: Mutex<Vec<usize>>,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            fail: false,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(dim: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dim)
        }
    }

    pub fn vector_for(text: &str, dim: usize) -> Vec<f32> {
        let sum: u32 = text.bytes().map(u32::from).sum();
        (0..dim)
            .map(|j| ((sum + j as u32 * 7) % 97) as f32 + text.len() as f32)
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

impl Embed for FakeEmbedder {
    async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(Error::Embedding("provider unavailable".to_string()));
        }
        self.batches.lock().unwrap().push(inputs.len());
        Ok(inputs
            .iter()
            .map(|t| Self::vector_for(t, self.dim))
            .collect())
    }
}

type Collection = (CollectionInfo, BTreeMap<PointId, (Vec<f32>, Map<String, Value>)>);

/// Collections held in memory, scrolled in id order.
#[derive(Default)]
pub struct InMemoryStore {
    collections: Mutex<BTreeMap<String, Collection>>,
    payload_scrolls: Mutex<usize>,
}

impl InMemoryStore {
    /// Number of scroll calls that asked for payloads.
    pub fn payload_scrolls(&self) -> usize {
        *self.payload_scrolls.lock().unwrap()
    }
}

fn missing(operation: &'static str, collection: &str) -> Error {
    Error::VectorStore {
        operation,
        status: 404,
        body: format!("Collection `{collection}` doesn't exist!"),
    }
}

impl VectorStore for InMemoryStore {
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|(info, _)| *info))
    }

    async fn create_collection(&self, collection: &str, info: CollectionInfo) -> Result<()> {
        self.collections
            .lock()
            .unwrap()
            .insert(collection.to_string(), (info, BTreeMap::new()));
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|(_, points)| points.len())
            .ok_or_else(|| missing("count", collection))
    }

    async fn scroll(
        &self,
        collection: &str,
        offset: Option<PointId>,
        limit: usize,
        with_payload: bool,
    ) -> Result<ScrollPage> {
        if with_payload {
            *self.payload_scrolls.lock().unwrap() += 1;
        }
        let guard = self.collections.lock().unwrap();
        let (_, points) = guard
            .get(collection)
            .ok_or_else(|| missing("scroll", collection))?;
        let mut iter: Box<dyn Iterator<Item = (&PointId, &(Vec<f32>, Map<String, Value>))> + '_> =
            match offset {
                Some(start) => Box::new(points.range(start..)),
                None => Box::new(points.iter()),
            };
        let mut page = ScrollPage::default();
        for (id, (_, payload)) in iter.by_ref().take(limit) {
            page.points.push(StoredPoint {
                id: id.clone(),
                payload: with_payload.then(|| payload.clone()),
                vector: None,
            });
        }
        page.next_offset = iter.next().map(|(id, _)| id.clone());
        Ok(page)
    }

    async fn upsert_points(&self, collection: &str, new_points: Vec<Point>) -> Result<()> {
        let mut guard = self.collections.lock().unwrap();
        let (info, points) = guard
            .get_mut(collection)
            .ok_or_else(|| missing("upsert", collection))?;
        if let Some(bad) = new_points.iter().find(|p| p.vector.len() != info.size) {
            return Err(Error::VectorStore {
                operation: "upsert",
                status: 400,
                body: format!(
                    "Wrong input: Vector dimension error: expected dim: {}, got {}",
                    info.size,
                    bad.vector.len()
                ),
            });
        }
        for p in new_points {
            points.insert(p.id, (p.vector, p.payload));
        }
        Ok(())
    }

    async fn retrieve(&self, collection: &str, ids: &[PointId]) -> Result<Vec<StoredPoint>> {
        let guard = self.collections.lock().unwrap();
        let (_, points) = guard
            .get(collection)
            .ok_or_else(|| missing("retrieve", collection))?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                points.get(id).map(|(vector, payload)| StoredPoint {
                    id: id.clone(),
                    payload: Some(payload.clone()),
                    vector: Some(vector.clone()),
                })
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<()> {
        let mut guard = self.collections.lock().unwrap();
        let (_, points) = guard
            .get_mut(collection)
            .ok_or_else(|| missing("delete", collection))?;
        for id in ids {
            points.remove(id);
        }
        Ok(())
    }

    async fn overwrite_payload(
        &self,
        collection: &str,
        id: &PointId,
        payload: Map<String, Value>,
    ) -> Result<()> {
        let mut guard = self.collections.lock().unwrap();
        let (_, points) = guard
            .get_mut(collection)
            .ok_or_else(|| missing("overwrite_payload", collection))?;
        if let Some(entry) = points.get_mut(id) {
            entry.1 = payload;
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let guard = self.collections.lock().unwrap();
        let (_, points) = guard
            .get(collection)
            .ok_or_else(|| missing("search", collection))?;
        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .map(|(id, (v, payload))| ScoredPoint {
                id: id.clone(),
                score: cosine(vector, v),
                payload: Some(payload.clone()),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
