//! Text → vector conversion with chunking for long inputs.
//!
//! Providers implement [`Embed`] and only ever see texts no longer than
//! `max_chunk_length` characters. [`EmbeddingClient`] does the splitting,
//! batching and recombination:
//!
//! 1. every text longer than the limit is cut into contiguous,
//!    non-overlapping chunks of `max_chunk_length` characters
//! 2. all chunks are sent to the provider in batches of `batch_size`
//! 3. the chunk vectors of each text are averaged element-wise
//!
//! Output vector `i` always belongs to input text `i`.

pub mod openai;

use crate::error::{Error, Result};
use tracing::{debug, info, instrument};

pub use openai::OpenAiEmbedder;

/// A remote or local embedding model.
pub trait Embed {
    /// One vector per input, in input order.
    async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone)]
pub struct EmbeddingClient<E> {
    provider: E,
    max_chunk_length: usize,
    batch_size: usize,
}

impl<E: Embed> EmbeddingClient<E> {
    /// Wrap `provider`.
    ///
    /// # Arguments
    ///
    /// * `provider` - The model behind the client
    /// * `max_chunk_length` - Longest text, in characters, sent in one input
    /// * `batch_size` - Inputs per provider call
    pub fn new(provider: E, max_chunk_length: usize, batch_size: usize) -> Self {
        Self {
            provider,
            max_chunk_length: max_chunk_length.max(1),
            batch_size: batch_size.max(1),
        }
    }

    #[cfg(test)]
    pub fn provider(&self) -> &E {
        &self.provider
    }

    /// One vector per text, in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or returns the wrong number
    /// of vectors, or if chunk vectors of one text differ in width.
    #[instrument(level = "info", skip_all, fields(texts = texts.len()))]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut chunks: Vec<&str> = Vec::new();
        let mut owners: Vec<usize> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            for chunk in chunk_text(text, self.max_chunk_length) {
                chunks.push(chunk);
                owners.push(i);
            }
        }
        debug!(chunks = chunks.len(), "Split texts into chunks");

        let mut chunk_vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let vectors = self.provider.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            chunk_vectors.extend(vectors);
        }

        let mut grouped: Vec<Vec<Vec<f32>>> = vec![Vec::new(); texts.len()];
        for (owner, vector) in owners.into_iter().zip(chunk_vectors) {
            grouped[owner].push(vector);
        }
        let out = grouped
            .iter()
            .map(|vectors| mean_vector(vectors))
            .collect::<Result<Vec<_>>>()?;

        info!(vectors = out.len(), "Embedded texts");
        Ok(out)
    }
}

/// Contiguous pieces of at most `max_chars` characters. Short (and empty)
/// text comes back as a single piece.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text];
    }
    let mut out = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_chars {
            out.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    out.push(&text[start..]);
    out
}

/// Element-wise mean of equally sized vectors.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = vectors.first() else {
        return Err(Error::Embedding("no vectors to average".to_string()));
    };
    let dim = first.len();
    let mut sum = vec![0f32; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(Error::Embedding(format!(
                "chunk vectors disagree on width ({} vs {})",
                dim,
                v.len()
            )));
        }
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    Ok(sum.into_iter().map(|x| x / n).collect())
}
