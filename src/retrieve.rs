//! Top-k semantic retrieval over the in-memory index.

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::index::SemanticIndex;
use crate::models::{RetrievalHit, RetrievalResult};

/// Embed `query` once and return the `k` most similar documents.
///
/// Hits are ordered by descending cosine similarity and ranked from 1.
/// Fewer than `k` hits come back only when the index is smaller than `k`.
/// A query vector whose length differs from the index dimensions is an
/// [`PipelineError::Embedding`] error.
pub async fn retrieve(
    index: &SemanticIndex,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
) -> Result<RetrievalResult> {
    let query_vec = embedder.embed(query).await?;
    if query_vec.len() != index.dims() {
        return Err(PipelineError::Embedding(format!(
            "query has {} dimensions, index expects {}",
            query_vec.len(),
            index.dims()
        )));
    }

    let hits = index
        .nearest(&query_vec, k)
        .into_iter()
        .enumerate()
        .map(|(i, (position, score))| RetrievalHit {
            rank: i + 1,
            score,
            document: index.documents()[position].clone(),
        })
        .collect::<Vec<_>>();

    if let Some(best) = hits.first() {
        debug!(
            hits = hits.len(),
            top = %best.document.record.title,
            score = best.score,
            "retrieved candidates"
        );
    }

    Ok(RetrievalResult { hits })
}
