//! Semantic index construction and the reload-or-build branch.
//!
//! [`get_or_build_index`] is the only state transition the index has: a
//! persisted artifact is reused as-is, otherwise the catalog is fetched,
//! embedded in bulk, persisted and returned.
//!
//! ```text
//! storage.load() ──Loaded──────────────────────────────▶ index
//!       │
//!       └─Absent/Corrupt─▶ fetch_catalog ─▶ embed ─▶ save ─▶ index
//! ```

use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{fetch_catalog, CatalogSource};
use crate::config::Config;
use crate::embedding::{cosine_similarity, embed_in_batches, Embedder};
use crate::error::{PipelineError, Result};
use crate::models::{CatalogRecord, IndexedDocument};
use crate::store::{IndexLoad, IndexStorage};

/// A document whose vector does not match the index dimensionality.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("document {id} has {actual} dimensions, expected {expected}")]
pub struct DimensionMismatch {
    pub id: String,
    pub expected: usize,
    pub actual: usize,
}

/// An immutable, bulk-loaded collection of embedded documents.
///
/// Every document carries exactly one vector of length [`dims`](Self::dims).
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticIndex {
    model: String,
    dims: usize,
    built_at: i64,
    documents: Vec<IndexedDocument>,
}

impl SemanticIndex {
    pub fn new(
        model: impl Into<String>,
        dims: usize,
        built_at: i64,
        documents: Vec<IndexedDocument>,
    ) -> std::result::Result<Self, DimensionMismatch> {
        if let Some(doc) = documents.iter().find(|d| d.vector.len() != dims) {
            return Err(DimensionMismatch {
                id: doc.id.clone(),
                expected: dims,
                actual: doc.vector.len(),
            });
        }
        Ok(Self {
            model: model.into(),
            dims,
            built_at,
            documents,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Unix timestamp of the build that produced this index.
    pub fn built_at(&self) -> i64 {
        self.built_at
    }

    pub fn documents(&self) -> &[IndexedDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// SHA-256 over every document id and text, in index order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for doc in &self.documents {
            hasher.update(doc.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(doc.text.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Score every document against `query_vec` and keep the best `k`.
    ///
    /// Returns `(position, cosine similarity)` pairs, highest first. The
    /// sort is stable, so equal scores keep index order. A NaN score ranks
    /// below everything else.
    pub fn nearest(&self, query_vec: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let score = cosine_similarity(query_vec, &doc.vector);
                (i, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }
}

/// Parameters of a rebuild.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub page_count: u32,
    pub page_size: u32,
    pub request_delay: Duration,
    pub batch_size: usize,
}

impl BuildSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_count: config.catalog.page_count,
            page_size: config.catalog.page_size,
            request_delay: config.catalog.request_delay(),
            batch_size: config.embedding.batch_size,
        }
    }
}

/// How the returned index came to be.
#[derive(Debug)]
pub enum IndexOrigin {
    /// Reloaded from storage.
    Loaded,
    /// Rebuilt and persisted.
    Built,
    /// Rebuilt, but writing the artifact failed. The index is still usable.
    BuiltUnpersisted(PipelineError),
}

/// The index handed to the conversation, plus where it came from.
#[derive(Debug)]
pub struct LoadedIndex {
    pub index: SemanticIndex,
    pub origin: IndexOrigin,
}

/// Load the persisted index, or rebuild it from the catalog.
///
/// # Errors
///
/// Catalog and embedding failures abort the rebuild and nothing is
/// persisted. A failed write is not an error; it is reported through
/// [`IndexOrigin::BuiltUnpersisted`].
pub async fn get_or_build_index(
    storage: &dyn IndexStorage,
    catalog: &dyn CatalogSource,
    embedder: &dyn Embedder,
    settings: &BuildSettings,
) -> Result<LoadedIndex> {
    match storage.load().await {
        IndexLoad::Loaded(index) => {
            info!(
                documents = index.len(),
                model = index.model(),
                location = %storage.describe(),
                "loaded semantic index"
            );
            if index.dims() != embedder.dims() {
                warn!(
                    index_dims = index.dims(),
                    embedder_dims = embedder.dims(),
                    location = %storage.describe(),
                    "persisted index does not match the embedding dimensions, rebuilding"
                );
            } else {
                if index.model() != embedder.model_name() {
                    warn!(
                        index_model = index.model(),
                        embedder_model = embedder.model_name(),
                        "persisted index was built with a different embedding model; delete it to rebuild"
                    );
                }
                return Ok(LoadedIndex {
                    index,
                    origin: IndexOrigin::Loaded,
                });
            }
        }
        IndexLoad::Absent => {
            info!(location = %storage.describe(), "no semantic index found, building");
        }
        IndexLoad::Corrupt(reason) => {
            warn!(location = %storage.describe(), %reason, "semantic index unreadable, rebuilding");
        }
    }

    let records = fetch_catalog(
        catalog,
        settings.page_count,
        settings.page_size,
        settings.request_delay,
    )
    .await?;
    let index = build_index(records, embedder, settings.batch_size).await?;

    let origin = match storage.save(&index).await {
        Ok(()) => {
            info!(documents = index.len(), location = %storage.describe(), "semantic index saved");
            IndexOrigin::Built
        }
        Err(e) => IndexOrigin::BuiltUnpersisted(e),
    };

    Ok(LoadedIndex { index, origin })
}

/// Embed one document per record and assemble the index.
pub async fn build_index(
    records: Vec<CatalogRecord>,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<SemanticIndex> {
    let texts: Vec<String> = records.iter().map(CatalogRecord::document_text).collect();
    let vectors = embed_in_batches(embedder, &texts, batch_size).await?;

    let documents = records
        .into_iter()
        .zip(vectors)
        .map(|(record, vector)| IndexedDocument::new(record, vector))
        .collect();

    SemanticIndex::new(
        embedder.model_name(),
        embedder.dims(),
        chrono::Utc::now().timestamp(),
        documents,
    )
    .map_err(|e| PipelineError::Embedding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: u64, vector: Vec<f32>) -> IndexedDocument {
        let record: CatalogRecord = serde_json::from_value(serde_json::json!({
            "mal_id": id,
            "title": format!("Title {}", id),
            "synopsis": "s",
        }))
        .unwrap();
        IndexedDocument::new(record, vector)
    }

    #[test]
    fn rejects_wrong_dimensions() {
        let err = SemanticIndex::new("m", 2, 0, vec![doc(1, vec![1.0, 0.0]), doc(2, vec![1.0])])
            .unwrap_err();
        assert_eq!(
            err,
            DimensionMismatch {
                id: "2".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn nearest_orders_by_similarity() {
        let index = SemanticIndex::new(
            "m",
            2,
            0,
            vec![
                doc(1, vec![0.0, 1.0]),
                doc(2, vec![1.0, 0.0]),
                doc(3, vec![1.0, 1.0]),
            ],
        )
        .unwrap();
        let hits = index.nearest(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn nearest_keeps_index_order_on_ties() {
        let index = SemanticIndex::new(
            "m",
            2,
            0,
            vec![doc(1, vec![1.0, 0.0]), doc(2, vec![2.0, 0.0])],
        )
        .unwrap();
        let hits = index.nearest(&[1.0, 0.0], 5);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn nan_scores_rank_last() {
        let index = SemanticIndex::new(
            "m",
            2,
            0,
            vec![
                doc(1, vec![f32::NAN, 1.0]),
                doc(2, vec![0.0, 1.0]),
                doc(3, vec![1.0, 0.0]),
            ],
        )
        .unwrap();
        let hits = index.nearest(&[1.0, 0.0], 3);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(hits[2].1, f32::NEG_INFINITY);
    }

    #[test]
    fn digest_tracks_texts() {
        let a = SemanticIndex::new("m", 1, 0, vec![doc(1, vec![1.0])]).unwrap();
        let b = SemanticIndex::new("m", 1, 99, vec![doc(1, vec![0.5])]).unwrap();
        let c = SemanticIndex::new("m", 1, 0, vec![doc(2, vec![1.0])]).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
