//! Core data models used throughout the answer pipeline.
//!
//! These types represent the catalog records, indexed documents, turns and
//! retrieval results that flow from ingestion to the conversation loop.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named reference inside a catalog record (genre, studio, theme).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub mal_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Remaining upstream fields, such as the entry `type`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One anime as returned by the catalog API.
///
/// The fields the pipeline reads are typed; everything else the API sends
/// is kept in `extra` so a record survives a persist/reload cycle intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub mal_id: u64,
    pub title: String,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title_english: Option<String>,
    #[serde(default)]
    pub title_japanese: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub episodes: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<NamedEntry>,
    #[serde(default)]
    pub studios: Vec<NamedEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogRecord {
    /// The text that gets embedded for this record: `"{title}:\n{synopsis}"`.
    ///
    /// Retrieval quality depends on this exact shape, so it must stay stable
    /// across builds. A missing synopsis renders as an empty string.
    pub fn document_text(&self) -> String {
        format!(
            "{}:\n{}",
            self.title,
            self.synopsis.as_deref().unwrap_or_default()
        )
    }
}

/// Pagination block of a catalog page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub last_visible_page: Option<u32>,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub current_page: Option<u32>,
}

/// One page of the catalog API response.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub pagination: Pagination,
    pub data: Vec<CatalogRecord>,
}

/// A record paired with its embedded text and vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    /// Stable identifier, the record's `mal_id` as a string.
    pub id: String,
    pub text: String,
    pub record: CatalogRecord,
    pub vector: Vec<f32>,
}

impl IndexedDocument {
    pub fn new(record: CatalogRecord, vector: Vec<f32>) -> Self {
        Self {
            id: record.mal_id.to_string(),
            text: record.document_text(),
            record,
            vector,
        }
    }
}

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub input: String,
    pub answer: String,
}

/// Ordered turns of one conversation. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Render every turn as a `User:`/`Bot:` line pair, oldest first.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("User: {}\nBot: {}", turn.input, turn.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A ranked retrieval hit.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    /// 1-based rank, 1 is the closest match.
    pub rank: usize,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub document: IndexedDocument,
}

/// Hits ordered most-similar first.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|hit| hit.document.text.as_str())
    }
}
