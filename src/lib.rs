//! # Anime Chat
//!
//! A conversational, retrieval-augmented anime recommender.
//!
//! A catalog of top-ranked anime is fetched once from a paginated public API,
//! embedded into a semantic index and persisted to a single SQLite file.
//! Each user turn is condensed into a standalone question, matched against
//! the index and answered by a language model that may only recommend from
//! the retrieved candidates.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Catalog  │──▶│ Index build  │──▶│ SQLite index │
//! │ (Jikan)  │   │ embed + save │   │   artifact   │
//! └──────────┘   └──────────────┘   └──────┬───────┘
//!                                          │ load
//!                                          ▼
//!   stdin ──▶ condense ──▶ retrieve ──▶ generate ──▶ stdout
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`models`] | Catalog records, documents, turns, retrieval hits |
//! | [`error`] | Pipeline error type |
//! | [`catalog`] | Rate-limited catalog fetching |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Completion provider abstraction |
//! | [`index`] | Semantic index and the load-or-build step |
//! | [`store`] | SQLite persistence of the index |
//! | [`condense`] | Follow-up question condensation |
//! | [`retrieve`] | Top-k similarity search |
//! | [`answer`] | Grounded answer generation |
//! | [`conversation`] | The interactive loop |

pub mod answer;
pub mod catalog;
pub mod completion;
pub mod condense;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
mod http;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod store;
