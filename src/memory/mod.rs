//! Per-bot contextual memory.
//!
//! Fragments are ranked by `(w_sim · similarity + w_rec · recency) · weight`
//! where recency halves every half-life. Similarity is cosine over embeddings,
//! or keyword Jaccard overlap when either side has no embedding.

mod embedding;
mod scoring;
mod store;
mod tokenizer;

pub use embedding::{Embedder, Embedding, HashingEmbedder, OpenAIEmbedder};
pub use scoring::{jaccard, recency, relevance_score, retention_score, ScoreWeights};
pub use store::{MemoryStore, ScoredFragment};
pub use tokenizer::{keywords, split_words};
