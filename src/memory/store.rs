use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::MemoryConfig;
use crate::error::{HiveError, HiveResult};
use crate::persistence::{NewFragment, Persistence};
use crate::types::{BotId, FragmentSource, MemoryFragment};

use super::embedding::{Embedder, Embedding};
use super::scoring::{self, ScoreWeights};
use super::tokenizer;

/// A retrieved fragment with the score it was ranked by
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub fragment: MemoryFragment,
    pub score: f64,
}

/// Per-bot memory over the persistence collaborator.
///
/// Each bot has its own reader/writer lock: retrievals share it, while
/// store and compaction take it exclusively, so a fragment being ranked is
/// never evicted underneath the ranking.
pub struct MemoryStore {
    persistence: Arc<dyn Persistence>,
    embedder: Option<Arc<dyn Embedder>>,
    clock: Arc<dyn Clock>,
    config: MemoryConfig,
    locks: DashMap<BotId, Arc<RwLock<()>>>,
}

impl MemoryStore {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        embedder: Option<Arc<dyn Embedder>>,
        clock: Arc<dyn Clock>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            persistence,
            embedder,
            clock,
            config,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, bot_id: BotId) -> Arc<RwLock<()>> {
        self.locks.entry(bot_id).or_default().clone()
    }

    fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            similarity: self.config.similarity_weight,
            recency: self.config.recency_weight,
        }
    }

    /// Embed with the configured timeout; any failure yields `None`
    async fn embed(&self, text: &str) -> Option<Embedding> {
        let embedder = self.embedder.as_ref()?;
        let timeout = Duration::from_millis(self.config.embed_timeout_ms);
        match tokio::time::timeout(timeout, embedder.embed(text)).await {
            Ok(Ok(embedding)) => Some(embedding),
            Ok(Err(e)) => {
                warn!(embedder = embedder.name(), error = %e, "embedding failed, storing keyword-only");
                None
            }
            Err(_) => {
                warn!(embedder = embedder.name(), timeout_ms = self.config.embed_timeout_ms, "embedding timed out");
                None
            }
        }
    }

    pub async fn store(
        &self,
        bot_id: BotId,
        text: &str,
        source: FragmentSource,
    ) -> HiveResult<MemoryFragment> {
        self.store_weighted(bot_id, text, source, 1.0).await
    }

    pub async fn store_weighted(
        &self,
        bot_id: BotId,
        text: &str,
        source: FragmentSource,
        weight: f32,
    ) -> HiveResult<MemoryFragment> {
        let embedding = self.embed(text).await;
        let new = NewFragment {
            bot_id,
            text: text.to_string(),
            embedding,
            keywords: tokenizer::keywords(text),
            source,
            weight,
            half_life_hours: self.config.half_life_hours,
            created_at: self.clock.now(),
        };

        let lock = self.lock_for(bot_id);
        let _guard = lock.write().await;
        let stored = self
            .persistence
            .insert_fragment(new)
            .await
            .map_err(unavailable)?;
        self.compact_locked(bot_id).await?;
        Ok(stored)
    }

    /// Top `k` fragments for `query`, freshly ranked
    pub async fn retrieve(
        &self,
        bot_id: BotId,
        query: &str,
        k: usize,
    ) -> HiveResult<Vec<MemoryFragment>> {
        Ok(self
            .retrieve_scored(bot_id, query, k)
            .await?
            .into_iter()
            .map(|s| s.fragment)
            .collect())
    }

    /// Ordered by non-increasing score, ties broken by ascending fragment id.
    /// Capped to `k` results and to the configured character budget.
    pub async fn retrieve_scored(
        &self,
        bot_id: BotId,
        query: &str,
        k: usize,
    ) -> HiveResult<Vec<ScoredFragment>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query).await;
        let query_keywords = tokenizer::keywords(query);

        let lock = self.lock_for(bot_id);
        let _guard = lock.read().await;

        let candidates = match &query_embedding {
            Some(embedding) => {
                let mut candidates = self
                    .persistence
                    .nearest_fragments(bot_id, embedding, self.config.ann_candidates)
                    .await
                    .map_err(unavailable)?;
                candidates.extend(
                    self.persistence
                        .keyword_only_fragments(bot_id)
                        .await
                        .map_err(unavailable)?,
                );
                candidates
            }
            None => self
                .persistence
                .fragments_for(bot_id)
                .await
                .map_err(unavailable)?,
        };

        let now = self.clock.now();
        let weights = self.weights();
        let mut seen = HashSet::new();
        let mut scored: Vec<ScoredFragment> = candidates
            .into_iter()
            .filter(|f| seen.insert(f.id))
            .map(|fragment| {
                let sim = scoring::similarity(query_embedding.as_ref(), &query_keywords, &fragment);
                let score = scoring::relevance_score(
                    sim,
                    scoring::age_hours(fragment.created_at, now),
                    fragment.half_life_hours,
                    fragment.weight as f64,
                    weights,
                );
                ScoredFragment { fragment, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.fragment.id.cmp(&b.fragment.id))
        });

        let mut used_chars = 0usize;
        let mut result = Vec::new();
        for item in scored {
            if result.len() >= k {
                break;
            }
            let len = item.fragment.text.chars().count();
            if used_chars + len > self.config.char_budget {
                break;
            }
            used_chars += len;
            result.push(item);
        }
        debug!(%bot_id, returned = result.len(), "memory retrieved");
        Ok(result)
    }

    /// Evict fragments beyond the retention cap; returns how many were removed
    pub async fn compact(&self, bot_id: BotId) -> HiveResult<usize> {
        let lock = self.lock_for(bot_id);
        let _guard = lock.write().await;
        self.compact_locked(bot_id).await
    }

    pub async fn compact_all(&self) -> HiveResult<usize> {
        let bots = self.persistence.list_bots().await.map_err(unavailable)?;
        let mut evicted = 0;
        for bot in bots {
            evicted += self.compact(bot.id).await?;
        }
        Ok(evicted)
    }

    /// Caller must hold the bot's write lock
    async fn compact_locked(&self, bot_id: BotId) -> HiveResult<usize> {
        let fragments = self
            .persistence
            .fragments_for(bot_id)
            .await
            .map_err(unavailable)?;
        let cap = self.config.retention_cap;
        if fragments.len() <= cap {
            return Ok(0);
        }

        let now = self.clock.now();
        let mut ranked: Vec<(f64, &MemoryFragment)> = fragments
            .iter()
            .map(|f| (scoring::retention_score(f, now), f))
            .collect();
        // Lowest retention first; among equals the oldest goes first
        ranked.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.created_at.cmp(&b.1.created_at))
                .then(a.1.id.cmp(&b.1.id))
        });
        let victims: Vec<u64> = ranked
            .iter()
            .take(fragments.len() - cap)
            .map(|(_, f)| f.id)
            .collect();

        let evicted = self
            .persistence
            .evict_fragments(bot_id, &victims)
            .await
            .map_err(unavailable)?;
        debug!(%bot_id, evicted, "memory compacted");
        Ok(evicted)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }
}

fn unavailable(e: HiveError) -> HiveError {
    match e {
        HiveError::MemoryUnavailable(_) => e,
        other => HiveError::MemoryUnavailable(other.to_string()),
    }
}
