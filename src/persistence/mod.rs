//! Storage collaborator.
//!
//! The core never talks to a database directly: bots, activity records and
//! memory fragments go through the [`Persistence`] trait. [`InMemoryPersistence`]
//! is the shipped implementation, optionally mirroring every activity record
//! to a JSONL [`ActivityJournal`].

mod journal;
mod memory;

pub use journal::ActivityJournal;
pub use memory::InMemoryPersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::HiveResult;
use crate::memory::Embedding;
use crate::types::*;

/// A memory fragment before persistence assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewFragment {
    pub bot_id: BotId,
    pub text: String,
    pub embedding: Option<Embedding>,
    pub keywords: Vec<String>,
    pub source: FragmentSource,
    pub weight: f32,
    pub half_life_hours: f64,
    pub created_at: DateTime<Utc>,
}

impl NewFragment {
    pub fn into_fragment(self, id: u64) -> MemoryFragment {
        MemoryFragment {
            id,
            bot_id: self.bot_id,
            text: self.text,
            embedding: self.embedding,
            keywords: self.keywords,
            source: self.source,
            weight: self.weight,
            half_life_hours: self.half_life_hours,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create_bot(&self, new: NewBot, created_at: DateTime<Utc>) -> HiveResult<Bot>;

    async fn get_bot(&self, id: BotId) -> HiveResult<Option<Bot>>;

    /// Replace the stored bot; fails if it does not exist
    async fn update_bot(&self, bot: &Bot) -> HiveResult<()>;

    /// Apply one attempt to the bot's counters (and `last_active` on
    /// success) without touching its state. `None` if the bot is gone.
    async fn record_counters(
        &self,
        id: BotId,
        action: ActionType,
        success: bool,
        at: DateTime<Utc>,
    ) -> HiveResult<Option<Bot>>;

    async fn list_bots(&self) -> HiveResult<Vec<Bot>>;

    async fn username_taken(&self, username: &str) -> HiveResult<bool>;

    /// Append-only; rejects records for unknown bots
    async fn append_activity(&self, record: ActivityRecord) -> HiveResult<()>;

    async fn activities_for(&self, bot_id: BotId) -> HiveResult<Vec<ActivityRecord>>;

    /// Newest first
    async fn recent_activities(&self, limit: usize) -> HiveResult<Vec<ActivityRecord>>;

    async fn insert_fragment(&self, fragment: NewFragment) -> HiveResult<MemoryFragment>;

    async fn fragments_for(&self, bot_id: BotId) -> HiveResult<Vec<MemoryFragment>>;

    /// Approximate nearest neighbours among the bot's embedded fragments
    async fn nearest_fragments(
        &self,
        bot_id: BotId,
        query: &Embedding,
        limit: usize,
    ) -> HiveResult<Vec<MemoryFragment>>;

    /// Fragments stored without an embedding
    async fn keyword_only_fragments(&self, bot_id: BotId) -> HiveResult<Vec<MemoryFragment>>;

    /// Returns how many of `ids` were removed
    async fn evict_fragments(&self, bot_id: BotId, ids: &[u64]) -> HiveResult<usize>;

    /// Cheap reachability check used to resume dispatch after a systemic failure
    async fn probe(&self) -> HiveResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_is_object_safe() {
        fn _assert_object_safe(_: &dyn Persistence) {}
    }

    #[test]
    fn new_fragment_keeps_fields() {
        let now = Utc::now();
        let f = NewFragment {
            bot_id: BotId(4),
            text: "liked a post about jazz".into(),
            embedding: None,
            keywords: vec!["jazz".into()],
            source: FragmentSource::Note,
            weight: 1.0,
            half_life_hours: 72.0,
            created_at: now,
        }
        .into_fragment(9);
        assert_eq!(f.id, 9);
        assert_eq!(f.bot_id, BotId(4));
        assert!(f.is_keyword_only());
    }
}
