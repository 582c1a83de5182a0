use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::error;

use crate::error::{HiveError, HiveResult};
use crate::memory::Embedding;
use crate::types::*;

use super::journal::ActivityJournal;
use super::{NewFragment, Persistence};

#[derive(Default)]
struct State {
    bots: BTreeMap<BotId, Bot>,
    next_bot_id: u64,
    activities: Vec<ActivityRecord>,
    fragments: HashMap<BotId, Vec<MemoryFragment>>,
    next_fragment_id: u64,
}

/// Process-local store. Nearest-neighbour search is an exact cosine scan.
pub struct InMemoryPersistence {
    state: RwLock<State>,
    journal: Option<ActivityJournal>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                next_bot_id: 1,
                next_fragment_id: 1,
                ..State::default()
            }),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: ActivityJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub async fn bot_count(&self) -> usize {
        self.state.read().await.bots.len()
    }

    pub async fn activity_count(&self) -> usize {
        self.state.read().await.activities.len()
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn create_bot(&self, new: NewBot, created_at: DateTime<Utc>) -> HiveResult<Bot> {
        let mut state = self.state.write().await;
        if state.bots.values().any(|b| b.username == new.username) {
            return Err(HiveError::Persistence(format!(
                "username already taken: {}",
                new.username
            )));
        }
        let id = BotId(state.next_bot_id);
        state.next_bot_id += 1;
        let bot = Bot::from_new(id, new, created_at);
        state.bots.insert(id, bot.clone());
        Ok(bot)
    }

    async fn get_bot(&self, id: BotId) -> HiveResult<Option<Bot>> {
        Ok(self.state.read().await.bots.get(&id).cloned())
    }

    async fn update_bot(&self, bot: &Bot) -> HiveResult<()> {
        let mut state = self.state.write().await;
        match state.bots.get_mut(&bot.id) {
            Some(stored) => {
                *stored = bot.clone();
                Ok(())
            }
            None => Err(HiveError::BotNotFound(bot.id)),
        }
    }

    async fn record_counters(
        &self,
        id: BotId,
        action: ActionType,
        success: bool,
        at: DateTime<Utc>,
    ) -> HiveResult<Option<Bot>> {
        let mut state = self.state.write().await;
        Ok(state.bots.get_mut(&id).map(|bot| {
            bot.counters.record(action, success);
            if success {
                bot.last_active = Some(at);
            }
            bot.clone()
        }))
    }

    async fn list_bots(&self) -> HiveResult<Vec<Bot>> {
        Ok(self.state.read().await.bots.values().cloned().collect())
    }

    async fn username_taken(&self, username: &str) -> HiveResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .bots
            .values()
            .any(|b| b.username.eq_ignore_ascii_case(username)))
    }

    async fn append_activity(&self, record: ActivityRecord) -> HiveResult<()> {
        let mut state = self.state.write().await;
        if !state.bots.contains_key(&record.bot_id) {
            return Err(HiveError::BotNotFound(record.bot_id));
        }
        // Journal first: a record the audit trail missed is never kept
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&record).await {
                error!(error = %e, path = %journal.path().display(), "activity journal append failed");
                return Err(e);
            }
        }
        state.activities.push(record);
        Ok(())
    }

    async fn activities_for(&self, bot_id: BotId) -> HiveResult<Vec<ActivityRecord>> {
        Ok(self
            .state
            .read()
            .await
            .activities
            .iter()
            .filter(|r| r.bot_id == bot_id)
            .cloned()
            .collect())
    }

    async fn recent_activities(&self, limit: usize) -> HiveResult<Vec<ActivityRecord>> {
        Ok(self
            .state
            .read()
            .await
            .activities
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_fragment(&self, fragment: NewFragment) -> HiveResult<MemoryFragment> {
        let mut state = self.state.write().await;
        if !state.bots.contains_key(&fragment.bot_id) {
            return Err(HiveError::BotNotFound(fragment.bot_id));
        }
        let id = state.next_fragment_id;
        state.next_fragment_id += 1;
        let stored = fragment.into_fragment(id);
        state
            .fragments
            .entry(stored.bot_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn fragments_for(&self, bot_id: BotId) -> HiveResult<Vec<MemoryFragment>> {
        Ok(self
            .state
            .read()
            .await
            .fragments
            .get(&bot_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn nearest_fragments(
        &self,
        bot_id: BotId,
        query: &Embedding,
        limit: usize,
    ) -> HiveResult<Vec<MemoryFragment>> {
        let state = self.state.read().await;
        let Some(fragments) = state.fragments.get(&bot_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(f32, &MemoryFragment)> = fragments
            .iter()
            .filter_map(|f| {
                f.embedding
                    .as_ref()
                    .map(|e| (query.cosine_similarity(e), f))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, f)| f.clone())
            .collect())
    }

    async fn keyword_only_fragments(&self, bot_id: BotId) -> HiveResult<Vec<MemoryFragment>> {
        Ok(self
            .state
            .read()
            .await
            .fragments
            .get(&bot_id)
            .map(|fs| fs.iter().filter(|f| f.is_keyword_only()).cloned().collect())
            .unwrap_or_default())
    }

    async fn evict_fragments(&self, bot_id: BotId, ids: &[u64]) -> HiveResult<usize> {
        let mut state = self.state.write().await;
        let Some(fragments) = state.fragments.get_mut(&bot_id) else {
            return Ok(0);
        };
        let before = fragments.len();
        fragments.retain(|f| !ids.contains(&f.id));
        Ok(before - fragments.len())
    }

    async fn probe(&self) -> HiveResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_bot(username: &str) -> NewBot {
        NewBot {
            username: username.into(),
            full_name: "Test Bot".into(),
            bio: "Just testing.".into(),
            age: 30,
            gender: "female".into(),
            persona: Persona::new(BotCategory::Neutral, vec!["music".into()]),
        }
    }

    fn fragment(bot_id: BotId, text: &str, embedding: Option<Embedding>) -> NewFragment {
        NewFragment {
            bot_id,
            text: text.into(),
            embedding,
            keywords: crate::memory::keywords(text),
            source: FragmentSource::Note,
            weight: 1.0,
            half_life_hours: 72.0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_update_bot() {
        let store = InMemoryPersistence::new();
        let mut bot = store.create_bot(new_bot("alice"), Utc::now()).await.unwrap();
        assert_eq!(bot.id, BotId(1));
        assert_eq!(bot.state, ActivityState::Dormant);

        bot.state = ActivityState::Active;
        store.update_bot(&bot).await.unwrap();
        let loaded = store.get_bot(bot.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, ActivityState::Active);
        assert!(store.username_taken("ALICE").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let store = InMemoryPersistence::new();
        store.create_bot(new_bot("bob"), Utc::now()).await.unwrap();
        assert!(store.create_bot(new_bot("bob"), Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn activity_for_unknown_bot_rejected() {
        let store = InMemoryPersistence::new();
        let now = Utc::now();
        let record = ActivityRecord::new(
            BotId(99),
            ActionType::Like,
            TargetRef::Post("p".into()),
            now,
            now,
            Outcome::Success,
        );
        assert!(matches!(
            store.append_activity(record).await,
            Err(HiveError::BotNotFound(BotId(99)))
        ));
    }

    #[tokio::test]
    async fn recent_activities_newest_first() {
        let store = InMemoryPersistence::new();
        let bot = store.create_bot(new_bot("carol"), Utc::now()).await.unwrap();
        for action in [ActionType::Like, ActionType::Comment, ActionType::Follow] {
            let now = Utc::now();
            let record =
                ActivityRecord::new(bot.id, action, TargetRef::None, now, now, Outcome::Success);
            store.append_activity(record).await.unwrap();
        }
        let recent = store.recent_activities(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, ActionType::Follow);
        assert_eq!(recent[1].action, ActionType::Comment);
    }

    #[tokio::test]
    async fn nearest_and_keyword_only_split() {
        let store = InMemoryPersistence::new();
        let bot = store.create_bot(new_bot("dave"), Utc::now()).await.unwrap();
        store
            .insert_fragment(fragment(bot.id, "near", Some(Embedding::new(vec![1.0, 0.0]))))
            .await
            .unwrap();
        store
            .insert_fragment(fragment(bot.id, "far", Some(Embedding::new(vec![0.0, 1.0]))))
            .await
            .unwrap();
        store
            .insert_fragment(fragment(bot.id, "keyword only", None))
            .await
            .unwrap();

        let query = Embedding::new(vec![1.0, 0.1]);
        let nearest = store.nearest_fragments(bot.id, &query, 1).await.unwrap();
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].text, "near");

        let kw = store.keyword_only_fragments(bot.id).await.unwrap();
        assert_eq!(kw.len(), 1);
        assert_eq!(kw[0].text, "keyword only");

        let evicted = store.evict_fragments(bot.id, &[nearest[0].id]).await.unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(store.fragments_for(bot.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn counters_update_leaves_state_alone() {
        let store = InMemoryPersistence::new();
        let mut bot = store.create_bot(new_bot("frank"), Utc::now()).await.unwrap();
        bot.state = ActivityState::Suspended;
        store.update_bot(&bot).await.unwrap();

        let at = Utc::now();
        let updated = store
            .record_counters(bot.id, ActionType::Comment, true, at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, ActivityState::Suspended);
        assert_eq!(updated.counters.comments, 1);
        assert_eq!(updated.last_active, Some(at));

        let failed = store
            .record_counters(bot.id, ActionType::Like, false, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.last_active, Some(at));
        assert!(store
            .record_counters(BotId(99), ActionType::Like, true, at)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn journal_failure_fails_the_append() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "plain file").unwrap();
        let store = InMemoryPersistence::new()
            .with_journal(ActivityJournal::new(blocker.join("activity.jsonl")));
        let bot = store.create_bot(new_bot("gina"), Utc::now()).await.unwrap();
        let now = Utc::now();
        let err = store
            .append_activity(ActivityRecord::new(
                bot.id,
                ActionType::Like,
                TargetRef::Post("p1".into()),
                now,
                now,
                Outcome::Success,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::Io(_)));
        assert!(err.is_systemic());
        assert_eq!(store.activity_count().await, 0);
    }

    #[tokio::test]
    async fn journal_mirrors_activity() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryPersistence::new()
            .with_journal(ActivityJournal::new(dir.path().join("activity.jsonl")));
        let bot = store.create_bot(new_bot("erin"), Utc::now()).await.unwrap();
        let now = Utc::now();
        store
            .append_activity(ActivityRecord::new(
                bot.id,
                ActionType::Post,
                TargetRef::None,
                now,
                now,
                Outcome::Success,
            ))
            .await
            .unwrap();

        let journal = ActivityJournal::new(dir.path().join("activity.jsonl"));
        assert_eq!(journal.load().await.unwrap().len(), 1);
        assert_eq!(store.activity_count().await, 1);
    }
}
