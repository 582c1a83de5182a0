use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use hive_core::admin::{self, AdminCommand, AdminResponse};
use hive_core::clock::{Clock, ManualClock};
use hive_core::config::{BreakerConfig, HiveConfig, ProviderSettings};
use hive_core::error::{HiveError, HiveResult};
use hive_core::hivelog::{HiveLogger, MemorySink};
use hive_core::memory::{Embedding, HashingEmbedder, MemoryStore};
use hive_core::persistence::{InMemoryPersistence, NewFragment, Persistence};
use hive_core::platform::{PlatformAction, PlatformClient, PlatformOutcome};
use hive_core::provider::{Generation, GenerationRequest, HealthStatus, PromptIntent, Provider, ProviderRouter};
use hive_core::rng::RandomSource;
use hive_core::scheduler::{Collaborators, Scheduler};
use hive_core::types::*;

// ─── Mock Provider ──────────────────────────────────────────────────────────

struct ScriptedProvider {
    name: String,
    reply: String,
    failing: AtomicBool,
    /// Per-call latency, in tokio time
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            reply: "Great point about football".into(),
            failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(name: &str, delay_ms: u64) -> Arc<Self> {
        let p = Self::ok(name);
        p.delay_ms.store(delay_ms, Ordering::SeqCst);
        p
    }

    fn failing(name: &str) -> Arc<Self> {
        let p = Self::ok(name);
        p.failing.store(true, Ordering::SeqCst);
        p
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom(self.name.clone())
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _auth: &AuthProfile,
    ) -> HiveResult<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(HiveError::Provider(format!("{} is down", self.name)));
        }
        Ok(Generation {
            text: self.reply.clone(),
            provider: self.kind(),
            model: request.model.clone(),
            usage: TokenUsage::new(10, 5),
        })
    }
}

// ─── Mock Platform ──────────────────────────────────────────────────────────

#[derive(Default)]
struct MockPlatform {
    posts: Mutex<Vec<Stimulus>>,
    script: Mutex<VecDeque<PlatformOutcome>>,
    submissions: Mutex<Vec<(BotId, PlatformAction)>>,
    reject_registration: AtomicBool,
    hang: AtomicBool,
    delay_ms: AtomicU64,
}

impl MockPlatform {
    fn add_post(&self, id: &str, author: &str, text: &str, at: DateTime<Utc>) {
        self.posts.lock().unwrap().push(Stimulus {
            post_id: id.into(),
            author: author.into(),
            text: text.into(),
            created_at: at,
        });
    }

    fn script(&self, outcomes: Vec<PlatformOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    fn submitted(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    fn submissions_for(&self, bot_id: BotId) -> Vec<PlatformAction> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == bot_id)
            .map(|(_, action)| action.clone())
            .collect()
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn submit(&self, bot: &Bot, action: &PlatformAction) -> PlatformOutcome {
        self.submissions.lock().unwrap().push((bot.id, action.clone()));
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(PlatformOutcome::accepted)
    }

    async fn register(&self, _bot: &Bot) -> PlatformOutcome {
        if self.reject_registration.load(Ordering::SeqCst) {
            PlatformOutcome::Permanent("signup closed".into())
        } else {
            PlatformOutcome::accepted()
        }
    }

    async fn recent_posts(&self, limit: usize) -> HiveResult<Vec<Stimulus>> {
        let mut posts = self.posts.lock().unwrap().clone();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(limit);
        Ok(posts)
    }
}

// ─── Persistence that can go down ───────────────────────────────────────────

struct FlakyPersistence {
    inner: InMemoryPersistence,
    down: AtomicBool,
}

impl FlakyPersistence {
    fn check(&self) -> HiveResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(HiveError::Persistence("database unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Persistence for FlakyPersistence {
    async fn create_bot(&self, new: NewBot, created_at: DateTime<Utc>) -> HiveResult<Bot> {
        self.inner.create_bot(new, created_at).await
    }
    async fn get_bot(&self, id: BotId) -> HiveResult<Option<Bot>> {
        self.inner.get_bot(id).await
    }
    async fn update_bot(&self, bot: &Bot) -> HiveResult<()> {
        self.check()?;
        self.inner.update_bot(bot).await
    }
    async fn record_counters(
        &self,
        id: BotId,
        action: ActionType,
        success: bool,
        at: DateTime<Utc>,
    ) -> HiveResult<Option<Bot>> {
        self.check()?;
        self.inner.record_counters(id, action, success, at).await
    }
    async fn list_bots(&self) -> HiveResult<Vec<Bot>> {
        self.inner.list_bots().await
    }
    async fn username_taken(&self, username: &str) -> HiveResult<bool> {
        self.inner.username_taken(username).await
    }
    async fn append_activity(&self, record: ActivityRecord) -> HiveResult<()> {
        self.check()?;
        self.inner.append_activity(record).await
    }
    async fn activities_for(&self, bot_id: BotId) -> HiveResult<Vec<ActivityRecord>> {
        self.inner.activities_for(bot_id).await
    }
    async fn recent_activities(&self, limit: usize) -> HiveResult<Vec<ActivityRecord>> {
        self.inner.recent_activities(limit).await
    }
    async fn insert_fragment(&self, fragment: NewFragment) -> HiveResult<MemoryFragment> {
        self.inner.insert_fragment(fragment).await
    }
    async fn fragments_for(&self, bot_id: BotId) -> HiveResult<Vec<MemoryFragment>> {
        self.inner.fragments_for(bot_id).await
    }
    async fn nearest_fragments(
        &self,
        bot_id: BotId,
        query: &Embedding,
        limit: usize,
    ) -> HiveResult<Vec<MemoryFragment>> {
        self.inner.nearest_fragments(bot_id, query, limit).await
    }
    async fn keyword_only_fragments(&self, bot_id: BotId) -> HiveResult<Vec<MemoryFragment>> {
        self.inner.keyword_only_fragments(bot_id).await
    }
    async fn evict_fragments(&self, bot_id: BotId, ids: &[u64]) -> HiveResult<usize> {
        self.inner.evict_fragments(bot_id, ids).await
    }
    async fn probe(&self) -> HiveResult<()> {
        self.check()
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Deterministic reactions: no jitter, every fetched post visible
fn test_config() -> HiveConfig {
    let mut config = HiveConfig::default();
    config.reaction.jitter = 0.0;
    config.reaction.visibility_min = 1.0;
    config.reaction.visibility_max = 1.0;
    config.cadence.min_spacing_secs = 60;
    config.cadence.max_spacing_secs = 60;
    config.cadence.tick_interval_ms = 1_000;
    config.cadence.max_tick_interval_ms = 8_000;
    config.cadence.batch_size = 8;
    config.worker.shutdown_grace_ms = 100;
    config
}

struct Harness {
    scheduler: Scheduler,
    clock: Arc<ManualClock>,
    persistence: Arc<dyn Persistence>,
    platform: Arc<MockPlatform>,
    log: Arc<MemorySink>,
}

fn harness_with(
    config: HiveConfig,
    providers: Vec<Arc<ScriptedProvider>>,
    persistence: Arc<dyn Persistence>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let mut router = ProviderRouter::new(config.breaker.clone(), clock.clone());
    for (priority, provider) in providers.into_iter().enumerate() {
        let settings = ProviderSettings::new(provider.kind(), "test-model")
            .with_priority(priority as u32)
            .with_api_key("key");
        router.register(provider, settings);
    }
    let platform = Arc::new(MockPlatform::default());
    let log = Arc::new(MemorySink::new());
    let scheduler = Scheduler::new(
        config,
        Collaborators {
            persistence: persistence.clone(),
            platform: platform.clone(),
            router: Arc::new(router),
            embedder: Some(Arc::new(HashingEmbedder::new(64))),
            clock: clock.clone(),
            rng: Arc::new(RandomSource::seeded(42)),
            logger: Arc::new(HiveLogger::new().with_sink(log.clone())),
        },
    )
    .unwrap();
    Harness {
        scheduler,
        clock,
        persistence,
        platform,
        log,
    }
}

fn harness(config: HiveConfig, providers: Vec<Arc<ScriptedProvider>>) -> Harness {
    harness_with(config, providers, Arc::new(InMemoryPersistence::new()))
}

fn fan(username: &str, posting_bias: f64) -> NewBot {
    NewBot {
        username: username.into(),
        full_name: "Test Fan".into(),
        bio: "Here for the football.".into(),
        age: 30,
        gender: "female".into(),
        persona: Persona::new(BotCategory::Fan, vec!["football".into()])
            .with_posting_bias(posting_bias),
    }
}

/// Create an active bot that is due right now
async fn active_bot(h: &Harness, username: &str, posting_bias: f64) -> BotId {
    let bot = h
        .persistence
        .create_bot(fan(username, posting_bias), h.clock.now())
        .await
        .unwrap();
    h.scheduler.resume(bot.id).await.unwrap();
    h.scheduler.schedule_at(bot.id, h.clock.now());
    bot.id
}

async fn records_for(h: &Harness, bot_id: BotId) -> Vec<ActivityRecord> {
    h.persistence.activities_for(bot_id).await.unwrap()
}

// ─── Growth ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn growth_seeds_initial_then_adds_within_bounds() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);

    let first = h.scheduler.run_growth_cycle(false).await.unwrap();
    assert_eq!(first.before, 0);
    assert_eq!(first.created, 20);
    assert_eq!(first.activated, 20);
    assert_eq!(h.scheduler.population().await.unwrap(), 20);

    let second = h.scheduler.run_growth_cycle(true).await.unwrap();
    assert!((20..=50).contains(&second.created));
    assert_eq!(h.scheduler.population().await.unwrap(), 20 + second.created);

    let bots = h.persistence.list_bots().await.unwrap();
    let mut names: Vec<_> = bots.iter().map(|b| b.username.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), bots.len());
    assert!(bots.iter().all(|b| b.state == ActivityState::Active));
    assert!(bots.iter().all(|b| h.scheduler.next_eligible(b.id).is_some()));
}

#[tokio::test]
async fn growth_never_exceeds_ceiling() {
    let mut config = test_config();
    config.population.max = 100;
    let h = harness(config, vec![ScriptedProvider::ok("a")]);

    let mut previous = 0;
    for _ in 0..8 {
        let report = h.scheduler.run_growth_cycle(true).await.unwrap();
        let population = h.scheduler.population().await.unwrap();
        assert!(population >= previous);
        assert!(population <= 100);
        assert_eq!(report.after, population);
        previous = population;
    }
    assert_eq!(previous, 100);
}

#[tokio::test]
async fn growth_twice_within_window_runs_once() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);

    let first = h.scheduler.run_growth_cycle(false).await.unwrap();
    h.clock.advance(Duration::hours(1));
    let second = h.scheduler.run_growth_cycle(false).await.unwrap();

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(second.created, 0);
    assert_eq!(h.scheduler.population().await.unwrap(), 20);

    h.clock.advance(Duration::hours(23));
    let third = h.scheduler.run_growth_cycle(false).await.unwrap();
    assert!(!third.skipped);
    assert!(third.created >= 20);
}

#[tokio::test]
async fn growth_survives_provider_outage_with_fallback_profiles() {
    let h = harness(test_config(), vec![ScriptedProvider::failing("a")]);
    let report = h.scheduler.run_growth_cycle(false).await.unwrap();
    assert_eq!(report.created, 20);

    let bots = h.persistence.list_bots().await.unwrap();
    assert!(bots.iter().all(|b| !b.username.is_empty() && !b.bio.is_empty()));
}

#[tokio::test]
async fn rejected_registration_stays_dormant_until_retried() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform.reject_registration.store(true, Ordering::SeqCst);

    let report = h.scheduler.run_growth_cycle(false).await.unwrap();
    assert_eq!(report.created, 20);
    assert_eq!(report.activated, 0);
    let bots = h.persistence.list_bots().await.unwrap();
    assert!(bots.iter().all(|b| b.state == ActivityState::Dormant));
    assert!(bots.iter().all(|b| h.scheduler.next_eligible(b.id).is_none()));

    h.platform.reject_registration.store(false, Ordering::SeqCst);
    h.clock.advance(Duration::days(1));
    let retry = h.scheduler.run_growth_cycle(false).await.unwrap();
    assert_eq!(retry.reactivated, 20);
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn tick_dispatches_due_bot_and_records_activity() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform
        .add_post("p1", "alice", "Football final tonight", t0() - Duration::minutes(5));
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.succeeded, 1);

    let records = records_for(&h, bot_id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, ActionType::Like);
    assert_eq!(records[0].target, TargetRef::Post("p1".into()));
    assert!(records[0].outcome.is_success());

    let bot = h.persistence.get_bot(bot_id).await.unwrap().unwrap();
    assert_eq!(bot.counters.likes, 1);
    assert_eq!(bot.last_active, Some(t0()));
    assert_eq!(
        h.scheduler.next_eligible(bot_id),
        Some(t0() + Duration::seconds(60))
    );

    let memories = h.scheduler.memory().retrieve(bot_id, "football", 3).await.unwrap();
    assert_eq!(memories.len(), 1);

    let entries = h.log.entries();
    assert!(entries
        .iter()
        .any(|e| e.source == "dispatch" && e.bot_id == Some(bot_id)));
}

#[tokio::test]
async fn spacing_blocks_reaction_until_window_elapses() {
    let mut config = test_config();
    config.cadence.min_spacing_secs = 300;
    config.cadence.max_spacing_secs = 300;
    let h = harness(config, vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0() - Duration::seconds(10));
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    h.scheduler.tick().await;
    assert_eq!(records_for(&h, bot_id).await.len(), 1);

    h.clock.advance(Duration::seconds(100));
    h.platform.add_post("p2", "bob", "more football", h.clock.now());
    let report = h.scheduler.tick().await;
    assert_eq!(report.due, 0);

    h.clock.advance(Duration::seconds(199));
    h.scheduler.tick().await;
    assert_eq!(records_for(&h, bot_id).await.len(), 1);

    h.clock.advance(Duration::seconds(1));
    h.scheduler.tick().await;
    let records = records_for(&h, bot_id).await;
    assert_eq!(records.len(), 2);
    assert!(records[1].started_at >= t0() + Duration::seconds(300));
}

#[tokio::test]
async fn sequential_ticks_keep_lease_windows_apart() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0());
    h.platform.add_post("p2", "bob", "football news", t0());
    let bots = vec![
        active_bot(&h, "fan_a", 0.5).await,
        active_bot(&h, "fan_b", 0.5).await,
        active_bot(&h, "fan_c", 0.5).await,
    ];

    for _ in 0..6 {
        h.scheduler.tick().await;
        h.clock.advance(Duration::seconds(60));
    }

    for bot_id in bots {
        let mut records = records_for(&h, bot_id).await;
        assert!(!records.is_empty());
        records.sort_by_key(|r| r.started_at);
        for pair in records.windows(2) {
            assert!(pair[1].started_at >= pair[0].timestamp);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_ticks_never_dispatch_a_bot_twice() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0());
    h.platform.delay_ms.store(1_000, Ordering::SeqCst);
    let bots = vec![
        active_bot(&h, "fan_a", 0.0).await,
        active_bot(&h, "fan_b", 0.0).await,
    ];

    let (first, second) = tokio::join!(h.scheduler.tick(), h.scheduler.tick());
    assert_eq!(first.dispatched + second.dispatched, 4);
    assert_eq!(first.conflicts + second.conflicts, 2);
    assert_eq!(first.succeeded + second.succeeded, 2);

    for bot_id in bots {
        assert_eq!(h.platform.submissions_for(bot_id).len(), 1);
        let records = records_for(&h, bot_id).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].started_at <= records[0].timestamp);
        assert!(h.scheduler.next_eligible(bot_id).is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn expired_lease_is_reclaimed_and_late_result_dropped() {
    let mut config = test_config();
    config.worker.lease_ttl_secs = 5;
    let h = harness(config, vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0());
    h.platform.delay_ms.store(1_000, Ordering::SeqCst);
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    let scheduler = h.scheduler.clone();
    let slow_tick = tokio::spawn(async move { scheduler.tick().await });
    while h.platform.submitted() == 0 {
        tokio::task::yield_now().await;
    }

    // The first unit is stuck in submit while its lease runs out
    h.platform.delay_ms.store(0, Ordering::SeqCst);
    h.clock.advance(Duration::seconds(10));
    h.scheduler.schedule_at(bot_id, h.clock.now());
    let reclaimed = h.scheduler.tick().await;
    assert_eq!(reclaimed.succeeded, 1);

    let late = slow_tick.await.unwrap();
    assert_eq!(late.conflicts, 1);
    assert_eq!(late.succeeded, 0);

    assert_eq!(h.platform.submitted(), 2);
    let records = records_for(&h, bot_id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].started_at, t0() + Duration::seconds(10));
}

#[tokio::test(start_paused = true)]
async fn hung_generation_does_not_hold_back_other_bots() {
    let slow = ScriptedProvider::slow("slow", 3_600_000);
    let h = harness(test_config(), vec![slow.clone()]);
    let poster = active_bot(&h, "poster", 1.0).await;
    // Own post: the poster can only write, the fan only needs a like
    h.platform.add_post("p1", "poster", "football tonight", t0());
    let fan = active_bot(&h, "fan_b", 0.0).await;
    h.scheduler.schedule_at(fan, t0() + Duration::seconds(2));

    let runner = h.scheduler.clone();
    let run = tokio::spawn(async move { runner.run().await });
    for _ in 0..5 {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        h.clock.advance(Duration::seconds(1));
    }

    let liked = h.platform.submissions_for(fan);
    assert_eq!(liked.len(), 1);
    assert_eq!(liked[0].action, ActionType::Like);
    assert!(records_for(&h, fan).await[0].outcome.is_success());
    assert!(h.platform.submissions_for(poster).is_empty());
    assert!(records_for(&h, poster).await.is_empty());

    let shutdown = h.scheduler.shutdown().await;
    assert!(!shutdown.drained);
    run.await.unwrap();
    let records = records_for(&h, poster).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome.failure_kind(), Some(FailureKind::Incomplete));
}

#[tokio::test(start_paused = true)]
async fn suspend_during_dispatch_is_not_overwritten() {
    let h = harness(test_config(), vec![ScriptedProvider::slow("a", 1_000)]);
    let bot_id = active_bot(&h, "poster", 1.0).await;

    let scheduler = h.scheduler.clone();
    let tick = tokio::spawn(async move { scheduler.tick().await });
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    h.scheduler.suspend(bot_id).await.unwrap();

    let report = tick.await.unwrap();
    assert_eq!(report.succeeded, 1);

    let bot = h.persistence.get_bot(bot_id).await.unwrap().unwrap();
    assert_eq!(bot.state, ActivityState::Suspended);
    assert_eq!(bot.counters.posts, 1);
    assert!(h.scheduler.next_eligible(bot_id).is_none());

    h.scheduler.retire(bot_id).await.unwrap();
    h.scheduler.schedule_at(bot_id, h.clock.now());
    h.scheduler.tick().await;
    let bot = h.persistence.get_bot(bot_id).await.unwrap().unwrap();
    assert_eq!(bot.state, ActivityState::Retired);
    assert!(h.scheduler.next_eligible(bot_id).is_none());
}

#[tokio::test]
async fn all_providers_failing_records_generation_failure_only() {
    let a = ScriptedProvider::failing("a");
    let b = ScriptedProvider::failing("b");
    let h = harness(test_config(), vec![a.clone(), b.clone()]);
    let bot_id = active_bot(&h, "poster", 1.0).await;

    let report = h.scheduler.tick().await;
    assert_eq!(report.failed, 1);
    assert!(a.calls() > 0 && b.calls() > 0);
    assert_eq!(h.platform.submitted(), 0);

    let records = records_for(&h, bot_id).await;
    assert_eq!(records.len(), 1);
    assert!(records.iter().all(|r| !r.outcome.is_success()));
    assert_eq!(records[0].outcome.failure_kind(), Some(FailureKind::Generation));
    assert!(h.scheduler.next_eligible(bot_id).is_some());

    let stats = h.scheduler.stats().await.unwrap();
    assert_eq!(stats.failures.get("generation"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0());
    h.platform.script(vec![
        PlatformOutcome::Transient("503".into()),
        PlatformOutcome::Transient("503".into()),
    ]);
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    let report = h.scheduler.tick().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.platform.submitted(), 3);
    assert!(records_for(&h, bot_id).await[0].outcome.is_success());
}

#[tokio::test]
async fn permanent_failure_is_recorded_without_retry() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0());
    h.platform
        .script(vec![PlatformOutcome::Permanent("post deleted".into())]);
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    h.scheduler.tick().await;
    assert_eq!(h.platform.submitted(), 1);
    let records = records_for(&h, bot_id).await;
    assert_eq!(records[0].outcome.failure_kind(), Some(FailureKind::Permanent));

    h.clock.advance(Duration::seconds(60));
    h.scheduler.tick().await;
    let likes_on_p1 = h
        .platform
        .submissions_for(bot_id)
        .iter()
        .filter(|a| a.action == ActionType::Like && a.target == TargetRef::Post("p1".into()))
        .count();
    assert_eq!(likes_on_p1, 1);
}

#[tokio::test]
async fn rate_limit_applies_backpressure_and_keeps_bot_in_rotation() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0());
    h.platform.script(vec![PlatformOutcome::RateLimited {
        retry_after: Some(std::time::Duration::from_secs(30)),
    }]);
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    let report = h.scheduler.tick().await;
    assert!(report.rate_limited);
    assert_eq!(report.next_tick_ms, 2_000);
    let budget = h.scheduler.budget();
    assert_eq!(budget.batch_size, 4);
    assert_eq!(budget.deferred_until, Some(t0() + Duration::seconds(30)));
    assert!(h.scheduler.next_eligible(bot_id).is_some());

    // Deferred: nothing dispatched, and no recovery yet
    h.scheduler.schedule_at(bot_id, h.clock.now());
    let report = h.scheduler.tick().await;
    assert_eq!(report.due, 0);
    assert_eq!(h.scheduler.budget().tick_interval_ms, 2_000);

    h.clock.advance(Duration::seconds(30));
    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 1);
    assert!(!report.rate_limited);
    assert!(h.scheduler.budget().tick_interval_ms < 2_000);
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_hung_units_as_incomplete() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);
    h.platform.add_post("p1", "alice", "football", t0());
    h.platform.hang.store(true, Ordering::SeqCst);
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    let scheduler = h.scheduler.clone();
    let tick = tokio::spawn(async move { scheduler.tick().await });
    while h.platform.submitted() == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }

    let shutdown = h.scheduler.shutdown().await;
    assert!(!shutdown.drained);
    assert_eq!(shutdown.abandoned, 1);

    let report = tick.await.unwrap();
    assert_eq!(report.incomplete, 1);
    let records = records_for(&h, bot_id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, ActionType::Like);
    assert_eq!(records[0].outcome.failure_kind(), Some(FailureKind::Incomplete));

    assert!(h.scheduler.tick().await.stopped);
}

#[tokio::test]
async fn persistence_outage_pauses_dispatch_until_probe_succeeds() {
    let flaky = Arc::new(FlakyPersistence {
        inner: InMemoryPersistence::new(),
        down: AtomicBool::new(false),
    });
    let h = harness_with(test_config(), vec![ScriptedProvider::ok("a")], flaky.clone());
    h.platform.add_post("p1", "alice", "football", t0());
    let bot_id = active_bot(&h, "fan_one", 0.0).await;

    flaky.down.store(true, Ordering::SeqCst);
    let report = h.scheduler.tick().await;
    assert!(report.paused);
    assert!(h.scheduler.is_paused());

    h.clock.advance(Duration::seconds(60));
    let report = h.scheduler.tick().await;
    assert!(report.paused);
    assert_eq!(report.dispatched, 0);

    flaky.down.store(false, Ordering::SeqCst);
    let report = h.scheduler.tick().await;
    assert!(!report.paused);
    assert_eq!(report.succeeded, 1);
    assert_eq!(records_for(&h, bot_id).await.len(), 1);
}

// ─── Providers ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_primary_fails_over_then_gets_one_half_open_trial() {
    let clock = Arc::new(ManualClock::new(t0()));
    let a = ScriptedProvider::failing("a");
    let b = ScriptedProvider::ok("b");
    let mut router = ProviderRouter::new(BreakerConfig::default(), clock.clone());
    router.register(a.clone(), ProviderSettings::new(a.kind(), "m").with_priority(0));
    router.register(b.clone(), ProviderSettings::new(b.kind(), "m").with_priority(1));

    let persona = Persona::new(BotCategory::Neutral, vec![]);
    let intent = PromptIntent::new("Write a post.");
    for _ in 0..5 {
        let generation = router.generate(&persona, &intent, &[]).await.unwrap();
        assert_eq!(generation.provider, b.kind());
    }
    assert_eq!(a.calls(), 5);
    assert_eq!(router.health()[0].status, HealthStatus::Open);

    router.generate(&persona, &intent, &[]).await.unwrap();
    assert_eq!(a.calls(), 5);

    clock.advance(Duration::seconds(31));
    router.generate(&persona, &intent, &[]).await.unwrap();
    assert_eq!(a.calls(), 6);
    let health = &router.health()[0];
    assert_eq!(health.status, HealthStatus::Open);
    assert_eq!(health.open_until, Some(clock.now() + Duration::seconds(60)));
}

// ─── Memory ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn memory_retrieval_is_deterministic_and_ordered() {
    let clock = Arc::new(ManualClock::new(t0()));
    let persistence = Arc::new(InMemoryPersistence::new());
    let bot = persistence.create_bot(fan("mem_bot", 0.0), t0()).await.unwrap();
    let store = MemoryStore::new(
        persistence.clone(),
        Some(Arc::new(HashingEmbedder::new(128))),
        clock.clone(),
        HiveConfig::default().memory,
    );

    for text in [
        "Watched the football derby with friends",
        "Football tactics are fascinating",
        "Baked sourdough bread this morning",
        "The derby ended in a draw, football is cruel",
    ] {
        store.store(bot.id, text, FragmentSource::Note).await.unwrap();
        clock.advance(Duration::hours(2));
    }

    let first = store.retrieve_scored(bot.id, "football derby", 3).await.unwrap();
    let second = store.retrieve_scored(bot.id, "football derby", 3).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
}

// ─── Admin ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_commands_drive_lifecycle_and_stats() {
    let h = harness(test_config(), vec![ScriptedProvider::ok("a")]);

    let AdminResponse::Growth(report) = admin::handle(
        &h.scheduler,
        AdminCommand::InitializePopulation { count: 5 },
    )
    .await
    .unwrap() else {
        panic!("expected growth report");
    };
    assert_eq!(report.created, 5);

    let bot_id = h.persistence.list_bots().await.unwrap()[0].id;
    admin::handle(&h.scheduler, AdminCommand::Suspend { bot_id })
        .await
        .unwrap();
    assert!(h.scheduler.next_eligible(bot_id).is_none());

    admin::handle(&h.scheduler, AdminCommand::Resume { bot_id })
        .await
        .unwrap();
    assert!(h.scheduler.next_eligible(bot_id).is_some());

    admin::handle(&h.scheduler, AdminCommand::Retire { bot_id })
        .await
        .unwrap();
    let err = admin::handle(&h.scheduler, AdminCommand::Resume { bot_id })
        .await
        .unwrap_err();
    assert!(matches!(err, HiveError::InvalidTransition { .. }));

    let AdminResponse::Stats(stats) = admin::handle(&h.scheduler, AdminCommand::Stats)
        .await
        .unwrap()
    else {
        panic!("expected stats");
    };
    assert_eq!(stats.population, 4);
    assert_eq!(stats.by_state.get("retired"), Some(&1));
    assert_eq!(stats.by_state.get("active"), Some(&4));
    assert_eq!(stats.by_category.values().sum::<usize>(), 4);
    assert_eq!(stats.providers.len(), 1);
}
