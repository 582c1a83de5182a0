//! Scheduler and growth engine.
//!
//! Owns all population state: per-bot next-eligible times, leases, the action
//! budget and the growth window. Each tick selects the due bots (earliest
//! first), bounded by the batch size and the remaining window budget, and runs
//! every bot as an independent unit on a bounded worker pool. [`Scheduler::run`]
//! never waits for a unit: a slow provider or platform call only holds up its
//! own bot, whose live lease keeps it out of later ticks. Bots are
//! rescheduled whatever their outcome and stay in rotation while active.
//!
//! ## Lifecycle
//!
//! ```text
//! dormant ──register──▶ active ◀──resume── suspended
//!    │                    │ └──suspend──────▶ │
//!    └──────────────▶ retired ◀───────────────┘
//! ```

mod dispatch;
mod growth;
mod lease;
mod rate;

pub use growth::{plan_growth, GrowthEngine, GrowthReport, PersonaFactory};
pub use lease::{Lease, LeaseTable};
pub use rate::{BudgetSnapshot, RateBudget};

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::HiveConfig;
use crate::error::{HiveError, HiveResult};
use crate::generator::ContentGenerator;
use crate::hivelog::{HiveLogger, LogEntry, LogLevel};
use crate::memory::{Embedder, MemoryStore};
use crate::persistence::Persistence;
use crate::platform::{PlatformClient, PlatformOutcome};
use crate::provider::{ProviderHealth, ProviderRouter};
use crate::reaction::ReactionEngine;
use crate::rng::RandomSource;
use crate::types::*;

use dispatch::UnitResult;

/// External collaborators the scheduler is wired to
pub struct Collaborators {
    pub persistence: Arc<dyn Persistence>,
    pub platform: Arc<dyn PlatformClient>,
    pub router: Arc<ProviderRouter>,
    /// `None` keeps memory keyword-only
    pub embedder: Option<Arc<dyn Embedder>>,
    pub clock: Arc<dyn Clock>,
    pub rng: Arc<RandomSource>,
    pub logger: Arc<HiveLogger>,
}

/// Result of one dispatch tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub incomplete: usize,
    pub idle: usize,
    pub conflicts: usize,
    pub rate_limited: bool,
    pub paused: bool,
    pub stopped: bool,
    pub next_tick_ms: u64,
}

impl TickReport {
    fn absorb(&mut self, result: &UnitResult) {
        match result {
            UnitResult::Idle | UnitResult::Removed | UnitResult::Abandoned => self.idle += 1,
            UnitResult::Conflict => self.conflicts += 1,
            UnitResult::Acted { outcome, rate_limited, .. } => {
                if outcome.is_success() {
                    self.succeeded += 1;
                } else {
                    self.failed += 1;
                }
                if outcome.failure_kind() == Some(FailureKind::Incomplete) {
                    self.incomplete += 1;
                }
                self.rate_limited |= *rate_limited;
            }
            UnitResult::Error { systemic } => {
                self.failed += 1;
                self.paused |= *systemic;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Every in-flight unit finished within the grace period
    pub drained: bool,
    /// Units still running when abandonment was signalled
    pub abandoned: usize,
}

/// Aggregate view for operators
#[derive(Debug, Clone, Serialize)]
pub struct HiveStats {
    /// Bots that are not retired
    pub population: usize,
    pub by_state: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub actions: BTreeMap<String, u64>,
    pub failures: BTreeMap<String, u64>,
    pub providers: Vec<ProviderHealth>,
    pub budget: BudgetSnapshot,
    pub in_flight: usize,
    pub active_leases: usize,
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_growth: Option<DateTime<Utc>>,
}

struct Shared {
    config: HiveConfig,
    persistence: Arc<dyn Persistence>,
    platform: Arc<dyn PlatformClient>,
    router: Arc<ProviderRouter>,
    memory: Arc<MemoryStore>,
    generator: Arc<ContentGenerator>,
    reaction: Arc<ReactionEngine>,
    clock: Arc<dyn Clock>,
    rng: Arc<RandomSource>,
    logger: Arc<HiveLogger>,

    next_eligible: DashMap<BotId, DateTime<Utc>>,
    budget: Mutex<RateBudget>,
    leases: LeaseTable,
    growth: GrowthEngine,
    workers: Arc<Semaphore>,
    failures: DashMap<FailureKind, u64>,

    stop: watch::Sender<bool>,
    abandon: watch::Sender<bool>,
    in_flight: AtomicUsize,
    idle: Notify,
    paused: AtomicBool,
    /// A unit hit the platform rate limit since the last tick settled
    throttled: AtomicBool,
}

impl Shared {
    fn budget(&self) -> MutexGuard<'_, RateBudget> {
        self.budget.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// next-eligible = now + U[min_spacing, max_spacing]
    fn schedule_next(&self, bot_id: BotId, now: DateTime<Utc>) {
        let cadence = &self.config.cadence;
        let secs = self
            .rng
            .range_u64(cadence.min_spacing_secs, cadence.max_spacing_secs);
        self.next_eligible
            .insert(bot_id, now + Duration::seconds(secs as i64));
    }

    fn due_bots(&self, now: DateTime<Utc>, limit: usize) -> Vec<BotId> {
        let mut due: Vec<(DateTime<Utc>, BotId)> = self
            .next_eligible
            .iter()
            .filter(|e| *e.value() <= now && !self.leases.is_leased(*e.key(), now))
            .map(|e| (*e.value(), *e.key()))
            .collect();
        due.sort();
        due.truncate(limit);
        due.into_iter().map(|(_, id)| id).collect()
    }

    fn count_failure(&self, kind: FailureKind) {
        *self.failures.entry(kind).or_insert(0) += 1;
    }

    fn unit_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Register a dormant bot on the platform; it becomes active on acceptance
    async fn register(&self, mut bot: Bot) -> HiveResult<bool> {
        match self.platform.register(&bot).await {
            PlatformOutcome::Accepted { .. } => {
                bot.state = ActivityState::Active;
                self.persistence.update_bot(&bot).await?;
                self.schedule_next(bot.id, self.clock.now());
                Ok(true)
            }
            PlatformOutcome::RateLimited { retry_after } => {
                self.budget().on_rate_limited(self.clock.now(), retry_after);
                warn!(bot = %bot.id, "registration rate limited, bot stays dormant");
                Ok(false)
            }
            PlatformOutcome::Transient(reason) | PlatformOutcome::Permanent(reason) => {
                warn!(bot = %bot.id, %reason, "registration failed, bot stays dormant");
                Ok(false)
            }
        }
    }

    /// Create `planned` bots and try to register each one
    async fn populate(
        &self,
        existing: &[Bot],
        planned: usize,
        report: &mut GrowthReport,
    ) -> HiveResult<()> {
        let mut taken: HashSet<String> = existing
            .iter()
            .map(|b| b.username.to_lowercase())
            .collect();
        for _ in 0..planned {
            let seed = PersonaFactory::seed(&self.rng);
            let profile = self.generator.generate_profile(seed, &mut taken).await;
            if self.persistence.username_taken(&profile.username).await? {
                warn!(username = %profile.username, "generated username already exists, skipping");
                continue;
            }
            let bot = self.persistence.create_bot(profile, self.clock.now()).await?;
            report.created += 1;
            if self.register(bot).await? {
                report.activated += 1;
            }
        }
        Ok(())
    }

    /// Select the due bots and spawn one unit each into `units`. Fills in
    /// what is known before the units finish. Returns false when the round
    /// was cut short (stopped, paused or rate limited).
    async fn start_round(
        self: &Arc<Self>,
        units: &mut JoinSet<UnitResult>,
        report: &mut TickReport,
    ) -> bool {
        if *self.stop.borrow() {
            report.stopped = true;
            return false;
        }

        if self.paused.load(Ordering::SeqCst) {
            if let Err(e) = self.persistence.probe().await {
                warn!(error = %e, "persistence unreachable, dispatch stays paused");
                report.paused = true;
                return false;
            }
            self.paused.store(false, Ordering::SeqCst);
            info!("persistence reachable again, resuming dispatch");
        }

        let now = self.clock.now();
        self.leases.reclaim_expired(now);

        let limit = {
            let mut budget = self.budget();
            budget.batch_size().min(budget.remaining(now))
        };
        let due = self.due_bots(now, limit);
        report.due = due.len();
        if due.is_empty() {
            return true;
        }

        let posts = match self
            .platform
            .recent_posts(self.config.reaction.posts_fetch_limit)
            .await
        {
            Ok(posts) => Arc::new(posts),
            Err(HiveError::PlatformRateLimited { retry_after_ms }) => {
                self.budget()
                    .on_rate_limited(now, retry_after_ms.map(std::time::Duration::from_millis));
                report.rate_limited = true;
                return false;
            }
            Err(e) => {
                warn!(error = %e, "could not fetch recent posts, dispatching without stimuli");
                Arc::new(Vec::new())
            }
        };
        self.budget().consume(due.len());

        for bot_id in due {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let guard = InFlight(self.clone());
            let posts = posts.clone();
            units.spawn(async move {
                let shared = guard.0.clone();
                let Ok(_permit) = shared.workers.clone().acquire_owned().await else {
                    return UnitResult::Abandoned;
                };
                let result = shared.run_unit(bot_id, posts).await;
                shared.settle_unit(&result);
                drop(guard);
                result
            });
            report.dispatched += 1;
        }
        true
    }

    /// Fold a finished unit into shared state right away, so one slow unit
    /// never delays backpressure or a pause triggered by another
    fn settle_unit(&self, result: &UnitResult) {
        match result {
            UnitResult::Acted {
                rate_limited: true,
                retry_after,
                ..
            } => {
                self.throttled.store(true, Ordering::SeqCst);
                let now = self.clock.now();
                let mut budget = self.budget();
                if budget.is_deferred(now) {
                    budget.extend_deferral(now, *retry_after);
                } else {
                    budget.on_rate_limited(now, *retry_after);
                }
            }
            UnitResult::Error { systemic: true } => {
                if !self.paused.swap(true, Ordering::SeqCst) {
                    error!("systemic failure during dispatch, pausing until persistence recovers");
                }
            }
            _ => {}
        }
    }

    /// Milliseconds until the next tick. Backpressure eases one step when
    /// nothing was rate limited since the last settle and no deferral is
    /// active, unless `hold` is set.
    fn settle_tick(&self, now: DateTime<Utc>, hold: bool) -> u64 {
        let throttled = self.throttled.swap(false, Ordering::SeqCst);
        let mut budget = self.budget();
        if !hold && !throttled && !budget.is_deferred(now) {
            budget.on_clean_tick();
        }
        budget.snapshot().tick_interval_ms
    }

    fn log_growth(&self, report: &GrowthReport) {
        let payload = serde_json::to_value(report).unwrap_or_default();
        self.logger.log(
            &LogEntry::new(LogLevel::Info, "growth", "growth cycle finished")
                .at(self.clock.now())
                .with_payload(payload),
        );
    }
}

/// Keeps the in-flight counter honest even if a unit panics
struct InFlight(Arc<Shared>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.unit_finished();
    }
}

#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(config: HiveConfig, deps: Collaborators) -> HiveResult<Self> {
        config.validate()?;
        let now = deps.clock.now();
        let memory = Arc::new(MemoryStore::new(
            deps.persistence.clone(),
            deps.embedder,
            deps.clock.clone(),
            config.memory.clone(),
        ));
        let generator = Arc::new(ContentGenerator::new(
            deps.router.clone(),
            Some(memory.clone()),
            deps.rng.clone(),
            config.generation.clone(),
            config.memory.retrieve_k,
        )?);
        let reaction = Arc::new(ReactionEngine::new(
            config.reaction.clone(),
            Duration::seconds(config.cadence.min_spacing_secs as i64),
            deps.rng.clone(),
            deps.clock.clone(),
        ));
        let (stop, _) = watch::channel(false);
        let (abandon, _) = watch::channel(false);

        let shared = Shared {
            budget: Mutex::new(RateBudget::new(&config.rate_limit, &config.cadence, now)),
            leases: LeaseTable::new(Duration::seconds(config.worker.lease_ttl_secs as i64)),
            growth: GrowthEngine::new(Duration::seconds(
                config.population.growth_interval_secs as i64,
            )),
            workers: Arc::new(Semaphore::new(config.worker.pool_size)),
            persistence: deps.persistence,
            platform: deps.platform,
            router: deps.router,
            memory,
            generator,
            reaction,
            clock: deps.clock,
            rng: deps.rng,
            logger: deps.logger,
            next_eligible: DashMap::new(),
            failures: DashMap::new(),
            stop,
            abandon,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            paused: AtomicBool::new(false),
            throttled: AtomicBool::new(false),
            config,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Load existing bots: schedule the active ones and rebuild reaction
    /// history from their activity. Returns how many bots were scheduled.
    pub async fn initialize(&self) -> HiveResult<usize> {
        let s = &self.shared;
        let now = s.clock.now();
        let mut scheduled = 0;
        for bot in s.persistence.list_bots().await? {
            s.reaction.restore(&s.persistence.activities_for(bot.id).await?);
            if bot.state == ActivityState::Active {
                let offset = s.rng.range_u64(0, s.config.cadence.max_spacing_secs);
                s.next_eligible
                    .insert(bot.id, now + Duration::seconds(offset as i64));
                scheduled += 1;
            }
        }
        info!(scheduled, "scheduler initialized");
        Ok(scheduled)
    }

    /// One growth cycle. Within the growth window, or while another cycle is
    /// running, this is a no-op unless `force` is set (force still respects
    /// mutual exclusion).
    pub async fn run_growth_cycle(&self, force: bool) -> HiveResult<GrowthReport> {
        let s = &self.shared;
        let Some(_running) = s.growth.try_begin() else {
            info!("growth cycle already running, skipping");
            return Ok(GrowthReport::skipped(self.population().await?));
        };

        let now = s.clock.now();
        let bots = s.persistence.list_bots().await?;
        let population = bots.iter().filter(|b| b.is_live()).count();
        if !force && !s.growth.is_due(now) {
            return Ok(GrowthReport::skipped(population));
        }

        let mut report = GrowthReport {
            before: population,
            ..GrowthReport::default()
        };
        for bot in bots.iter().filter(|b| b.state == ActivityState::Dormant) {
            if s.register(bot.clone()).await? {
                report.reactivated += 1;
            }
        }

        report.planned = plan_growth(population, &s.config.population, &s.rng);
        s.populate(&bots, report.planned, &mut report).await?;
        report.after = population + report.created;
        s.growth.mark_ran(now);

        info!(
            before = report.before,
            created = report.created,
            activated = report.activated,
            after = report.after,
            "growth cycle finished"
        );
        s.log_growth(&report);
        Ok(report)
    }

    /// Grow the population straight to `count` (capped at the ceiling)
    pub async fn initialize_population(&self, count: usize) -> HiveResult<GrowthReport> {
        let s = &self.shared;
        let Some(_running) = s.growth.try_begin() else {
            return Ok(GrowthReport::skipped(self.population().await?));
        };
        let bots = s.persistence.list_bots().await?;
        let population = bots.iter().filter(|b| b.is_live()).count();
        let target = count.min(s.config.population.ceiling());

        let mut report = GrowthReport {
            before: population,
            planned: target.saturating_sub(population),
            ..GrowthReport::default()
        };
        s.populate(&bots, report.planned, &mut report).await?;
        report.after = population + report.created;
        info!(target, created = report.created, "population initialized");
        s.log_growth(&report);
        Ok(report)
    }

    /// Dispatch every due bot once and wait for those units. Failures local
    /// to a bot are folded into the report; only systemic failures change
    /// scheduler state (dispatch pauses until the persistence probe succeeds).
    pub async fn tick(&self) -> TickReport {
        let s = &self.shared;
        let mut report = TickReport::default();
        let mut units = JoinSet::new();
        let proceeded = s.start_round(&mut units, &mut report).await;

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(result) => report.absorb(&result),
                Err(e) => {
                    error!(error = %e, "dispatch unit panicked");
                    report.failed += 1;
                }
            }
        }

        let hold = !proceeded || report.rate_limited || report.paused;
        report.next_tick_ms = s.settle_tick(s.clock.now(), hold);
        report
    }

    /// Tick until shutdown, starting growth cycles as they fall due. Units
    /// run in the background; a tick never waits for earlier units.
    pub async fn run(&self) {
        let s = &self.shared;
        let mut stop = s.stop.subscribe();
        let mut units: JoinSet<UnitResult> = JoinSet::new();
        info!("scheduler running");
        'run: loop {
            if *stop.borrow() {
                break;
            }
            if s.growth.is_due(s.clock.now()) {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.run_growth_cycle(false).await {
                        error!(error = %e, "growth cycle failed");
                    }
                });
            }

            let mut report = TickReport::default();
            let proceeded = s.start_round(&mut units, &mut report).await;
            if report.dispatched > 0 {
                debug!(due = report.due, dispatched = report.dispatched, in_flight = units.len(), "units started");
            }
            let wait = s.settle_tick(s.clock.now(), !proceeded).max(1);
            let sleep = tokio::time::sleep(std::time::Duration::from_millis(wait));
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    _ = stop.changed() => break 'run,
                    Some(joined) = units.join_next(), if !units.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "dispatch unit panicked");
                        }
                    }
                }
            }
        }

        // Remaining units drain, or record themselves once shutdown abandons them
        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "dispatch unit panicked");
            }
        }
        info!("scheduler stopped");
    }

    /// Stop new ticks, give in-flight units the grace period, then signal
    /// abandonment and wait for the abandoned units to record themselves.
    pub async fn shutdown(&self) -> ShutdownReport {
        let s = &self.shared;
        s.stop.send_replace(true);
        let grace = std::time::Duration::from_millis(s.config.worker.shutdown_grace_ms);
        if tokio::time::timeout(grace, s.wait_idle()).await.is_ok() {
            info!("shutdown: all units drained");
            return ShutdownReport {
                drained: true,
                abandoned: 0,
            };
        }

        let abandoned = s.in_flight.load(Ordering::SeqCst);
        warn!(abandoned, "shutdown grace elapsed, abandoning in-flight units");
        s.abandon.send_replace(true);
        s.wait_idle().await;
        s.logger.flush();
        ShutdownReport {
            drained: false,
            abandoned,
        }
    }

    pub async fn suspend(&self, bot_id: BotId) -> HiveResult<Bot> {
        self.transition(bot_id, ActivityState::Suspended).await
    }

    pub async fn resume(&self, bot_id: BotId) -> HiveResult<Bot> {
        self.transition(bot_id, ActivityState::Active).await
    }

    pub async fn retire(&self, bot_id: BotId) -> HiveResult<Bot> {
        self.transition(bot_id, ActivityState::Retired).await
    }

    async fn transition(&self, bot_id: BotId, to: ActivityState) -> HiveResult<Bot> {
        let s = &self.shared;
        let mut bot = s
            .persistence
            .get_bot(bot_id)
            .await?
            .ok_or(HiveError::BotNotFound(bot_id))?;
        if !bot.state.can_transition_to(to) {
            return Err(HiveError::InvalidTransition {
                bot_id,
                from: bot.state,
                to,
            });
        }
        let from = bot.state;
        bot.state = to;
        s.persistence.update_bot(&bot).await?;
        match to {
            ActivityState::Active => s.schedule_next(bot_id, s.clock.now()),
            _ => {
                s.next_eligible.remove(&bot_id);
            }
        }
        info!(bot = %bot_id, %from, %to, "bot state changed");
        s.logger.log(
            &LogEntry::new(LogLevel::Info, "admin", format!("{from} -> {to}"))
                .at(s.clock.now())
                .with_bot(bot_id),
        );
        Ok(bot)
    }

    pub async fn population(&self) -> HiveResult<usize> {
        Ok(self
            .shared
            .persistence
            .list_bots()
            .await?
            .iter()
            .filter(|b| b.is_live())
            .count())
    }

    pub async fn stats(&self) -> HiveResult<HiveStats> {
        let s = &self.shared;
        let bots = s.persistence.list_bots().await?;
        let mut by_state = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        let mut counters = ActionCounters::default();
        for bot in &bots {
            *by_state.entry(bot.state.to_string()).or_insert(0) += 1;
            if bot.is_live() {
                *by_category
                    .entry(bot.persona.category.to_string())
                    .or_insert(0) += 1;
            }
            counters.posts += bot.counters.posts;
            counters.comments += bot.counters.comments;
            counters.likes += bot.counters.likes;
            counters.follows += bot.counters.follows;
            counters.unfollows += bot.counters.unfollows;
        }
        let actions = BTreeMap::from([
            (ActionType::Post.to_string(), counters.posts),
            (ActionType::Comment.to_string(), counters.comments),
            (ActionType::Like.to_string(), counters.likes),
            (ActionType::Follow.to_string(), counters.follows),
            (ActionType::Unfollow.to_string(), counters.unfollows),
        ]);
        let failures = s
            .failures
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect();

        Ok(HiveStats {
            population: bots.iter().filter(|b| b.is_live()).count(),
            by_state,
            by_category,
            actions,
            failures,
            providers: s.router.health(),
            budget: s.budget().snapshot(),
            in_flight: s.in_flight.load(Ordering::SeqCst),
            active_leases: s.leases.active_count(),
            paused: s.paused.load(Ordering::SeqCst),
            last_growth: s.growth.last_run(),
        })
    }

    /// Newest first
    pub async fn recent_activities(&self, limit: usize) -> HiveResult<Vec<ActivityRecord>> {
        self.shared.persistence.recent_activities(limit).await
    }

    pub fn next_eligible(&self, bot_id: BotId) -> Option<DateTime<Utc>> {
        self.shared.next_eligible.get(&bot_id).map(|at| *at)
    }

    /// Make a bot eligible at `at`, e.g. to dispatch it immediately
    pub fn schedule_at(&self, bot_id: BotId, at: DateTime<Utc>) {
        self.shared.next_eligible.insert(bot_id, at);
    }

    pub fn budget(&self) -> BudgetSnapshot {
        self.shared.budget().snapshot()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.shared.memory
    }

    pub fn reaction(&self) -> &Arc<ReactionEngine> {
        &self.shared.reaction
    }

    pub fn logger(&self) -> &Arc<HiveLogger> {
        &self.shared.logger
    }
}
