//! One bot's dispatch unit: lease, evaluate, draft, submit, record, release.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::{HiveError, HiveResult};
use crate::generator::prompts;
use crate::hivelog::{LogEntry, LogLevel};
use crate::platform::{PlatformAction, PlatformOutcome};
use crate::types::*;

use super::lease::Lease;
use super::Shared;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum UnitResult {
    /// Nothing worth doing this time
    Idle,
    /// Another unit holds the bot's lease
    Conflict,
    /// Bot is gone or no longer active; dropped from the schedule
    Removed,
    /// Stopped before choosing an action
    Abandoned,
    Acted {
        action: ActionType,
        outcome: Outcome,
        rate_limited: bool,
        retry_after: Option<Duration>,
    },
    Error {
        systemic: bool,
    },
}

/// What the unit has committed to so far; read when it is cut short
#[derive(Debug, Default)]
struct Progress {
    chosen: Option<(ActionType, TargetRef)>,
    recorded: bool,
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(|e| e.into_inner())
}

struct Attempt {
    action: ActionType,
    target: TargetRef,
    outcome: Outcome,
    content: Option<String>,
    reason: String,
    stimulus: Option<Stimulus>,
    rate_limited: bool,
    retry_after: Option<Duration>,
}

/// min(base * 2^attempt, max)
pub(super) fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(20);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

impl Shared {
    pub(super) async fn run_unit(
        self: &Arc<Self>,
        bot_id: BotId,
        posts: Arc<Vec<Stimulus>>,
    ) -> UnitResult {
        let lease = match self.leases.acquire(bot_id, self.clock.now()) {
            Ok(lease) => lease,
            Err(_) => {
                debug!(bot = %bot_id, "lease held elsewhere, skipping this tick");
                return UnitResult::Conflict;
            }
        };

        let progress = Mutex::new(Progress::default());
        let ttl = self
            .leases
            .ttl()
            .to_std()
            .unwrap_or(Duration::from_secs(self.config.worker.lease_ttl_secs));
        let mut abandon = self.abandon.subscribe();
        let abandoned = async move {
            if abandon.wait_for(|a| *a).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        let result = tokio::select! {
            r = self.dispatch_bot(bot_id, &lease, &posts, &progress) => match r {
                Ok(result) => result,
                Err(e) => self.unit_error(bot_id, e),
            },
            _ = abandoned => self.record_incomplete(&lease, &progress, "abandoned at shutdown").await,
            _ = tokio::time::sleep(ttl) => {
                self.record_incomplete(&lease, &progress, "lease expired before completion").await
            }
        };

        // A conflicting unit leaves rescheduling to the lease owner
        if !matches!(result, UnitResult::Removed | UnitResult::Conflict) {
            if self.still_active(bot_id).await {
                self.schedule_next(bot_id, self.clock.now());
            } else {
                self.next_eligible.remove(&bot_id);
            }
        }
        self.leases.release(&lease);
        result
    }

    /// Admin transitions may land while a unit is in flight. An unreadable
    /// store keeps the bot in rotation.
    async fn still_active(&self, bot_id: BotId) -> bool {
        match self.persistence.get_bot(bot_id).await {
            Ok(Some(bot)) => bot.state == ActivityState::Active,
            Ok(None) => false,
            Err(_) => true,
        }
    }

    fn unit_error(&self, bot_id: BotId, e: HiveError) -> UnitResult {
        let systemic = e.is_systemic();
        if systemic {
            error!(bot = %bot_id, error = %e, "systemic failure in dispatch");
        } else {
            warn!(bot = %bot_id, error = %e, "dispatch failed");
        }
        UnitResult::Error { systemic }
    }

    async fn dispatch_bot(
        &self,
        bot_id: BotId,
        lease: &Lease,
        posts: &[Stimulus],
        progress: &Mutex<Progress>,
    ) -> HiveResult<UnitResult> {
        let Some(bot) = self.persistence.get_bot(bot_id).await? else {
            self.next_eligible.remove(&bot_id);
            return Ok(UnitResult::Removed);
        };
        if bot.state != ActivityState::Active {
            self.next_eligible.remove(&bot_id);
            return Ok(UnitResult::Removed);
        }

        let visible = self.reaction.visible(posts);
        let Some(proposal) = self.reaction.evaluate(&bot, &visible).into_iter().next() else {
            return Ok(UnitResult::Idle);
        };
        lock(progress).chosen = Some((proposal.action, proposal.target.clone()));

        let mut attempt = Attempt {
            action: proposal.action,
            target: proposal.target.clone(),
            outcome: Outcome::Success,
            content: None,
            reason: proposal.reason.clone(),
            stimulus: proposal.stimulus.clone(),
            rate_limited: false,
            retry_after: None,
        };

        if proposal.action.needs_text() {
            match self
                .generator
                .draft(&bot, proposal.action, proposal.stimulus.as_ref())
                .await
            {
                Ok(draft) => attempt.content = Some(draft.text),
                Err(e) if e.is_generation_failure() => {
                    attempt.outcome = Outcome::failed(FailureKind::Generation, e.to_string());
                    return self.finish(&bot, lease, progress, attempt).await;
                }
                Err(e) => return Err(e),
            }
        }

        let action = PlatformAction {
            action: proposal.action,
            target: proposal.target,
            content: attempt.content.clone(),
        };
        attempt.outcome = match self.submit_with_retry(&bot, &action).await {
            PlatformOutcome::Accepted { remote_id } => {
                if let (ActionType::Post, Some(id)) = (action.action, remote_id) {
                    attempt.target = TargetRef::Post(id);
                }
                Outcome::Success
            }
            PlatformOutcome::RateLimited { retry_after } => {
                attempt.rate_limited = true;
                attempt.retry_after = retry_after;
                Outcome::failed(FailureKind::RateLimited, "platform rate limited")
            }
            PlatformOutcome::Transient(reason) => Outcome::failed(FailureKind::Transient, reason),
            PlatformOutcome::Permanent(reason) => Outcome::failed(FailureKind::Permanent, reason),
        };
        self.finish(&bot, lease, progress, attempt).await
    }

    /// Transient failures are retried with capped exponential backoff
    async fn submit_with_retry(&self, bot: &Bot, action: &PlatformAction) -> PlatformOutcome {
        let worker = &self.config.worker;
        let mut retries = 0;
        loop {
            match self.platform.submit(bot, action).await {
                PlatformOutcome::Transient(reason) if retries < worker.transient_retries => {
                    let delay = backoff_delay(worker.retry_base_ms, worker.retry_max_ms, retries);
                    debug!(
                        bot = %bot.id,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "transient platform failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Append the record (only while the lease is still ours), bump the
    /// bot's counters and reaction history, then remember successful
    /// actions. The bot's state is never written here.
    async fn finish(
        &self,
        bot: &Bot,
        lease: &Lease,
        progress: &Mutex<Progress>,
        attempt: Attempt,
    ) -> HiveResult<UnitResult> {
        let now = self.clock.now();
        if !self.leases.holds(lease, now) {
            warn!(bot = %bot.id, action = %attempt.action, "lease lost before recording, result dropped");
            return Ok(UnitResult::Conflict);
        }

        let success = attempt.outcome.is_success();
        let record = ActivityRecord::new(
            bot.id,
            attempt.action,
            attempt.target.clone(),
            lease.acquired_at,
            now,
            attempt.outcome.clone(),
        )
        .with_content(attempt.content.clone())
        .with_reason(attempt.reason.clone());
        self.persistence.append_activity(record).await?;
        lock(progress).recorded = true;

        let updated = self
            .persistence
            .record_counters(bot.id, attempt.action, success, now)
            .await?;
        self.reaction
            .record_action(bot.id, attempt.action, &attempt.target, now, &attempt.outcome);
        if let Some(kind) = attempt.outcome.failure_kind() {
            self.count_failure(kind);
        }
        self.log_attempt(bot.id, &attempt, now);

        if success {
            self.remember(updated.as_ref().unwrap_or(bot), &attempt).await;
        }
        Ok(UnitResult::Acted {
            action: attempt.action,
            outcome: attempt.outcome,
            rate_limited: attempt.rate_limited,
            retry_after: attempt.retry_after,
        })
    }

    /// Memory writes never fail the action
    async fn remember(&self, bot: &Bot, attempt: &Attempt) {
        let stored = match (attempt.action, &attempt.stimulus, &attempt.content) {
            (ActionType::Post, _, Some(text)) => {
                let source = FragmentSource::OwnAction {
                    action: ActionType::Post,
                    target: attempt.target.clone(),
                };
                self.memory.store(bot.id, text, source).await
            }
            (ActionType::Like | ActionType::Comment, Some(stimulus), _) => {
                let note = self
                    .generator
                    .memory_note(bot, attempt.action, stimulus)
                    .await;
                let source = FragmentSource::ObservedContent {
                    post_id: stimulus.post_id.clone(),
                    author: stimulus.author.clone(),
                };
                self.memory.store(bot.id, &note, source).await
            }
            (ActionType::Follow | ActionType::Unfollow, Some(stimulus), _) => {
                let note = prompts::fallback_note(attempt.action, stimulus);
                let source = FragmentSource::Relationship {
                    user: stimulus.author.clone(),
                };
                self.memory.store_weighted(bot.id, &note, source, 0.5).await
            }
            _ => return,
        };
        if let Err(e) = stored {
            warn!(bot = %bot.id, error = %e, "could not store memory");
        }
    }

    /// Record the chosen action as incomplete when the unit was cut short
    async fn record_incomplete(
        &self,
        lease: &Lease,
        progress: &Mutex<Progress>,
        reason: &str,
    ) -> UnitResult {
        let (chosen, recorded) = {
            let p = lock(progress);
            (p.chosen.clone(), p.recorded)
        };
        let Some((action, target)) = chosen else {
            return UnitResult::Abandoned;
        };
        if recorded {
            return UnitResult::Idle;
        }

        let now = self.clock.now().min(lease.expires_at);
        let outcome = Outcome::failed(FailureKind::Incomplete, reason);
        let record = ActivityRecord::new(
            lease.bot_id,
            action,
            target.clone(),
            lease.acquired_at,
            now,
            outcome.clone(),
        )
        .with_reason(reason);
        if let Err(e) = self.persistence.append_activity(record).await {
            return self.unit_error(lease.bot_id, e);
        }
        self.reaction
            .record_action(lease.bot_id, action, &target, now, &outcome);
        self.count_failure(FailureKind::Incomplete);
        warn!(bot = %lease.bot_id, %action, reason, "action recorded as incomplete");
        self.logger.log(
            &LogEntry::new(LogLevel::Warn, "dispatch", format!("{action} incomplete: {reason}"))
                .at(now)
                .with_bot(lease.bot_id),
        );
        UnitResult::Acted {
            action,
            outcome,
            rate_limited: false,
            retry_after: None,
        }
    }

    fn log_attempt(&self, bot_id: BotId, attempt: &Attempt, at: chrono::DateTime<chrono::Utc>) {
        let (level, message) = match &attempt.outcome {
            Outcome::Success => (LogLevel::Info, format!("{} ok", attempt.action)),
            Outcome::Failed { kind, reason } => (
                LogLevel::Warn,
                format!("{} failed ({kind}): {reason}", attempt.action),
            ),
        };
        self.logger.log(
            &LogEntry::new(level, "dispatch", message)
                .at(at)
                .with_bot(bot_id)
                .with_payload(json!({
                    "action": attempt.action,
                    "target": attempt.target,
                    "content_chars": attempt.content.as_ref().map(|c| c.chars().count()),
                })),
        );
    }
}
