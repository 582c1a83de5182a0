//! Reaction engine.
//!
//! Decides which actions a bot takes in response to the stimuli it can see.
//! Scoring is closed form:
//!
//! ```text
//! interest = topic_weight * overlap + recency_weight * 0.5^(age / half_life)
//! score    = interest * p(action) + U(-jitter, +jitter)
//! ```
//!
//! A candidate is proposed when its score reaches the persona's threshold.
//! The engine keeps a small per-bot history (last action time, targets already
//! acted on, who the bot follows) so it never repeats itself and respects the
//! minimum spacing between actions.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::ReactionConfig;
use crate::memory::keywords;
use crate::rng::RandomSource;
use crate::types::*;

#[derive(Debug, Default, Clone)]
struct BotHistory {
    last_action_at: Option<DateTime<Utc>>,
    done: HashSet<(ActionType, TargetRef)>,
    following: HashSet<String>,
}

pub struct ReactionEngine {
    config: ReactionConfig,
    min_spacing: Duration,
    rng: Arc<RandomSource>,
    clock: Arc<dyn Clock>,
    history: DashMap<BotId, BotHistory>,
}

impl ReactionEngine {
    pub fn new(
        config: ReactionConfig,
        min_spacing: Duration,
        rng: Arc<RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            min_spacing,
            rng,
            clock,
            history: DashMap::new(),
        }
    }

    /// Random subset of the fetched stimuli this bot gets to see
    pub fn visible(&self, stimuli: &[Stimulus]) -> Vec<Stimulus> {
        if stimuli.is_empty() {
            return Vec::new();
        }
        let fraction = self
            .rng
            .range_f64(self.config.visibility_min, self.config.visibility_max);
        self.rng.sample_fraction(stimuli, fraction)
    }

    /// Topic overlap plus recency, in [0, topic_weight + recency_weight]
    pub fn interest(&self, persona: &Persona, stimulus: &Stimulus, now: DateTime<Utc>) -> f64 {
        let overlap = topic_overlap(&persona.interests, &stimulus.text);
        let age_hours = (now - stimulus.created_at).num_milliseconds() as f64 / 3_600_000.0;
        let recency = crate::memory::recency(age_hours, self.config.recency_half_life_hours);
        self.config.topic_weight * overlap + self.config.recency_weight * recency
    }

    /// Proposed actions, most confident first. Empty while the bot is still
    /// inside its minimum spacing.
    pub fn evaluate(&self, bot: &Bot, stimuli: &[Stimulus]) -> Vec<ProposedAction> {
        let now = self.clock.now();
        let history = self
            .history
            .get(&bot.id)
            .map(|h| h.clone())
            .unwrap_or_default();

        if let Some(last) = history.last_action_at {
            if now < last + self.min_spacing {
                return Vec::new();
            }
        }

        let horizon = Duration::milliseconds((self.config.horizon_hours * 3_600_000.0) as i64);
        let persona = &bot.persona;
        let mut proposals = Vec::new();

        for stimulus in stimuli {
            if stimulus.author.eq_ignore_ascii_case(&bot.username) {
                continue;
            }
            if now - stimulus.created_at > horizon {
                continue;
            }

            let interest = self.interest(persona, stimulus, now);
            let following = history.following.contains(&stimulus.author);

            let mut candidates = vec![
                (ActionType::Like, TargetRef::Post(stimulus.post_id.clone())),
                (ActionType::Comment, TargetRef::Post(stimulus.post_id.clone())),
            ];
            if following {
                if interest < self.config.unfollow_interest_ceiling {
                    candidates.push((ActionType::Unfollow, TargetRef::User(stimulus.author.clone())));
                }
            } else {
                candidates.push((ActionType::Follow, TargetRef::User(stimulus.author.clone())));
            }

            for (action, target) in candidates {
                if history.done.contains(&(action, target.clone())) {
                    continue;
                }
                let p = persona.probabilities.for_action(action);
                let score = interest * p + self.rng.jitter(self.config.jitter);
                if score >= persona.reaction_threshold {
                    proposals.push(ProposedAction {
                        bot_id: bot.id,
                        action,
                        target,
                        confidence: score,
                        reason: format!("interest {interest:.2} x p({action}) {p:.2}"),
                        stimulus: Some(stimulus.clone()),
                    });
                }
            }
        }

        if self.rng.chance(persona.posting_bias) {
            proposals.push(ProposedAction {
                bot_id: bot.id,
                action: ActionType::Post,
                target: TargetRef::None,
                confidence: persona.reaction_threshold,
                reason: "proactive post".into(),
                stimulus: None,
            });
        }

        proposals.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.action.cmp(&b.action))
                .then_with(|| a.target.cmp(&b.target))
        });
        proposals.truncate(self.config.max_proposals);
        proposals
    }

    /// Note an attempted action. A settled outcome (success or permanent
    /// failure) marks the target as done; only a success changes who the bot
    /// follows.
    pub fn record_action(
        &self,
        bot_id: BotId,
        action: ActionType,
        target: &TargetRef,
        at: DateTime<Utc>,
        outcome: &Outcome,
    ) {
        let mut history = self.history.entry(bot_id).or_default();
        history.last_action_at = Some(history.last_action_at.map_or(at, |prev| prev.max(at)));
        if action != ActionType::Post && outcome.is_settled() {
            history.done.insert((action, target.clone()));
        }
        if !outcome.is_success() {
            return;
        }
        match (action, target) {
            (ActionType::Follow, TargetRef::User(user)) => {
                history.following.insert(user.clone());
            }
            (ActionType::Unfollow, TargetRef::User(user)) => {
                history.following.remove(user);
            }
            _ => {}
        }
    }

    /// Rebuild history from the activity log, e.g. after a restart
    pub fn restore(&self, records: &[ActivityRecord]) {
        let mut ordered: Vec<&ActivityRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.timestamp);
        for record in ordered {
            self.record_action(
                record.bot_id,
                record.action,
                &record.target,
                record.timestamp,
                &record.outcome,
            );
        }
    }

    pub fn is_following(&self, bot_id: BotId, user: &str) -> bool {
        self.history
            .get(&bot_id)
            .is_some_and(|h| h.following.contains(user))
    }

    pub fn last_action_at(&self, bot_id: BotId) -> Option<DateTime<Utc>> {
        self.history.get(&bot_id).and_then(|h| h.last_action_at)
    }
}

/// Fraction of interests mentioned in `text`. An interest counts when any of
/// its keywords appears.
fn topic_overlap(interests: &[String], text: &str) -> f64 {
    if interests.is_empty() {
        return 0.0;
    }
    let words: HashSet<String> = keywords(text).into_iter().collect();
    let hits = interests
        .iter()
        .filter(|interest| {
            let terms = keywords(interest);
            if terms.is_empty() {
                words.contains(interest.as_str())
            } else {
                terms.iter().any(|t| words.contains(t))
            }
        })
        .count();
    hits as f64 / interests.len() as f64
}
