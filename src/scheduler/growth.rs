use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::config::PopulationConfig;
use crate::generator::ProfileSeed;
use crate::rng::RandomSource;
use crate::types::{BotCategory, Persona, ReactionProbabilities};

/// Bots to add this cycle given the current population
pub fn plan_growth(current: usize, config: &PopulationConfig, rng: &RandomSource) -> usize {
    let cap = config.ceiling();
    if current >= cap {
        return 0;
    }
    if current < config.initial {
        return config.initial.min(cap) - current;
    }
    let delta = rng.range_u64(config.growth_min as u64, config.growth_max as u64) as usize;
    delta.min(cap - current)
}

/// Outcome of one growth cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrowthReport {
    pub skipped: bool,
    pub before: usize,
    pub planned: usize,
    pub created: usize,
    pub activated: usize,
    /// Dormant bots whose registration was retried and accepted this cycle
    pub reactivated: usize,
    pub after: usize,
}

impl GrowthReport {
    pub fn skipped(population: usize) -> Self {
        Self {
            skipped: true,
            before: population,
            after: population,
            ..Self::default()
        }
    }
}

/// Mutual exclusion and the idempotence window for growth cycles
pub struct GrowthEngine {
    interval: Duration,
    last_run: Mutex<Option<DateTime<Utc>>>,
    running: AsyncMutex<()>,
}

impl GrowthEngine {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Mutex::new(None),
            running: AsyncMutex::new(()),
        }
    }

    /// Exclusive right to run a cycle, or `None` if one is already running
    pub fn try_begin(&self) -> Option<MutexGuard<'_, ()>> {
        self.running.try_lock().ok()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(last) => now >= last + self.interval,
            None => true,
        }
    }

    pub fn mark_ran(&self, at: DateTime<Utc>) {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner())
    }
}

const INTEREST_POOL: &[&str] = &[
    "football", "basketball", "music", "movies", "gaming", "cooking", "travel", "fashion",
    "technology", "science", "politics", "art", "books", "fitness", "photography", "pets",
    "cars", "crypto", "gardening", "comedy", "history", "space", "coffee", "anime",
];

const GENDERS: &[&str] = &["male", "female"];

/// Draws personas and demographics for new bots
pub struct PersonaFactory;

impl PersonaFactory {
    pub fn seed(rng: &RandomSource) -> ProfileSeed {
        let category = rng
            .pick(&BotCategory::ALL)
            .copied()
            .unwrap_or(BotCategory::Neutral);
        let base = category.base_probabilities();
        let probabilities = ReactionProbabilities {
            like: base.like + rng.jitter(0.1),
            comment: base.comment + rng.jitter(0.1),
            follow: base.follow + rng.jitter(0.1),
            unfollow: base.unfollow + rng.jitter(0.1),
            repost: base.repost + rng.jitter(0.05),
        }
        .clamped();

        let count = rng.range_u64(1, 3) as usize;
        let mut interests: Vec<String> = Vec::with_capacity(count);
        while interests.len() < count {
            if let Some(pick) = rng.pick(INTEREST_POOL) {
                if !interests.iter().any(|i| i == pick) {
                    interests.push(pick.to_string());
                }
            }
        }

        let persona = Persona::new(category, interests)
            .with_probabilities(probabilities)
            .with_posting_bias(probabilities.repost.max(0.05));

        ProfileSeed {
            persona,
            age: rng.range_u64(18, 65) as u8,
            gender: rng.pick(GENDERS).copied().unwrap_or("female").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn population(initial: usize, target: usize, max: usize) -> PopulationConfig {
        PopulationConfig {
            initial,
            target,
            max,
            growth_min: 20,
            growth_max: 50,
            ..PopulationConfig::default()
        }
    }

    #[test]
    fn seeds_to_initial_then_grows_within_bounds() {
        let rng = RandomSource::seeded(3);
        let cfg = population(20, 5000, 5000);
        assert_eq!(plan_growth(0, &cfg, &rng), 20);
        assert_eq!(plan_growth(7, &cfg, &rng), 13);
        for _ in 0..100 {
            let delta = plan_growth(20, &cfg, &rng);
            assert!((20..=50).contains(&delta));
        }
    }

    #[test]
    fn never_exceeds_ceiling() {
        let rng = RandomSource::seeded(3);
        let cfg = population(20, 5000, 100);
        assert!(plan_growth(90, &cfg, &rng) <= 10);
        assert_eq!(plan_growth(100, &cfg, &rng), 0);
        assert_eq!(plan_growth(150, &cfg, &rng), 0);

        let tiny = population(20, 5, 5000);
        assert_eq!(plan_growth(0, &tiny, &rng), 5);
    }

    #[tokio::test]
    async fn growth_engine_is_exclusive_and_windowed() {
        let engine = GrowthEngine::new(Duration::hours(24));
        let t0 = Utc::now();
        assert!(engine.is_due(t0));

        let guard = engine.try_begin();
        assert!(guard.is_some());
        assert!(engine.try_begin().is_none());
        drop(guard);
        assert!(engine.try_begin().is_some());

        engine.mark_ran(t0);
        assert!(!engine.is_due(t0 + Duration::hours(23)));
        assert!(engine.is_due(t0 + Duration::hours(24)));
    }

    #[test]
    fn persona_seeds_stay_in_range() {
        let rng = RandomSource::seeded(11);
        for _ in 0..200 {
            let seed = PersonaFactory::seed(&rng);
            let p = seed.persona.probabilities;
            for v in [p.like, p.comment, p.follow, p.unfollow] {
                assert!((0.1..=0.9).contains(&v));
            }
            assert!((0.0..=0.3).contains(&p.repost));
            assert!((18..=65).contains(&seed.age));
            assert!(!seed.persona.interests.is_empty());
        }
    }
}
