//! Runtime configuration.
//!
//! [`HiveConfig`] is a tree of serde structs. Every field has a default, so a
//! YAML file only needs to name what it changes. Environment variables with
//! the legacy deployment names are layered on top by [`HiveConfig::apply_overrides`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HiveError, HiveResult};
use crate::types::ProviderKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub population: PopulationConfig,
    pub cadence: CadenceConfig,
    pub rate_limit: RateLimitConfig,
    pub providers: Vec<ProviderSettings>,
    pub breaker: BreakerConfig,
    pub memory: MemoryConfig,
    pub generation: GenerationConfig,
    pub reaction: ReactionConfig,
    pub worker: WorkerConfig,
    pub platform: PlatformConfig,
    /// JSONL audit trail of every activity record
    pub journal_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            population: PopulationConfig::default(),
            cadence: CadenceConfig::default(),
            rate_limit: RateLimitConfig::default(),
            providers: vec![
                ProviderSettings::new(ProviderKind::OpenAI, "gpt-4o-mini").with_priority(0),
                ProviderSettings::new(ProviderKind::Anthropic, "claude-3-5-haiku-latest")
                    .with_priority(1),
                ProviderSettings::new(ProviderKind::Gemini, "gemini-1.5-flash").with_priority(2),
            ],
            breaker: BreakerConfig::default(),
            memory: MemoryConfig::default(),
            generation: GenerationConfig::default(),
            reaction: ReactionConfig::default(),
            worker: WorkerConfig::default(),
            platform: PlatformConfig::default(),
            journal_path: None,
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Seed size: the first growth cycle fills the population up to this
    pub initial: usize,
    pub min: usize,
    pub target: usize,
    /// Hard cap, never exceeded
    pub max: usize,
    pub growth_min: usize,
    pub growth_max: usize,
    /// Growth cycles closer together than this are no-ops
    pub growth_interval_secs: u64,
}

impl PopulationConfig {
    /// Effective ceiling for growth
    pub fn ceiling(&self) -> usize {
        self.target.min(self.max)
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            initial: 20,
            min: 0,
            target: 5000,
            max: 5000,
            growth_min: 20,
            growth_max: 50,
            growth_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Minimum gap between two actions of the same bot
    pub min_spacing_secs: u64,
    pub max_spacing_secs: u64,
    pub tick_interval_ms: u64,
    /// Backpressure never stretches the tick beyond this
    pub max_tick_interval_ms: u64,
    pub batch_size: usize,
    /// Backpressure never shrinks the batch below this
    pub min_batch_size: usize,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            min_spacing_secs: 30,
            max_spacing_secs: 300,
            tick_interval_ms: 60_000,
            max_tick_interval_ms: 600_000,
            batch_size: 50,
            min_batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub actions_per_window: usize,
    pub window_secs: u64,
    /// Deferral used when the platform rate-limits without a retry hint
    pub default_backoff_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            actions_per_window: 600,
            window_secs: 3600,
            default_backoff_secs: 60,
        }
    }
}

/// One generative backend and its parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Lower runs first
    pub priority: u32,
    pub timeout_ms: u64,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAI,
            model: "gpt-4o-mini".into(),
            api_key: String::new(),
            base_url: None,
            temperature: 0.7,
            max_tokens: 400,
            priority: 0,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    pub base_cooldown_ms: u64,
    pub max_cooldown_ms: u64,
    /// A half-open trial older than this is presumed lost and another is admitted
    pub probe_stale_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown_ms: 30_000,
            max_cooldown_ms: 600_000,
            probe_stale_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Local feature hashing, no network
    Hashing,
    OpenAI,
    /// Keyword-only memory
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Fragments kept per bot before compaction evicts
    pub retention_cap: usize,
    pub retrieve_k: usize,
    pub char_budget: usize,
    pub half_life_hours: f64,
    pub similarity_weight: f64,
    pub recency_weight: f64,
    pub embed_timeout_ms: u64,
    /// Nearest-neighbour candidates requested from persistence per retrieval
    pub ann_candidates: usize,
    pub embedder: EmbedderKind,
    pub embedding_dim: usize,
    pub embedding_model: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention_cap: 200,
            retrieve_k: 3,
            char_budget: 1200,
            half_life_hours: 72.0,
            similarity_weight: 0.7,
            recency_weight: 0.3,
            embed_timeout_ms: 5_000,
            ann_candidates: 32,
            embedder: EmbedderKind::Hashing,
            embedding_dim: 256,
            embedding_model: "text-embedding-3-small".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_post_chars: usize,
    pub max_comment_chars: usize,
    pub max_bio_chars: usize,
    pub min_chars: usize,
    /// Regexes generated text must not match
    pub disallowed_patterns: Vec<String>,
    /// Multiplier applied to temperature on the corrective retry
    pub retry_temperature_factor: f32,
    pub username_max_len: usize,
    pub username_attempts: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_post_chars: 500,
            max_comment_chars: 280,
            max_bio_chars: 300,
            min_chars: 2,
            disallowed_patterns: vec![
                r"(?i)\bas an ai\b".into(),
                r"(?i)\blanguage model\b".into(),
                r"https?://".into(),
            ],
            retry_temperature_factor: 0.5,
            username_max_len: 15,
            username_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactionConfig {
    pub topic_weight: f64,
    pub recency_weight: f64,
    pub recency_half_life_hours: f64,
    pub jitter: f64,
    /// Stimuli older than this are ignored
    pub horizon_hours: f64,
    pub max_proposals: usize,
    /// Unfollow is only considered below this interest
    pub unfollow_interest_ceiling: f64,
    pub visibility_min: f64,
    pub visibility_max: f64,
    pub posts_fetch_limit: usize,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            topic_weight: 0.6,
            recency_weight: 0.4,
            recency_half_life_hours: 24.0,
            jitter: 0.1,
            horizon_hours: 48.0,
            max_proposals: 3,
            unfollow_interest_ceiling: 0.2,
            visibility_min: 0.3,
            visibility_max: 0.8,
            posts_fetch_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub lease_ttl_secs: u64,
    pub shutdown_grace_ms: u64,
    pub transient_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            lease_ttl_secs: 180,
            shutdown_grace_ms: 10_000,
            transient_retries: 3,
            retry_base_ms: 500,
            retry_max_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            api_token: String::new(),
            timeout_ms: 10_000,
        }
    }
}

impl HiveConfig {
    pub fn from_yaml_str(yaml: &str) -> HiveResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> HiveResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Apply the process environment on top of this config
    pub fn apply_env(&mut self) -> HiveResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply legacy variable overrides, read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> HiveResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("INITIAL_BOTS_COUNT") {
            self.population.initial = parse_var("INITIAL_BOTS_COUNT", &v)?;
        }
        if let Some(v) = get("DAILY_BOTS_GROWTH_MIN") {
            self.population.growth_min = parse_var("DAILY_BOTS_GROWTH_MIN", &v)?;
        }
        if let Some(v) = get("DAILY_BOTS_GROWTH_MAX") {
            self.population.growth_max = parse_var("DAILY_BOTS_GROWTH_MAX", &v)?;
        }
        if let Some(v) = get("MAX_BOTS_COUNT") {
            self.population.max = parse_var("MAX_BOTS_COUNT", &v)?;
        }
        if let Some(v) = get("MONITORING_INTERVAL") {
            let secs: u64 = parse_var("MONITORING_INTERVAL", &v)?;
            self.cadence.tick_interval_ms = secs * 1000;
        }
        if let Some(v) = get("REACTION_DELAY_MIN") {
            self.cadence.min_spacing_secs = parse_var("REACTION_DELAY_MIN", &v)?;
        }
        if let Some(v) = get("REACTION_DELAY_MAX") {
            self.cadence.max_spacing_secs = parse_var("REACTION_DELAY_MAX", &v)?;
        }
        if let Some(v) = get("API_BASE_URL") {
            self.platform.base_url = v;
        }
        if let Some(v) = get("API_TOKEN") {
            self.platform.api_token = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }

        for (var, kind) in [
            ("OPENAI_API_KEY", ProviderKind::OpenAI),
            ("ANTHROPIC_API_KEY", ProviderKind::Anthropic),
            ("GOOGLE_API_KEY", ProviderKind::Gemini),
        ] {
            if let Some(key) = get(var) {
                self.provider_entry(&kind).api_key = key;
            }
        }

        if let Some(v) = get("DEFAULT_LLM_PROVIDER") {
            let kind: ProviderKind = v.parse().unwrap_or(ProviderKind::Custom(v.clone()));
            self.promote_provider(&kind);
            if let Some(model) = get("DEFAULT_LLM_MODEL") {
                self.provider_entry(&kind).model = model;
            }
        }
        if let Some(v) = get("TEMPERATURE") {
            let temperature: f32 = parse_var("TEMPERATURE", &v)?;
            self.providers.iter_mut().for_each(|p| p.temperature = temperature);
        }
        if let Some(v) = get("MAX_TOKENS") {
            let max_tokens: u32 = parse_var("MAX_TOKENS", &v)?;
            self.providers.iter_mut().for_each(|p| p.max_tokens = max_tokens);
        }
        Ok(())
    }

    fn provider_entry(&mut self, kind: &ProviderKind) -> &mut ProviderSettings {
        if let Some(idx) = self.providers.iter().position(|p| &p.kind == kind) {
            return &mut self.providers[idx];
        }
        let priority = self.providers.iter().map(|p| p.priority + 1).max().unwrap_or(0);
        let model = match kind {
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::Gemini => "gemini-1.5-flash",
            _ => "gpt-4o-mini",
        };
        self.providers
            .push(ProviderSettings::new(kind.clone(), model).with_priority(priority));
        let last = self.providers.len() - 1;
        &mut self.providers[last]
    }

    /// Make `kind` the first provider tried
    fn promote_provider(&mut self, kind: &ProviderKind) {
        self.provider_entry(kind);
        for p in self.providers.iter_mut() {
            p.priority = if &p.kind == kind { 0 } else { p.priority + 1 };
        }
    }

    pub fn validate(&self) -> HiveResult<()> {
        let p = &self.population;
        if p.initial > p.max {
            return Err(config_err(format!(
                "population.initial ({}) exceeds population.max ({})",
                p.initial, p.max
            )));
        }
        if p.min > p.max {
            return Err(config_err("population.min exceeds population.max"));
        }
        if p.growth_min > p.growth_max {
            return Err(config_err(format!(
                "growth bounds inverted: [{}, {}]",
                p.growth_min, p.growth_max
            )));
        }
        let c = &self.cadence;
        if c.min_spacing_secs > c.max_spacing_secs {
            return Err(config_err("cadence.min_spacing_secs exceeds max_spacing_secs"));
        }
        if c.tick_interval_ms == 0 || c.tick_interval_ms > c.max_tick_interval_ms {
            return Err(config_err(
                "cadence.tick_interval_ms must be positive and at most max_tick_interval_ms",
            ));
        }
        if c.min_batch_size == 0 || c.min_batch_size > c.batch_size {
            return Err(config_err("cadence batch sizes must satisfy 1 <= min <= batch"));
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.actions_per_window == 0 {
            return Err(config_err("rate_limit window and budget must be positive"));
        }
        if self.worker.pool_size == 0 {
            return Err(config_err("worker.pool_size must be positive"));
        }
        if self.worker.lease_ttl_secs == 0 {
            return Err(config_err("worker.lease_ttl_secs must be positive"));
        }
        let b = &self.breaker;
        if b.failure_threshold == 0 || b.base_cooldown_ms > b.max_cooldown_ms {
            return Err(config_err(
                "breaker needs a positive threshold and base_cooldown <= max_cooldown",
            ));
        }
        if self.memory.retention_cap == 0 || self.memory.half_life_hours <= 0.0 {
            return Err(config_err("memory retention cap and half-life must be positive"));
        }
        let r = &self.reaction;
        if !(0.0 < r.visibility_min && r.visibility_min <= r.visibility_max && r.visibility_max <= 1.0)
        {
            return Err(config_err("reaction visibility must satisfy 0 < min <= max <= 1"));
        }
        if r.recency_half_life_hours <= 0.0 {
            return Err(config_err("reaction.recency_half_life_hours must be positive"));
        }
        if self.generation.username_max_len < crate::generator::MIN_USERNAME_LEN {
            return Err(config_err(format!(
                "generation.username_max_len must be at least {}",
                crate::generator::MIN_USERNAME_LEN
            )));
        }
        for pattern in &self.generation.disallowed_patterns {
            regex::Regex::new(pattern)
                .map_err(|e| config_err(format!("invalid disallowed pattern {pattern:?}: {e}")))?;
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> HiveError {
    HiveError::Config(msg.into())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> HiveResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| config_err(format!("{name}: cannot parse {value:?}")))
}
