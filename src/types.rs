use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::Embedding;

// ─── Identity ───────────────────────────────────────────────────────────────

/// Stable identifier of a bot, assigned by the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(pub u64);

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bot-{}", self.0)
    }
}

// ─── Persona ────────────────────────────────────────────────────────────────

/// Behavioral archetype a persona is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotCategory {
    Fan,
    Hater,
    Silent,
    Random,
    Neutral,
    Humorous,
    Provocative,
    RolePlayer,
}

impl BotCategory {
    pub const ALL: [BotCategory; 8] = [
        BotCategory::Fan,
        BotCategory::Hater,
        BotCategory::Silent,
        BotCategory::Random,
        BotCategory::Neutral,
        BotCategory::Humorous,
        BotCategory::Provocative,
        BotCategory::RolePlayer,
    ];

    /// Base per-action probabilities before per-bot jitter
    pub fn base_probabilities(&self) -> ReactionProbabilities {
        let (like, comment, follow, unfollow, repost) = match self {
            BotCategory::Fan => (0.8, 0.5, 0.7, 0.1, 0.2),
            BotCategory::Hater => (0.1, 0.4, 0.2, 0.6, 0.05),
            BotCategory::Silent => (0.4, 0.1, 0.3, 0.2, 0.05),
            BotCategory::Random => (0.5, 0.3, 0.4, 0.4, 0.1),
            BotCategory::Neutral => (0.5, 0.3, 0.5, 0.3, 0.1),
            BotCategory::Humorous => (0.7, 0.6, 0.6, 0.2, 0.15),
            BotCategory::Provocative => (0.3, 0.7, 0.4, 0.5, 0.1),
            BotCategory::RolePlayer => (0.6, 0.5, 0.5, 0.3, 0.15),
        };
        ReactionProbabilities {
            like,
            comment,
            follow,
            unfollow,
            repost,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BotCategory::Fan => "supportive, enthusiastic, positive",
            BotCategory::Hater => "critical, negative, provocative",
            BotCategory::Silent => "observant, rarely comments, occasional likes",
            BotCategory::Random => "unpredictable, varied behavior",
            BotCategory::Neutral => "balanced, rational, thoughtful",
            BotCategory::Humorous => "funny, sarcastic, meme-oriented",
            BotCategory::Provocative => "challenging, questioning, debate-oriented",
            BotCategory::RolePlayer => "in-character, consistent persona",
        }
    }

    /// Voice instructions used as the system prompt for this archetype
    pub fn voice(&self) -> &'static str {
        match self {
            BotCategory::Fan => "You are an enthusiastic fan who loves the content. Your comments are supportive and positive.",
            BotCategory::Hater => "You are critical of the content. Your comments point out flaws and are sometimes negative.",
            BotCategory::Silent => "You rarely comment, but when you do, it is thoughtful and concise.",
            BotCategory::Random => "Your behavior is unpredictable. Sometimes supportive, sometimes critical, sometimes off-topic.",
            BotCategory::Neutral => "You are balanced and rational. Your comments are thoughtful and objective.",
            BotCategory::Humorous => "You love humor and memes. Your comments are funny, sometimes sarcastic.",
            BotCategory::Provocative => "You like to challenge ideas. Your comments ask difficult questions and provoke thought.",
            BotCategory::RolePlayer => "You stay in character at all times. Your comments reflect your persona consistently.",
        }
    }
}

impl std::fmt::Display for BotCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BotCategory::Fan => "fan",
            BotCategory::Hater => "hater",
            BotCategory::Silent => "silent",
            BotCategory::Random => "random",
            BotCategory::Neutral => "neutral",
            BotCategory::Humorous => "humorous",
            BotCategory::Provocative => "provocative",
            BotCategory::RolePlayer => "role_player",
        };
        write!(f, "{s}")
    }
}

/// Per-action reaction probabilities in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReactionProbabilities {
    pub like: f64,
    pub comment: f64,
    pub follow: f64,
    pub unfollow: f64,
    pub repost: f64,
}

impl ReactionProbabilities {
    pub fn for_action(&self, action: ActionType) -> f64 {
        match action {
            ActionType::Like => self.like,
            ActionType::Comment => self.comment,
            ActionType::Follow => self.follow,
            ActionType::Unfollow => self.unfollow,
            ActionType::Post => self.repost,
        }
    }

    /// Clamp into the ranges new personas are allowed to occupy
    pub fn clamped(self) -> Self {
        Self {
            like: self.like.clamp(0.1, 0.9),
            comment: self.comment.clamp(0.1, 0.9),
            follow: self.follow.clamp(0.1, 0.9),
            unfollow: self.unfollow.clamp(0.1, 0.9),
            repost: self.repost.clamp(0.0, 0.3),
        }
    }
}

/// Immutable behavioral profile attached to a bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub category: BotCategory,
    pub tone: String,
    pub interests: Vec<String>,
    pub probabilities: ReactionProbabilities,
    /// Minimum score a candidate reaction must reach
    pub reaction_threshold: f64,
    /// Chance per dispatch of proposing an original post
    pub posting_bias: f64,
    #[serde(default)]
    pub drift_generation: u32,
}

impl Persona {
    pub fn new(category: BotCategory, interests: Vec<String>) -> Self {
        Self {
            category,
            tone: category.description().to_string(),
            interests: interests.into_iter().map(|i| i.to_lowercase()).collect(),
            probabilities: category.base_probabilities(),
            reaction_threshold: 0.25,
            posting_bias: 0.1,
            drift_generation: 0,
        }
    }

    pub fn with_probabilities(mut self, probabilities: ReactionProbabilities) -> Self {
        self.probabilities = probabilities;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.reaction_threshold = threshold;
        self
    }

    pub fn with_posting_bias(mut self, bias: f64) -> Self {
        self.posting_bias = bias.clamp(0.0, 1.0);
        self
    }

    /// Supervised drift: returns a new persona whose probabilities and
    /// threshold are nudged by `deltas` (already sampled by the caller).
    pub fn drifted(&self, deltas: &ReactionProbabilities, threshold_delta: f64) -> Persona {
        let p = &self.probabilities;
        let mut next = self.clone();
        next.probabilities = ReactionProbabilities {
            like: p.like + deltas.like,
            comment: p.comment + deltas.comment,
            follow: p.follow + deltas.follow,
            unfollow: p.unfollow + deltas.unfollow,
            repost: p.repost + deltas.repost,
        }
        .clamped();
        next.reaction_threshold = (self.reaction_threshold + threshold_delta).clamp(0.05, 0.95);
        next.drift_generation += 1;
        next
    }

    /// System prompt establishing the bot's voice
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.category.voice().to_string();
        prompt.push_str(&format!(" Your tone is {}.", self.tone));
        if !self.interests.is_empty() {
            prompt.push_str(&format!(
                " You care about: {}.",
                self.interests.join(", ")
            ));
        }
        prompt
    }
}

// ─── Bot ────────────────────────────────────────────────────────────────────

/// Lifecycle state of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Dormant,
    Active,
    Suspended,
    Retired,
}

impl ActivityState {
    pub fn can_transition_to(&self, next: ActivityState) -> bool {
        use ActivityState::*;
        matches!(
            (self, next),
            (Dormant, Active)
                | (Dormant, Retired)
                | (Active, Active)
                | (Active, Suspended)
                | (Active, Retired)
                | (Suspended, Active)
                | (Suspended, Retired)
        )
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityState::Dormant => "dormant",
            ActivityState::Active => "active",
            ActivityState::Suspended => "suspended",
            ActivityState::Retired => "retired",
        };
        write!(f, "{s}")
    }
}

/// Cumulative per-bot action counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounters {
    pub posts: u64,
    pub comments: u64,
    pub likes: u64,
    pub follows: u64,
    pub unfollows: u64,
    pub failures: u64,
}

impl ActionCounters {
    pub fn record(&mut self, action: ActionType, success: bool) {
        if !success {
            self.failures += 1;
            return;
        }
        match action {
            ActionType::Post => self.posts += 1,
            ActionType::Comment => self.comments += 1,
            ActionType::Like => self.likes += 1,
            ActionType::Follow => self.follows += 1,
            ActionType::Unfollow => self.unfollows += 1,
        }
    }

    pub fn total_successes(&self) -> u64 {
        self.posts + self.comments + self.likes + self.follows + self.unfollows
    }
}

/// Profile fields supplied when creating a bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBot {
    pub username: String,
    pub full_name: String,
    pub bio: String,
    pub age: u8,
    pub gender: String,
    pub persona: Persona,
}

/// An autonomous agent simulating a platform user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub username: String,
    pub full_name: String,
    pub bio: String,
    pub age: u8,
    pub gender: String,
    pub persona: Persona,
    pub state: ActivityState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default)]
    pub counters: ActionCounters,
}

impl Bot {
    pub fn from_new(id: BotId, new: NewBot, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            username: new.username,
            full_name: new.full_name,
            bio: new.bio,
            age: new.age,
            gender: new.gender,
            persona: new.persona,
            state: ActivityState::Dormant,
            created_at,
            last_active: None,
            counters: ActionCounters::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != ActivityState::Retired
    }
}

// ─── Actions ────────────────────────────────────────────────────────────────

/// Kind of platform action a bot can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Post,
    Comment,
    Like,
    Follow,
    Unfollow,
}

impl ActionType {
    /// Whether this action carries generated text
    pub fn needs_text(&self) -> bool {
        matches!(self, ActionType::Post | ActionType::Comment)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::Post => "post",
            ActionType::Comment => "comment",
            ActionType::Like => "like",
            ActionType::Follow => "follow",
            ActionType::Unfollow => "unfollow",
        };
        write!(f, "{s}")
    }
}

/// What an action is aimed at
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Post(String),
    User(String),
    /// Original posts have no target until the platform assigns one
    None,
}

impl TargetRef {
    pub fn key(&self) -> &str {
        match self {
            TargetRef::Post(id) | TargetRef::User(id) => id,
            TargetRef::None => "",
        }
    }
}

/// Why an action did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Generation,
    RateLimited,
    Transient,
    Permanent,
    /// Abandoned at shutdown before completion
    Incomplete,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Generation => "generation",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Incomplete => "incomplete",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed { kind: FailureKind, reason: String },
}

impl Outcome {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        Outcome::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Success, or a failure the platform will never accept on retry
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Outcome::Success
                | Outcome::Failed {
                    kind: FailureKind::Permanent,
                    ..
                }
        )
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success => None,
            Outcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Immutable audit entry for one bot action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub bot_id: BotId,
    pub action: ActionType,
    pub target: TargetRef,
    /// When the bot's action lease was taken
    pub started_at: DateTime<Utc>,
    /// When the action finished and the lease was about to be released
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub reason: String,
}

impl ActivityRecord {
    pub fn new(
        bot_id: BotId,
        action: ActionType,
        target: TargetRef,
        started_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
        outcome: Outcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bot_id,
            action,
            target,
            started_at,
            timestamp,
            outcome,
            content: None,
            reason: String::new(),
        }
    }

    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content = content;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

// ─── Memory ─────────────────────────────────────────────────────────────────

/// Where a memory fragment came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentSource {
    OwnAction { action: ActionType, target: TargetRef },
    ObservedContent { post_id: String, author: String },
    Relationship { user: String },
    Note,
}

/// Retrievable unit of context derived from past activity or observed content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: u64,
    pub bot_id: BotId,
    pub text: String,
    /// `None` means the fragment is only retrievable by keyword
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    pub keywords: Vec<String>,
    pub source: FragmentSource,
    pub weight: f32,
    pub half_life_hours: f64,
    pub created_at: DateTime<Utc>,
}

impl MemoryFragment {
    pub fn is_keyword_only(&self) -> bool {
        self.embedding.is_none()
    }
}

// ─── Stimuli & proposals ────────────────────────────────────────────────────

/// A piece of platform content a bot could react to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub post_id: String,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// An action the reaction engine recommends, with its rationale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub bot_id: BotId,
    pub action: ActionType,
    pub target: TargetRef,
    pub confidence: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stimulus: Option<Stimulus>,
}

/// Generated text ready for submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftContent {
    pub text: String,
    pub provider: String,
    pub model: String,
    /// 1 when the first draft passed, 2 when the corrective retry was needed
    pub attempts: u32,
}

// ─── Token Usage ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn new(input: usize, output: usize) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

// ─── Providers ───────────────────────────────────────────────────────────────

/// Known text-generation backends
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    Gemini,
    Custom(String),
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::Custom(s) => write!(f, "{s}"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "anthropic" => ProviderKind::Anthropic,
            "openai" => ProviderKind::OpenAI,
            "gemini" | "google" => ProviderKind::Gemini,
            other => ProviderKind::Custom(other.to_string()),
        })
    }
}

/// Credentials for a provider call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthProfile {
    pub api_key: String,
}

impl AuthProfile {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use ActivityState::*;
        assert!(Dormant.can_transition_to(Active));
        assert!(Active.can_transition_to(Suspended));
        assert!(Active.can_transition_to(Active));
        assert!(Suspended.can_transition_to(Active));
        assert!(Suspended.can_transition_to(Retired));
        assert!(!Retired.can_transition_to(Active));
        assert!(!Dormant.can_transition_to(Suspended));
        assert!(!Suspended.can_transition_to(Dormant));
    }

    #[test]
    fn probabilities_clamp_to_allowed_ranges() {
        let p = ReactionProbabilities {
            like: 1.4,
            comment: -0.2,
            follow: 0.5,
            unfollow: 0.95,
            repost: 0.6,
        }
        .clamped();
        assert_eq!(p.like, 0.9);
        assert_eq!(p.comment, 0.1);
        assert_eq!(p.follow, 0.5);
        assert_eq!(p.unfollow, 0.9);
        assert_eq!(p.repost, 0.3);
    }

    #[test]
    fn drift_produces_new_persona() {
        let persona = Persona::new(BotCategory::Fan, vec!["Music".into()]);
        let deltas = ReactionProbabilities {
            like: 0.05,
            comment: -0.05,
            follow: 0.0,
            unfollow: 0.0,
            repost: 0.0,
        };
        let drifted = persona.drifted(&deltas, 0.1);
        assert_eq!(persona.drift_generation, 0);
        assert_eq!(drifted.drift_generation, 1);
        assert!((drifted.probabilities.like - 0.85).abs() < 1e-9);
        assert!((drifted.reaction_threshold - 0.35).abs() < 1e-9);
        assert_eq!(drifted.interests, vec!["music".to_string()]);
    }

    #[test]
    fn counters_record_successes_and_failures() {
        let mut counters = ActionCounters::default();
        counters.record(ActionType::Like, true);
        counters.record(ActionType::Comment, true);
        counters.record(ActionType::Comment, false);
        assert_eq!(counters.likes, 1);
        assert_eq!(counters.comments, 1);
        assert_eq!(counters.failures, 1);
        assert_eq!(counters.total_successes(), 2);
    }

    #[test]
    fn system_prompt_mentions_interests() {
        let persona = Persona::new(BotCategory::Neutral, vec!["cycling".into(), "coffee".into()]);
        let prompt = persona.system_prompt();
        assert!(prompt.contains("balanced and rational"));
        assert!(prompt.contains("cycling, coffee"));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(Outcome::failed(FailureKind::Permanent, "banned")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "permanent");
        let json = serde_json::to_value(Outcome::Success).unwrap();
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn provider_kind_parses_and_displays() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!(
            "local".parse::<ProviderKind>().unwrap(),
            ProviderKind::Custom("local".into())
        );
        assert_eq!(ProviderKind::Anthropic.to_string(), "anthropic");
    }

    #[test]
    fn target_key() {
        assert_eq!(TargetRef::Post("p1".into()).key(), "p1");
        assert_eq!(TargetRef::None.key(), "");
    }
}
