//! Content generation.
//!
//! Turns (persona, memory context, action intent) into platform-ready text.
//! Output is cleaned and checked against [`OutputConstraints`]; a violation
//! gets exactly one corrective retry at a lower temperature. The generator
//! reads memory but never writes anything.

mod constraints;
pub mod prompts;

pub use constraints::{OutputConstraints, Violation};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{HiveError, HiveResult};
use crate::memory::MemoryStore;
use crate::provider::{PromptIntent, ProviderRouter};
use crate::rng::RandomSource;
use crate::types::*;

/// Shortest username limit that still fits a hex-suffixed fallback
pub const MIN_USERNAME_LEN: usize = 8;

const FIRST_NAMES: &[&str] = &[
    "Alex", "Sam", "Jordan", "Taylor", "Morgan", "Casey", "Riley", "Jamie", "Avery", "Quinn",
    "Maya", "Leo", "Nina", "Omar", "Lena", "Theo", "Iris", "Hugo", "Zoe", "Felix",
];
const LAST_NAMES: &[&str] = &[
    "Rivera", "Chen", "Novak", "Okafor", "Larsen", "Moreau", "Silva", "Kowalski", "Haddad",
    "Brennan", "Tanaka", "Ferreira", "Lindqvist", "Mensah", "Duarte", "Ivanova",
];

/// Demographics and persona chosen for a new bot before its profile is written
#[derive(Debug, Clone)]
pub struct ProfileSeed {
    pub persona: Persona,
    pub age: u8,
    pub gender: String,
}

pub struct ContentGenerator {
    router: Arc<ProviderRouter>,
    memory: Option<Arc<MemoryStore>>,
    rng: Arc<RandomSource>,
    config: GenerationConfig,
    retrieve_k: usize,
    post: OutputConstraints,
    comment: OutputConstraints,
    bio: OutputConstraints,
    note: OutputConstraints,
    name: OutputConstraints,
}

impl ContentGenerator {
    pub fn new(
        router: Arc<ProviderRouter>,
        memory: Option<Arc<MemoryStore>>,
        rng: Arc<RandomSource>,
        config: GenerationConfig,
        retrieve_k: usize,
    ) -> HiveResult<Self> {
        let patterns = &config.disallowed_patterns;
        Ok(Self {
            post: OutputConstraints::new(config.min_chars, config.max_post_chars, patterns)?,
            comment: OutputConstraints::new(config.min_chars, config.max_comment_chars, patterns)?,
            bio: OutputConstraints::new(config.min_chars, config.max_bio_chars, patterns)?,
            note: OutputConstraints::new(config.min_chars, config.max_comment_chars, &[])?,
            name: OutputConstraints::new(3, 40, &[r"[0-9@#]".to_string()])?,
            router,
            memory,
            rng,
            config,
            retrieve_k,
        })
    }

    fn constraints_for(&self, action: ActionType) -> &OutputConstraints {
        match action {
            ActionType::Comment => &self.comment,
            _ => &self.post,
        }
    }

    /// Memory context for a query; failures degrade to no context
    async fn context(&self, bot: &Bot, query: &str) -> Vec<String> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        match memory.retrieve(bot.id, query, self.retrieve_k).await {
            Ok(fragments) => fragments.into_iter().map(|f| f.text).collect(),
            Err(e) => {
                warn!(bot = %bot.id, error = %e, "memory unavailable, generating without context");
                Vec::new()
            }
        }
    }

    /// Generate, clean and check; one corrective retry on violation
    async fn generate_checked(
        &self,
        persona: &Persona,
        intent: PromptIntent,
        context: &[String],
        constraints: &OutputConstraints,
    ) -> HiveResult<DraftContent> {
        let first = self.router.generate(persona, &intent, context).await?;
        let text = OutputConstraints::clean(&first.text);
        let violation = match constraints.check(&text) {
            Ok(()) => {
                return Ok(DraftContent {
                    text,
                    provider: first.provider.to_string(),
                    model: first.model,
                    attempts: 1,
                })
            }
            Err(v) => v,
        };

        debug!(%violation, "draft rejected, retrying with correction");
        let retry = PromptIntent {
            instruction: prompts::corrective(&intent.instruction, &violation.to_string()),
            temperature_scale: intent.temperature_scale * self.config.retry_temperature_factor,
            max_tokens: intent.max_tokens,
        };
        let second = self.router.generate(persona, &retry, context).await?;
        let text = OutputConstraints::clean(&second.text);
        constraints
            .check(&text)
            .map_err(|v| HiveError::ConstraintViolation(v.to_string()))?;
        Ok(DraftContent {
            text,
            provider: second.provider.to_string(),
            model: second.model,
            attempts: 2,
        })
    }

    /// Text for a post or comment. Comments need the stimulus they answer.
    pub async fn draft(
        &self,
        bot: &Bot,
        action: ActionType,
        stimulus: Option<&Stimulus>,
    ) -> HiveResult<DraftContent> {
        let (instruction, query) = match (action, stimulus) {
            (ActionType::Comment, Some(s)) => (prompts::comment(s), s.text.clone()),
            (ActionType::Post, _) => {
                let topic = self.rng.pick(&bot.persona.interests).cloned();
                let query = topic
                    .clone()
                    .unwrap_or_else(|| bot.persona.interests.join(" "));
                (prompts::post(&bot.persona, topic.as_deref()), query)
            }
            (other, _) => {
                return Err(HiveError::ConstraintViolation(format!(
                    "{other} cannot be drafted without a post to respond to"
                )))
            }
        };
        let context = self.context(bot, &query).await;
        let intent = PromptIntent::new(instruction);
        self.generate_checked(&bot.persona, intent, &context, self.constraints_for(action))
            .await
    }

    /// First-person note about content the bot reacted to. Never fails:
    /// generation problems fall back to a template.
    pub async fn memory_note(&self, bot: &Bot, action: ActionType, stimulus: &Stimulus) -> String {
        let intent = PromptIntent::new(prompts::memory_note(action, stimulus)).with_max_tokens(100);
        match self
            .generate_checked(&bot.persona, intent, &[], &self.note)
            .await
        {
            Ok(draft) => draft.text,
            Err(e) => {
                debug!(bot = %bot.id, error = %e, "memory note fell back to template");
                prompts::fallback_note(action, stimulus)
            }
        }
    }

    /// Username, full name and bio for a new bot. Names in `taken` are avoided
    /// and the chosen username is added to it.
    pub async fn generate_profile(&self, seed: ProfileSeed, taken: &mut HashSet<String>) -> NewBot {
        let persona = &seed.persona;

        let full_name = match self
            .generate_checked(
                persona,
                PromptIntent::new(prompts::full_name(&seed.gender)).with_max_tokens(20),
                &[],
                &self.name,
            )
            .await
        {
            Ok(d) => d.text,
            Err(_) => self.fallback_full_name(),
        };

        let username = self.unique_username(persona, &full_name, taken).await;
        taken.insert(username.to_lowercase());

        let bio = match self
            .generate_checked(
                persona,
                PromptIntent::new(prompts::bio(persona, seed.age, &seed.gender)).with_max_tokens(100),
                &[],
                &self.bio,
            )
            .await
        {
            Ok(d) => d.text,
            Err(_) => prompts::fallback_bio(persona),
        };

        NewBot {
            username,
            full_name,
            bio,
            age: seed.age,
            gender: seed.gender,
            persona: seed.persona,
        }
    }

    async fn unique_username(
        &self,
        persona: &Persona,
        full_name: &str,
        taken: &HashSet<String>,
    ) -> String {
        let max_len = self.config.username_max_len.max(MIN_USERNAME_LEN);
        let mut base = String::new();

        for _ in 0..self.config.username_attempts {
            let intent = PromptIntent::new(prompts::username(persona, max_len))
                .with_temperature_scale(1.15)
                .with_max_tokens(20);
            let Ok(generation) = self.router.generate(persona, &intent, &[]).await else {
                break;
            };
            let candidate = sanitize_username(&generation.text, max_len);
            if candidate.len() >= 3 && !taken.contains(&candidate) {
                return candidate;
            }
            if base.is_empty() {
                base = candidate;
            }
        }

        if base.len() < 3 {
            base = sanitize_username(&full_name.replace(' ', "_"), max_len);
        }
        if base.len() < 3 {
            base = "user".into();
        }
        suffixed_username(&base, max_len, taken, &self.rng)
    }

    fn fallback_full_name(&self) -> String {
        let first = self.rng.pick(FIRST_NAMES).copied().unwrap_or("Alex");
        let last = self.rng.pick(LAST_NAMES).copied().unwrap_or("Rivera");
        format!("{first} {last}")
    }
}

/// `base` if free, else `base_NN`, else `b_XXXXXX` trimmed to fit `max_len`
fn suffixed_username(
    base: &str,
    max_len: usize,
    taken: &HashSet<String>,
    rng: &RandomSource,
) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let stem: String = base.chars().take(max_len.saturating_sub(3)).collect();
    for _ in 0..100 {
        let candidate = format!("{stem}_{:02}", rng.range_u64(0, 99));
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
    let stem: String = base.chars().take(max_len.saturating_sub(7)).collect();
    format!("{stem}_{:06x}", rng.range_u64(0, 0xff_ffff))
}

/// Lowercase, `[a-z0-9_]` only, at most `max_len` characters
pub fn sanitize_username(raw: &str, max_len: usize) -> String {
    let first_line = raw.lines().next().unwrap_or_default();
    let cleaned: String = OutputConstraints::clean(first_line)
        .trim_start_matches('@')
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(max_len)
        .collect();
    cleaned.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::BreakerConfig;
    use crate::provider::{Generation, GenerationRequest, Provider};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Replies from a script; an exhausted script fails
    struct ScriptProvider {
        replies: Mutex<Vec<String>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptProvider {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Custom("script".into())
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
            _auth: &AuthProfile,
        ) -> HiveResult<Generation> {
            self.requests.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(HiveError::Provider("script exhausted".into()));
            }
            Ok(Generation {
                text: replies.remove(0),
                provider: self.kind(),
                model: request.model.clone(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn generator(provider: Arc<ScriptProvider>) -> ContentGenerator {
        let config = GenerationConfig {
            max_comment_chars: 40,
            ..GenerationConfig::default()
        };
        generator_with(provider, config)
    }

    fn generator_with(provider: Arc<ScriptProvider>, config: GenerationConfig) -> ContentGenerator {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut router = ProviderRouter::new(BreakerConfig::default(), clock);
        router.register(
            provider,
            crate::config::ProviderSettings::new(ProviderKind::Custom("script".into()), "m"),
        );
        ContentGenerator::new(
            Arc::new(router),
            None,
            Arc::new(RandomSource::seeded(7)),
            config,
            3,
        )
        .unwrap()
    }

    fn bot() -> Bot {
        Bot::from_new(
            BotId(1),
            NewBot {
                username: "fanbot".into(),
                full_name: "Fan Bot".into(),
                bio: String::new(),
                age: 22,
                gender: "male".into(),
                persona: Persona::new(BotCategory::Fan, vec!["football".into()]),
            },
            Utc::now(),
        )
    }

    fn stimulus() -> Stimulus {
        Stimulus {
            post_id: "p1".into(),
            author: "alice".into(),
            text: "What a match last night!".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn draft_cleans_output() {
        let gen = generator(ScriptProvider::new(&["  \"Incredible game!\"  "]));
        let draft = gen
            .draft(&bot(), ActionType::Comment, Some(&stimulus()))
            .await
            .unwrap();
        assert_eq!(draft.text, "Incredible game!");
        assert_eq!(draft.attempts, 1);
    }

    #[tokio::test]
    async fn violation_retries_once_at_lower_temperature() {
        let provider = ScriptProvider::new(&[
            "This comment is far too long for the configured comment limit.",
            "Great match!",
        ]);
        let gen = generator(provider.clone());
        let draft = gen
            .draft(&bot(), ActionType::Comment, Some(&stimulus()))
            .await
            .unwrap();
        assert_eq!(draft.text, "Great match!");
        assert_eq!(draft.attempts, 2);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].temperature < requests[0].temperature);
        assert!(requests[1].prompt.contains("too long"));
    }

    #[tokio::test]
    async fn second_violation_is_error() {
        let gen = generator(ScriptProvider::new(&["As an AI, I liked it.", "As an AI, sure."]));
        let err = gen
            .draft(&bot(), ActionType::Comment, Some(&stimulus()))
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn provider_exhaustion_surfaces() {
        let gen = generator(ScriptProvider::new(&[]));
        let err = gen.draft(&bot(), ActionType::Post, None).await.unwrap_err();
        assert!(err.is_generation_failure());
    }

    #[tokio::test]
    async fn like_has_no_text() {
        let gen = generator(ScriptProvider::new(&["x"]));
        assert!(gen
            .draft(&bot(), ActionType::Like, Some(&stimulus()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn memory_note_falls_back_to_template() {
        let gen = generator(ScriptProvider::new(&[]));
        let note = gen.memory_note(&bot(), ActionType::Like, &stimulus()).await;
        assert!(note.starts_with("I liked a post by alice"));
    }

    #[tokio::test]
    async fn profile_uses_generated_fields() {
        let gen = generator(ScriptProvider::new(&[
            "Dana Whitfield",
            "@Goal_Machine!",
            "Lives for Sunday football.",
        ]));
        let mut taken = HashSet::new();
        let seed = ProfileSeed {
            persona: Persona::new(BotCategory::Fan, vec![]),
            age: 31,
            gender: "female".into(),
        };
        let profile = gen.generate_profile(seed, &mut taken).await;
        assert_eq!(profile.full_name, "Dana Whitfield");
        assert_eq!(profile.username, "goal_machine");
        assert_eq!(profile.bio, "Lives for Sunday football.");
        assert!(taken.contains("goal_machine"));
    }

    #[tokio::test]
    async fn profile_falls_back_and_suffixes_taken_username() {
        let gen = generator(ScriptProvider::new(&[]));
        let mut taken = HashSet::new();
        let seed = || ProfileSeed {
            persona: Persona::new(BotCategory::Silent, vec![]),
            age: 40,
            gender: "male".into(),
        };
        let first = gen.generate_profile(seed(), &mut taken).await;
        assert!(!first.full_name.is_empty());
        assert!(!first.bio.is_empty());
        assert!(first.username.len() <= 15);

        taken.insert(first.username.clone());
        let mut names = HashSet::new();
        names.insert(first.username.clone());
        for _ in 0..5 {
            let next = gen.generate_profile(seed(), &mut taken).await;
            assert!(next.username.len() <= 15);
            assert!(names.insert(next.username));
        }
    }

    #[test]
    fn exhausted_suffixes_fall_back_to_hex_within_limit() {
        let rng = RandomSource::seeded(3);
        let mut taken: HashSet<String> = (0..=99).map(|n| format!("user_{n:02}")).collect();
        taken.insert("user".into());

        let name = suffixed_username("user", MIN_USERNAME_LEN, &taken, &rng);
        assert!(name.starts_with("u_"));
        assert_eq!(name.len(), MIN_USERNAME_LEN);
        assert!(!taken.contains(&name));

        let name = suffixed_username("user", 3, &taken, &rng);
        assert!(name.starts_with('_'));
    }

    #[tokio::test]
    async fn short_username_limit_is_raised_to_minimum() {
        let config = GenerationConfig {
            username_max_len: 6,
            ..GenerationConfig::default()
        };
        let gen = generator_with(ScriptProvider::new(&[]), config);
        let mut taken = HashSet::new();
        for _ in 0..5 {
            let seed = ProfileSeed {
                persona: Persona::new(BotCategory::Random, vec![]),
                age: 25,
                gender: "female".into(),
            };
            let profile = gen.generate_profile(seed, &mut taken).await;
            assert!(profile.username.len() <= MIN_USERNAME_LEN);
            assert!(profile.username.len() >= 3);
        }
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_username("  @Happy Cat  ", 15), "happy_cat");
        assert_eq!(sanitize_username("a-very-long-username-indeed", 15), "a_very_long_use");
        assert_eq!(sanitize_username("___", 15), "");
        assert_eq!(sanitize_username("name\nexplanation", 15), "name");
    }
}
