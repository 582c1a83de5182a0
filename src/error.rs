use thiserror::Error;

use crate::types::{ActivityState, BotId};

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Generation failed after {attempts} provider attempts: {last_error}")]
    GenerationExhausted { attempts: usize, last_error: String },

    #[error("Output constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider rate limited: {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Provider timed out: {provider} after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Platform rate limited, retry after {retry_after_ms:?}ms")]
    PlatformRateLimited { retry_after_ms: Option<u64> },

    #[error("Platform transient failure: {0}")]
    PlatformTransient(String),

    #[error("Platform permanent failure: {0}")]
    PlatformPermanent(String),

    #[error("Memory unavailable: {0}")]
    MemoryUnavailable(String),

    #[error("Lease conflict: {bot_id} already has an action in flight")]
    LeaseConflict { bot_id: BotId },

    #[error("Bot not found: {0}")]
    BotNotFound(BotId),

    #[error("Invalid transition for {bot_id}: {from} -> {to}")]
    InvalidTransition {
        bot_id: BotId,
        from: ActivityState,
        to: ActivityState,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HiveError {
    /// Failures that affect the whole population rather than one bot.
    /// Dispatch pauses until the persistence probe succeeds again.
    pub fn is_systemic(&self) -> bool {
        matches!(self, HiveError::Persistence(_) | HiveError::Io(_))
    }

    /// Failures that mean no usable text was produced
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            HiveError::GenerationExhausted { .. } | HiveError::ConstraintViolation(_)
        )
    }
}

pub type HiveResult<T> = Result<T, HiveError>;
