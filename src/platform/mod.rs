//! Remote social-platform collaborator.
//!
//! Every submission resolves to a [`PlatformOutcome`]; the scheduler turns
//! `RateLimited` into backpressure, retries `Transient` with bounded backoff
//! and records `Permanent` without retrying.

mod rest;

pub use rest::RestPlatformClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HiveResult;
use crate::types::{ActionType, Bot, Stimulus, TargetRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformOutcome {
    Accepted { remote_id: Option<String> },
    RateLimited { retry_after: Option<Duration> },
    Transient(String),
    Permanent(String),
}

impl PlatformOutcome {
    pub fn accepted() -> Self {
        PlatformOutcome::Accepted { remote_id: None }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, PlatformOutcome::Accepted { .. })
    }
}

/// One action to submit on behalf of a bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformAction {
    pub action: ActionType,
    pub target: TargetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn submit(&self, bot: &Bot, action: &PlatformAction) -> PlatformOutcome;

    /// Create the bot's account on the platform
    async fn register(&self, bot: &Bot) -> PlatformOutcome;

    /// Recent posts, newest first where the platform supports it.
    /// Rate limiting surfaces as `HiveError::PlatformRateLimited`.
    async fn recent_posts(&self, limit: usize) -> HiveResult<Vec<Stimulus>>;
}
