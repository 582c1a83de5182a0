//! # hive-core
//!
//! Autonomous activity core for a simulated social-media population: grows a
//! population of persona-driven bots, decides when and how each one reacts to
//! platform content, generates text through a failover chain of LLM providers,
//! and gives every bot a bounded, decaying memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hive_core::clock::SystemClock;
//! use hive_core::config::HiveConfig;
//! use hive_core::hivelog::{HiveLogger, TracingSink};
//! use hive_core::persistence::InMemoryPersistence;
//! use hive_core::platform::RestPlatformClient;
//! use hive_core::provider::{backend_for, ProviderRouter};
//! use hive_core::rng::RandomSource;
//! use hive_core::scheduler::{Collaborators, Scheduler};
//!
//! # async fn demo() -> hive_core::error::HiveResult<()> {
//! let config = HiveConfig::default();
//! let clock = Arc::new(SystemClock);
//!
//! let mut router = ProviderRouter::new(config.breaker.clone(), clock.clone());
//! for settings in config.providers.iter().filter(|p| p.has_credentials()) {
//!     if let Some(backend) = backend_for(&settings.kind, settings.base_url.as_deref()) {
//!         router.register(backend, settings.clone());
//!     }
//! }
//!
//! let scheduler = Scheduler::new(
//!     config.clone(),
//!     Collaborators {
//!         persistence: Arc::new(InMemoryPersistence::new()),
//!         platform: Arc::new(RestPlatformClient::new(&config.platform)?),
//!         router: Arc::new(router),
//!         embedder: None,
//!         clock,
//!         rng: Arc::new(RandomSource::from_entropy()),
//!         logger: Arc::new(HiveLogger::new().with_sink(Arc::new(TracingSink))),
//!     },
//! )?;
//!
//! scheduler.initialize().await?;
//! scheduler.run_growth_cycle(false).await?;
//! scheduler.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Bots, personas, actions, activity records, memory fragments |
//! | [`provider`] | Anthropic / OpenAI / Gemini backends behind per-provider circuit breakers |
//! | [`memory`] | Per-bot memory: embedding or keyword retrieval, decay, compaction |
//! | [`generator`] | Persona-conditioned drafting with output constraints and one corrective retry |
//! | [`reaction`] | Closed-form interest scoring that turns stimuli into proposed actions |
//! | [`scheduler`] | Growth, cadence, leases, backpressure, bounded dispatch, shutdown |
//! | [`persistence`] | Storage collaborator trait, in-memory store, JSONL activity journal |
//! | [`platform`] | Social platform collaborator trait and REST client |
//! | [`admin`] | Operator commands: initialize, grow, stats, suspend/resume/retire |
//! | [`hivelog`] | Structured event log with pluggable sinks |
//! | [`config`] | YAML + environment configuration |
//! | [`error`] | `HiveError` / `HiveResult` |
//! | [`clock`], [`rng`] | Injectable time and seeded randomness |
//!
//! ## Failure model
//!
//! A failure local to one bot (providers exhausted, platform rejection, a
//! lost lease) is recorded on that bot's activity log and the bot is simply
//! rescheduled. Platform rate limiting slows the whole scheduler down instead
//! of failing anything. Only an unreachable persistence layer pauses
//! dispatch, until a probe succeeds again.

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod hivelog;
pub mod memory;
pub mod persistence;
pub mod platform;
pub mod provider;
pub mod reaction;
pub mod rng;
pub mod scheduler;
pub mod types;
