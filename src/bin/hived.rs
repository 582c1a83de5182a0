//! `hived`: runs the activity core against a configured platform.
//!
//! Usage: `hived [config.yaml]` (or `HIVE_CONFIG=path hived`). Legacy
//! environment variables override the file.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hive_core::clock::{Clock, SystemClock};
use hive_core::config::{EmbedderKind, HiveConfig};
use hive_core::hivelog::{CallbackSink, HiveLogger, LogLevel, TracingSink};
use hive_core::memory::{Embedder, HashingEmbedder, OpenAIEmbedder};
use hive_core::persistence::{ActivityJournal, InMemoryPersistence};
use hive_core::platform::RestPlatformClient;
use hive_core::provider::{backend_for, ProviderRouter};
use hive_core::rng::RandomSource;
use hive_core::scheduler::{Collaborators, Scheduler};
use hive_core::types::{AuthProfile, ProviderKind};

fn load_config() -> anyhow::Result<HiveConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HIVE_CONFIG").ok());
    let mut config = match path {
        Some(path) => HiveConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => HiveConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn build_router(config: &HiveConfig, clock: Arc<dyn Clock>) -> ProviderRouter {
    let mut router = ProviderRouter::new(config.breaker.clone(), clock);
    for settings in &config.providers {
        if !settings.has_credentials() {
            info!(provider = %settings.kind, "no credentials, provider disabled");
            continue;
        }
        match backend_for(&settings.kind, settings.base_url.as_deref()) {
            Some(backend) => router.register(backend, settings.clone()),
            None => warn!(provider = %settings.kind, "no backend for provider kind"),
        }
    }
    router
}

fn build_embedder(config: &HiveConfig) -> Option<Arc<dyn Embedder>> {
    match config.memory.embedder {
        EmbedderKind::Disabled => None,
        EmbedderKind::Hashing => Some(Arc::new(HashingEmbedder::new(config.memory.embedding_dim))),
        EmbedderKind::OpenAI => {
            let key = config
                .providers
                .iter()
                .find(|p| p.kind == ProviderKind::OpenAI && p.has_credentials())
                .map(|p| p.api_key.clone());
            match key {
                Some(key) => Some(Arc::new(OpenAIEmbedder::new(
                    config.memory.embedding_model.clone(),
                    AuthProfile::new(key),
                ))),
                None => {
                    warn!("OpenAI embedder configured without an OpenAI key, using hashing embedder");
                    Some(Arc::new(HashingEmbedder::new(config.memory.embedding_dim)))
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let router = build_router(&config, clock.clone());
    if router.is_empty() {
        warn!("no generation providers configured; text actions will fail and profiles use fallbacks");
    }

    let mut persistence = InMemoryPersistence::new();
    if let Some(path) = &config.journal_path {
        persistence = persistence.with_journal(ActivityJournal::new(path));
    }

    let warnings = Arc::new(AtomicU64::new(0));
    let counter = warnings.clone();
    let logger = HiveLogger::new()
        .with_sink(Arc::new(TracingSink))
        .with_sink(Arc::new(CallbackSink::new(move |entry| {
            if entry.level >= LogLevel::Warn {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })));

    let scheduler = Scheduler::new(
        config.clone(),
        Collaborators {
            persistence: Arc::new(persistence),
            platform: Arc::new(RestPlatformClient::new(&config.platform)?),
            router: Arc::new(router),
            embedder: build_embedder(&config),
            clock,
            rng: Arc::new(RandomSource::from_entropy()),
            logger: Arc::new(logger),
        },
    )?;

    scheduler.initialize().await?;
    let report = scheduler.run_growth_cycle(false).await?;
    info!(population = report.after, "initial growth done");

    let runner = scheduler.clone();
    let loop_handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    let shutdown = scheduler.shutdown().await;
    info!(
        drained = shutdown.drained,
        abandoned = shutdown.abandoned,
        warnings = warnings.load(Ordering::Relaxed),
        "shutdown complete"
    );
    loop_handle.await.context("scheduler loop panicked")?;
    Ok(())
}
