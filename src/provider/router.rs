use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{BreakerConfig, ProviderSettings};
use crate::error::{HiveError, HiveResult};
use crate::types::{AuthProfile, Persona, ProviderKind};

use super::breaker::{CircuitBreaker, HealthStatus};
use super::traits::{Generation, GenerationRequest, PromptIntent, Provider};

/// Health snapshot of one configured provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub kind: ProviderKind,
    pub model: String,
    pub priority: u32,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_until: Option<DateTime<Utc>>,
}

struct Slot {
    provider: Arc<dyn Provider>,
    settings: ProviderSettings,
    auth: AuthProfile,
    breaker: Mutex<CircuitBreaker>,
}

impl Slot {
    fn breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Priority-ordered failover across providers, each behind its own breaker.
/// The only holder of provider credentials.
pub struct ProviderRouter {
    slots: Vec<Slot>,
    breaker_config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl ProviderRouter {
    pub fn new(breaker_config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Vec::new(),
            breaker_config,
            clock,
        }
    }

    /// Add a provider; slots stay sorted by priority, insertion order among equals
    pub fn register(&mut self, provider: Arc<dyn Provider>, settings: ProviderSettings) {
        let auth = AuthProfile::new(settings.api_key.clone());
        self.slots.push(Slot {
            provider,
            settings,
            auth,
            breaker: Mutex::new(CircuitBreaker::new(self.breaker_config.clone())),
        });
        self.slots.sort_by_key(|s| s.settings.priority);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        self.slots.iter().map(|s| s.provider.kind()).collect()
    }

    fn build_request(
        settings: &ProviderSettings,
        persona: &Persona,
        intent: &PromptIntent,
        context: &[String],
    ) -> GenerationRequest {
        let mut prompt = String::new();
        if !context.is_empty() {
            prompt.push_str("Things you remember:\n");
            for item in context {
                prompt.push_str("- ");
                prompt.push_str(item);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        prompt.push_str(&intent.instruction);

        GenerationRequest {
            system: persona.system_prompt(),
            prompt,
            model: settings.model.clone(),
            temperature: settings.temperature * intent.temperature_scale,
            max_tokens: intent.max_tokens.unwrap_or(settings.max_tokens),
        }
    }

    /// Try providers in priority order until one returns non-empty text.
    /// Every failure counts against that provider's breaker; open providers
    /// are skipped. Exhaustion is a terminal `GenerationExhausted`.
    pub async fn generate(
        &self,
        persona: &Persona,
        intent: &PromptIntent,
        context: &[String],
    ) -> HiveResult<Generation> {
        let mut attempts = 0usize;
        let mut last_error: Option<String> = None;

        for slot in &self.slots {
            let kind = slot.provider.kind();
            if !slot.breaker().try_acquire(self.clock.now()) {
                debug!(provider = %kind, "circuit open, skipping");
                continue;
            }
            attempts += 1;

            let request = Self::build_request(&slot.settings, persona, intent, context);
            let timeout = Duration::from_millis(slot.settings.timeout_ms);
            let result = match tokio::time::timeout(timeout, slot.provider.generate(&request, &slot.auth)).await {
                Ok(Ok(generation)) if generation.text.trim().is_empty() => {
                    Err(HiveError::Provider(format!("{kind} returned empty text")))
                }
                Ok(result) => result,
                Err(_) => Err(HiveError::ProviderTimeout {
                    provider: kind.to_string(),
                    timeout_ms: slot.settings.timeout_ms,
                }),
            };

            match result {
                Ok(generation) => {
                    slot.breaker().record_success();
                    return Ok(generation);
                }
                Err(e) => {
                    let opened = slot.breaker().record_failure(self.clock.now());
                    if opened {
                        warn!(provider = %kind, error = %e, "provider circuit opened");
                    } else {
                        debug!(provider = %kind, error = %e, "provider call failed, failing over");
                    }
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(HiveError::GenerationExhausted {
            attempts,
            last_error: last_error.unwrap_or_else(|| "no provider available".into()),
        })
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        self.slots
            .iter()
            .map(|slot| {
                let breaker = slot.breaker();
                ProviderHealth {
                    kind: slot.provider.kind(),
                    model: slot.settings.model.clone(),
                    priority: slot.settings.priority,
                    status: breaker.status(),
                    consecutive_failures: breaker.consecutive_failures(),
                    open_until: breaker.open_until(),
                }
            })
            .collect()
    }
}
