mod traits;
mod anthropic;
mod breaker;
mod gemini;
mod openai;
mod router;

pub use traits::*;
pub(crate) use traits::retry_after_ms;
pub use anthropic::AnthropicProvider;
pub use breaker::{BreakerState, CircuitBreaker, HealthStatus};
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
pub use router::{ProviderHealth, ProviderRouter};

use std::sync::Arc;

use crate::types::ProviderKind;

/// Concrete backend for a configured provider kind, if one ships with the crate
pub fn backend_for(kind: &ProviderKind, base_url: Option<&str>) -> Option<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match (kind, base_url) {
        (ProviderKind::OpenAI, None) => Arc::new(OpenAIProvider::new()),
        (ProviderKind::OpenAI, Some(url)) => Arc::new(OpenAIProvider::with_base_url(url)),
        (ProviderKind::Anthropic, None) => Arc::new(AnthropicProvider::new()),
        (ProviderKind::Anthropic, Some(url)) => Arc::new(AnthropicProvider::with_base_url(url)),
        (ProviderKind::Gemini, None) => Arc::new(GeminiProvider::new()),
        (ProviderKind::Gemini, Some(url)) => Arc::new(GeminiProvider::with_base_url(url)),
        (ProviderKind::Custom(_), _) => return None,
    };
    Some(provider)
}
