use super::prompt::build_prompt;
use super::repair::parse_response;
use super::{CompletionProvider, GeminiProvider, OpenAiProvider};
use crate::dataset::Row;
use crate::query::ResolvedQuery;
use crate::schema::Column;
use crate::throttle::{RateLimiter, RetryPolicy};
use smartquery_common::{Config, ProviderKind, ResolutionError};
use std::sync::Arc;
use tracing::{debug, info};

/// Provider + rate limiter + retry policy + response repair.
pub struct RemoteResolver {
    provider: Arc<dyn CompletionProvider>,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl RemoteResolver {
    pub fn new(provider: Arc<dyn CompletionProvider>, limiter: RateLimiter, policy: RetryPolicy) -> Self {
        Self { provider, limiter, policy }
    }

    /// `Ok(None)` when no credential is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>, ResolutionError> {
        let Some(key) = config.api_key() else {
            return Ok(None);
        };
        let provider: Arc<dyn CompletionProvider> = match config.provider.kind {
            ProviderKind::Gemini => Arc::new(GeminiProvider::from_config(&config.provider, &key)?),
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_config(&config.provider, &key)?),
        };
        Ok(Some(Self::new(
            provider,
            RateLimiter::from(&config.limits),
            RetryPolicy::from(&config.limits),
        )))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn resolve(
        &self,
        query: &str,
        schema: &[Column],
        sample: &[Arc<Row>],
    ) -> Result<ResolvedQuery, ResolutionError> {
        self.resolve_while(query, schema, sample, || true).await
    }

    /// Resolve, but give up retrying as soon as `keep_going` turns false.
    pub async fn resolve_while(
        &self,
        query: &str,
        schema: &[Column],
        sample: &[Arc<Row>],
        keep_going: impl Fn() -> bool,
    ) -> Result<ResolvedQuery, ResolutionError> {
        let prompt = build_prompt(query, schema, sample);
        let provider = &self.provider;
        let prompt = prompt.as_str();
        let text = self
            .policy
            .run_until(&self.limiter, keep_going, move || provider.complete(prompt))
            .await?;
        debug!(provider = provider.name(), raw = %text, "model response");
        let resolved = parse_response(&text, schema)?;
        info!(
            provider = provider.name(),
            filters = resolved.filters.len(),
            sorted = resolved.sort.is_some(),
            "resolved remotely"
        );
        Ok(resolved)
    }
}
