use super::{
    Attachment, FixtureModelService, GoogleAiStudioClient, ModelRequest, ModelService, ModelTask, OpenRouterClient,
    Throttle,
};
use crate::config::{AnalysisConfig, ModelBinding, Provider, RequestRates};
use crate::error::ServiceError;
use got_kernel::AgentKind;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Routes each agent's requests to its configured provider and model
#[derive(Clone)]
pub struct ServiceRouter {
    models: BTreeMap<String, ModelBinding>,
    providers: HashMap<Provider, Arc<dyn ModelService>>,
    throttles: HashMap<Provider, Arc<Throttle>>,
}

impl fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRouter")
            .field("models", &self.models)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("throttles", &self.throttles)
            .finish()
    }
}

impl ServiceRouter {
    /// Router with the config's model mapping and no providers
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            models: config.models.clone(),
            providers: HashMap::new(),
            throttles: HashMap::new(),
        }
    }

    /// With a service for one provider
    #[must_use]
    pub fn with_provider(mut self, provider: Provider, service: Arc<dyn ModelService>) -> Self {
        self.providers.insert(provider, service);
        self
    }

    /// Cap one provider at `requests` per minute; 0 removes the cap
    #[must_use]
    pub fn with_rate_limit(mut self, provider: Provider, requests: u32) -> Self {
        match Throttle::per_minute(requests) {
            Some(throttle) => {
                self.throttles.insert(provider, Arc::new(throttle));
            }
            None => {
                self.throttles.remove(&provider);
            }
        }
        self
    }

    /// Caps for both model providers
    #[must_use]
    pub fn with_rate_limits(self, rates: &RequestRates) -> Self {
        self.with_rate_limit(Provider::Google, rates.for_provider(Provider::Google))
            .with_rate_limit(Provider::OpenRouter, rates.for_provider(Provider::OpenRouter))
    }

    /// Every model provider answered by the demo fixtures
    #[must_use]
    pub fn offline(config: &AnalysisConfig) -> Self {
        let fixture: Arc<dyn ModelService> = Arc::new(FixtureModelService::new());
        Self::new(config)
            .with_provider(Provider::Google, Arc::clone(&fixture))
            .with_provider(Provider::OpenRouter, fixture)
    }

    /// HTTP clients for Google AI Studio and OpenRouter
    ///
    /// # Errors
    /// Returns `ServiceError::Http` if a client cannot be built.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ServiceError> {
        let timeout = config.request_timeout();
        let google = GoogleAiStudioClient::new(
            &config.endpoints.google_ai_studio,
            &config.credentials.google_ai_studio_key,
            timeout,
        )?;
        let openrouter = OpenRouterClient::new(
            &config.endpoints.openrouter,
            &config.credentials.openrouter_api_key,
            timeout,
        )?;
        Ok(Self::new(config)
            .with_provider(Provider::Google, Arc::new(google))
            .with_provider(Provider::OpenRouter, Arc::new(openrouter))
            .with_rate_limits(&config.limits.requests_per_minute))
    }

    /// Binding for an agent
    #[must_use]
    pub fn binding(&self, agent: AgentKind) -> Option<&ModelBinding> {
        self.models.get(agent.name())
    }

    /// Send a prompt on behalf of an agent
    ///
    /// # Errors
    /// Returns `ServiceError::NotFound` if the agent has no model binding or
    /// its provider has no service, otherwise the provider's error.
    pub async fn generate(
        &self,
        agent: AgentKind,
        task: ModelTask,
        prompt: String,
        attachments: Vec<Attachment>,
    ) -> Result<Value, ServiceError> {
        let binding = self
            .binding(agent)
            .ok_or_else(|| ServiceError::NotFound(format!("no model configured for {agent}")))?;
        let service = self.providers.get(&binding.provider).ok_or_else(|| {
            ServiceError::NotFound(format!("no {} service for {agent}", binding.provider.label()))
        })?;

        if let Some(throttle) = self.throttles.get(&binding.provider) {
            throttle.acquire().await;
        }
        tracing::debug!(%agent, ?task, model = %binding.model, "model request");
        service
            .generate(ModelRequest {
                agent,
                task,
                model: binding.model.clone(),
                prompt,
                attachments,
            })
            .await
    }
}
