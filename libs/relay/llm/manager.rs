use super::catalog::{self, normalize_provider, PROVIDER_CLAUDE, PROVIDER_OPENAI};
use super::claude::ClaudeClient;
use super::client::LlmClient;
use super::error::LlmError;
use super::openai::OpenAiClient;
use crate::infrastructure::config::RelayConfig;
use crate::protocol::HistoryMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tether::{CircuitBreaker, RetryExecutor, RetryObserver, RetryPolicy, Retryable, TracingObserver};
use tracing::{debug, info, warn};

/// Builds a client for the requested model
pub type ClientFactory = Box<dyn Fn(&str) -> Result<Arc<dyn LlmClient>, LlmError> + Send + Sync>;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Provider registry with one circuit breaker per provider
///
/// Every completion goes through the provider's breaker and the shared
/// [`RetryExecutor`]. Breakers are created at registration time with the
/// settings current at that moment.
pub struct LlmManager {
    factories: HashMap<String, ClientFactory>,
    breakers: HashMap<String, CircuitBreaker>,
    retry: RetryExecutor,
    breaker_threshold: u32,
    breaker_timeout: Duration,
    call_timeout: Duration,
}

impl LlmManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            factories: HashMap::new(),
            breakers: HashMap::new(),
            retry: RetryExecutor::new(policy).with_observer(Arc::new(TracingObserver::new("llm"))),
            breaker_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_timeout = timeout;
        self
    }

    /// Deadline for a single provider call
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.retry = self.retry.with_observer(observer);
        self
    }

    /// Register providers whose API keys are present in `config`
    pub fn from_config(config: &RelayConfig) -> Result<Self, LlmError> {
        let providers = &config.providers;
        let http_timeout = Duration::from_secs(providers.http_timeout_secs);

        let mut manager = Self::new(config.retry.to_policy())
            .with_breaker(
                providers.breaker_threshold,
                Duration::from_secs(providers.breaker_timeout_secs),
            )
            .with_call_timeout(Duration::from_secs(config.limits.request_timeout_secs));

        match providers.openai.api_key.clone() {
            Some(api_key) => {
                let settings = providers.openai.clone();
                manager.register(PROVIDER_OPENAI, move |_model: &str| {
                    let client = OpenAiClient::new(
                        api_key.as_str(),
                        settings.api_url.as_str(),
                        settings.model.as_str(),
                        http_timeout,
                    )?;
                    Ok(Arc::new(client) as Arc<dyn LlmClient>)
                });
                info!("OpenAI provider configured");
            }
            None => warn!("OpenAI provider not configured: OPENAI_API_KEY is not set"),
        }

        match providers.claude.api_key.clone() {
            Some(api_key) => {
                let settings = providers.claude.clone();
                manager.register(PROVIDER_CLAUDE, move |model: &str| {
                    let client = ClaudeClient::new(
                        api_key.as_str(),
                        settings.api_url.as_str(),
                        settings.api_version.as_str(),
                        model,
                        http_timeout,
                    )?;
                    Ok(Arc::new(client) as Arc<dyn LlmClient>)
                });
                info!("Claude provider configured");
            }
            None => warn!("Claude provider not configured: CLAUDEAI_API_KEY is not set"),
        }

        if manager.factories.is_empty() {
            return Err(LlmError::NoProviders);
        }
        Ok(manager)
    }

    /// Register a provider under its canonical name
    pub fn register<F>(&mut self, provider: &str, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn LlmClient>, LlmError> + Send + Sync + 'static,
    {
        let key = normalize_provider(provider);
        self.breakers.insert(
            key.clone(),
            CircuitBreaker::new(format!("llm:{}", key), self.breaker_threshold, self.breaker_timeout),
        );
        self.factories.insert(key, Box::new(factory));
    }

    /// Register a provider that always uses the same client
    pub fn register_client(&mut self, provider: &str, client: Arc<dyn LlmClient>) {
        self.register(provider, move |_model: &str| Ok(Arc::clone(&client)));
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.factories.keys().cloned().collect();
        providers.sort();
        providers
    }

    pub fn breaker(&self, provider: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(&normalize_provider(provider))
    }

    /// Client for `provider`; unknown providers list the available ones
    pub fn client(&self, provider: &str, model: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        let key = normalize_provider(provider);
        debug!(provider = %provider, normalized = %key, model = %model, "Resolving LLM client");

        match self.factories.get(&key) {
            Some(factory) => factory(model),
            None => {
                let available = self.providers();
                warn!(provider = %provider, ?available, "Requested provider not found");
                Err(LlmError::UnknownProvider {
                    provider: provider.to_string(),
                    available: available.join(", "),
                })
            }
        }
    }

    /// Run one completion under the provider's breaker and the retry policy
    ///
    /// Only temporary failures count against the breaker. Once the breaker
    /// opens, the remaining attempts are abandoned with
    /// [`LlmError::CircuitOpen`].
    pub async fn complete(
        &self,
        provider: &str,
        model: &str,
        prompt: &str,
        history: &[HistoryMessage],
    ) -> Result<String, LlmError> {
        let client = self.client(provider, model)?;
        let key = normalize_provider(provider);
        let breaker = self
            .breakers
            .get(&key)
            .ok_or_else(|| LlmError::UnknownProvider {
                provider: provider.to_string(),
                available: self.providers().join(", "),
            })?;
        let max_tokens = catalog::max_tokens(&key, model);
        let call_timeout = self.call_timeout;
        let key = key.as_str();

        self.retry
            .run(|| {
                let client = Arc::clone(&client);
                async move {
                    if !breaker.allow() {
                        return Err(LlmError::CircuitOpen(key.to_string()));
                    }

                    let result =
                        match tokio::time::timeout(call_timeout, client.send_prompt(prompt, history, max_tokens))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(LlmError::Timeout(format!(
                                "no response within {}s",
                                call_timeout.as_secs()
                            ))),
                        };

                    match &result {
                        Ok(_) => breaker.record_success(),
                        Err(e) if e.is_temporary() => breaker.record_failure(),
                        Err(_) => {}
                    }
                    result
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tether::CircuitState;

    /// Replays a fixed script of results, then repeats the last one
    struct ScriptedClient {
        script: Mutex<Vec<Result<String, LlmError>>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn send_prompt(&self, _: &str, _: &[HistoryMessage], _: u32) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn unavailable() -> Result<String, LlmError> {
        Err(LlmError::Api {
            status: 503,
            body: "unavailable".into(),
        })
    }

    fn manager() -> LlmManager {
        LlmManager::new(RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)))
    }

    #[tokio::test]
    async fn test_unknown_provider_lists_available() {
        let mut manager = manager();
        manager.register_client("openai", ScriptedClient::new(vec![Ok("x".into())]));
        manager.register_client("claude", ScriptedClient::new(vec![Ok("x".into())]));

        let err = manager.complete("mistral", "", "hi", &[]).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::UnknownProvider {
                provider: "mistral".into(),
                available: "CLAUDE, OPENAI".into()
            }
        );
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let client = ScriptedClient::new(vec![unavailable(), Ok("hello".into())]);
        let mut manager = manager();
        manager.register_client("OPENAI", client.clone());

        assert_eq!(manager.complete("openai", "gpt-4o", "hi", &[]).await.unwrap(), "hello");
        assert_eq!(client.calls(), 2);
        assert_eq!(manager.breaker("OPENAI").unwrap().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let client = ScriptedClient::new(vec![Err(LlmError::Api {
            status: 400,
            body: "bad".into(),
        })]);
        let mut manager = manager();
        manager.register_client("OPENAI", client.clone());

        assert!(manager.complete("OPENAI", "", "hi", &[]).await.is_err());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_short_circuits() {
        let client = ScriptedClient::new(vec![unavailable()]);
        let mut manager = manager().with_breaker(2, Duration::from_secs(60));
        manager.register_client("OPENAI", client.clone());

        // Two temporary failures open the breaker, the third attempt is refused
        let err = manager.complete("OPENAI", "", "hi", &[]).await.unwrap_err();
        assert_eq!(err, LlmError::CircuitOpen("OPENAI".into()));
        assert_eq!(client.calls(), 2);

        let err = manager.complete("OPENAI", "", "hi", &[]).await.unwrap_err();
        assert_eq!(err, LlmError::CircuitOpen("OPENAI".into()));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_call_timeout_is_temporary() {
        struct Slow;

        #[async_trait]
        impl LlmClient for Slow {
            async fn send_prompt(&self, _: &str, _: &[HistoryMessage], _: u32) -> Result<String, LlmError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".into())
            }

            fn model(&self) -> &str {
                "slow"
            }
        }

        let mut manager = LlmManager::new(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)))
            .with_call_timeout(Duration::from_millis(20));
        manager.register_client("OPENAI", Arc::new(Slow));

        let err = manager.complete("OPENAI", "", "hi", &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }
}
