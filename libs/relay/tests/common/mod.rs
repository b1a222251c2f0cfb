//! Common test utilities for relay integration tests
//!
//! The relay server side runs over tether's in-memory transport, so a full
//! round trip (client connection, server connection, handler, LLM) needs no
//! sockets.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relay::llm::{LlmClient, LlmError, LlmManager};
use relay::protocol::{HandlerConfig, HistoryMessage, ProtocolHandler, ServerEnvelope};
use relay::{serve_connection, BasicFileProcessor, ChatClient};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether::memory::{MemoryConnector, MemoryTransport};
use tether::{ConnectionConfig, ConnectionRegistry, ManagedConnection, RetryObserver, RetryPolicy};
use tokio::task::JoinHandle;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Connection settings scaled down to milliseconds
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        max_reconnect_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        ping_interval: Duration::from_millis(50),
        pong_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(200),
        send_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
}

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// LLM client answering through a closure and counting calls
pub struct MockLlm {
    respond: Responder,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(text.to_string()))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn send_prompt(&self, prompt: &str, _history: &[HistoryMessage], _max_tokens: u32) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        (self.respond)(prompt)
    }

    fn model(&self) -> &str {
        "mock"
    }
}

/// Retry observer recording every backoff
#[derive(Default)]
pub struct RecordingObserver {
    retries: Mutex<Vec<(u32, Duration)>>,
}

impl RecordingObserver {
    pub fn retries(&self) -> Vec<(u32, Duration)> {
        self.retries.lock().clone()
    }
}

impl RetryObserver for RecordingObserver {
    fn on_retry(&self, attempt: u32, delay: Duration, _error: &str) {
        self.retries.lock().push((attempt, delay));
    }
}

pub fn handler_with(manager: LlmManager) -> Arc<ProtocolHandler> {
    Arc::new(ProtocolHandler::new(
        Arc::new(manager),
        Arc::new(BasicFileProcessor::new()),
        HandlerConfig::default(),
    ))
}

/// Handler with one provider answering through `client`
pub fn handler_for(provider: &str, client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Arc<ProtocolHandler> {
    let mut manager = LlmManager::new(policy);
    manager.register_client(provider, client);
    handler_with(manager)
}

/// Relay server over the in-memory transport plus one chat client
pub struct Harness {
    pub client: ChatClient<MemoryTransport>,
    pub connector: Arc<MemoryConnector>,
    pub registry: Arc<ConnectionRegistry<MemoryTransport>>,
    server: JoinHandle<()>,
}

impl Harness {
    /// Start the server side; the client is created but not connected
    pub fn start(handler: Arc<ProtocolHandler>) -> Self {
        Self::start_with(handler, fast_config())
    }

    /// Like [`start`](Self::start) with custom client connection settings
    pub fn start_with(handler: Arc<ProtocolHandler>, client_config: ConnectionConfig) -> Self {
        let (connector, mut listener) = MemoryConnector::new();
        let registry = Arc::new(ConnectionRegistry::new());

        let server_registry = Arc::clone(&registry);
        let server = tokio::spawn(async move {
            while let Some(transport) = listener.accept().await {
                let connection = ManagedConnection::attach(server_registry.next_id(), transport, fast_config());
                server_registry.add(connection.clone()).unwrap();
                tokio::spawn(serve_connection(
                    connection,
                    Arc::clone(&handler),
                    Arc::clone(&server_registry),
                ));
            }
        });

        let connection = ManagedConnection::<MemoryTransport>::client("chat", connector.clone(), client_config);
        let client = ChatClient::new(connection, "OPENAI", "gpt-4o").unwrap();

        Self {
            client,
            connector,
            registry,
            server,
        }
    }

    /// Start and connect
    pub async fn connected(handler: Arc<ProtocolHandler>) -> Self {
        let harness = Self::start(handler);
        harness.client.connect().await.unwrap();
        harness
    }

    /// Next envelope, failing the test after two seconds
    pub async fn next(&mut self) -> ServerEnvelope {
        tokio::time::timeout(Duration::from_secs(2), self.client.recv())
            .await
            .expect("timed out waiting for a server envelope")
            .expect("inbound stream ended")
    }

    /// Skip progress updates and return the final message
    pub async fn next_message(&mut self) -> ServerEnvelope {
        loop {
            match self.next().await {
                ServerEnvelope::Progress(_) => continue,
                other => return other,
            }
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.client.close();
        self.server.abort();
    }
}
