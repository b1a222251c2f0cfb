use anyhow::Result;
use llm_relay::bin_common::{config_path_from_args, ConfigType, RunConfig, ServiceRunner};
use relay::{
    init_tracing_with_level, BasicFileProcessor, HandlerConfig, LlmManager, ProtocolHandler, RelayConfig,
    RelayServer, ShutdownManager,
};
use std::sync::Arc;
use tether::ServerWsTransport;
use tracing::info;

struct RelayServerApp {
    runner: ServiceRunner<ServerWsTransport>,
    server: RelayServer,
}

impl RelayServerApp {
    fn new(config: &RelayConfig) -> Result<Self> {
        let llm = LlmManager::from_config(config)?;
        info!("LLM providers configured: {}", llm.providers().join(", "));

        let handler = Arc::new(ProtocolHandler::new(
            Arc::new(llm),
            Arc::new(BasicFileProcessor::new()),
            HandlerConfig::from_limits(&config.limits),
        ));

        let shutdown = ShutdownManager::new();
        shutdown.spawn_signal_handler();

        let server = RelayServer::new(config, handler, shutdown.clone());
        let runner = ServiceRunner::new(
            RunConfig::new("LLM Relay Server"),
            Arc::clone(server.registry()),
            shutdown,
        );

        Ok(Self { runner, server })
    }

    async fn execute(&self) -> Result<()> {
        self.runner
            .run(async {
                let listener = self.server.bind().await?;
                self.server.run(listener).await
            })
            .await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load config first (before logging is initialized)
    let config_path = config_path_from_args(ConfigType::Relay);
    let config = RelayConfig::load(&config_path)?;

    init_tracing_with_level(&config.log_level);
    config.log();

    let app = RelayServerApp::new(&config)?;
    app.execute().await
}
