use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use llm_relay::bin_common::{config_path_from_args, ConfigType};
use relay::protocol::{FilePayload, ResponseStatus, ServerEnvelope};
use relay::{init_tracing_with_level, status_line, ChatClient, RelayConfig, ShutdownManager};
use std::path::Path;
use std::time::Duration;
use tether::{ConnectionEvent, ManagedConnection, Transport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

enum Input {
    Line(Option<String>),
    Server(Option<ServerEnvelope>),
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args(ConfigType::Relay);
    let config = RelayConfig::load(&config_path)?;

    init_tracing_with_level(&config.log_level);

    let mut client = ChatClient::websocket(&config.client, config.connection.to_connection_config())?;
    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    spawn_status_printer(client.connection().clone());
    let keepalive = client.spawn_keepalive(Duration::from_secs(config.client.keepalive_secs));

    print_banner(&config.client.url, &config.client.provider, &config.client.model);

    if let Err(e) = client.connect().await {
        warn!("Initial connection failed: {}", e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_files: Vec<FilePayload> = Vec::new();

    while shutdown.is_running() {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line?),
            envelope = client.recv() => Input::Server(envelope),
            _ = shutdown.wait() => Input::Shutdown,
        };

        match input {
            Input::Line(None) | Input::Shutdown => break,
            Input::Line(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Some(command) = line.strip_prefix('/') {
                    if !run_command(command, &mut client, &mut pending_files).await {
                        break;
                    }
                    continue;
                }

                let files = std::mem::take(&mut pending_files);
                match client.ask(line, files).await {
                    Ok(outcome) => info!("Request {:?}", outcome),
                    Err(e) => println!("[error] {}", e),
                }
            }
            Input::Server(None) => break,
            Input::Server(Some(envelope)) => print_envelope(&envelope),
        }
    }

    keepalive.abort();
    client.close();
    info!("Chat client stopped");
    Ok(())
}

/// Returns `false` when the user asked to quit
async fn run_command<T: Transport>(
    command: &str,
    client: &mut ChatClient<T>,
    pending_files: &mut Vec<FilePayload>,
) -> bool {
    let (name, argument) = match command.split_once(' ') {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return false,
        "provider" if !argument.is_empty() => {
            client.set_provider(argument);
            println!("[info] provider set to {}", argument);
        }
        "model" if !argument.is_empty() => {
            client.set_model(argument);
            println!("[info] model set to {}", argument);
        }
        "attach" if !argument.is_empty() => match read_attachment(Path::new(argument)).await {
            Ok(file) => {
                println!("[info] attached {} ({} bytes)", file.name, file.size);
                pending_files.push(file);
            }
            Err(e) => println!("[error] {:#}", e),
        },
        "reconnect" => {
            if let Err(e) = client.connect().await {
                println!("[error] {}", e);
            }
        }
        _ => print_help(),
    }
    true
}

async fn read_attachment(path: &Path) -> Result<FilePayload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(FilePayload {
        name,
        size: bytes.len() as u64,
        content: STANDARD.encode(&bytes),
        is_base64: true,
        ..Default::default()
    })
}

fn print_envelope(envelope: &ServerEnvelope) {
    match envelope {
        ServerEnvelope::Pong { .. } => {}
        ServerEnvelope::Progress(update) => {
            println!("[{:>3}%] {}", update.percentage, update.message);
        }
        ServerEnvelope::Message(response) => match response.status {
            ResponseStatus::Completed => {
                let provider = response.provider.as_deref().unwrap_or("assistant");
                println!("\n{}:\n{}\n", provider, response.response);
            }
            ResponseStatus::Error => println!("[error] {}", response.response),
        },
    }
}

/// Print connection status changes until the connection is closed
fn spawn_status_printer<T: Transport>(connection: ManagedConnection<T>) {
    tokio::task::spawn_blocking(move || loop {
        let Some(event) = connection.recv_event_timeout(Duration::from_millis(500)) else {
            continue;
        };
        if let Some(line) = status_line(&event) {
            println!("[status] {}", line);
        }
        if event == ConnectionEvent::Closed {
            break;
        }
    });
}

fn print_banner(url: &str, provider: &str, model: &str) {
    info!("");
    info!("========================================");
    info!("Starting LLM Relay Chat");
    info!("Server: {}", url);
    info!("Provider: {} / {}", provider, model);
    info!("Type /help for commands, Ctrl+C to stop");
    info!("========================================");
    info!("");
}

fn print_help() {
    println!("Commands:");
    println!("  /provider <name>   switch provider (OPENAI, CLAUDE)");
    println!("  /model <name>      switch model");
    println!("  /attach <path>     attach a file to the next message");
    println!("  /reconnect         reconnect after a failure");
    println!("  /quit              leave the chat");
}
