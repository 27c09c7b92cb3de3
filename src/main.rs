mod cli;
mod config;
mod error;

use clap::Parser;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gatelink_client::{
    describe_close_code, ClientError, DeviceIdentity, DeviceTokenStore, GatewayClient,
    GatewayListener, HelloOk, RequestOptions,
};

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::error::CliError;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gatelink=info,gatelink_client=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Handle ConfigSample immediately without loading config
    if let Commands::ConfigSample { output } = &cli.command {
        let sample_config = Config::sample();
        let path = output
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./gatelink.sample.yaml"));
        sample_config.save(&path)?;
        println!("✅ Sample config written to {:?}", path);
        return Ok(());
    }

    // Load configuration
    let mut config = Config::load(&cli.config_path)?;
    if let Some(url) = &cli.url {
        config.gateway.url = Some(url.clone());
    }
    if let Some(token) = &cli.token {
        config.gateway.token = Some(token.clone());
    }

    match cli.command {
        Commands::Identity => show_identity(&config)?,
        Commands::ForgetToken { role } => forget_token(&config, role)?,
        Commands::ConfigSample { .. } => {
            // Already handled
        }
        Commands::Call {
            method,
            params,
            expect_final,
        } => {
            let params = match params {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| CliError::InvalidArgument(format!("--params: {}", e)))?,
                None => serde_json::json!({}),
            };
            let client = connect(&config).await?;
            let result = client
                .request_with(&method, params, RequestOptions { expect_final })
                .await;
            client.stop().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Sessions { limit } => {
            let client = connect(&config).await?;
            let result = client.list_sessions(limit).await;
            client.stop().await;

            let sessions = result?;
            if sessions.is_empty() {
                println!("No sessions");
            } else {
                println!("📝 Sessions:");
                for session in sessions {
                    match session.label {
                        Some(label) => println!("  • {} ({})", session.key, label),
                        None => println!("  • {}", session.key),
                    }
                }
            }
        }
        Commands::Chat { message, session } => {
            let client = connect(&config).await?;
            let result = async {
                client.resolve_session(&session).await?;
                client.send_chat(&message).await
            }
            .await;
            client.stop().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::History { session, limit } => {
            let client = connect(&config).await?;
            let result = async {
                client.resolve_session(&session).await?;
                client.chat_history(limit).await
            }
            .await;
            client.stop().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
    }

    Ok(())
}

/// Records the most recent handshake failure so it can be reported when the
/// connection never comes up.
#[derive(Default)]
struct CliListener {
    last_error: Mutex<Option<String>>,
}

impl CliListener {
    fn remember(&self, error: &ClientError) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|last| last.clone())
    }
}

impl GatewayListener for CliListener {
    fn on_hello_ok(&self, hello: &HelloOk) {
        info!(
            "Connected to gateway {} (protocol {})",
            hello.server.version, hello.protocol
        );
    }

    fn on_connect_error(&self, error: &ClientError) {
        self.remember(error);
    }

    fn on_close(&self, code: u16, reason: &str) {
        tracing::debug!(
            "Gateway closed: {} {} ({})",
            code,
            reason,
            describe_close_code(code).unwrap_or("unknown")
        );
    }

    fn on_error(&self, error: &ClientError) {
        self.remember(error);
    }
}

async fn connect(config: &Config) -> Result<GatewayClient, CliError> {
    let options = config.to_client_options();
    info!("Connecting to {}", options.url);

    let listener = Arc::new(CliListener::default());
    let client = GatewayClient::new(options, listener.clone())?;
    client.start();

    let timeout = Duration::from_secs(config.gateway.connect_timeout_secs);
    if let Err(e) = client.wait_connected(timeout).await {
        client.stop().await;
        let detail = listener.last_error().unwrap_or_else(|| e.to_string());
        return Err(CliError::GatewayError(ClientError::Protocol(format!(
            "could not connect within {}s: {}",
            timeout.as_secs(),
            detail
        ))));
    }
    Ok(client)
}

fn show_identity(config: &Config) -> Result<(), CliError> {
    let options = config.to_client_options();
    let identity = DeviceIdentity::load_or_create(&options.identity_path())?;
    let role = options.role.trim();
    let token = DeviceTokenStore::new(options.token_store_path()).load(identity.device_id(), role);

    println!("Device ID:    {}", identity.device_id());
    println!("Public key:   {}", identity.public_key_base64url());
    println!("Identity:     {}", options.identity_path().display());
    println!("Token store:  {}", options.token_store_path().display());
    match token {
        Some(entry) => println!(
            "Device token: stored for role '{}' (scopes: {})",
            entry.role,
            entry.scopes.join(",")
        ),
        None => println!("Device token: none for role '{}'", role),
    }
    Ok(())
}

fn forget_token(config: &Config, role: Option<String>) -> Result<(), CliError> {
    let options = config.to_client_options();
    let identity = DeviceIdentity::load_or_create(&options.identity_path())?;
    let role = role.unwrap_or(options.role.clone());

    DeviceTokenStore::new(options.token_store_path()).clear(identity.device_id(), &role)?;
    println!("✅ Device token for role '{}' removed", role.trim());
    Ok(())
}
