use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatrelay::chat::call_llm;
use chatrelay::config::Config;
use chatrelay::credentials::{Credentials, ProcessEnv, check_config};
use chatrelay::llm::ModelRegistry;
use chatrelay::server::{AppState, build_app};

#[derive(Parser)]
#[command(name = "chatrelay", version, about, long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = "chatrelay.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Report which provider credentials are missing
    Check,

    /// List the available providers and models
    Models,

    /// Send a single message and print the reply
    Ask {
        /// Provider key (defaults to the configured provider)
        #[arg(long)]
        provider: Option<String>,

        /// Model id (defaults to the provider's first model)
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt to send with the message
        #[arg(long)]
        system: Option<String>,

        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            serve(&cli.config, host, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => Ok(check()),
        Commands::Models => {
            models(&cli.config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ask {
            provider,
            model,
            system,
            message,
        } => {
            ask(&cli.config, provider, model, system, &message).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load(path)
        .await
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_env(&ProcessEnv);
    Ok(config)
}

async fn load_state(path: &Path) -> Result<(Config, AppState)> {
    let config = load_config(path).await?;
    let credentials = Credentials::current(&ProcessEnv);
    let registry = ModelRegistry::from_credentials(&credentials, &config.providers);
    let state = AppState::new(registry, &config.chat, Arc::new(ProcessEnv));
    Ok((config, state))
}

async fn serve(path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let (config, state) = load_state(path).await?;

    if state
        .registry
        .lookup(&state.chat.default_provider, &state.chat.default_model)
        .is_none()
    {
        warn!(
            provider = %state.chat.default_provider,
            model = %state.chat.default_model,
            "Default model is not registered; requests without x-provider/x-model will fail"
        );
    }

    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let app = build_app(state, config.server.request_timeout_seconds);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn check() -> ExitCode {
    let status = check_config(&ProcessEnv);
    if status.valid {
        println!("All API keys are configured");
        return ExitCode::SUCCESS;
    }

    println!("Missing API key configuration:");
    for error in &status.errors {
        println!("  - {error}");
    }
    ExitCode::FAILURE
}

async fn models(path: &Path) -> Result<()> {
    let (_, state) = load_state(path).await?;

    for entry in state.registry.catalog() {
        println!("{}", entry.provider);
        for model in &entry.models {
            let is_default = entry.provider.as_str() == state.chat.default_provider
                && *model == state.chat.default_model;
            let marker = if is_default { " (default)" } else { "" };
            println!("  {model}{marker}");
        }
    }
    Ok(())
}

async fn ask(
    path: &Path,
    provider: Option<String>,
    model: Option<String>,
    system: Option<String>,
    message: &str,
) -> Result<()> {
    let (_, state) = load_state(path).await?;

    let provider = provider.unwrap_or_else(|| state.chat.default_provider.clone());
    let model = match model {
        Some(model) => model,
        None if provider == state.chat.default_provider => state.chat.default_model.clone(),
        None => state
            .registry
            .default_model(&provider)
            .unwrap_or_default()
            .to_string(),
    };

    let response = call_llm(
        &state.registry,
        &provider,
        &model,
        message,
        system.as_deref(),
    )
    .await?;

    println!("{}", response.content);
    if let Some(usage) = response.usage {
        info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Token usage"
        );
    }
    Ok(())
}
