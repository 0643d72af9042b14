mod config;
mod error;
mod handlers;
mod memory;
mod prompt;
mod provider;
mod sanitize;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::{Config, LogConfig},
    memory::SessionMemory,
    prompt::PromptComposer,
    provider::{CompletionClient, GeminiProvider},
};

/// Log to both the console and the log file.
#[macro_export]
macro_rules! dual_debug {
    ($($arg:tt)*) => {{
        tracing::debug!(target: "stdout", $($arg)*);
        tracing::debug!(target: "file", $($arg)*);
    }};
}

#[macro_export]
macro_rules! dual_info {
    ($($arg:tt)*) => {{
        tracing::info!(target: "stdout", $($arg)*);
        tracing::info!(target: "file", $($arg)*);
    }};
}

#[macro_export]
macro_rules! dual_warn {
    ($($arg:tt)*) => {{
        tracing::warn!(target: "stdout", $($arg)*);
        tracing::warn!(target: "file", $($arg)*);
    }};
}

#[macro_export]
macro_rules! dual_error {
    ($($arg:tt)*) => {{
        tracing::error!(target: "stdout", $($arg)*);
        tracing::error!(target: "file", $($arg)*);
    }};
}

#[derive(Debug, Parser)]
#[command(name = "study-nexus", version, about = "Education and healthcare chat assistant with per-user memory")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
    /// Port to listen on, overriding the configuration
    #[arg(long)]
    port: Option<u16>,
}

pub(crate) struct AppState {
    pub(crate) memory: SessionMemory,
    pub(crate) completion: CompletionClient,
    pub(crate) composer: PromptComposer,
    /// Credential used for chat requests that do not carry one
    pub(crate) default_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let _guard = init_logging(&config.log)?;

    dual_info!("study-nexus version: {}", env!("CARGO_PKG_VERSION"));
    dual_info!("Configuration loaded from {}", cli.config);

    let store = config.storage.file_store();
    dual_info!(
        "Data files: {} and {}",
        store.conversations_path().display(),
        store.user_data_path().display()
    );
    if let Err(e) = store.ensure_dirs().await {
        dual_error!("Failed to create the data directory: {}", e);
    }
    let memory = SessionMemory::open(store).await;

    let provider = GeminiProvider::new(
        &config.provider.base_url,
        &config.provider.model,
        config.provider.timeout(),
    )
    .context("Failed to build the Gemini HTTP client")?;
    let policy = config.retry.policy();
    dual_info!(
        "Provider: {} at {} ({:?})",
        provider.model(),
        config.provider.base_url,
        policy
    );

    let state = Arc::new(AppState {
        memory,
        completion: CompletionClient::new(Arc::new(provider), policy),
        composer: config.prompt.composer(),
        default_api_key: config.provider.api_key.clone().filter(|k| !k.is_empty()),
    });

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive());

    let addr = config.server.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    dual_info!("Server running on http://{}", addr);
    dual_info!("Health check available at http://{}/health", addr);
    dual_info!("Features: Conversation memory, Data storage, Persistent history");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                dual_error!("Failed to listen for the shutdown signal: {}", e);
            }
            dual_info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("Server error")?;

    dual_info!("Server stopped");

    Ok(())
}

/// Session routes, served both at the root and under `/api`.
pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    let session_routes = Router::new()
        .route("/chat", post(handlers::chat_handler))
        .route("/store-user-data", post(handlers::store_user_data_handler))
        .route("/user-data/{user_id}", get(handlers::get_user_data_handler))
        .route(
            "/conversation/{user_id}",
            get(handlers::get_conversation_handler).delete(handlers::clear_conversation_handler),
        );

    Router::new()
        .route("/health", get(handlers::health_handler))
        .merge(session_routes.clone())
        .nest("/api", session_routes)
        .with_state(state)
}

fn init_logging(log: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let level = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .with_context(|| format!("Invalid log level: {}", log.level))?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(
            Targets::new()
                .with_target("stdout", tracing::Level::TRACE)
                .with_target("tower_http", tracing::Level::TRACE),
        );

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "study-nexus.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
                .with_filter(Targets::new().with_target("file", tracing::Level::TRACE));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(level)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
