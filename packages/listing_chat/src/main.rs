use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod error;
mod guard;
mod handlers;
mod metrics;
mod models;
mod repository;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::auth::AuthState;
use crate::config::{ChatConfig, FileConfig, ListingChatConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ChatStore;
use crate::ws::{ConnectionGateway, MessageDispatcher, ReadReceiptTracker, SessionRegistry};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "listing-chat")]
#[command(about = "Buyer/seller messaging for marketplace listings")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.listing-chat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground (default)
    Serve(ServeArgs),

    /// Apply database migrations and exit
    Migrate,
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Port for the web server (overrides [server].port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides [server].host)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub db: Arc<Database>,
    pub store: ChatStore,
    /// Live connections per conversation
    pub registry: Arc<SessionRegistry>,
    pub receipts: ReadReceiptTracker,
    pub gateway: ConnectionGateway,
}

impl AppState {
    pub(crate) fn new(db: Arc<Database>, chat_config: ChatConfig) -> Self {
        let metrics = Arc::new(ServerMetrics::new());
        let store = ChatStore::new(db.pool.clone());
        let registry = Arc::new(SessionRegistry::new());
        let receipts = ReadReceiptTracker::new(store.clone(), registry.clone(), metrics.clone());
        let gateway = ConnectionGateway::new(
            store.clone(),
            registry.clone(),
            MessageDispatcher::new(store.clone()),
            receipts.clone(),
            metrics.clone(),
            Arc::new(chat_config),
        );

        Self {
            metrics,
            db,
            store,
            registry,
            receipts,
            gateway,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run_server(ServeArgs::default(), cli.data_dir).await,
        Some(Commands::Serve(args)) => run_server(args, cli.data_dir).await,
        Some(Commands::Migrate) => run_migrate(cli.data_dir).await,
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "listing_chat=debug,tower_http=debug,info"
    } else {
        "listing_chat=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

/// Resolve the data directory, then layer config.toml and env vars on top of defaults.
fn load_settings(data_dir: Option<PathBuf>) -> Result<(ListingChatConfig, FileConfig)> {
    let config = ListingChatConfig::new(data_dir, None)?;
    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", config.config_toml_path().display()))?;

    let config = match file_config.database.path.clone() {
        Some(db_path) => ListingChatConfig::new(Some(config.data_dir), Some(db_path))?,
        None => config,
    };
    Ok((config, file_config))
}

async fn run_migrate(data_dir: Option<PathBuf>) -> Result<()> {
    init_tracing(false);
    let (config, _) = load_settings(data_dir)?;
    // Database::new applies pending migrations
    Database::new(&config).await?;
    info!("Database at {} is up to date", config.db_path.display());
    Ok(())
}

fn build_router(app_state: AppState) -> Router {
    let auth_state = AuthState {
        store: app_state.store.clone(),
    };

    Router::new()
        // Chat routes
        .route("/api/chats", get(handlers::list_chats))
        .route("/api/chats/get-or-create", post(handlers::get_or_create_chat))
        .route("/api/chats/{id}", get(handlers::get_chat))
        .route("/api/chats/{id}/mark-read", post(handlers::mark_chat_read))
        .route("/ws/chat/{id}", get(handlers::chat_websocket_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn run_server(args: ServeArgs, data_dir: Option<PathBuf>) -> Result<()> {
    init_tracing(args.debug);

    info!("Starting listing chat server");

    let (config, file_config) = load_settings(data_dir)?;

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);

    let chat_config = ChatConfig::from_file(&file_config.chat);
    info!(
        "Chat config: send_channel_capacity={}, echo_to_sender={}, duplicate_connections={:?}",
        chat_config.send_channel_capacity,
        chat_config.echo_to_sender,
        chat_config.duplicate_connections
    );

    let app_state = AppState::new(db, chat_config);
    let gateway_for_shutdown = app_state.gateway.clone();
    let app = build_router(app_state);

    let host = args.host.unwrap_or(file_config.server.host);
    let port = args.port.unwrap_or(file_config.server.port);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Listing chat listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET    /api/chats                 - List the caller's conversations");
    info!("  POST   /api/chats/get-or-create   - Open a conversation about a listing");
    info!("  GET    /api/chats/:id             - Conversation detail (marks read)");
    info!("  POST   /api/chats/:id/mark-read   - Mark messages read");
    info!("  GET    /ws/chat/:id               - Real-time chat WebSocket");

    // Upgraded WebSockets are not tracked by graceful shutdown; close them explicitly.
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, closing chat sessions...");
        gateway_for_shutdown.shutdown();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{seed_marketplace, seed_session};
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[test]
    fn cli_parses_serve_overrides() {
        let cli = Cli::try_parse_from([
            "listing-chat",
            "--data-dir",
            "/tmp/chat",
            "serve",
            "--port",
            "9001",
            "--debug",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/chat")));
        match cli.command {
            Some(Commands::Serve(args)) => {
                assert_eq!(args.port, Some(9001));
                assert!(args.host.is_none());
                assert!(args.debug);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn cli_defaults_to_no_subcommand() {
        let cli = Cli::try_parse_from(["listing-chat"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(
            Cli::try_parse_from(["listing-chat", "migrate"]).unwrap().command,
            Some(Commands::Migrate)
        ));
    }

    #[test]
    fn settings_pick_up_database_override() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[database]\npath = \"/tmp/elsewhere.db\"\n",
        )
        .unwrap();

        let (config, _) = load_settings(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/elsewhere.db"));
    }

    #[tokio::test]
    async fn full_router_flow() {
        let state = test_helpers::test_app_state().await;
        seed_marketplace(&state.store).await;
        seed_session(&state.store, "buyer-token", 1).await;
        let app = build_router(state);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chats/get-or-create")
                    .header("authorization", "Bearer buyer-token")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"listing_id": 10}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/ws/chat/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
