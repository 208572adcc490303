use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_gateway::config::Config;
use chat_gateway::db::memory::MemoryChatStore;
use chat_gateway::db::pg::PgChatStore;
use chat_gateway::db::store::ChatStore;
use chat_gateway::push::fcm::FcmDispatcher;
use chat_gateway::push::PushQueue;
use chat_gateway::AppState;

const DB_POOL_SIZE: usize = 16;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            let pool = chat_gateway::db::pool::connect(url, DB_POOL_SIZE)
                .expect("failed to create database pool");
            Arc::new(PgChatStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is lost on restart)");
            Arc::new(MemoryChatStore::new())
        }
    };

    let push = match &config.fcm_service_account_path {
        Some(path) => match FcmDispatcher::from_file(path) {
            Ok(fcm) => {
                tracing::info!(project_id = %fcm.project_id(), "FCM push enabled");
                PushQueue::spawn(store.clone(), Arc::new(fcm), config.push_queue_capacity)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to load FCM service account, push disabled");
                PushQueue::disabled()
            }
        },
        None => {
            tracing::info!("FCM_SERVICE_ACCOUNT_PATH not set, push disabled");
            PushQueue::disabled()
        }
    };

    let state = AppState::new(config, store, push);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(chat_gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
