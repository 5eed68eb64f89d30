use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use files_manager::{
    api,
    config::{Config, StorageBackend},
    events::{EventPublisher, NoopPublisher, RabbitMqPublisher},
    lifecycle::LifecycleEngine,
    object_store as obj,
    storage::Database,
    AppState,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "files-manager starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);

    // Initialize upload delegate
    let mut local_store = None;
    let delegate: Arc<dyn obj::UploadDelegate> = match config.storage.backend {
        StorageBackend::Local => {
            let store = Arc::new(obj::LocalStore::new(
                &config.storage.local_storage_path,
                &config.node.public_url,
                &config.storage.local_signing_secret,
            )?);
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            local_store = Some(Arc::clone(&store));
            store
        }
        StorageBackend::S3 => {
            let s3 = config
                .storage
                .s3
                .clone()
                .ok_or_else(|| anyhow::anyhow!("S3 settings missing"))?;
            let bucket = s3.bucket.clone();
            let store = obj::S3Store::new(s3)?;
            info!("Using S3 storage backend, bucket: {}", bucket);
            Arc::new(store)
        }
    };

    // Initialize event publisher
    let publisher: Arc<dyn EventPublisher> = match config.events.clone() {
        Some(events) => {
            info!(
                "Publishing lifecycle events to exchange '{}' via {}",
                events.exchange, events.api_url
            );
            Arc::new(RabbitMqPublisher::new(events)?)
        }
        None => {
            info!("RABBITMQ_API_URL not set; lifecycle events are disabled");
            Arc::new(NoopPublisher)
        }
    };

    let engine = LifecycleEngine::new(db.clone(), delegate, publisher, config.uploads.clone());

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        engine,
        local_store,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
