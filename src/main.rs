// src/main.rs

use std::sync::Arc;

use proctor::config::Config;
use proctor::engine::SessionRegistry;
use proctor::remote::HttpAttemptApi;
use proctor::routes;
use proctor::state::AppState;
use proctor::storage::SqliteJournal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load configuration from environment (and .env, if present)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let file_appender = tracing_appender::rolling::daily("logs", "proctor.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Open the audit journal and run migrations
    tracing::info!("Opening audit journal...");
    let journal = SqliteJournal::connect(&config.database_url)
        .await
        .expect("Failed to open audit journal");
    tracing::info!("Audit journal ready.");

    let api = HttpAttemptApi::new(config.remote_base_url.clone());
    tracing::info!("Remote attempt system at {}", config.remote_base_url);

    let state = AppState {
        sessions: SessionRegistry::new(Arc::new(api), Arc::new(journal), config.session),
        config: config.clone(),
    };

    // Create the Axum application router
    let app = routes::create_router(state);

    tracing::info!("Proctor service listening on {}", config.listen_addr);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("Failed to bind listen address");

    // Start the server
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
