// src/main.rs

use std::{sync::Arc, time::Duration};

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use testseries::{
    config::Config,
    routes,
    services::access::collaborators_from_config,
    state::AppState,
    store::PgStore,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    // Load configuration from environment
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
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

    // Initialize Database Pool with Retry
    let mut retry_count = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Database connected...");

    // Run Migrations Automatically
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations applied successfully.");

    let (access, users) = collaborators_from_config(&config);
    if config.access_service_url.is_none() {
        tracing::warn!("ACCESS_SERVICE_URL not set; only free series can be attempted");
    }

    let state = AppState::new(Arc::new(PgStore::new(pool)), access, users, config.clone());

    // Close abandoned attempts in the background
    let sweeper = (config.sweep_interval_secs > 0).then(|| {
        tracing::info!("Expiry sweeper running every {}s", config.sweep_interval_secs);
        state
            .exam
            .clone()
            .spawn_expiry_sweeper(Duration::from_secs(config.sweep_interval_secs))
    });

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listening address");
    tracing::info!("Listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }

    if let Some(handle) = sweeper {
        handle.abort();
    }
}
