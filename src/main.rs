use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use confirmed_web::api::{self, middleware::session::create_session_store, AppState};
use confirmed_web::config::Config;
use confirmed_web::db::{self, PgStore};
use confirmed_web::jobs;
use confirmed_web::services::mailer::LogMailer;
use confirmed_web::services::receipts::StoreReceiptValidator;
use confirmed_web::services::stripe::StripeClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confirmed_web=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Confirmed web server...");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!(environment = %config.environment, domain = %config.domain, "Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let session_store = create_session_store(pool.clone()).await?;
    tracing::info!("Session store initialized");

    // External services
    let billing = Arc::new(StripeClient::new(
        &config.stripe_api_base,
        config.stripe_secret_key.clone(),
    ));
    let receipts = Arc::new(StoreReceiptValidator::from_config(&config)?);

    // Build application state
    let state = AppState::new(
        config.clone(),
        Arc::new(PgStore::new(pool)),
        billing,
        receipts,
        Arc::new(LogMailer),
    )?;

    let mut scheduler = jobs::start(&state).await?;
    tracing::info!("Scheduler started");

    let app = api::app(state, session_store);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
