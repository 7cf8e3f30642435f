//! commerce_admin - Commerce Catalogue Admin Backend
//!
//! Event-sourced write side with CQRS read models: commands commit events,
//! snapshots and outbox rows atomically; background workers publish the
//! outbox, build the denormalized views and execute deferred schedules.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commerce_admin::api::{self, AppState};
use commerce_admin::images::UnconfiguredImageStorage;
use commerce_admin::outbox::{OutboxPublisher, ProjectionTrigger, PublisherConfig};
use commerce_admin::projection::ProjectionRunner;
use commerce_admin::scheduler::{Scheduler, SchedulerConfig};
use commerce_admin::{db, Config};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "commerce_admin=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    // Axum layers apply in reverse order: logging -> auth -> handler
    let protected_routes = api::create_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(api::middleware::logging_middleware));

    Router::new()
        // Health check (no auth)
        .route("/health", axum::routing::get(health_check))
        // Protected API routes
        .nest("/api", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting commerce_admin server");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let config = Arc::new(config);
    let state = AppState::new(
        pool.clone(),
        config.clone(),
        Arc::new(UnconfiguredImageStorage),
    );

    // Background workers: outbox publisher wakes the projection runner as
    // soon as it delivers, the scheduler ticks over the schedules view.
    let projection_wakeup = Arc::new(tokio::sync::Notify::new());

    let projection_handle =
        ProjectionRunner::new(pool.clone(), projection_wakeup.clone()).start();

    let publisher_handle = OutboxPublisher::new(
        pool.clone(),
        vec![Arc::new(ProjectionTrigger::new(projection_wakeup))],
    )
    .with_config(PublisherConfig {
        batch_size: config.outbox_batch_size,
        ..PublisherConfig::default()
    })
    .start();

    let scheduler_handle = Scheduler::new(
        state.clone(),
        SchedulerConfig {
            tick: config.scheduler_tick,
            retry_base: config.scheduler_retry_base,
            max_attempts: config.scheduler_max_attempts,
            ..SchedulerConfig::default()
        },
    )
    .start();

    let app = build_router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    projection_handle.abort();
    publisher_handle.abort();
    scheduler_handle.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
