//! tally server entry point.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tally_api::{AppState, router as api_router};
use tally_common::config::StoreBackend;
use tally_common::{Config, get_metrics};
use tally_core::services::question::default_questions;
use tally_core::{Clock, NoOpSnapshotPublisher, Recovery, SnapshotHub, SnapshotPublisher};
use tally_db::{MemorySurveyStore, PgSurveyStore, SurveyStore};
use tally_queue::{AggregationJobs, PubSubBridge, RedisPubSub, SchedulerConfig, run_scheduler};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tally=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("TALLY_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn SurveyStore>> {
    match config.database.store {
        StoreBackend::Memory => {
            warn!("Using in-memory store; responses are lost on restart");
            Ok(Arc::new(MemorySurveyStore::with_questions(
                default_questions(),
            )))
        }
        StoreBackend::Postgres => {
            let db = tally_db::init(config)
                .await
                .context("failed to connect to database")?;
            info!("Connected to database");

            info!("Running database migrations...");
            tally_db::migrate(&db).await.context("migrations failed")?;
            info!("Migrations completed");

            Ok(Arc::new(PgSurveyStore::new(Arc::new(db))))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting tally server...");

    let config = Config::load().context("failed to load configuration")?;

    let store = open_store(&config).await?;
    let hub = SnapshotHub::new();

    // Cross-instance snapshot fan-out
    let pubsub = match &config.redis {
        Some(redis) => {
            info!("Connecting to Redis...");
            let pubsub = Arc::new(
                RedisPubSub::new(&redis.url, &redis.prefix)
                    .await
                    .context("failed to connect to Redis")?,
            );
            pubsub.start().await.context("failed to subscribe")?;

            let bridge_hub = hub.clone();
            PubSubBridge::new(Arc::clone(&pubsub)).start(move |event| {
                bridge_hub.publish(Arc::new(event.into_snapshot()));
            });
            Some(pubsub)
        }
        None => {
            info!("Redis not configured; snapshot updates stay in-process");
            None
        }
    };
    let publisher: Arc<dyn SnapshotPublisher> = match &pubsub {
        Some(pubsub) => Arc::clone(pubsub) as Arc<dyn SnapshotPublisher>,
        None => Arc::new(NoOpSnapshotPublisher),
    };

    let pipeline = AppState::pipeline(
        store,
        hub,
        publisher,
        Arc::clone(get_metrics()),
        Clock::system(),
        &config.aggregation,
    );
    let engine = pipeline.engine;

    match engine.recover().await {
        Ok(Recovery::Rearmed { fire_at }) => info!(fire_at, "Re-armed pending recount"),
        Ok(Recovery::Recounted(_)) => info!("Startup recount complete"),
        Err(e) => warn!(error = %e, "Startup recovery failed; the next vote will retry"),
    }

    let listener_task = engine.spawn_listener(pipeline.events);
    let scheduler_task = run_scheduler(
        SchedulerConfig {
            sweep_interval: config.aggregation.sweep_interval(),
        },
        Arc::new(AggregationJobs::new(Arc::clone(&engine))),
    );

    let app = Router::new()
        .nest("/api", api_router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(pipeline.state);

    let addr = (config.server.host.as_str(), config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}:{}", addr.0, addr.1))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_task.abort();
    listener_task.abort();
    if let Some(pubsub) = pubsub
        && let Err(e) = pubsub.shutdown().await
    {
        warn!(error = %e, "Redis Pub/Sub shutdown failed");
    }

    info!("Server shutdown complete");
    Ok(())
}
