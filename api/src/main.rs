use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use common_database::{get_pool_with_timeouts, Database, DatabaseTimeouts, DEFAULT_TIMEOUTS};
use core_api::config::Config;
use core_api::metrics::setup_metrics_routes;
use core_api::store::{self, Store};
use lifecycle::{Close, Coordinator, DrainOutcome, GatedDriver};

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let log_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(log_layer.with_filter(filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env()?;
    init_tracing(config.log_json);

    let coordinator = Coordinator::builder(config.service_name.clone())
        .with_prestop_file(config.prestop_file())
        .with_drain_poll_interval(config.drain_poll_interval_ms.0)
        .with_drain_timeout(config.drain_timeout_ms.0)
        .with_readiness_grace(config.readiness_grace_ms.0)
        .build();

    let timeouts = DatabaseTimeouts {
        statement_timeout: config.statement_timeout_ms.0,
        acquire_timeout: config.acquire_timeout_ms.0,
        ..DEFAULT_TIMEOUTS
    };
    let pool =
        get_pool_with_timeouts(&config.database_url, config.max_pg_connections, timeouts).await?;

    if config.run_migrations {
        store::migrate(&pool).await?;
        info!("migrations applied");
    }

    let database = Database::new(pool);
    let driver = Arc::new(GatedDriver::new(
        database.clone(),
        coordinator.gate().clone(),
    )?);

    let readiness = coordinator
        .readiness_handler()
        .with_check("database", database.clone());
    let mut app = core_api::app(
        Store::new(driver),
        readiness,
        coordinator.liveness_handler(),
    );
    if config.export_prometheus {
        app = setup_metrics_routes(app, &config.service_name)?;
    }

    let listener = tokio::net::TcpListener::bind(config.bind()).await?;
    info!(address = %config.bind(), service = %config.service_name, "listening");

    let server = async {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(coordinator.shutdown_signal())
            .await;
        // A server that stops on its own still has to drain the database.
        coordinator.trigger("server_exit");
        served
    };

    let (served, drained) = tokio::join!(server, coordinator.run(&database));
    served?;

    match drained? {
        DrainOutcome::Drained => info!("shutdown complete"),
        DrainOutcome::Abandoned {
            in_flight,
            connections,
        } => warn!(
            in_flight,
            connections, "shutdown timed out with database work still running"
        ),
    }

    // Deferred close; a no-op when the drain already closed the pool.
    database.close().await?;

    Ok(())
}
