//! Zero-trust login gateway server.
//!
//! Serves the trustgate API over HTTP, backed by PostgreSQL or an in-memory
//! store, and runs the device staleness sweep in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use log::info;
use pico_args::Arguments;
use tg_server::{
    api,
    config::{Overrides, ServerConfig, StoreBackend},
    logging, metrics,
};
use trustgate::{
    TrustGate,
    db::{Database, PgStore, Stores},
    geo::{GeoResolver, HttpIpLocator},
};

const HELP: &str = "\
Run the trustgate login risk and device trust server

USAGE:
  tg_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8000]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Use a throwaway in-memory store instead of PostgreSQL
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8000)
  DATABASE_URL             PostgreSQL connection string
  STORE_BACKEND            `memory` to skip PostgreSQL
  JWT_SECRET               JWT signing secret (>= 32 chars)
  PASSWORD_PEPPER          Password hashing pepper (>= 16 chars)
  METRICS_BIND             Prometheus exporter address
  (See .env.example for all configuration options)
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let overrides = Overrides {
        bind: pargs
            .opt_value_from_str("--bind")
            .context("Invalid --bind address")?,
        database_url: pargs
            .opt_value_from_str("--db-url")
            .context("Invalid --db-url")?,
        memory: pargs.contains("--memory"),
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        anyhow::bail!("Unknown arguments: {remaining:?}\n\n{HELP}");
    }

    logging::init();

    let config = ServerConfig::from_env(overrides)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        info!("Prometheus metrics exported on http://{addr}/metrics");
    }

    let (stores, database) = match &config.store {
        StoreBackend::Postgres(db_config) => {
            info!("Connecting to database");
            let db = Database::new(db_config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to apply migrations")?;
            info!("Database connected and migrated");

            (
                Stores::postgres(PgStore::new(db.pool().clone(), db_config)),
                Some(db),
            )
        }
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store; all state is lost on shutdown");
            (Stores::memory(), None)
        }
    };

    let geo = if config.geo.enabled {
        let locator = HttpIpLocator::new(config.geo.lookup_url.clone(), config.geo.timeout)
            .context("Failed to build the geolocation client")?;
        GeoResolver::new(Arc::new(locator), config.geo.timeout)
    } else {
        info!("IP geolocation disabled; logins from public addresses resolve to unknown");
        GeoResolver::offline()
    };

    let gate = TrustGate::new(stores, geo, config.trustgate_config());

    if let Some(admin) = &config.bootstrap {
        if gate
            .auth
            .bootstrap_superadmin(&admin.username, &admin.password)
            .await
            .context("Failed to bootstrap the superadmin account")?
        {
            info!("Created bootstrap superadmin {}", admin.username);
        }
    }

    let sweep = gate
        .devices
        .clone()
        .spawn_staleness_sweep(|marked| metrics::devices_marked_inactive_total(marked.len()));

    let app = api::create_router(api::AppState::new(
        gate,
        database.clone(),
        config.rate_limits,
    ));

    info!("Starting HTTP server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutting down server...");
    sweep.abort();
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to install CTRL+C signal handler: {e}");
        std::future::pending::<()>().await;
    }
}
