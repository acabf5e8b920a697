//! Interview service binary entrypoint.
//! Boots the Axum HTTP server with the interview routes and `/metrics`.

use isolation_interview::{app, config::AppConfig, metrics::Metrics};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("isolation_interview=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // The runtime may already have installed a subscriber; keep that one.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        let _ = registry.with(fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(fmt::layer().compact()).try_init();
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;
    let router = app(&cfg)?;

    let router = match Metrics::init() {
        Ok(metrics) => router.merge(metrics.router()),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder not installed, /metrics disabled");
            router
        }
    };

    Ok(router.into())
}
