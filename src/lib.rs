//! Routing and middleware engine of the quote API gateway.
//!
//! Requests are matched against a [`routing::RouteTable`] built once at
//! startup and then run through an ordered [`middleware::Chain`]:
//!
//! ```text
//! recovery → access_log → cors → ip_allow → handler
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod routing;

use anyhow::{Context, Result};
use api::Provider;
use axum::http::Method;
use config::Config;
use http::state::AppState;
use metrics::{Metrics, SharedMetrics};
use middleware::{
    AccessLog, AccessLogger, Chain, CorsPolicy, IpAllowGuard, IpMatcher, PanicRecovery,
};
use routing::RouteTable;
use std::sync::Arc;

/// The standard policy chain, outermost first.
pub fn build_chain(
    config: &Config,
    metrics: &SharedMetrics,
    access_log: &Arc<AccessLog>,
) -> Result<Chain> {
    let matcher = IpMatcher::new(&config.access.allow_list).context("Invalid IP allow-list")?;
    let cors = CorsPolicy::new(&config.cors, metrics.clone())?;

    Ok(Chain::builder()
        .with(PanicRecovery::new(
            config.logging.stack_traces,
            metrics.clone(),
        ))
        .with(AccessLogger::new(access_log.clone(), metrics.clone()))
        .with(cors)
        .with(IpAllowGuard::new(matcher, metrics.clone()))
        .build())
}

/// Route table with the business groups and the metrics endpoint. Any
/// duplicate or ambiguous registration fails here, before serving.
pub fn build_routes(
    config: &Config,
    provider: Arc<dyn Provider>,
    metrics: &SharedMetrics,
) -> Result<RouteTable> {
    let mut table = RouteTable::with_trailing_slash(config.routing.trailing_slash);
    api::register_routes(&mut table, provider).context("Failed to register API routes")?;
    table
        .register(
            Method::GET,
            "/metrics",
            http::handlers::metrics_handler(metrics.clone()),
        )
        .context("Failed to register metrics route")?;
    Ok(table)
}

pub fn build_state(config: Config, provider: Arc<dyn Provider>) -> Result<Arc<AppState>> {
    config.validate()?;

    let metrics = Arc::new(Metrics::new());
    let access_log = Arc::new(AccessLog::new());
    let table = build_routes(&config, provider, &metrics)?;
    let chain = build_chain(&config, &metrics, &access_log)?;

    tracing::info!(
        routes = table.len(),
        policies = ?chain.names(),
        "Gateway assembled"
    );

    Ok(Arc::new(AppState::new(
        Arc::new(config),
        table,
        chain,
        metrics,
        access_log,
    )))
}
