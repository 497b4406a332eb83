use crate::config::Config;
use crate::metrics::SharedMetrics;
use crate::middleware::{AccessLog, Chain};
use crate::routing::RouteTable;
use std::sync::Arc;

/// Everything request handling reads. Built once before serving and never
/// mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub table: Arc<RouteTable>,
    pub chain: Chain,
    pub metrics: SharedMetrics,
    pub access_log: Arc<AccessLog>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        table: RouteTable,
        chain: Chain,
        metrics: SharedMetrics,
        access_log: Arc<AccessLog>,
    ) -> Self {
        Self {
            config,
            table: Arc::new(table),
            chain,
            metrics,
            access_log,
        }
    }
}
