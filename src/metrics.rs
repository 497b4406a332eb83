use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    /// Registered pattern, or `unmatched`, so raw paths never become labels.
    pub route: String,
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BuildInfoLabels {
    pub version: String,
    pub git_sha: String,
}

pub struct Metrics {
    registry: Registry,

    // HTTP metrics
    pub http_requests_total: Family<HttpLabels, Counter>,
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    pub http_inflight_requests: Gauge,

    // Policy outcomes
    pub http_panics_recovered_total: Counter,
    pub http_access_denied_total: Counter,
    pub http_cors_preflight_total: Counter,

    // Build info
    pub build_info: Family<BuildInfoLabels, Gauge>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // HTTP metrics
        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "http_requests",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(
                    exponential_buckets(0.001, 2.0, 12), // 1ms to ~4s
                )
            });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_inflight_requests = Gauge::default();
        registry.register(
            "http_inflight_requests",
            "Number of HTTP requests currently being processed",
            http_inflight_requests.clone(),
        );

        let http_panics_recovered_total = Counter::default();
        registry.register(
            "http_panics_recovered",
            "Handler or middleware panics converted into error responses",
            http_panics_recovered_total.clone(),
        );

        let http_access_denied_total = Counter::default();
        registry.register(
            "http_access_denied",
            "Requests rejected by the IP allow-list",
            http_access_denied_total.clone(),
        );

        let http_cors_preflight_total = Counter::default();
        registry.register(
            "http_cors_preflight",
            "CORS preflight requests answered without reaching a handler",
            http_cors_preflight_total.clone(),
        );

        // Build info
        let build_info = Family::<BuildInfoLabels, Gauge>::default();
        registry.register("build_info", "Build information", build_info.clone());

        let version = env!("CARGO_PKG_VERSION").to_string();
        let git_sha = option_env!("GIT_SHA").unwrap_or("unknown").to_string();
        build_info
            .get_or_create(&BuildInfoLabels { version, git_sha })
            .set(1);

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_inflight_requests,
            http_panics_recovered_total,
            http_access_denied_total,
            http_cors_preflight_total,
            build_info,
        }
    }

    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "Failed to encode metrics");
        }
        buffer
    }

    pub fn record_http_request(
        &self,
        method: &str,
        route: &str,
        status: u16,
        duration: std::time::Duration,
    ) {
        let labels = HttpLabels {
            method: method.to_string(),
            route: route.to_string(),
            status: status.to_string(),
        };

        self.http_requests_total.get_or_create(&labels).inc();
        self.http_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration.as_secs_f64());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<Metrics>;
