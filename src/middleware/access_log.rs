//! Structured access log.
//!
//! Exactly one entry per request: the logger snapshots the request on the way
//! in, delegates, and emits on the way out. A panic from below is observed,
//! logged with the status the recovery policy will write, and re-raised. If
//! the request future is dropped before finishing (client went away, timeout)
//! the pending entry emits from `Drop` with whatever status was written.

use super::{Middleware, Next};
use crate::http::{RequestContext, StatusProbe};
use crate::metrics::SharedMetrics;
use axum::http::{StatusCode, header};
use chrono::{SecondsFormat, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Panicked,
    Cancelled,
}

/// A single access log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// RFC 3339 UTC, millisecond precision
    pub timestamp: String,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Registered pattern that matched, if any
    pub route: Option<String>,
    /// Absent only when the request was cancelled before any response
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub user_agent: Option<String>,
    pub outcome: Outcome,
}

/// Access log sink: counts and emits entries on the `access_log` target.
#[derive(Default)]
pub struct AccessLog {
    total_entries: AtomicU64,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: &AccessLogEntry) {
        self.total_entries.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "access_log",
            timestamp = %entry.timestamp,
            client_ip = %entry.client_ip,
            method = %entry.method,
            path = %entry.path,
            query = entry.query.as_deref().unwrap_or(""),
            route = entry.route.as_deref().unwrap_or("-"),
            status = entry.status,
            latency_ms = entry.latency_ms,
            user_agent = entry.user_agent.as_deref().unwrap_or("-"),
            outcome = ?entry.outcome,
            "{}",
            serde_json::to_string(entry).unwrap_or_default()
        );
    }

    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }
}

/// The access logging policy.
pub struct AccessLogger {
    log: Arc<AccessLog>,
    metrics: SharedMetrics,
}

impl AccessLogger {
    pub fn new(log: Arc<AccessLog>, metrics: SharedMetrics) -> Self {
        Self { log, metrics }
    }

    pub fn log(&self) -> &Arc<AccessLog> {
        &self.log
    }
}

/// Snapshot taken on the way in; emits exactly once.
struct Pending<'l> {
    logger: &'l AccessLogger,
    start: Instant,
    client_ip: String,
    method: String,
    path: String,
    query: Option<String>,
    route: Option<String>,
    user_agent: Option<String>,
    probe: StatusProbe,
    emitted: bool,
}

impl<'l> Pending<'l> {
    fn begin(logger: &'l AccessLogger, ctx: &RequestContext) -> Self {
        Self {
            logger,
            start: Instant::now(),
            client_ip: ctx.client_ip().to_string(),
            method: ctx.method().to_string(),
            path: ctx.path().to_string(),
            query: ctx.query().map(str::to_string),
            route: ctx.route().map(str::to_string),
            user_agent: ctx.header(header::USER_AGENT).map(str::to_string),
            probe: ctx.status_probe(),
            emitted: false,
        }
    }

    fn finish(mut self, status: Option<StatusCode>, outcome: Outcome) {
        self.emit(status, outcome);
    }

    fn emit(&mut self, status: Option<StatusCode>, outcome: Outcome) {
        if self.emitted {
            return;
        }
        self.emitted = true;

        let elapsed = self.start.elapsed();
        let entry = AccessLogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            client_ip: std::mem::take(&mut self.client_ip),
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            query: self.query.take(),
            route: self.route.take(),
            status: status.map(|s| s.as_u16()),
            latency_ms: elapsed.as_secs_f64() * 1000.0,
            user_agent: self.user_agent.take(),
            outcome,
        };

        self.logger.log.record(&entry);
        self.record_metrics(&entry, elapsed);
    }

    fn record_metrics(&self, entry: &AccessLogEntry, elapsed: Duration) {
        if let Some(status) = entry.status {
            self.logger.metrics.record_http_request(
                &entry.method,
                entry.route.as_deref().unwrap_or("unmatched"),
                status,
                elapsed,
            );
        }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let status = self.probe.get();
        self.emit(status, Outcome::Cancelled);
    }
}

impl Middleware for AccessLogger {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let pending = Pending::begin(self, ctx);

            let inflight = self.metrics.http_inflight_requests.clone();
            inflight.inc();
            ctx.defer(move || {
                inflight.dec();
            });

            match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
                Ok(()) => pending.finish(ctx.status(), Outcome::Completed),
                Err(payload) => {
                    let status = ctx.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    pending.finish(Some(status), Outcome::Panicked);
                    panic::resume_unwind(payload);
                }
            }
        })
    }
}
