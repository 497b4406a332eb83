//! Client address allow-list.
//!
//! A binary gate: the client address is either in the list or the request
//! ends with 403. There is no throttling here; backpressure needs its own
//! layer. Runs after CORS so a preflight is never blocked by address policy.

use super::{Middleware, Next};
use crate::errors::AppError;
use crate::http::RequestContext;
use crate::metrics::SharedMetrics;
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid allow-list entry {entry:?}: {reason}")]
pub struct AllowListError {
    pub entry: String,
    pub reason: String,
}

/// Exact addresses and CIDR ranges, IPv4 and IPv6.
#[derive(Debug, Clone, Default)]
pub struct IpMatcher {
    networks: Vec<IpNet>,
    single_ips: Vec<IpAddr>,
}

impl IpMatcher {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Result<Self, AllowListError> {
        let mut matcher = Self::default();

        for entry in entries {
            let trimmed = entry.as_ref().trim();
            let invalid = |reason: String| AllowListError {
                entry: trimmed.to_string(),
                reason,
            };
            if trimmed.contains('/') {
                let net: IpNet = trimmed.parse().map_err(|e| invalid(format!("{e}")))?;
                matcher.networks.push(net.trunc());
            } else {
                let ip: IpAddr = trimmed.parse().map_err(|e| invalid(format!("{e}")))?;
                matcher.single_ips.push(ip.to_canonical());
            }
        }

        Ok(matcher)
    }

    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) match their IPv4 form.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.single_ips.contains(&ip) || self.networks.iter().any(|net| net.contains(&ip))
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.single_ips.is_empty()
    }

    pub fn len(&self) -> usize {
        self.networks.len() + self.single_ips.len()
    }
}

pub struct IpAllowGuard {
    matcher: IpMatcher,
    metrics: SharedMetrics,
}

impl IpAllowGuard {
    pub fn new(matcher: IpMatcher, metrics: SharedMetrics) -> Self {
        Self { matcher, metrics }
    }
}

impl Middleware for IpAllowGuard {
    fn name(&self) -> &'static str {
        "ip_allow"
    }

    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let client_ip = ctx.client_ip();
            if self.matcher.contains(client_ip) {
                next.run(ctx).await;
                return;
            }

            self.metrics.http_access_denied_total.inc();
            warn!(
                client_ip = %client_ip,
                method = %ctx.method(),
                path = %ctx.path(),
                "Request rejected by IP allow-list"
            );
            let response = AppError::PermissionDenied { client_ip }.into_response();
            ctx.respond_or_report(response, self.name());
        })
    }
}
