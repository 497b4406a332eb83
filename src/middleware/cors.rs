//! CORS negotiation.
//!
//! A preflight (`OPTIONS` carrying both `Origin` and
//! `Access-Control-Request-Method`) is answered here with 204 and never
//! reaches the allow-list or a handler. For every other request the CORS
//! headers are staged on the context before delegating, so they land on
//! whatever response is written later: short-circuited, failed, or the 500
//! written by recovery after a panic.

use super::{Middleware, Next};
use crate::config::CorsConfig;
use crate::http::RequestContext;
use crate::metrics::SharedMetrics;
use anyhow::{Context, Result};
use axum::{
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;

pub struct CorsPolicy {
    any_origin: bool,
    origins: Vec<String>,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    expose_headers: Option<HeaderValue>,
    allow_credentials: bool,
    max_age: HeaderValue,
    metrics: SharedMetrics,
}

fn joined(values: &[String], what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&values.join(", ")).with_context(|| format!("Invalid CORS {what}"))
}

impl CorsPolicy {
    pub fn new(config: &CorsConfig, metrics: SharedMetrics) -> Result<Self> {
        let methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_uppercase().as_bytes())
                    .map(|m| m.to_string())
                    .with_context(|| format!("Invalid CORS method: {m}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let expose_headers = if config.expose_headers.is_empty() {
            None
        } else {
            Some(joined(&config.expose_headers, "expose headers")?)
        };

        Ok(Self {
            any_origin: config.allowed_origins.iter().any(|o| o == "*"),
            origins: config.allowed_origins.clone(),
            allow_methods: joined(&methods, "methods")?,
            allow_headers: joined(&config.allowed_headers, "headers")?,
            expose_headers,
            allow_credentials: config.allow_credentials,
            max_age: HeaderValue::from(config.max_age_secs),
            metrics,
        })
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.any_origin || self.origins.iter().any(|o| o.eq_ignore_ascii_case(origin))
    }

    /// A literal `*` is only sent for a wildcard list without credentials;
    /// otherwise the request origin is echoed.
    fn echoes_origin(&self) -> bool {
        !self.any_origin || self.allow_credentials
    }

    fn allow_origin(&self, origin: Option<&str>) -> Option<HeaderValue> {
        match origin {
            Some(origin) if self.origin_allowed(origin) => {
                if self.echoes_origin() {
                    HeaderValue::from_str(origin).ok()
                } else {
                    Some(HeaderValue::from_static("*"))
                }
            }
            Some(_) => None,
            None if !self.echoes_origin() => Some(HeaderValue::from_static("*")),
            None => None,
        }
    }

    fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>, preflight: bool) {
        if self.echoes_origin() {
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }

        let Some(allow_origin) = self.allow_origin(origin) else {
            return;
        };

        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            self.allow_methods.clone(),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            self.allow_headers.clone(),
        );
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if preflight {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        } else if let Some(expose) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }
    }

    fn preflight_response(&self, origin: Option<&str>) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        self.apply(response.headers_mut(), origin, true);
        response
    }
}

fn is_preflight(ctx: &RequestContext) -> bool {
    ctx.method() == Method::OPTIONS
        && ctx.headers().contains_key(header::ORIGIN)
        && ctx
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

impl Middleware for CorsPolicy {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let origin = ctx.header(header::ORIGIN).map(str::to_string);

            if is_preflight(ctx) {
                self.metrics.http_cors_preflight_total.inc();
                if !origin.as_deref().is_some_and(|o| self.origin_allowed(o)) {
                    tracing::debug!(
                        origin = origin.as_deref().unwrap_or(""),
                        path = %ctx.path(),
                        "Preflight from origin outside the CORS list"
                    );
                }
                let response = self.preflight_response(origin.as_deref());
                ctx.respond_or_report(response, self.name());
                return;
            }

            let mut headers = HeaderMap::new();
            self.apply(&mut headers, origin.as_deref(), false);
            ctx.stage_response_headers(headers);

            next.run(ctx).await;
        })
    }
}
