//! Entry point for every request the server accepts.
//!
//! The route is resolved before the chain runs so that 404 and 405 outcomes
//! still pass through recovery, logging and CORS; the routing result travels
//! in the context and is acted on by [`RouteDispatch`] at the end of the
//! chain, after the allow-list.

use super::context::RequestContext;
use super::state::AppState;
use crate::errors::AppError;
use crate::middleware::Endpoint;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Client address: the peer, or the first forwarded hop when the deployment
/// sits behind a trusted proxy. IPv4-mapped IPv6 is folded to IPv4.
pub fn client_ip(peer: IpAddr, headers: &HeaderMap, trust_forwarded: bool) -> IpAddr {
    let forwarded = trust_forwarded
        .then(|| {
            headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok())
                .or_else(|| {
                    headers
                        .get(X_REAL_IP)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<IpAddr>().ok())
                })
        })
        .flatten();

    forwarded.unwrap_or(peer).to_canonical()
}

/// Terminal step of the chain: run the matched handler, or write the
/// routing failure. Body read and handler share one deadline; running out
/// writes 408 through the context, so the outer policies still see it.
pub struct RouteDispatch {
    pub body_limit: usize,
    pub timeout: Duration,
}

impl RouteDispatch {
    const WRITER: &'static str = "dispatch";
}

impl Endpoint for RouteDispatch {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let matched = match ctx.take_routing() {
                Some(Ok(matched)) => matched,
                Some(Err(err)) => {
                    ctx.respond_or_report(err.into_response(), Self::WRITER);
                    return;
                }
                None => {
                    ctx.respond_or_report(AppError::NotFound.into_response(), Self::WRITER);
                    return;
                }
            };

            let run = async {
                let body = ctx.read_body(self.body_limit).await?;
                matched.handler.call(ctx.handler_request(body)).await
            };
            let outcome = tokio::time::timeout(self.timeout, run).await;
            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        method = %ctx.method(),
                        path = %ctx.path(),
                        route = %matched.route,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Handler timed out"
                    );
                    Err(AppError::Timeout)
                }
            };

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    if err.status().is_server_error() {
                        error!(
                            method = %ctx.method(),
                            path = %ctx.path(),
                            route = %matched.route,
                            error = ?err,
                            "Handler failed"
                        );
                    }
                    err.into_response()
                }
            };
            ctx.respond_or_report(response, Self::WRITER);
        })
    }
}

/// Fallback handler of the axum router: every request lands here.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let client_ip = client_ip(
        peer.ip(),
        request.headers(),
        state.config.http.trust_forwarded_headers,
    );
    let routing = state.table.lookup(request.method(), request.uri().path());

    let mut ctx = RequestContext::new(request, client_ip);
    ctx.set_routing(routing);

    let endpoint = RouteDispatch {
        body_limit: state.config.http.body_limit_bytes,
        timeout: state.config.request_timeout(),
    };
    state.chain.execute(&mut ctx, &endpoint).await;

    match ctx.take_response() {
        Some(response) => response,
        None => {
            error!(
                method = %ctx.method(),
                path = %ctx.path(),
                "Chain finished without writing a response"
            );
            AppError::Internal(anyhow::anyhow!("no response written")).into_response()
        }
    }
}
