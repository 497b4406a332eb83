//! Per-request state threaded through the middleware chain.
//!
//! A context is created when a request arrives and dropped once its response
//! has been handed back to the server (or the connection went away). It is
//! never shared between requests. Dropping it runs the deferred cleanup
//! actions, most recent first.

use super::handler::HandlerRequest;
use crate::errors::{AlreadyRespondedError, AppError};
use crate::routing::{Params, RouteMatch};
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{HeaderMap, Method, StatusCode, header},
    response::Response,
};
use http_body_util::LengthLimitError;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

/// Read-only view of the status written so far, usable after the context
/// itself is gone (e.g. when the request future is cancelled).
#[derive(Debug, Clone, Default)]
pub struct StatusProbe(Arc<AtomicU16>);

impl StatusProbe {
    pub fn get(&self) -> Option<StatusCode> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }

    fn set(&self, status: StatusCode) {
        self.0.store(status.as_u16(), Ordering::Release);
    }
}

type Deferred = Box<dyn FnOnce() + Send>;

pub struct RequestContext {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    client_ip: IpAddr,
    body: Option<Body>,
    routing: Option<Result<RouteMatch, AppError>>,
    route_label: Option<Arc<str>>,
    params: Params,
    response: Option<Response>,
    staged_headers: HeaderMap,
    status: StatusProbe,
    deferred: Vec<Deferred>,
}

impl RequestContext {
    pub fn new(request: Request, client_ip: IpAddr) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            client_ip,
            body: Some(body),
            routing: None,
            route_label: None,
            params: Params::default(),
            response: None,
            staged_headers: HeaderMap::new(),
            status: StatusProbe::default(),
            deferred: Vec::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    /// Record the routing outcome. Called once, before the chain runs.
    pub fn set_routing(&mut self, outcome: Result<RouteMatch, AppError>) {
        if let Ok(matched) = &outcome {
            self.route_label = Some(matched.route.clone());
            self.params = matched.params.clone();
        }
        self.routing = Some(outcome);
    }

    pub(crate) fn take_routing(&mut self) -> Option<Result<RouteMatch, AppError>> {
        self.routing.take()
    }

    /// Registered pattern of the matched route, if any.
    pub fn route(&self) -> Option<&str> {
        self.route_label.as_deref()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Read the whole body, at most `limit` bytes. The body can be read once.
    pub async fn read_body(&mut self, limit: usize) -> Result<Bytes, AppError> {
        let declared = self
            .header(header::CONTENT_LENGTH)
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(AppError::PayloadTooLarge { limit });
        }

        let Some(body) = self.body.take() else {
            return Ok(Bytes::new());
        };

        axum::body::to_bytes(body, limit).await.map_err(|e| {
            let over_limit = std::error::Error::source(&e)
                .is_some_and(|source| source.is::<LengthLimitError>());
            if over_limit {
                AppError::PayloadTooLarge { limit }
            } else {
                AppError::BadRequest(format!("failed to read request body: {e}"))
            }
        })
    }

    pub fn handler_request(&self, body: Bytes) -> HandlerRequest {
        HandlerRequest {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            params: self.params.clone(),
            client_ip: self.client_ip,
            body,
        }
    }

    /// Headers appended to whichever response is written later, including
    /// one written by an outer policy after a panic.
    pub fn stage_response_headers(&mut self, headers: HeaderMap) {
        self.staged_headers.extend(headers);
    }

    /// Start the one terminal response for this request.
    pub fn respond(&mut self, mut response: Response) -> Result<(), AlreadyRespondedError> {
        if let Some(existing) = self.status.get() {
            return Err(AlreadyRespondedError { existing });
        }
        for (name, value) in &self.staged_headers {
            response.headers_mut().append(name, value.clone());
        }
        self.status.set(response.status());
        self.response = Some(response);
        Ok(())
    }

    /// `respond`, treating a double write as a logged defect.
    pub fn respond_or_report(&mut self, response: Response, writer: &'static str) {
        let attempted = response.status();
        if let Err(err) = self.respond(response) {
            tracing::error!(
                writer,
                method = %self.method,
                path = %self.path,
                attempted = attempted.as_u16(),
                error = %err,
                "Second response write suppressed"
            );
        }
    }

    pub fn response_started(&self) -> bool {
        self.status.get().is_some()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status.get()
    }

    pub fn status_probe(&self) -> StatusProbe {
        self.status.clone()
    }

    pub(crate) fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Queue a cleanup action to run when the context is discarded.
    pub fn defer(&mut self, action: impl FnOnce() + Send + 'static) {
        self.deferred.push(Box::new(action));
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        while let Some(action) = self.deferred.pop() {
            action();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use std::sync::Mutex;

    fn context(uri: &str) -> RequestContext {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("user-agent", "test")
            .body(Body::from("{\"a\":1}"))
            .unwrap();
        RequestContext::new(request, "127.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_path_and_query_split() {
        let ctx = context("/api/stock/search?x=1");
        assert_eq!(ctx.path(), "/api/stock/search");
        assert_eq!(ctx.query(), Some("x=1"));
        assert_eq!(ctx.header("user-agent"), Some("test"));
    }

    #[test]
    fn test_second_write_rejected() {
        let mut ctx = context("/");
        ctx.respond(StatusCode::ACCEPTED.into_response()).unwrap();
        let err = ctx.respond(StatusCode::OK.into_response()).unwrap_err();
        assert_eq!(err.existing, StatusCode::ACCEPTED);
        assert_eq!(ctx.status(), Some(StatusCode::ACCEPTED));

        ctx.respond_or_report(StatusCode::INTERNAL_SERVER_ERROR.into_response(), "test");
        assert_eq!(
            ctx.take_response().unwrap().status(),
            StatusCode::ACCEPTED
        );
    }

    #[test]
    fn test_status_probe_outlives_context() {
        let mut ctx = context("/");
        let probe = ctx.status_probe();
        assert_eq!(probe.get(), None);
        ctx.respond(StatusCode::FORBIDDEN.into_response()).unwrap();
        drop(ctx);
        assert_eq!(probe.get(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_deferred_actions_run_in_reverse_on_drop() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context("/");
        for i in 0..3 {
            let order = order.clone();
            ctx.defer(move || order.lock().unwrap().push(i));
        }
        assert!(order.lock().unwrap().is_empty());
        drop(ctx);
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_read_body_once_and_limit() {
        let mut ctx = context("/");
        let body = ctx.read_body(1024).await.unwrap();
        assert_eq!(&body[..], b"{\"a\":1}");
        assert!(ctx.read_body(1024).await.unwrap().is_empty());

        let request = Request::builder()
            .uri("/")
            .header("content-length", "4096")
            .body(Body::empty())
            .unwrap();
        let mut big = RequestContext::new(request, "127.0.0.1".parse().unwrap());
        assert!(matches!(
            big.read_body(1024).await,
            Err(AppError::PayloadTooLarge { limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit_is_too_large() {
        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(&[b'a'; 10])),
            Ok(Bytes::from_static(&[b'b'; 10])),
        ]);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/user/store")
            .body(Body::from_stream(chunks))
            .unwrap();
        let mut ctx = RequestContext::new(request, "127.0.0.1".parse().unwrap());
        assert!(ctx.header(header::CONTENT_LENGTH).is_none());

        let err = ctx.read_body(8).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 8 }));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_staged_headers_land_on_later_response() {
        let mut ctx = context("/");
        let mut staged = HeaderMap::new();
        staged.insert(header::VARY, "Origin".parse().unwrap());
        ctx.stage_response_headers(staged);

        ctx.respond(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            .unwrap();
        let response = ctx.take_response().unwrap();
        assert_eq!(response.headers()[header::VARY], "Origin");
    }
}
