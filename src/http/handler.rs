use crate::errors::AppError;
use crate::routing::Params;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method},
    response::Response,
};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::net::IpAddr;

pub type HandlerResult = Result<Response, AppError>;

/// A unit of work that accepts a request view and produces one terminal
/// response. Implemented for any `Fn(HandlerRequest) -> impl Future`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: HandlerRequest) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: HandlerRequest) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(request))
    }
}

/// What a handler sees of the request: method, path, parameters, headers
/// and the fully read body.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub params: Params,
    pub client_ip: IpAddr,
    pub body: Bytes,
}

impl HandlerRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Decoded `key=value` pairs of the query string, in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Body parsed as JSON; `None` when the body is empty.
    pub fn json_body(&self) -> Result<Option<Value>, AppError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&self.body)
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: Option<&str>, body: &'static str) -> HandlerRequest {
        HandlerRequest {
            method: Method::GET,
            path: "/api/stock/search".to_string(),
            query: query.map(str::to_string),
            headers: HeaderMap::new(),
            params: Params::default(),
            client_ip: "127.0.0.1".parse().unwrap(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_query_pairs_decoded() {
        let req = request(Some("keyword=%E8%8C%85%E5%8F%B0&page=2"), "");
        assert_eq!(
            req.query_pairs(),
            vec![
                ("keyword".to_string(), "茅台".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
        assert!(request(None, "").query_pairs().is_empty());
    }

    #[test]
    fn test_json_body() {
        assert_eq!(request(None, "  ").json_body().unwrap(), None);
        let value = request(None, r#"{"name":"alice"}"#).json_body().unwrap().unwrap();
        assert_eq!(value["name"], "alice");
        assert!(matches!(
            request(None, "{not json").json_body(),
            Err(AppError::BadRequest(_))
        ));
    }
}
