//! Boundary to the upstream data providers.
//!
//! Business handlers do no work of their own: they gather what the request
//! carries into a [`ProviderCall`] and hand it to whatever [`Provider`] the
//! embedding program configured.

use crate::errors::AppError;
use crate::routing::Params;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One upstream operation, e.g. `stock.getEMProfile`.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCall {
    pub operation: &'static str,
    pub params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// JSON body, for operations that take one.
    pub body: Option<Value>,
}

impl ProviderCall {
    pub fn new(operation: &'static str, params: &Params) -> Self {
        Self {
            operation,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The operation cannot be served right now (or is not wired up).
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(reason) => AppError::Unavailable(reason),
            ProviderError::Failed(source) => AppError::Upstream(source),
        }
    }
}

pub trait Provider: Send + Sync + 'static {
    fn call(&self, call: ProviderCall) -> BoxFuture<'static, Result<Value, ProviderError>>;
}

/// Reports every operation as unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredProvider;

impl Provider for UnconfiguredProvider {
    fn call(&self, call: ProviderCall) -> BoxFuture<'static, Result<Value, ProviderError>> {
        Box::pin(async move {
            Err(ProviderError::Unavailable(format!(
                "no provider configured for {}",
                call.operation
            )))
        })
    }
}
