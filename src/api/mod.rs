//! Business route groups.
//!
//! ```text
//! /api/ping                      GET   liveness
//! /api/install/{status,store}    GET / POST
//! /api/user                      POST  create
//! /api/user/{store,login}        POST
//! /api/user/:id                  GET
//! /api/stock/<operation>         GET
//! /api/fund/getEMInfo            GET
//! ```

pub mod provider;

pub use provider::{Provider, ProviderCall, ProviderError, UnconfiguredProvider};

use crate::errors::RouteError;
use crate::http::{Handler, HandlerRequest, HandlerResult, handlers};
use crate::routing::RouteTable;
use axum::{Json, response::IntoResponse};
use futures_util::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;

const STOCK_OPERATIONS: [(&str, &str); 10] = [
    ("getEMProfile", "stock.getEMProfile"),
    ("getEMStockNews", "stock.getEMStockNews"),
    ("getEMZongHePingJia", "stock.getEMZongHePingJia"),
    ("getEMFreeHolderse", "stock.getEMFreeHolderse"),
    ("getEMIndicator", "stock.getEMIndicator"),
    ("getEMJiaZhiPingGu", "stock.getEMJiaZhiPingGu"),
    ("getEMStockTrends", "stock.getEMStockTrends"),
    ("getZSXGCommentNew", "stock.getZSXGCommentNew"),
    ("getCNINFOStockList", "stock.getCNINFOStockList"),
    ("search", "stock.search"),
];

/// Forwards one operation to the provider and wraps its data.
pub struct ProviderRoute {
    operation: &'static str,
    provider: Arc<dyn Provider>,
}

impl ProviderRoute {
    pub fn new(operation: &'static str, provider: Arc<dyn Provider>) -> Self {
        Self {
            operation,
            provider,
        }
    }
}

impl Handler for ProviderRoute {
    fn call(&self, request: HandlerRequest) -> BoxFuture<'static, HandlerResult> {
        let operation = self.operation;
        let provider = self.provider.clone();
        Box::pin(async move {
            let mut call = ProviderCall::new(operation, &request.params);
            call.query = request.query_pairs();
            call.body = request.json_body()?;

            let data = provider.call(call).await?;
            Ok(Json(json!({
                "message": "ok",
                "status": 200,
                "data": data,
            }))
            .into_response())
        })
    }
}

pub fn register_routes(
    table: &mut RouteTable,
    provider: Arc<dyn Provider>,
) -> Result<(), RouteError> {
    let route = |operation: &'static str| ProviderRoute::new(operation, provider.clone());

    let mut api = table.group("/api");
    api.get("/ping", handlers::ping)?;

    api.group("install")
        .get("status", route("install.status"))?
        .post("store", route("install.store"))?;

    api.group("user")
        .post("", route("user.create"))?
        .post("store", route("user.store"))?
        .post("login", route("user.login"))?
        .get(":id", route("user.get"))?;

    let mut stock = api.group("stock");
    for (suffix, operation) in STOCK_OPERATIONS {
        stock.get(suffix, route(operation))?;
    }

    api.group("fund").get("getEMInfo", route("fund.getEMInfo"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use axum::{
        body::Bytes,
        http::{HeaderMap, Method, StatusCode},
    };
    use serde_json::Value;
    use std::sync::Mutex;

    /// Echoes the call back as data and remembers it.
    #[derive(Default)]
    struct Echo {
        calls: Mutex<Vec<ProviderCall>>,
    }

    impl Provider for Echo {
        fn call(&self, call: ProviderCall) -> BoxFuture<'static, Result<Value, ProviderError>> {
            self.calls.lock().unwrap().push(call.clone());
            Box::pin(async move { Ok(serde_json::to_value(&call).unwrap()) })
        }
    }

    struct Broken;

    impl Provider for Broken {
        fn call(&self, _call: ProviderCall) -> BoxFuture<'static, Result<Value, ProviderError>> {
            Box::pin(async { Err(ProviderError::Failed(anyhow::anyhow!("connection refused"))) })
        }
    }

    fn table(provider: Arc<dyn Provider>) -> RouteTable {
        let mut table = RouteTable::new();
        register_routes(&mut table, provider).unwrap();
        table
    }

    fn request(
        method: Method,
        path: &str,
        query: Option<&str>,
        body: &'static str,
        table: &RouteTable,
    ) -> (HandlerRequest, Arc<dyn Handler>) {
        let matched = table.lookup(&method, path).unwrap();
        let request = HandlerRequest {
            method,
            path: path.to_string(),
            query: query.map(str::to_string),
            headers: HeaderMap::new(),
            params: matched.params.clone(),
            client_ip: "127.0.0.1".parse().unwrap(),
            body: Bytes::from_static(body.as_bytes()),
        };
        (request, matched.handler)
    }

    #[test]
    fn test_all_groups_registered() {
        let table = table(Arc::new(UnconfiguredProvider));
        // ping + 2 install + 4 user + 10 stock + 1 fund
        assert_eq!(table.len(), 18);

        assert!(table.lookup(&Method::GET, "/api/stock/search").is_ok());
        assert!(table.lookup(&Method::POST, "/api/user").is_ok());
        assert!(table.lookup(&Method::GET, "/api/fund/getEMInfo").is_ok());
        assert!(matches!(
            table.lookup(&Method::POST, "/api/stock/search"),
            Err(AppError::MethodNotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn test_provider_receives_params_query_and_body() {
        let echo = Arc::new(Echo::default());
        let table = table(echo.clone());

        let (req, handler) =
            request(Method::GET, "/api/user/42", Some("fields=name"), "", &table);
        let response = handler.call(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (req, handler) =
            request(Method::POST, "/api/user/login", None, "{\"name\":\"a\"}", &table);
        handler.call(req).await.unwrap();

        let calls = echo.calls.lock().unwrap();
        assert_eq!(calls[0].operation, "user.get");
        assert_eq!(calls[0].param("id"), Some("42"));
        assert_eq!(calls[0].query("fields"), Some("name"));
        assert_eq!(calls[1].operation, "user.login");
        assert_eq!(calls[1].body, Some(json!({ "name": "a" })));
    }

    #[tokio::test]
    async fn test_provider_failures_map_to_status() {
        let table = table(Arc::new(Broken));
        let (req, handler) = request(Method::GET, "/api/stock/getEMProfile", None, "", &table);
        let err = handler.call(req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let (req, handler) =
            request(Method::POST, "/api/install/store", None, "{broken", &table);
        let err = handler.call(req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
