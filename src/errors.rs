use axum::{
    Json,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::IpAddr;
use thiserror::Error;

/// Request-scoped failures. Every variant is resolved inside the chain and
/// rendered as a JSON error body; none of them escape to the process.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed { allowed: Vec<Method> },

    #[error("Forbidden")]
    PermissionDenied { client_ip: IpAddr },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large")]
    PayloadTooLarge { limit: usize },

    #[error("Request timed out")]
    Timeout,

    #[error("Upstream provider unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream provider failed")]
    Upstream(#[source] anyhow::Error),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            AppError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Upstream and internal causes stay in the server log only.
        let error_message = match &self {
            AppError::Upstream(_) => "Upstream provider failed".to_string(),
            AppError::Internal(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "message": "error",
            "status": status.as_u16(),
            "error": error_message,
        }));

        let mut response = (status, body).into_response();

        if let AppError::MethodNotAllowed { allowed } = &self {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }

        response
    }
}

/// Registration-time failures. Any of these aborts startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("duplicate route: {method} {pattern}")]
    Duplicate { method: Method, pattern: String },

    #[error("ambiguous route: {method} {pattern} conflicts with {existing}")]
    Ambiguous {
        method: Method,
        pattern: String,
        existing: String,
    },

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A second terminal write was attempted on the same request context.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("response already started with status {existing}")]
pub struct AlreadyRespondedError {
    pub existing: StatusCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_method_not_allowed_sets_allow_header() {
        let response = AppError::MethodNotAllowed {
            allowed: vec![Method::GET, Method::POST],
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    }

    #[tokio::test]
    async fn test_internal_detail_not_leaked() {
        let response = AppError::Internal(anyhow::anyhow!("db password is hunter2")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["status"], 500);
        assert_eq!(body["error"], "Internal Server Error");
        assert!(!body.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_permission_denied_is_forbidden() {
        let response = AppError::PermissionDenied {
            client_ip: "10.0.0.9".parse().unwrap(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Forbidden");
    }
}
