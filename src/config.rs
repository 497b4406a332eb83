use crate::middleware::IpMatcher;
use crate::routing::TrailingSlash;
use anyhow::{Context, Result};
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub http: HttpConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub access: AccessConfig,
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub addr: SocketAddr,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
    pub tcp_nodelay: bool,
    pub tcp_keepalive_secs: Option<u64>,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_forwarded_headers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Include a backtrace in recovered-panic diagnostics.
    pub stack_traces: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// `*` alone means any origin.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Exact addresses and CIDR ranges.
    pub allow_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub trailing_slash: TrailingSlash,
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    split_list(&env_or_default(key, default))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // HTTP config
        let addr = env_or_default("ADDR", "0.0.0.0:8080")
            .parse()
            .context("Failed to parse ADDR")?;
        let request_timeout_secs = env_or_parse("REQUEST_TIMEOUT", 10);
        let body_limit_bytes = env_or_parse("BODY_LIMIT_BYTES", 1024 * 1024);
        let tcp_nodelay = env_or_parse("TCP_NODELAY", true);
        let tcp_keepalive_secs = match env_or_parse("TCP_KEEPALIVE_SECS", 0) {
            0 => None,
            n => Some(n),
        };
        let trust_forwarded_headers = env_or_parse("TRUST_FORWARDED_HEADERS", false);

        // Logging config
        let level = env_or_default("LOG_LEVEL", "info");
        let format = match env_or_default("LOG_FORMAT", "json").to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
        let output = match env_or_default("LOG_OUTPUT", "stdout").to_lowercase().as_str() {
            "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            other => anyhow::bail!("Invalid LOG_OUTPUT: {}", other),
        };
        let stack_traces = env_or_parse("LOG_STACK_TRACES", true);

        // CORS config
        let cors = CorsConfig {
            allowed_origins: env_list("CORS_ALLOWED_ORIGINS", "*"),
            allowed_methods: env_list("CORS_ALLOWED_METHODS", "GET,POST,PUT,DELETE,OPTIONS"),
            allowed_headers: env_list(
                "CORS_ALLOWED_HEADERS",
                "Content-Type,AccessToken,X-CSRF-Token,Authorization,Token",
            ),
            expose_headers: env_list("CORS_EXPOSE_HEADERS", "Content-Length,Content-Type"),
            allow_credentials: env_or_parse("CORS_ALLOW_CREDENTIALS", true),
            max_age_secs: env_or_parse("CORS_MAX_AGE_SECS", 86400),
        };

        // Access config
        let allow_list = env_list("IP_ALLOW_LIST", "127.0.0.1,::1");

        // Routing config
        let trailing_slash = match env_or_default("TRAILING_SLASH", "strict")
            .to_lowercase()
            .as_str()
        {
            "strict" => TrailingSlash::Strict,
            "lenient" => TrailingSlash::Lenient,
            other => anyhow::bail!("Invalid TRAILING_SLASH: {}", other),
        };

        let config = Config {
            http: HttpConfig {
                addr,
                request_timeout_secs,
                body_limit_bytes,
                tcp_nodelay,
                tcp_keepalive_secs,
                trust_forwarded_headers,
            },
            logging: LoggingConfig {
                level,
                format,
                output,
                stack_traces,
            },
            cors,
            access: AccessConfig { allow_list },
            routing: RoutingConfig { trailing_slash },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.request_timeout_secs < 1 {
            anyhow::bail!("REQUEST_TIMEOUT must be at least 1 second");
        }
        if self.http.body_limit_bytes == 0 {
            anyhow::bail!("BODY_LIMIT_BYTES must be greater than zero");
        }
        if self.access.allow_list.is_empty() {
            anyhow::bail!("IP_ALLOW_LIST cannot be empty");
        }
        IpMatcher::new(&self.access.allow_list).context("Invalid IP_ALLOW_LIST")?;
        if self.cors.allowed_origins.is_empty() {
            anyhow::bail!("CORS_ALLOWED_ORIGINS cannot be empty");
        }
        for method in &self.cors.allowed_methods {
            Method::from_bytes(method.as_bytes())
                .with_context(|| format!("Invalid method in CORS_ALLOWED_METHODS: {method}"))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }
}

// For tests only
#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            http: HttpConfig {
                addr: "127.0.0.1:0".parse().unwrap(),
                request_timeout_secs: 5,
                body_limit_bytes: 64 * 1024,
                tcp_nodelay: true,
                tcp_keepalive_secs: None,
                trust_forwarded_headers: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
                output: LogOutput::Stdout,
                stack_traces: false,
            },
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
                allowed_methods: split_list("GET,POST,PUT,DELETE,OPTIONS"),
                allowed_headers: split_list("Content-Type,Authorization,Token"),
                expose_headers: split_list("Content-Length,Content-Type"),
                allow_credentials: true,
                max_age_secs: 86400,
            },
            access: AccessConfig {
                allow_list: split_list("127.0.0.1,::1"),
            },
            routing: RoutingConfig {
                trailing_slash: TrailingSlash::Strict,
            },
        }
    }
}
