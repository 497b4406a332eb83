#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use anyhow::Context;
use quote_api_gateway::api::UnconfiguredProvider;
use quote_api_gateway::config::{Config, HttpConfig, LogFormat, LogOutput};
use quote_api_gateway::{build_state, http, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    init_logging(&config);
    middleware::install_panic_hook();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.http.addr,
        "Starting quote API gateway"
    );

    // Registration errors and bad policy config stop here
    let listener = bind_listener(&config.http)?;
    let state = build_state(config, Arc::new(UnconfiguredProvider))?;
    let app = http::create_router(state.clone());

    info!(
        addr = %state.config.http.addr,
        tcp_nodelay = state.config.http.tcp_nodelay,
        tcp_keepalive = ?state.config.http.tcp_keepalive_secs,
        "HTTP server listening"
    );

    let http_server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = http_server.await {
        error!(error = %e, "HTTP server error");
    }

    info!(
        access_log_entries = state.access_log.total_entries(),
        "Shutdown complete"
    );
    Ok(())
}

/// Listener with the configured TCP options
fn bind_listener(config: &HttpConfig) -> anyhow::Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let addr = config.addr;
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .context("Failed to create socket")?;

    // Enable SO_REUSEADDR for faster restarts
    socket
        .set_reuse_address(true)
        .context("Failed to set SO_REUSEADDR")?;

    if config.tcp_nodelay {
        socket
            .set_tcp_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;
    }

    if let Some(keepalive_secs) = config.tcp_keepalive_secs {
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(keepalive_secs));
        socket
            .set_tcp_keepalive(&keepalive)
            .context("Failed to set TCP keepalive")?;
    }

    socket
        .set_nonblocking(true)
        .context("Failed to set non-blocking")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind {addr}"))?;
    socket.listen(1024).context("Failed to listen")?;

    TcpListener::from_std(socket.into()).context("Failed to convert to tokio listener")
}

/// Initialize logging based on configuration
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let writer = match config.logging.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(writer))
                .init();
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
