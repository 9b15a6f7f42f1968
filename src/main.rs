//! # KSeF Proxy Server Binary
//!
//! Proxy between an invoicing frontend and the Polish KSeF e-invoicing
//! platform, with a built-in in-memory mock of KSeF for development without
//! certificates.
//!
//! ## Usage
//!
//! ```bash
//! # Basic usage with defaults (mock mode)
//! ksef-proxy
//!
//! # Custom bind address
//! ksef-proxy --bind 127.0.0.1:8080
//!
//! # With environment variables
//! export KSEF_PROXY_BIND_ADDR=0.0.0.0:3001
//! export KSEF_USE_MOCK=false
//! export KSEF_ENVIRONMENT=demo
//! export LOG_LEVEL=info
//! ksef-proxy
//! ```
//!
//! The mock/real toggle (`KSEF_USE_MOCK`), environment selector
//! (`KSEF_ENVIRONMENT`) and advertised base URL (`KSEF_PUBLIC_BASE_URL`) are
//! re-read on every request, so they can be flipped while the process runs.

use ksef_proxy::server::mode;
use ksef_proxy::{server::ServerConfig, start_server};
use std::process;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Main entry point for the KSeF proxy server
///
/// Sets up logging, parses configuration, and starts the server with proper
/// error handling and graceful shutdown.
///
/// ## Error Handling
/// All errors are logged and the process exits with appropriate exit codes:
/// - 0: Clean shutdown
/// - 1: Configuration error
/// - 2: Server startup error
/// - 3: Runtime error
///
/// ## Signal Handling
/// The server handles SIGINT and SIGTERM for graceful shutdown
#[tokio::main]
async fn main() {
    // Parse configuration from command line and environment
    let config = ServerConfig::from_args();

    // Initialize logging based on configuration
    if let Err(e) = setup_logging(&config) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Starting KSeF proxy server v{}", ksef_proxy::VERSION);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e.internal_message());
        process::exit(1);
    }

    display_startup_info(&config);

    // Setup graceful shutdown handler
    let shutdown_signal = setup_shutdown_handler();

    tokio::select! {
        // Server main loop
        result = start_server(config) => {
            match result {
                Ok(()) => {
                    info!("Server shut down cleanly");
                    process::exit(0);
                }
                Err(e) => {
                    error!("Server error: {}", e.internal_message());
                    if e.is_critical() {
                        process::exit(2);
                    } else {
                        process::exit(3);
                    }
                }
            }
        }

        // Graceful shutdown signal
        _ = shutdown_signal => {
            info!("Received shutdown signal, stopping server...");
            process::exit(0);
        }
    }
}

/// Setup structured logging based on configuration
///
/// ## Log Format
/// - **Development**: Pretty-printed with colors
/// - **Production**: JSON format for structured logging
fn setup_logging(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let is_production = std::env::var("ENVIRONMENT")
        .map(|env| env.to_lowercase() == "production")
        .unwrap_or(false);

    let env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level.inner().into())
        .from_env()?
        .add_directive("hyper=info".parse()?) // Reduce hyper verbosity
        .add_directive("reqwest=info".parse()?) // Reduce reqwest verbosity
        .add_directive("tokio=info".parse()?) // Reduce tokio verbosity
        .add_directive("mio=warn".parse()?); // Reduce mio verbosity

    if is_production {
        // Production: JSON structured logging
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();

        info!("Initialized structured JSON logging for production");
    } else {
        // Development: Pretty-printed with colors
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();

        info!("Initialized pretty-printed logging for development");
    }

    Ok(())
}

/// Setup graceful shutdown signal handling
///
/// ## Supported Signals
/// - **SIGINT**: Interrupt signal (Ctrl+C)
/// - **SIGTERM**: Termination signal (from process managers)
async fn setup_shutdown_handler() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

/// Display configuration summary and endpoint overview on startup
pub fn display_startup_info(config: &ServerConfig) {
    let resolved = mode::resolve_mode();

    info!("=== KSeF Proxy Server Configuration ===");
    info!("Version: {}", ksef_proxy::VERSION);
    info!("Bind Address: {}", config.bind_addr);
    info!("Log Level: {}", config.log_level);
    info!("Max Payload Size: {} bytes", config.max_payload_size);
    info!("Upstream Timeout: {}ms", config.upstream_timeout_ms);
    info!("Worker Threads: {}", config.get_worker_threads());
    info!(
        "Mode: {} (environment: {})",
        if resolved.use_mock { "mock" } else { "real" },
        resolved.environment
    );
    info!("Advertised base URL: {}", resolved.advertised_base_url());

    if config.enable_health_check {
        info!("Health endpoint: http://{}/health", config.bind_addr);
    }
    info!("Config endpoint: http://{}/config", config.bind_addr);
    info!(
        "Mock surface: http://{}{}/online/...",
        config.bind_addr,
        ksef_proxy::MOCK_PATH_PREFIX
    );
    info!("=========================================");
}
