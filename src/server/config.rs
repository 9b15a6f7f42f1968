//! # Server Configuration Module
//!
//! Startup configuration for the KSeF proxy: bind address, logging, payload
//! limits and the upstream timeout. Loaded from command-line arguments and
//! environment variables with validation.
//!
//! Mode-switch settings (`KSEF_USE_MOCK`, `KSEF_ENVIRONMENT`,
//! `KSEF_PUBLIC_BASE_URL`) are deliberately absent here: they are re-read
//! from the process environment on every request by the mode resolver so a
//! running proxy can be flipped without restart.

use crate::error::{KsefProxyError, Result};
use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::SocketAddr;
use tracing::{metadata::ParseLevelError, Level};

/// Wrapper for `tracing::Level` to handle serialization/deserialization
/// Used for logging configuration in the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogLevel(Level);

impl LogLevel {
    /// Returns the inner `tracing::Level` value.
    #[must_use]
    pub fn inner(&self) -> Level {
        self.0
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        Self(level)
    }
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        log_level.0
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s.parse().map_err(serde::de::Error::custom)?))
    }
}

/// Comprehensive server configuration
///
/// All startup options for the KSeF proxy, with sensible defaults and
/// validation. The proxy holds no private key material; the only secrets
/// passing through it are caller-supplied session tokens.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "ksef-proxy",
    about = "KSeF e-invoicing session/invoice lifecycle proxy with an in-memory mock simulator",
    version,
    long_about = None
)]
pub struct ServerConfig {
    /// Network address to bind the server to
    ///
    /// Supports both IPv4 and IPv6 addresses. Use "0.0.0.0:3001" to bind
    /// to all interfaces, or "127.0.0.1:3001" for localhost only.
    #[arg(
        short = 'b',
        long = "bind",
        value_name = "ADDRESS:PORT",
        default_value = "0.0.0.0:3001",
        env = "KSEF_PROXY_BIND_ADDR",
        help = "Network address to bind the server to"
    )]
    pub bind_addr: SocketAddr,

    /// Logging level for the server
    ///
    /// Controls the verbosity of server logging:
    /// - ERROR: Only critical errors
    /// - WARN: Errors and warnings
    /// - INFO: General operational information
    /// - DEBUG: Detailed debugging information
    /// - TRACE: Very detailed tracing (performance impact)
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "LEVEL",
        default_value = "info",
        env = "LOG_LEVEL",
        help = "Logging level (error, warn, info, debug, trace)"
    )]
    pub log_level: LogLevel,

    /// Maximum request payload size in bytes
    ///
    /// Limits the size of request bodies to prevent memory exhaustion.
    /// Requests exceeding this size are rejected before processing.
    #[arg(
        short = 'm',
        long = "max-payload-size",
        value_name = "BYTES",
        default_value_t = crate::MAX_PAYLOAD_SIZE,
        env = "MAX_PAYLOAD_SIZE",
        help = "Maximum request payload size in bytes"
    )]
    pub max_payload_size: usize,

    /// Timeout for outbound KSeF calls in milliseconds
    ///
    /// Applied to every call the real gateway makes. Timeouts surface to the
    /// caller like any other upstream failure; nothing is retried.
    #[arg(
        short = 't',
        long = "upstream-timeout",
        value_name = "MILLISECONDS",
        default_value_t = crate::UPSTREAM_TIMEOUT_MS,
        env = "UPSTREAM_TIMEOUT_MS",
        help = "Outbound KSeF call timeout in milliseconds"
    )]
    pub upstream_timeout_ms: u64,

    /// Number of worker threads for the server
    ///
    /// Controls the size of the Tokio runtime thread pool.
    /// If not specified, defaults to the number of CPU cores.
    #[arg(
        short = 'w',
        long = "worker-threads",
        value_name = "COUNT",
        env = "WORKER_THREADS",
        help = "Number of worker threads (default: number of CPU cores)"
    )]
    pub worker_threads: Option<usize>,

    /// Enable health check endpoint
    ///
    /// When enabled, exposes health status at /health for load balancers
    /// and monitoring systems.
    #[arg(
        long = "enable-health-check",
        env = "ENABLE_HEALTH_CHECK",
        default_value = "true",
        help = "Enable health check endpoint"
    )]
    pub enable_health_check: bool,
}

impl ServerConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from command-line arguments
    ///
    /// Parses command-line arguments and environment variables to create
    /// a complete server configuration.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Load configuration from environment variables only
    ///
    /// Creates configuration using only environment variables,
    /// with defaults for any missing values.
    ///
    /// ## Errors
    /// - `KsefProxyError::ConfigError`: if a variable fails to parse
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(bind_addr) = std::env::var("KSEF_PROXY_BIND_ADDR") {
            config.bind_addr = bind_addr.parse().map_err(|e| {
                KsefProxyError::config_error(
                    format!("Invalid bind address '{bind_addr}': {e}"),
                    Some(Box::new(e)),
                )
            })?;
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.log_level = log_level.parse().map_err(|e| {
                KsefProxyError::config_error(
                    format!("Invalid log level '{log_level}': {e}"),
                    Some(Box::new(e)),
                )
            })?;
        }

        if let Ok(max_size) = std::env::var("MAX_PAYLOAD_SIZE") {
            config.max_payload_size = max_size.parse().map_err(|e| {
                KsefProxyError::config_error(
                    format!("Invalid max payload size '{max_size}': {e}"),
                    Some(Box::new(e)),
                )
            })?;
        }

        if let Ok(timeout) = std::env::var("UPSTREAM_TIMEOUT_MS") {
            config.upstream_timeout_ms = timeout.parse().map_err(|e| {
                KsefProxyError::config_error(
                    format!("Invalid upstream timeout '{timeout}': {e}"),
                    Some(Box::new(e)),
                )
            })?;
        }

        if let Ok(workers) = std::env::var("WORKER_THREADS") {
            config.worker_threads = Some(workers.parse().map_err(|e| {
                KsefProxyError::config_error(
                    format!("Invalid worker threads '{workers}': {e}"),
                    Some(Box::new(e)),
                )
            })?);
        }

        if let Ok(health) = std::env::var("ENABLE_HEALTH_CHECK") {
            config.enable_health_check = health.parse().map_err(|e| {
                KsefProxyError::config_error(
                    format!("Invalid enable health check '{health}': {e}"),
                    Some(Box::new(e)),
                )
            })?;
        }

        Ok(config)
    }

    /// Validate the configuration for consistency
    ///
    /// ## Errors
    /// - `KsefProxyError::ConfigError`: if validation fails
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.ip().is_unspecified() {
            tracing::warn!(
                "Binding to wildcard address {} - ensure this is secure for your environment",
                self.bind_addr
            );
        }

        if self.max_payload_size == 0 {
            return Err(KsefProxyError::config_error(
                "Maximum payload size cannot be zero".to_string(),
                None,
            ));
        }

        if self.max_payload_size > 100 * 1024 * 1024 {
            tracing::warn!(
                "Very large maximum payload size: {} bytes - this may impact performance",
                self.max_payload_size
            );
        }

        if self.upstream_timeout_ms == 0 {
            return Err(KsefProxyError::config_error(
                "Upstream timeout cannot be zero".to_string(),
                None,
            ));
        }

        if let Some(workers) = self.worker_threads {
            if workers == 0 {
                return Err(KsefProxyError::config_error(
                    "Worker thread count cannot be zero".to_string(),
                    None,
                ));
            }

            if workers > 64 {
                tracing::warn!(
                    "Very high worker thread count: {} - this may cause excessive context switching",
                    workers
                );
            }
        }

        Ok(())
    }

    /// Get the optimal number of worker threads
    ///
    /// Returns the configured worker thread count, or calculates
    /// an optimal value based on system resources.
    #[must_use]
    pub fn get_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            // 2x CPU count for I/O-bound workloads, capped at 16
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
                .min(16)
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{}:{}", crate::DEFAULT_BIND_ADDR, crate::DEFAULT_PORT)
                .parse()
                .expect("Default bind address should be valid"),
            log_level: LogLevel::from(Level::INFO),
            max_payload_size: crate::MAX_PAYLOAD_SIZE,
            upstream_timeout_ms: crate::UPSTREAM_TIMEOUT_MS,
            worker_threads: None,
            enable_health_check: true,
        }
    }
}
