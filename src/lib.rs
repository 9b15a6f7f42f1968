//! # KSeF Proxy Library
//!
//! A proxy/integration backend that mediates between an invoicing frontend and
//! the Polish KSeF e-invoicing platform. The library reshapes the official
//! KSeF HTTP protocol into a small JSON surface, drives the multi-step
//! token-based session initialisation (challenge fetch, public-key fetch, RSA
//! token encryption, XML rendering), and ships a complete in-memory mock of
//! KSeF for development without certificates.
//!
//! ## Architecture
//!
//! The library follows a modular design with clear separation of concerns:
//!
//! - [`error`] - Custom error types with security-focused error handling
//! - [`crypto`] - RSA encryption of the session token string
//! - [`gateway`] - Outbound protocol steps against the real KSeF service
//! - [`mock`] - In-memory KSeF simulator with the identical operation surface
//! - [`server`] - Hyper-based HTTP server exposing both surfaces
//!
//! ## Mode switching
//!
//! Every inbound request is dispatched through a mode switch that decides,
//! from the process environment, whether the real gateway or the mock
//! simulator backs the operation. The resolution is recomputed per request so
//! that environment-variable changes in a long-running process take effect
//! without a restart.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ksef_proxy::{ServerConfig, start_server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Thread Safety
//!
//! All public APIs are thread-safe. The mock simulator's stores are guarded
//! by per-map mutexes because the tokio runtime executes handlers on multiple
//! threads.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod server;

// Re-export commonly used types for convenience
pub use error::{KsefProxyError, Result};
pub use server::{start_server, ServerConfig};

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port
pub const DEFAULT_PORT: u16 = 3001;

/// Default bind address for the server
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Maximum payload size in bytes (16MB)
///
/// This limit prevents memory exhaustion through oversized invoice payloads
/// while leaving generous room for batch XML documents.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Timeout for outbound KSeF calls in milliseconds
///
/// Timeouts and connection failures are surfaced to the caller exactly like
/// non-2xx upstream responses; nothing is retried automatically.
pub const UPSTREAM_TIMEOUT_MS: u64 = 30_000;

/// Seconds after which a mock invoice flips from processing to accepted
///
/// The transition is evaluated lazily on each status read by comparing the
/// current time to the invoice creation time; there is no background timer.
pub const INVOICE_ACCEPTANCE_AFTER_SECS: u64 = 120;

/// Artificial delay applied by the mock signed-session initialisation, in
/// milliseconds
pub const MOCK_INIT_SIGNED_DELAY_MS: u64 = 500;

/// Upper bound on synthesized entries returned by the mock invoice query
pub const QUERY_SYNC_PAGE_CAP: usize = 5;

/// Path prefix under which the mock mirrors the official KSeF path shapes
pub const MOCK_PATH_PREFIX: &str = "/mock/api";
