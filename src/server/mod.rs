//! # Web Server Module
//!
//! Hyper-based HTTP server for the KSeF proxy. The server exposes two
//! surfaces: the proxy endpoints consumed by the invoicing frontend, and the
//! mock surface under [`crate::MOCK_PATH_PREFIX`] mirroring the official KSeF
//! path shapes for drop-in use by real-service clients.
//!
//! Requests are routed on `(method, path)`; every handler call goes through
//! the per-request mode switch. Error values are converted centrally into the
//! JSON error shape (`error` plus optional verbatim `details`).

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod mode;

// Re-export commonly used types
pub use config::ServerConfig;
pub use handlers::ProxyHandler;
pub use mode::{resolve_mode, ResolvedMode};

use crate::crypto::TokenCipher;
use crate::error::{KsefProxyError, Result};
use crate::gateway::KsefGateway;
use crate::mock::{KsefSimulator, MockStore};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use middleware::RequestMiddleware;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, instrument, warn};

/// Main server instance managing HTTP connections and request routing
///
/// Coordinates request routing, the mode switch, the outbound gateway and
/// the mock simulator. Fully thread-safe; one instance serves all
/// connections.
#[derive(Debug)]
pub struct KsefProxyServer {
    /// Server configuration
    config: ServerConfig,
    /// Shared token cipher (surfaced on the health endpoint)
    cipher: Arc<TokenCipher>,
    /// Request handler backing both surfaces
    handler: ProxyHandler,
}

impl KsefProxyServer {
    /// Create a new KSeF proxy server instance
    ///
    /// ## Errors
    /// - `KsefProxyError::ConfigError`: if the outbound HTTP client fails to
    ///   build
    pub fn new(config: ServerConfig) -> Result<Self> {
        info!("Initializing KSeF proxy server with config: {:?}", config);

        let cipher = Arc::new(TokenCipher::new());
        let gateway = KsefGateway::new(
            Duration::from_millis(config.upstream_timeout_ms),
            Arc::clone(&cipher),
        )?;
        let store = Arc::new(MockStore::new());
        let simulator = KsefSimulator::new(store);
        let handler = ProxyHandler::new(gateway, simulator, config.max_payload_size);

        info!("KSeF proxy server initialized successfully");

        Ok(Self {
            config,
            cipher,
            handler,
        })
    }

    /// Start the HTTP server and handle incoming connections
    ///
    /// Blocks until the process is shut down. Connections are handled
    /// concurrently on the tokio runtime.
    ///
    /// ## Errors
    /// - `KsefProxyError::ServerError`: if binding or accepting fails
    #[instrument(level = "info", name = "server_start", skip(self))]
    pub async fn start(self) -> Result<()> {
        let bind_addr = self.config.bind_addr;

        info!("Starting KSeF proxy server on {}", bind_addr);

        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            error!("Failed to bind to address {}: {}", bind_addr, e);
            KsefProxyError::server_error(
                format!("Failed to bind to address {bind_addr}: {e}"),
                Some(Box::new(e)),
            )
        })?;

        info!("Server listening on {}", bind_addr);

        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await.map_err(|e| {
                error!("Failed to accept connection: {}", e);
                KsefProxyError::server_error(
                    format!("Failed to accept connection: {e}"),
                    Some(Box::new(e)),
                )
            })?;

            let server_clone = Arc::clone(&server);

            tokio::task::spawn(async move {
                if let Err(e) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(
                        TokioIo::new(stream),
                        service_fn(move |req| {
                            let server = Arc::clone(&server_clone);
                            async move { server.handle_request(req, remote_addr).await }
                        }),
                    )
                    .await
                {
                    error!("Connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Handle an individual HTTP request
    ///
    /// Routes to the matching handler, converts errors into the JSON error
    /// shape and logs completion with latency.
    #[instrument(level = "debug", name = "handle_request", skip(self, request))]
    async fn handle_request(
        &self,
        request: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let mut request_middleware = RequestMiddleware::new();
        request_middleware.start_timing();

        let response = self.route(request).await;

        let final_response = match response {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_critical() {
                    error!("Critical error handling request from {}: {}", remote_addr, e);
                } else {
                    warn!(
                        "Request error from {}: {}",
                        remote_addr,
                        e.internal_message()
                    );
                }
                self.create_error_response(&e)
            }
        };

        request_middleware.log_completion(
            final_response.status().as_u16(),
            &path,
            method.as_str(),
        );

        Ok(final_response)
    }

    /// Route a request to its handler based on method and path.
    async fn route(&self, request: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if let Some(subpath) = path.strip_prefix(crate::MOCK_PATH_PREFIX) {
            return self.handler.handle_mock(request, subpath).await;
        }

        match (&method, path.as_str()) {
            (&Method::POST, "/authorization-challenge") => {
                self.handler.authorization_challenge(request).await
            }
            (&Method::POST, "/request-session-token" | "/init-session-signed") => {
                self.handler.init_session_signed(request).await
            }
            (&Method::POST, "/init-session-token") => {
                self.handler.init_session_token(request).await
            }
            (&Method::POST, "/send-invoice") => self.handler.send_invoice(request).await,
            (&Method::POST, "/query-invoices") => self.handler.query_invoices(request).await,
            (&Method::POST, "/terminate-session") => self.handler.terminate_session(request).await,
            (&Method::GET, "/health") if self.config.enable_health_check => {
                self.handle_health_check()
            }
            (&Method::GET, "/config") => self.handle_config(),
            (&Method::GET, p) if p.starts_with("/invoice-status/") => {
                let reference = p["/invoice-status/".len()..].to_string();
                self.handler.invoice_status(request, &reference).await
            }
            (&Method::GET, p) if p.starts_with("/invoice/") => {
                let ksef_id = p["/invoice/".len()..].to_string();
                self.handler.get_invoice(request, &ksef_id).await
            }
            _ => {
                warn!("Unknown endpoint: {} {}", method, path);
                Ok(self.not_found_response())
            }
        }
    }

    /// Handle health check requests
    ///
    /// Reports the resolved mode, mock store counts and the token encryption
    /// counter.
    fn handle_health_check(&self) -> Result<Response<Full<Bytes>>> {
        let resolved = mode::resolve_mode();
        let mock_health = self.handler.mock_health();

        let health_status = serde_json::json!({
            "status": "healthy",
            "version": crate::VERSION,
            "mode": {
                "useMock": resolved.use_mock,
                "environment": resolved.environment,
                "baseUrl": resolved.advertised_base_url(),
            },
            "mock": {
                "sessions": mock_health.sessions,
                "invoices": mock_health.invoices,
            },
            "crypto": {
                "tokenEncryptions": self.cipher.operation_count(),
            }
        });

        let response_body = serde_json::to_string(&health_status).map_err(|e| {
            KsefProxyError::internal_error(
                format!("Failed to serialize health status: {e}"),
                Some(Box::new(e)),
            )
        })?;

        self.build_json_response(StatusCode::OK, response_body)
    }

    /// Handle config requests
    ///
    /// Returns the per-request mode resolution together with the base URL
    /// clients should currently talk to.
    fn handle_config(&self) -> Result<Response<Full<Bytes>>> {
        let resolved = mode::resolve_mode();
        let advertised = resolved.advertised_base_url().to_string();

        let body = serde_json::json!({
            "mode": resolved,
            "baseUrl": advertised,
        });

        let response_body = serde_json::to_string(&body).map_err(|e| {
            KsefProxyError::internal_error(
                format!("Failed to serialize config: {e}"),
                Some(Box::new(e)),
            )
        })?;

        self.build_json_response(StatusCode::OK, response_body)
    }

    fn build_json_response(
        &self,
        status: StatusCode,
        body: String,
    ) -> Result<Response<Full<Bytes>>> {
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .header("cache-control", "no-cache")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| {
                KsefProxyError::server_error(
                    format!("Failed to build response: {e}"),
                    Some(Box::new(e)),
                )
            })
    }

    /// Create an error response for a failed operation
    ///
    /// Always JSON with at least an `error` field; an upstream error body is
    /// nested verbatim under `details`.
    fn create_error_response(&self, error: &KsefProxyError) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "error": error.client_message(),
            "status": status.as_u16(),
        });
        if let Some(details) = error.details() {
            // Upstream bodies are JSON when KSeF behaves; fall back to a
            // string so the caller always sees the verbatim payload.
            body["details"] = serde_json::from_str(details)
                .unwrap_or_else(|_| serde_json::Value::String(details.to_string()));
        }

        let body_string = serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"Internal server error","status":500}"#.to_string());

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .header("cache-control", "no-cache")
            .body(Full::new(Bytes::from(body_string)))
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from("Internal server error")))
                    .expect("static error response is always buildable")
            })
    }

    fn not_found_response(&self) -> Response<Full<Bytes>> {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(
                r#"{"error":"Not found","status":404}"#,
            )))
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Full::new(Bytes::from("Not found")))
                    .expect("static error response is always buildable")
            })
    }
}

/// Convenience function to start a KSeF proxy server
///
/// ## Errors
/// - `KsefProxyError::ConfigError` / `KsefProxyError::ServerError`: on
///   initialisation or startup failure
///
/// ## Example
/// ```rust,no_run
/// use ksef_proxy::{ServerConfig, start_server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::default();
///     start_server(config).await?;
///     Ok(())
/// }
/// ```
#[instrument(level = "info", name = "start_server")]
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let server = KsefProxyServer::new(config)?;
    server.start().await
}
