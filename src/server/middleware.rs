//! # Middleware Module
//!
//! Request timing and completion logging for the KSeF proxy. Every request
//! logs its method, path, status and latency; 4xx/5xx completions log at WARN
//! so upstream rejections and client mistakes stand out.

use std::time::Instant;
use tracing::{info, warn};

/// Request timing and logging middleware
#[derive(Debug, Clone)]
pub struct RequestMiddleware {
    /// Request start time for latency calculation
    start_time: Option<Instant>,
}

impl RequestMiddleware {
    /// Create new request middleware instance
    #[must_use]
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Start timing a request
    pub fn start_timing(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Log request completion with timing
    pub fn log_completion(&self, status_code: u16, path: &str, method: &str) {
        if let Some(start_time) = self.start_time {
            let elapsed = start_time.elapsed();

            if status_code >= 400 {
                warn!(
                    "Request completed: {} {} - {} ({:.2}ms)",
                    method,
                    path,
                    status_code,
                    elapsed.as_secs_f64() * 1000.0
                );
            } else {
                info!(
                    "Request completed: {} {} - {} ({:.2}ms)",
                    method,
                    path,
                    status_code,
                    elapsed.as_secs_f64() * 1000.0
                );
            }
        }
    }
}

impl Default for RequestMiddleware {
    fn default() -> Self {
        Self::new()
    }
}
