//! # Mode Switch / Config Resolver
//!
//! Decides, per request, whether the real KSeF gateway or the in-memory mock
//! simulator backs an operation, and computes the externally visible base URL
//! for each mode. The resolution reads the process environment on every call
//! rather than caching at startup so that environment-variable changes in a
//! long-running process take effect immediately. This is a deliberate
//! operational property, not an oversight.
//!
//! ## Environment variables
//!
//! - `KSEF_USE_MOCK`: mock is selected unless this is explicitly `false`/`0`
//! - `KSEF_ENVIRONMENT`: default upstream environment (test/demo/prod)
//! - `KSEF_PUBLIC_BASE_URL`: externally advertised address of this proxy

use crate::gateway::environment;
use serde::Serialize;

/// The per-request outcome of mode resolution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMode {
    /// Whether the mock simulator backs requests
    pub use_mock: bool,
    /// Default upstream environment name
    pub environment: String,
    /// Resolved real KSeF base URL for the default environment
    pub real_base_url: String,
    /// Externally visible base URL of the mock surface
    pub mock_base_url: String,
}

impl ResolvedMode {
    /// The base URL clients should talk to in the current mode.
    #[must_use]
    pub fn advertised_base_url(&self) -> &str {
        if self.use_mock {
            &self.mock_base_url
        } else {
            &self.real_base_url
        }
    }

    /// Resolves the upstream base URL for a request, honouring a per-request
    /// environment override over the deployment default.
    #[must_use]
    pub fn upstream_base_url(&self, request_environment: Option<&str>) -> String {
        environment::resolve_base_url(request_environment.or(Some(&self.environment)))
    }
}

/// Resolves the current mode from the process environment.
///
/// Mock is the default; real mode requires an explicit `KSEF_USE_MOCK=false`
/// (or `0`) override.
#[must_use]
pub fn resolve_mode() -> ResolvedMode {
    let use_mock = std::env::var("KSEF_USE_MOCK")
        .map(|value| {
            let value = value.trim().to_ascii_lowercase();
            value != "false" && value != "0"
        })
        .unwrap_or(true);

    let environment = std::env::var("KSEF_ENVIRONMENT").unwrap_or_else(|_| "test".to_string());
    let real_base_url = environment::resolve_base_url(Some(&environment));

    let public_base = std::env::var("KSEF_PUBLIC_BASE_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}", crate::DEFAULT_PORT));
    let mock_base_url = format!(
        "{}{}",
        public_base.trim_end_matches('/'),
        crate::MOCK_PATH_PREFIX
    );

    ResolvedMode {
        use_mock,
        environment,
        real_base_url,
        mock_base_url,
    }
}
