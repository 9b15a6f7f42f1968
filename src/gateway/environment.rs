//! # KSeF Environment Resolver
//!
//! Maps a requested environment name to the base URL of the official KSeF
//! service. Pure lookup; unknown or absent names fall back to a configured
//! default which itself defaults to the test endpoint.

/// Base URL of the KSeF test environment
pub const TEST_BASE_URL: &str = "https://ksef-test.mf.gov.pl/api";

/// Base URL of the KSeF demo (pre-production) environment
pub const DEMO_BASE_URL: &str = "https://ksef-demo.mf.gov.pl/api";

/// Base URL of the KSeF production environment
pub const PROD_BASE_URL: &str = "https://ksef.mf.gov.pl/api";

/// Resolves an optional environment name to a KSeF base URL.
///
/// Names are matched case-insensitively; "prod" and "production" are
/// synonyms. Anything unrecognised (including `None`) yields
/// [`default_base_url`].
#[must_use]
pub fn resolve_base_url(environment: Option<&str>) -> String {
    match environment
        .map(|e| e.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("test") => TEST_BASE_URL.to_string(),
        Some("demo") => DEMO_BASE_URL.to_string(),
        Some("prod" | "production") => PROD_BASE_URL.to_string(),
        _ => default_base_url(),
    }
}

/// The fallback base URL, overridable through `KSEF_DEFAULT_BASE_URL`.
#[must_use]
pub fn default_base_url() -> String {
    std::env::var("KSEF_DEFAULT_BASE_URL").unwrap_or_else(|_| TEST_BASE_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialises tests that touch KSEF_DEFAULT_BASE_URL
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_known_environments() {
        assert_eq!(resolve_base_url(Some("test")), TEST_BASE_URL);
        assert_eq!(resolve_base_url(Some("demo")), DEMO_BASE_URL);
        assert_eq!(resolve_base_url(Some("prod")), PROD_BASE_URL);
        assert_eq!(resolve_base_url(Some("production")), PROD_BASE_URL);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(resolve_base_url(Some("TEST")), TEST_BASE_URL);
        assert_eq!(resolve_base_url(Some("Demo")), DEMO_BASE_URL);
        assert_eq!(resolve_base_url(Some(" PRODUCTION ")), PROD_BASE_URL);
    }

    #[test]
    fn test_unknown_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("KSEF_DEFAULT_BASE_URL");
        assert_eq!(resolve_base_url(Some("staging")), TEST_BASE_URL);
        assert_eq!(resolve_base_url(None), TEST_BASE_URL);
        assert_eq!(resolve_base_url(Some("")), TEST_BASE_URL);
    }

    #[test]
    fn test_default_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("KSEF_DEFAULT_BASE_URL", "http://localhost:9999/api");
        assert_eq!(resolve_base_url(None), "http://localhost:9999/api");
        assert_eq!(resolve_base_url(Some("nonsense")), "http://localhost:9999/api");
        // Known names still win over the default
        assert_eq!(resolve_base_url(Some("demo")), DEMO_BASE_URL);
        std::env::remove_var("KSEF_DEFAULT_BASE_URL");
    }
}
