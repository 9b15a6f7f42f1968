//! # Real KSeF Gateway Module
//!
//! Translates internal operation calls into outbound HTTP calls against the
//! resolved KSeF base URL, handling the content-type/encoding requirements of
//! each operation (JSON, octet-stream, gzip, zip). The token-based session
//! initialisation orchestrates the full multi-step flow: challenge fetch,
//! public-key fetch, RSA token encryption and the final XML post.
//!
//! ## Failure semantics
//!
//! Every outbound call carries a bounded timeout. Timeouts and connection
//! failures are treated identically to non-2xx responses: wrapped into
//! [`KsefProxyError::UpstreamError`] and surfaced, never retried. The first
//! failing step of a multi-step operation aborts the whole operation.

pub mod environment;
pub mod xml;

// Re-export commonly used types
pub use xml::AuthFlow;

use crate::crypto::TokenCipher;
use crate::error::{KsefProxyError, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Header carrying the KSeF session token on upstream calls
pub const SESSION_TOKEN_HEADER: &str = "SessionToken";

/// Challenge issued by the authorisation-challenge operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Challenge issuance timestamp (ISO 8601)
    pub timestamp: String,
    /// Formatted challenge string
    pub challenge: String,
}

/// Summary of an initialised session surfaced to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Opaque session token
    pub session_token: String,
    /// Session creation timestamp (ISO 8601)
    pub timestamp: String,
    /// Formatted session reference number
    pub reference_number: String,
}

/// Receipt returned by the invoice-send operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendInvoiceReceipt {
    /// Reference number identifying the submitted element
    pub element_reference_number: String,
    /// Upstream processing code (100 = accepted for processing)
    pub processing_code: i64,
    /// Human-readable processing description
    pub processing_description: String,
    /// Submission timestamp (ISO 8601)
    pub timestamp: String,
}

/// Encoding of an invoice payload submitted through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Plain invoice XML, sent as-is
    Xml,
    /// Gzip-compressed XML, decompressed before sending
    Gzip,
    /// Zip archive, sent as raw binary
    Zip,
}

impl ContentKind {
    /// Parses a caller-supplied content type string.
    ///
    /// ## Errors
    /// - `KsefProxyError::ValidationError`: for anything other than
    ///   `xml`/`gzip`/`zip` (case-insensitive); validation happens before any
    ///   network call
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "gzip" => Ok(Self::Gzip),
            "zip" => Ok(Self::Zip),
            other => Err(KsefProxyError::validation(format!(
                "Invalid contentType '{other}': expected one of xml, gzip, zip"
            ))),
        }
    }
}

/// Prepares an invoice payload for the wire.
///
/// Returns the body bytes and the content type to send them with: xml as-is
/// (`application/xml`), gzip decompressed first (`application/xml`), zip raw
/// and unmodified (`application/zip`).
pub fn prepare_invoice_payload(
    payload: Vec<u8>,
    kind: ContentKind,
) -> Result<(Vec<u8>, &'static str)> {
    match kind {
        ContentKind::Xml => Ok((payload, "application/xml")),
        ContentKind::Gzip => Ok((gunzip(&payload)?, "application/xml")),
        ContentKind::Zip => Ok((payload, "application/zip")),
    }
}

/// Decompresses a gzip payload supplied by the caller.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| KsefProxyError::validation(format!("Invalid gzip payload: {e}")))?;
    Ok(decompressed)
}

/// Gateway performing the outbound protocol steps against the real KSeF
/// service
///
/// Holds a single HTTP client configured with the fixed upstream timeout and
/// the shared token cipher used by the token-based session flow. The base URL
/// is supplied per call because the target environment is resolved per
/// request.
#[derive(Debug)]
pub struct KsefGateway {
    /// Shared HTTP client with the upstream timeout applied
    http: reqwest::Client,
    /// RSA encryptor for the token-based session flow
    cipher: Arc<TokenCipher>,
}

impl KsefGateway {
    /// Creates a gateway with the given upstream timeout.
    ///
    /// ## Errors
    /// - `KsefProxyError::ConfigError`: if the HTTP client fails to build
    pub fn new(timeout: Duration, cipher: Arc<TokenCipher>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                KsefProxyError::config_error(
                    format!("Failed to build upstream HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self { http, cipher })
    }

    /// Requests an authorisation challenge for the given subject.
    #[instrument(level = "debug", name = "request_challenge", skip(self))]
    pub async fn request_challenge(
        &self,
        subject_type: &str,
        subject_identifier: &str,
        base: &str,
    ) -> Result<ChallengeResponse> {
        let url = format!("{base}/online/Session/AuthorisationChallenge");
        let body = serde_json::json!({
            "contextIdentifier": {
                "type": subject_type,
                "identifier": subject_identifier,
            }
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let text = read_success(response).await?;
        parse_upstream_json::<ChallengeResponse>(&text)
    }

    /// Fetches the KSeF public key for the given environment base URL.
    ///
    /// Used only by the token-based session flow.
    #[instrument(level = "debug", name = "fetch_public_key", skip(self))]
    pub async fn fetch_public_key(&self, base: &str) -> Result<String> {
        let url = format!("{base}/online/Session/PublicKey");
        let response = self.http.get(&url).send().await?;
        read_success(response).await
    }

    /// Builds the signable session-init document for a fetched challenge.
    ///
    /// Deterministic; no state retained. The caller signs the document
    /// externally and posts the result to [`Self::init_session_signed`].
    #[must_use]
    pub fn build_signable_document(
        challenge: &str,
        subject_type: &str,
        subject_identifier: &str,
    ) -> String {
        xml::render_session_request(&AuthFlow::Signed, challenge, subject_type, subject_identifier)
    }

    /// Initialises a session from an externally signed document.
    ///
    /// The signed bytes are forwarded verbatim (after gzip decompression when
    /// the caller flagged the payload as compressed) with an octet-stream
    /// content type.
    #[instrument(level = "debug", name = "init_session_signed", skip(self, signed_xml))]
    pub async fn init_session_signed(
        &self,
        signed_xml: Vec<u8>,
        compressed: bool,
        base: &str,
    ) -> Result<SessionSummary> {
        let body = if compressed {
            gunzip(&signed_xml)?
        } else {
            signed_xml
        };

        let url = format!("{base}/online/Session/InitSigned");
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await?;
        let text = read_success(response).await?;
        session_summary_from(&parse_upstream_json::<Value>(&text)?)
    }

    /// Initialises a session with a KSeF authorisation token.
    ///
    /// Orchestrates, in order: challenge fetch, public-key fetch, building
    /// the `timestamp|authToken` string, RSA-PKCS1 encryption, base64
    /// encoding, token-flow XML rendering and the final octet-stream POST.
    /// The first failing step aborts the whole operation; a consumed
    /// challenge is abandoned, not reused.
    #[instrument(level = "debug", name = "init_session_token", skip(self, auth_token))]
    pub async fn init_session_token(
        &self,
        nip: &str,
        auth_token: &str,
        base: &str,
    ) -> Result<SessionSummary> {
        let challenge = self.request_challenge("onip", nip, base).await?;
        debug!("Received challenge {}", challenge.challenge);

        let challenge_millis = chrono::DateTime::parse_from_rfc3339(&challenge.timestamp)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| {
                KsefProxyError::upstream(
                    502,
                    format!(
                        "Unparseable challenge timestamp '{}': {e}",
                        challenge.timestamp
                    ),
                )
            })?;

        let public_key = self.fetch_public_key(base).await?;
        let encrypted_token =
            self.cipher
                .encrypt_session_token(&public_key, challenge_millis, auth_token)?;

        let document = xml::render_session_request(
            &AuthFlow::Token { encrypted_token },
            &challenge.challenge,
            "onip",
            nip,
        );

        let url = format!("{base}/online/Session/InitToken");
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(document.into_bytes())
            .send()
            .await?;
        let text = read_success(response).await?;
        session_summary_from(&parse_upstream_json::<Value>(&text)?)
    }

    /// Submits an invoice payload to the upstream service.
    #[instrument(level = "debug", name = "send_invoice", skip(self, payload))]
    pub async fn send_invoice(
        &self,
        session_token: &str,
        payload: Vec<u8>,
        kind: ContentKind,
        base: &str,
    ) -> Result<SendInvoiceReceipt> {
        ensure_session_token(session_token)?;
        let (body, content_type) = prepare_invoice_payload(payload, kind)?;

        let url = format!("{base}/online/Invoice/Send");
        let response = self
            .http
            .put(&url)
            .header(SESSION_TOKEN_HEADER, session_token)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await?;
        let text = read_success(response).await?;
        let value = parse_upstream_json::<Value>(&text)?;

        Ok(SendInvoiceReceipt {
            element_reference_number: string_field(&value, "elementReferenceNumber"),
            processing_code: value
                .get("processingCode")
                .and_then(Value::as_i64)
                .unwrap_or(100),
            processing_description: string_field(&value, "processingDescription"),
            timestamp: string_field(&value, "timestamp"),
        })
    }

    /// Fetches the processing status of a submitted invoice.
    #[instrument(level = "debug", name = "invoice_status", skip(self))]
    pub async fn invoice_status(
        &self,
        session_token: &str,
        reference_number: &str,
        base: &str,
    ) -> Result<Value> {
        ensure_session_token(session_token)?;
        let url = format!("{base}/online/Invoice/Status/{reference_number}");
        let response = self
            .http
            .get(&url)
            .header(SESSION_TOKEN_HEADER, session_token)
            .send()
            .await?;
        let text = read_success(response).await?;
        parse_upstream_json::<Value>(&text)
    }

    /// Downloads a stored invoice by its KSeF reference number.
    #[instrument(level = "debug", name = "get_invoice", skip(self))]
    pub async fn get_invoice(
        &self,
        session_token: &str,
        ksef_reference_number: &str,
        base: &str,
    ) -> Result<Vec<u8>> {
        ensure_session_token(session_token)?;
        let url = format!("{base}/online/Invoice/Get/{ksef_reference_number}");
        let response = self
            .http
            .get(&url)
            .header(SESSION_TOKEN_HEADER, session_token)
            .send()
            .await?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        if !(200..300).contains(&status) {
            return Err(KsefProxyError::upstream(
                status,
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }
        Ok(bytes.to_vec())
    }

    /// Runs a synchronous invoice query with the given paging window.
    #[instrument(level = "debug", name = "query_invoices", skip(self, criteria))]
    pub async fn query_invoices(
        &self,
        session_token: &str,
        criteria: Value,
        page_size: usize,
        page_offset: usize,
        base: &str,
    ) -> Result<Value> {
        ensure_session_token(session_token)?;
        let url = format!(
            "{base}/online/Query/Invoice/Sync?PageSize={page_size}&PageOffset={page_offset}"
        );
        let response = self
            .http
            .post(&url)
            .header(SESSION_TOKEN_HEADER, session_token)
            .json(&criteria)
            .send()
            .await?;
        let text = read_success(response).await?;
        parse_upstream_json::<Value>(&text)
    }

    /// Terminates the given session upstream.
    #[instrument(level = "debug", name = "terminate_session", skip(self))]
    pub async fn terminate_session(&self, session_token: &str, base: &str) -> Result<Value> {
        ensure_session_token(session_token)?;
        let url = format!("{base}/online/Session/Terminate");
        let response = self
            .http
            .get(&url)
            .header(SESSION_TOKEN_HEADER, session_token)
            .send()
            .await?;
        let text = read_success(response).await?;
        parse_upstream_json::<Value>(&text)
    }
}

/// Rejects a missing session token before any network I/O.
fn ensure_session_token(session_token: &str) -> Result<()> {
    if session_token.trim().is_empty() {
        return Err(KsefProxyError::validation("Missing session token"));
    }
    Ok(())
}

/// Reads a response body, converting non-2xx statuses into upstream errors
/// carrying the original status and body.
async fn read_success(response: reqwest::Response) -> Result<String> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(KsefProxyError::upstream(status, body))
    }
}

/// Parses an upstream 2xx body; a body the upstream contract says is JSON but
/// does not parse is still an upstream fault, not a caller fault.
fn parse_upstream_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        KsefProxyError::upstream(502, format!("Unparseable upstream response: {e}; body: {text}"))
    })
}

/// Extracts the session summary fields from an upstream init response.
fn session_summary_from(value: &Value) -> Result<SessionSummary> {
    let session_token = value
        .pointer("/sessionToken/token")
        .and_then(Value::as_str)
        .or_else(|| value.get("sessionToken").and_then(Value::as_str))
        .ok_or_else(|| {
            KsefProxyError::upstream(502, format!("Upstream response without session token: {value}"))
        })?;

    Ok(SessionSummary {
        session_token: session_token.to_string(),
        timestamp: string_field(value, "timestamp"),
        reference_number: string_field(value, "referenceNumber"),
    })
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
