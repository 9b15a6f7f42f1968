//! # Request Handlers Module
//!
//! HTTP request handlers for the KSeF proxy. Every proxy operation enters
//! here, gets its body parsed and validated, and is dispatched through the
//! per-request mode switch to either the real gateway or the mock simulator.
//! The mock's own drop-in surface (official KSeF path shapes under the mock
//! prefix) is handled here as well.

use crate::error::{KsefProxyError, Result};
use crate::gateway::{ContentKind, KsefGateway};
use crate::mock::{ContextIdentifier, KsefSimulator, MockHealth, SimulatorError};
use crate::server::mode;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

/// Handler backing every proxy and mock endpoint
///
/// Owns the outbound gateway and a handle to the simulator; which of the two
/// serves a request is decided per request by [`mode::resolve_mode`].
#[derive(Debug)]
pub struct ProxyHandler {
    /// Outbound gateway to the real KSeF service
    gateway: KsefGateway,
    /// In-memory KSeF simulator
    simulator: KsefSimulator,
    /// Inbound payload cap in bytes
    max_payload_size: usize,
}

/// Body of `POST /authorization-challenge`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeRequest {
    context_identifier: Option<ContextIdentifier>,
    environment: Option<String>,
}

/// Body of `POST /request-session-token` and `POST /init-session-signed`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedInitRequest {
    signed_xml_base64: Option<String>,
    environment: Option<String>,
    #[serde(default)]
    compressed: bool,
}

/// Body of `POST /init-session-token`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenInitRequest {
    nip: Option<String>,
    auth_token: Option<String>,
    environment: Option<String>,
}

/// Body of `POST /send-invoice`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendInvoiceRequest {
    session_token: Option<String>,
    invoice_xml_base64: Option<String>,
    environment: Option<String>,
    content_type: Option<String>,
}

/// Body of `POST /query-invoices`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryInvoicesRequest {
    date_from: Option<String>,
    date_to: Option<String>,
    environment: Option<String>,
    page_size: Option<usize>,
    page_offset: Option<usize>,
}

impl ProxyHandler {
    /// Creates a handler over the given gateway and simulator.
    #[must_use]
    pub fn new(gateway: KsefGateway, simulator: KsefSimulator, max_payload_size: usize) -> Self {
        Self {
            gateway,
            simulator,
            max_payload_size,
        }
    }

    /// Mock store counts for the outer health surface.
    #[must_use]
    pub fn mock_health(&self) -> MockHealth {
        self.simulator.health()
    }

    /// Handle `POST /authorization-challenge`
    ///
    /// Issues (or simulates) an authorisation challenge and returns it along
    /// with the base64-encoded XML document the caller must sign.
    #[instrument(level = "debug", name = "authorization_challenge", skip(self, request))]
    pub async fn authorization_challenge(
        &self,
        request: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let body = self.read_body(request).await?;
        let req: ChallengeRequest = parse_json(&body)?;
        let mode = mode::resolve_mode();

        let Some((subject_type, identifier)) = context_fields(req.context_identifier.as_ref())
        else {
            if mode.use_mock {
                return Ok(envelope_response(&SimulatorError::missing_context(
                    "online.session.authorisationChallenge",
                )));
            }
            return Err(KsefProxyError::validation(
                "Missing contextIdentifier type or identifier",
            ));
        };

        let (challenge, timestamp) = if mode.use_mock {
            let context = ContextIdentifier {
                subject_type: Some(subject_type.clone()),
                identifier: Some(identifier.clone()),
            };
            match self.simulator.authorisation_challenge(Some(&context)) {
                Ok(issued) => (issued.challenge, issued.timestamp),
                Err(sim_err) => return Ok(envelope_response(&sim_err)),
            }
        } else {
            let base = mode.upstream_base_url(req.environment.as_deref());
            let challenge = self
                .gateway
                .request_challenge(&subject_type, &identifier, &base)
                .await?;
            (challenge.challenge, challenge.timestamp)
        };

        let xml = KsefGateway::build_signable_document(&challenge, &subject_type, &identifier);
        json_response(
            StatusCode::CREATED,
            &json!({
                "challenge": challenge,
                "timestamp": timestamp,
                "xmlToSign": BASE64.encode(xml.as_bytes()),
                "message":
                    "Sign the XML document and call /request-session-token with the signed result",
            }),
        )
    }

    /// Handle `POST /request-session-token` and `POST /init-session-signed`
    ///
    /// Decodes the caller-signed document and initialises a session with it.
    #[instrument(level = "debug", name = "init_session_signed", skip(self, request))]
    pub async fn init_session_signed(
        &self,
        request: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let body = self.read_body(request).await?;
        let req: SignedInitRequest = parse_json(&body)?;
        let signed_base64 = req
            .signed_xml_base64
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| KsefProxyError::validation("Missing signedXmlBase64"))?;
        let signed_xml = decode_base64(&signed_base64, "signedXmlBase64")?;

        let mode = mode::resolve_mode();
        let summary = if mode.use_mock {
            let opened = self.simulator.init_signed(&signed_xml).await;
            session_json(
                &opened.session_token.token,
                &opened.timestamp,
                &opened.reference_number,
            )
        } else {
            let base = mode.upstream_base_url(req.environment.as_deref());
            let summary = self
                .gateway
                .init_session_signed(signed_xml, req.compressed, &base)
                .await?;
            session_json(
                &summary.session_token,
                &summary.timestamp,
                &summary.reference_number,
            )
        };

        json_response(StatusCode::CREATED, &summary)
    }

    /// Handle `POST /init-session-token`
    ///
    /// Runs the token-based session flow: challenge, public key, RSA token
    /// encryption and the final init call.
    #[instrument(level = "debug", name = "init_session_token", skip(self, request))]
    pub async fn init_session_token(
        &self,
        request: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let body = self.read_body(request).await?;
        let req: TokenInitRequest = parse_json(&body)?;
        let nip = req
            .nip
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| KsefProxyError::validation("Missing nip"))?;
        let auth_token = req
            .auth_token
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| KsefProxyError::validation("Missing authToken"))?;

        let mode = mode::resolve_mode();
        let summary = if mode.use_mock {
            let opened = self.simulator.init_token();
            session_json(
                &opened.session_token.token,
                &opened.timestamp,
                &opened.reference_number,
            )
        } else {
            let base = mode.upstream_base_url(req.environment.as_deref());
            let summary = self
                .gateway
                .init_session_token(&nip, &auth_token, &base)
                .await?;
            session_json(
                &summary.session_token,
                &summary.timestamp,
                &summary.reference_number,
            )
        };

        json_response(StatusCode::CREATED, &summary)
    }

    /// Handle `POST /send-invoice`
    ///
    /// The content kind is validated before anything else touches the
    /// network; gzip payloads are decompressed here in both modes so the
    /// simulator sees the same bytes the real service would.
    #[instrument(level = "debug", name = "send_invoice", skip(self, request))]
    pub async fn send_invoice(&self, request: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let body = self.read_body(request).await?;
        let req: SendInvoiceRequest = parse_json(&body)?;

        let kind = ContentKind::parse(req.content_type.as_deref().unwrap_or("xml"))?;
        let session_token = req
            .session_token
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| KsefProxyError::validation("Missing sessionToken"))?;
        let payload_base64 = req
            .invoice_xml_base64
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| KsefProxyError::validation("Missing invoiceXmlBase64"))?;
        let payload = decode_base64(&payload_base64, "invoiceXmlBase64")?;

        let mode = mode::resolve_mode();
        if mode.use_mock {
            let (prepared, _content_type) = crate::gateway::prepare_invoice_payload(payload, kind)?;
            return match self.simulator.send_invoice(&session_token, &prepared) {
                Ok(receipt) => json_response(StatusCode::ACCEPTED, &receipt),
                Err(sim_err) => Ok(envelope_response(&sim_err)),
            };
        }

        let base = mode.upstream_base_url(req.environment.as_deref());
        let receipt = self
            .gateway
            .send_invoice(&session_token, payload, kind, &base)
            .await?;
        json_response(StatusCode::ACCEPTED, &receipt)
    }

    /// Handle `GET /invoice-status/:referenceNumber`
    #[instrument(level = "debug", name = "invoice_status", skip(self, request))]
    pub async fn invoice_status(
        &self,
        request: Request<Incoming>,
        reference_number: &str,
    ) -> Result<Response<Full<Bytes>>> {
        let session_token = session_token_header(request.headers())?;
        let environment = query_param(request.uri().query(), "environment");

        let mode = mode::resolve_mode();
        if mode.use_mock {
            return match self.simulator.invoice_status(&session_token, reference_number) {
                Ok(status) => json_response(StatusCode::OK, &status),
                Err(sim_err) => Ok(envelope_response(&sim_err)),
            };
        }

        let base = mode.upstream_base_url(environment.as_deref());
        let status = self
            .gateway
            .invoice_status(&session_token, reference_number, &base)
            .await?;
        json_response(StatusCode::OK, &status)
    }

    /// Handle `GET /invoice/:ksefId`
    ///
    /// The document travels back to the frontend base64-encoded inside JSON.
    #[instrument(level = "debug", name = "get_invoice", skip(self, request))]
    pub async fn get_invoice(
        &self,
        request: Request<Incoming>,
        ksef_id: &str,
    ) -> Result<Response<Full<Bytes>>> {
        let session_token = session_token_header(request.headers())?;
        let environment = query_param(request.uri().query(), "environment");

        let mode = mode::resolve_mode();
        let document = if mode.use_mock {
            match self.simulator.get_invoice(&session_token, ksef_id) {
                Ok(bytes) => bytes,
                Err(sim_err) => return Ok(envelope_response(&sim_err)),
            }
        } else {
            let base = mode.upstream_base_url(environment.as_deref());
            self.gateway.get_invoice(&session_token, ksef_id, &base).await?
        };

        json_response(
            StatusCode::OK,
            &json!({
                "ksefId": ksef_id,
                "invoiceBase64": BASE64.encode(&document),
                "contentType": "application/octet-stream",
            }),
        )
    }

    /// Handle `POST /query-invoices`
    #[instrument(level = "debug", name = "query_invoices", skip(self, request))]
    pub async fn query_invoices(
        &self,
        request: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let session_token = session_token_header(request.headers())?;
        let body = self.read_body(request).await?;
        let req: QueryInvoicesRequest = parse_json(&body)?;
        let page_size = req.page_size.unwrap_or(10);
        let page_offset = req.page_offset.unwrap_or(0);

        let mode = mode::resolve_mode();
        if mode.use_mock {
            return match self
                .simulator
                .query_invoice_sync(&session_token, page_size, page_offset)
            {
                Ok(result) => json_response(StatusCode::OK, &result),
                Err(sim_err) => Ok(envelope_response(&sim_err)),
            };
        }

        let date_from = req
            .date_from
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| KsefProxyError::validation("Missing dateFrom"))?;
        let date_to = req
            .date_to
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| KsefProxyError::validation("Missing dateTo"))?;
        let criteria = json!({
            "queryCriteria": {
                "subjectType": "subject1",
                "type": "incremental",
                "acquisitionTimestampThresholdFrom": date_from,
                "acquisitionTimestampThresholdTo": date_to,
            }
        });

        let base = mode.upstream_base_url(req.environment.as_deref());
        let result = self
            .gateway
            .query_invoices(&session_token, criteria, page_size, page_offset, &base)
            .await?;
        json_response(StatusCode::OK, &result)
    }

    /// Handle `POST /terminate-session`
    #[instrument(level = "debug", name = "terminate_session", skip(self, request))]
    pub async fn terminate_session(
        &self,
        request: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let session_token = session_token_header(request.headers())?;
        let environment = query_param(request.uri().query(), "environment");

        let mode = mode::resolve_mode();
        let timestamp = if mode.use_mock {
            self.simulator.terminate_session(&session_token).timestamp
        } else {
            let base = mode.upstream_base_url(environment.as_deref());
            let value = self.gateway.terminate_session(&session_token, &base).await?;
            value
                .get("timestamp")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        json_response(
            StatusCode::OK,
            &json!({
                "message": "Session terminated",
                "timestamp": timestamp,
            }),
        )
    }

    /// Handle every request under the mock path prefix
    ///
    /// These routes mirror the official KSeF path shapes so that clients of
    /// the real service can be pointed at the mock unchanged.
    #[instrument(level = "debug", name = "mock_surface", skip(self, request))]
    pub async fn handle_mock(
        &self,
        request: Request<Incoming>,
        subpath: &str,
    ) -> Result<Response<Full<Bytes>>> {
        let method = request.method().clone();
        let query = request.uri().query().map(str::to_string);

        match (&method, subpath) {
            (&Method::POST, "/online/Session/AuthorisationChallenge") => {
                let body = self.read_body(request).await?;
                let req: ChallengeRequest = parse_json(&body)?;
                match self
                    .simulator
                    .authorisation_challenge(req.context_identifier.as_ref())
                {
                    Ok(issued) => json_response(StatusCode::CREATED, &issued),
                    Err(sim_err) => Ok(envelope_response(&sim_err)),
                }
            }
            (&Method::POST, "/online/Session/InitSigned") => {
                let body = self.read_body(request).await?;
                let opened = self.simulator.init_signed(&body).await;
                json_response(StatusCode::CREATED, &opened)
            }
            (&Method::POST, "/online/Session/InitToken") => {
                let _body = self.read_body(request).await?;
                let opened = self.simulator.init_token();
                json_response(StatusCode::CREATED, &opened)
            }
            (&Method::GET, "/online/Session/Status") => {
                let session_token = session_token_header(request.headers())?;
                match self.simulator.session_status(&session_token) {
                    Ok(status) => json_response(StatusCode::OK, &status),
                    Err(sim_err) => Ok(envelope_response(&sim_err)),
                }
            }
            (&Method::GET, "/online/Session/Terminate") => {
                let session_token = session_token_header(request.headers())?;
                let ack = self.simulator.terminate_session(&session_token);
                json_response(StatusCode::OK, &ack)
            }
            (&Method::PUT, "/online/Invoice/Send") => {
                let session_token = session_token_header(request.headers())?;
                let body = self.read_body(request).await?;
                match self.simulator.send_invoice(&session_token, &body) {
                    Ok(receipt) => json_response(StatusCode::ACCEPTED, &receipt),
                    Err(sim_err) => Ok(envelope_response(&sim_err)),
                }
            }
            (&Method::POST, "/online/Query/Invoice/Sync") => {
                let session_token = session_token_header(request.headers())?;
                let _body = self.read_body(request).await?;
                let page_size = query_param(query.as_deref(), "PageSize")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10);
                let page_offset = query_param(query.as_deref(), "PageOffset")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                match self
                    .simulator
                    .query_invoice_sync(&session_token, page_size, page_offset)
                {
                    Ok(result) => json_response(StatusCode::OK, &result),
                    Err(sim_err) => Ok(envelope_response(&sim_err)),
                }
            }
            (&Method::GET, "/online/Credentials/GenerateToken") => {
                let session_token = session_token_header(request.headers())?;
                match self.simulator.generate_credential_token(&session_token) {
                    Ok(credential) => json_response(StatusCode::OK, &credential),
                    Err(sim_err) => Ok(envelope_response(&sim_err)),
                }
            }
            (&Method::GET, "/health") => json_response(StatusCode::OK, &self.simulator.health()),
            (&Method::GET, _) if subpath.starts_with("/online/Invoice/Status/") => {
                let reference = &subpath["/online/Invoice/Status/".len()..];
                let session_token = session_token_header(request.headers())?;
                match self.simulator.invoice_status(&session_token, reference) {
                    Ok(status) => json_response(StatusCode::OK, &status),
                    Err(sim_err) => Ok(envelope_response(&sim_err)),
                }
            }
            (&Method::GET, _) if subpath.starts_with("/online/Invoice/Get/") => {
                let reference = &subpath["/online/Invoice/Get/".len()..];
                let session_token = session_token_header(request.headers())?;
                match self.simulator.get_invoice(&session_token, reference) {
                    Ok(document) => bytes_response(
                        StatusCode::OK,
                        "application/octet-stream",
                        Bytes::from(document),
                    ),
                    Err(sim_err) => Ok(envelope_response(&sim_err)),
                }
            }
            _ => {
                warn!("Unknown mock endpoint: {} {}", method, subpath);
                bytes_response(
                    StatusCode::NOT_FOUND,
                    "application/json",
                    Bytes::from(r#"{"error":"Not found","status":404}"#),
                )
            }
        }
    }

    /// Reads and caps a request body.
    async fn read_body(&self, request: Request<Incoming>) -> Result<Bytes> {
        let body_bytes = request
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                warn!("Failed to read request body: {}", e);
                KsefProxyError::validation(format!("Failed to read request body: {e}"))
            })?
            .to_bytes();

        if body_bytes.len() > self.max_payload_size {
            warn!(
                "Payload too large: {} bytes (max: {})",
                body_bytes.len(),
                self.max_payload_size
            );
            return Err(KsefProxyError::validation(format!(
                "Payload too large: {} bytes (max: {})",
                body_bytes.len(),
                self.max_payload_size
            )));
        }

        debug!("Read request body of {} bytes", body_bytes.len());
        Ok(body_bytes)
    }
}

/// Extracts both context-identifier fields, trimmed, when present.
fn context_fields(context: Option<&ContextIdentifier>) -> Option<(String, String)> {
    let context = context?;
    let subject_type = context.subject_type.as_deref()?.trim();
    let identifier = context.identifier.as_deref()?.trim();
    if subject_type.is_empty() || identifier.is_empty() {
        return None;
    }
    Some((subject_type.to_string(), identifier.to_string()))
}

/// Parses a JSON request body.
fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.is_empty() {
        return Err(KsefProxyError::validation("Empty request body"));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| KsefProxyError::validation(format!("Invalid JSON body: {e}")))
}

/// Decodes a base64 field of a request body.
///
/// ## Errors
/// - `KsefProxyError::ValidationError`: when the value is not valid base64
pub fn decode_base64(value: &str, field: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value.trim())
        .map_err(|e| KsefProxyError::validation(format!("Invalid base64 in {field}: {e}")))
}

/// Extracts the session token from `session-token` or `SessionToken`.
fn session_token_header(headers: &HeaderMap) -> Result<String> {
    for name in ["session-token", "SessionToken"] {
        if let Some(value) = headers.get(name) {
            let token = value.to_str().map_err(|e| {
                KsefProxyError::validation(format!("Invalid session token header: {e}"))
            })?;
            if !token.trim().is_empty() {
                return Ok(token.to_string());
            }
        }
    }
    Err(KsefProxyError::validation("Missing session-token header"))
}

/// Pulls a single query parameter, matching the name case-insensitively.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if key.eq_ignore_ascii_case(name) {
            return Some(parts.next().unwrap_or_default().to_string());
        }
    }
    None
}

fn session_json(token: &str, timestamp: &str, reference_number: &str) -> serde_json::Value {
    json!({
        "sessionToken": token,
        "timestamp": timestamp,
        "referenceNumber": reference_number,
    })
}

/// Builds a JSON response with the given status.
fn json_response<T: serde::Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<Response<Full<Bytes>>> {
    let payload = serde_json::to_vec(body).map_err(|e| {
        KsefProxyError::internal_error(
            format!("Failed to serialize response: {e}"),
            Some(Box::new(e)),
        )
    })?;
    bytes_response(status, "application/json", Bytes::from(payload))
}

/// Builds a raw-bytes response with the given content type.
fn bytes_response(
    status: StatusCode,
    content_type: &str,
    body: Bytes,
) -> Result<Response<Full<Bytes>>> {
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .header("cache-control", "no-cache")
        .body(Full::new(body))
        .map_err(|e| {
            KsefProxyError::server_error(format!("Failed to build response: {e}"), Some(Box::new(e)))
        })
}

/// Renders a simulator error as the KSeF exception envelope it models.
fn envelope_response(error: &SimulatorError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    let body = serde_json::to_vec(&error.envelope())
        .unwrap_or_else(|_| br#"{"exception":{"exceptionDetailList":[]}}"#.to_vec());

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("cache-control", "no-cache")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("Internal server error")))
                .expect("static error response is always buildable")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue};
    use std::str::FromStr;

    #[test]
    fn test_context_fields_extraction() {
        let full = ContextIdentifier {
            subject_type: Some("onip".to_string()),
            identifier: Some("1111111111".to_string()),
        };
        assert_eq!(
            context_fields(Some(&full)),
            Some(("onip".to_string(), "1111111111".to_string()))
        );

        let empty_identifier = ContextIdentifier {
            subject_type: Some("onip".to_string()),
            identifier: Some("  ".to_string()),
        };
        assert!(context_fields(Some(&empty_identifier)).is_none());
        assert!(context_fields(None).is_none());
    }

    #[test]
    fn test_parse_json_rejects_empty_and_garbage() {
        assert!(parse_json::<ChallengeRequest>(b"").is_err());
        assert!(parse_json::<ChallengeRequest>(b"not json").is_err());

        let parsed: ChallengeRequest =
            parse_json(br#"{"contextIdentifier":{"type":"onip","identifier":"123"}}"#).unwrap();
        assert_eq!(
            parsed.context_identifier.unwrap().identifier.as_deref(),
            Some("123")
        );
        assert!(parsed.environment.is_none());
    }

    #[test]
    fn test_decode_base64_round_trip() {
        let original: Vec<u8> = (0u8..=255).collect();
        let encoded = BASE64.encode(&original);
        let decoded = decode_base64(&encoded, "signedXmlBase64").unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_base64_invalid_is_validation_error() {
        let err = decode_base64("!!!not-base64!!!", "invoiceXmlBase64").unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.internal_message().contains("invoiceXmlBase64"));
    }

    #[test]
    fn test_session_token_header_names() {
        let mut headers = HeaderMap::new();
        assert!(session_token_header(&headers).is_err());

        headers.insert(
            HeaderName::from_str("session-token").unwrap(),
            HeaderValue::from_str("abc").unwrap(),
        );
        assert_eq!(session_token_header(&headers).unwrap(), "abc");

        let mut ksef_style = HeaderMap::new();
        ksef_style.insert(
            HeaderName::from_str("SessionToken").unwrap(),
            HeaderValue::from_str("def").unwrap(),
        );
        assert_eq!(session_token_header(&ksef_style).unwrap(), "def");
    }

    #[test]
    fn test_empty_session_token_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_str("session-token").unwrap(),
            HeaderValue::from_str("   ").unwrap(),
        );
        assert!(session_token_header(&headers).is_err());
    }

    #[test]
    fn test_query_param_case_insensitive() {
        let query = Some("PageSize=100&pageOffset=2&environment=demo");
        assert_eq!(query_param(query, "pagesize").as_deref(), Some("100"));
        assert_eq!(query_param(query, "PageOffset").as_deref(), Some("2"));
        assert_eq!(query_param(query, "environment").as_deref(), Some("demo"));
        assert!(query_param(query, "missing").is_none());
        assert!(query_param(None, "environment").is_none());
    }

    #[test]
    fn test_envelope_response_status_and_shape() {
        let error = SimulatorError::unknown_session("online.invoice.send");
        let response = envelope_response(&error);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let error = SimulatorError::unknown_invoice("online.invoice.get");
        assert_eq!(envelope_response(&error).status(), StatusCode::NOT_FOUND);

        let error = SimulatorError::missing_context("online.session.authorisationChallenge");
        assert_eq!(envelope_response(&error).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_session_json_shape() {
        let value = session_json("tok", "2025-08-05T10:00:00.000Z", "ref");
        assert_eq!(value["sessionToken"], "tok");
        assert_eq!(value["timestamp"], "2025-08-05T10:00:00.000Z");
        assert_eq!(value["referenceNumber"], "ref");
    }
}
