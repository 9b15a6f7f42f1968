//! # Integration Tests for the KSeF Proxy
//!
//! End-to-end tests for the two halves of the system: the mock simulator's
//! full operation surface (session lifecycle, lazy invoice transition, error
//! envelopes) and the real gateway's wire behavior, exercised against a
//! capturing in-process fake upstream so every outbound byte can be
//! inspected.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use ksef_proxy::crypto::TokenCipher;
use ksef_proxy::error::KsefProxyError;
use ksef_proxy::gateway::{ContentKind, KsefGateway};
use ksef_proxy::mock::{
    ContextIdentifier, KsefSimulator, MockInvoice, MockStore, CODE_MISSING_CONTEXT,
    CODE_UNKNOWN_SESSION,
};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::json;
use std::convert::Infallible;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;

/// Everything the fake upstream saw about one request
#[derive(Debug, Clone)]
struct CapturedRequest {
    method: String,
    path: String,
    content_type: Option<String>,
    session_token: Option<String>,
    body: Vec<u8>,
}

/// Spawns a capturing fake KSeF upstream on an ephemeral port.
///
/// Serves canned responses for the handful of paths the gateway calls and
/// records every request verbatim. Returns the base URL and the capture log.
async fn spawn_fake_upstream(
    public_key_pem: String,
) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake upstream");
    let addr = listener.local_addr().expect("local addr");
    let captured: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let captured_for_server = Arc::clone(&captured);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let captured = Arc::clone(&captured_for_server);
            let pem = public_key_pem.clone();

            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let captured = Arc::clone(&captured);
                    let pem = pem.clone();
                    async move {
                        let method = request.method().to_string();
                        let path = request.uri().path().to_string();
                        let content_type = request
                            .headers()
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        let session_token = request
                            .headers()
                            .get("SessionToken")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        let body = request
                            .into_body()
                            .collect()
                            .await
                            .expect("read body")
                            .to_bytes()
                            .to_vec();

                        captured.lock().unwrap().push(CapturedRequest {
                            method: method.clone(),
                            path: path.clone(),
                            content_type,
                            session_token,
                            body,
                        });

                        let (status, response_body) = match (method.as_str(), path.as_str()) {
                            ("POST", "/online/Session/AuthorisationChallenge") => (
                                201,
                                json!({
                                    "timestamp": "2025-08-05T10:00:00.000Z",
                                    "challenge": "20250805-CR-1234567890-ABCDEF1234-00",
                                })
                                .to_string(),
                            ),
                            ("GET", "/online/Session/PublicKey") => (200, pem.clone()),
                            ("POST", "/online/Session/InitToken" | "/online/Session/InitSigned") => (
                                201,
                                json!({
                                    "timestamp": "2025-08-05T10:00:01.000Z",
                                    "referenceNumber": "20250805-SE-1234567890-ABCDEF1234-00",
                                    "sessionToken": {"token": "upstream-session-token"},
                                })
                                .to_string(),
                            ),
                            ("PUT", "/online/Invoice/Send") => (
                                202,
                                json!({
                                    "timestamp": "2025-08-05T10:00:02.000Z",
                                    "elementReferenceNumber": "20250805-EV-1234567890-ABCDEF1234-00",
                                    "processingCode": 100,
                                    "processingDescription": "Processing",
                                })
                                .to_string(),
                            ),
                            _ => (
                                404,
                                json!({
                                    "exception": {
                                        "exceptionDetailList": [
                                            {"exceptionCode": 21002,
                                             "exceptionDescription": "unknown"}
                                        ]
                                    }
                                })
                                .to_string(),
                            ),
                        };

                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(response_body)))
                                .expect("build fake response"),
                        )
                    }
                });

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (format!("http://{addr}"), captured)
}

fn test_gateway() -> KsefGateway {
    KsefGateway::new(Duration::from_secs(5), Arc::new(TokenCipher::new()))
        .expect("gateway builds")
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn simulator_with_store() -> (KsefSimulator, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    (KsefSimulator::new(Arc::clone(&store)), store)
}

fn onip_context(identifier: &str) -> ContextIdentifier {
    ContextIdentifier {
        subject_type: Some("onip".to_string()),
        identifier: Some(identifier.to_string()),
    }
}

/// Checks `^\d{8}-CR-[0-9A-F]{10}-[0-9A-F]{10}-[0-9A-F]{2}$` without a regex
/// dependency.
fn matches_challenge_pattern(challenge: &str) -> bool {
    let parts: Vec<&str> = challenge.split('-').collect();
    if parts.len() != 5 || parts[1] != "CR" {
        return false;
    }
    let is_upper_hex =
        |s: &str| s.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c));
    parts[0].len() == 8
        && parts[0].chars().all(|c| c.is_ascii_digit())
        && parts[2].len() == 10
        && is_upper_hex(parts[2])
        && parts[3].len() == 10
        && is_upper_hex(parts[3])
        && parts[4].len() == 2
        && is_upper_hex(parts[4])
}

// ---------------------------------------------------------------------------
// Mock simulator surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_challenge_format_matches_contract() {
    let (simulator, _) = simulator_with_store();
    let issued = simulator
        .authorisation_challenge(Some(&onip_context("1111111111")))
        .expect("challenge issued");

    assert!(
        matches_challenge_pattern(&issued.challenge),
        "challenge {} does not match the documented pattern",
        issued.challenge
    );
    assert!(!issued.timestamp.is_empty());
}

#[tokio::test]
async fn test_challenge_missing_fields_is_21001() {
    let (simulator, _) = simulator_with_store();

    let missing_identifier = ContextIdentifier {
        subject_type: Some("onip".to_string()),
        identifier: None,
    };
    let missing_type = ContextIdentifier {
        subject_type: None,
        identifier: Some("1111111111".to_string()),
    };

    for context in [None, Some(&missing_identifier), Some(&missing_type)] {
        let err = simulator
            .authorisation_challenge(context)
            .expect_err("must fail");
        assert_eq!(err.exception_code, CODE_MISSING_CONTEXT);
        assert_eq!(err.http_status(), 400);
    }
}

#[tokio::test]
async fn test_unknown_token_fails_every_session_operation() {
    let (simulator, _) = simulator_with_store();
    let token = "0000000000000000000000000000000000000000000000000000000000000000";

    assert_eq!(
        simulator.session_status(token).unwrap_err().exception_code,
        CODE_UNKNOWN_SESSION
    );
    assert_eq!(
        simulator
            .send_invoice(token, b"<Faktura/>")
            .unwrap_err()
            .exception_code,
        CODE_UNKNOWN_SESSION
    );
    assert_eq!(
        simulator
            .invoice_status(token, "any-ref")
            .unwrap_err()
            .exception_code,
        CODE_UNKNOWN_SESSION
    );
    assert_eq!(
        simulator
            .get_invoice(token, "any-ksef-ref")
            .unwrap_err()
            .exception_code,
        CODE_UNKNOWN_SESSION
    );
    assert_eq!(
        simulator
            .query_invoice_sync(token, 10, 0)
            .unwrap_err()
            .exception_code,
        CODE_UNKNOWN_SESSION
    );
    assert_eq!(
        simulator
            .generate_credential_token(token)
            .unwrap_err()
            .exception_code,
        CODE_UNKNOWN_SESSION
    );
}

#[tokio::test]
async fn test_terminate_session_is_idempotent() {
    let (simulator, _) = simulator_with_store();
    let token = simulator.init_token().session_token.token;

    // First termination removes the session, second sees an unknown token;
    // both return success.
    let _ = simulator.terminate_session(&token);
    let _ = simulator.terminate_session(&token);
    assert!(simulator.session_status(&token).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_init_signed_twice_yields_distinct_sessions() {
    let (simulator, _) = simulator_with_store();

    let first = simulator.init_signed(b"<signed-document-one/>").await;
    let second = simulator.init_signed(b"<signed-document-two/>").await;

    assert_ne!(first.session_token.token, second.session_token.token);
    assert_ne!(first.reference_number, second.reference_number);
}

#[tokio::test]
async fn test_invoice_transition_monotonic_and_time_gated() {
    let (simulator, store) = simulator_with_store();
    let token = simulator.init_token().session_token.token;

    // T+1s: still processing
    let receipt = simulator.send_invoice(&token, b"<Faktura/>").unwrap();
    let fresh = simulator
        .invoice_status(&token, &receipt.element_reference_number)
        .unwrap();
    assert_eq!(fresh.processing_code, 100);
    assert!(fresh.invoice_status.is_none());

    // T+121s, modeled by inserting an invoice whose creation time lies in
    // the past; no sleeping, mirroring the lazy on-read evaluation.
    store.insert_invoice(MockInvoice {
        element_reference_number: "elem-aged".to_string(),
        ksef_reference_number: "5555555555-20250805-AAAAAAAAAA-00".to_string(),
        session_token: token.clone(),
        invoice_number: "FV/2025/08/05/0042".to_string(),
        created_at: SystemTime::now() - Duration::from_secs(121),
        timestamp: "2025-08-05T10:00:00.000Z".to_string(),
    });

    let aged = simulator.invoice_status(&token, "elem-aged").unwrap();
    assert_eq!(aged.processing_code, 200);
    let detail = aged.invoice_status.expect("accepted carries detail");
    assert_eq!(detail.invoice_number, "FV/2025/08/05/0042");
    assert_eq!(
        detail.ksef_reference_number,
        "5555555555-20250805-AAAAAAAAAA-00"
    );

    // No read ever reports processing after an accepted read
    let again = simulator.invoice_status(&token, "elem-aged").unwrap();
    assert_eq!(again.processing_code, 200);
}

#[tokio::test]
async fn test_query_sync_caps_page_and_never_pages() {
    let (simulator, _) = simulator_with_store();
    let token = simulator.init_token().session_token.token;

    let result = simulator.query_invoice_sync(&token, 100, 0).unwrap();
    assert!(result.invoice_header_list.len() <= 5);
    assert_eq!(result.invoice_header_list.len(), 5);
    assert!(!result.has_more_elements);
    assert_eq!(result.page_size, 100);
}

#[tokio::test]
async fn test_send_invoice_error_envelope_is_ksef_shaped() {
    let (simulator, _) = simulator_with_store();
    let err = simulator.send_invoice("unknown-token", b"<Faktura/>").unwrap_err();

    let envelope = serde_json::to_value(err.envelope()).unwrap();
    assert_eq!(
        envelope["exception"]["exceptionDetailList"][0]["exceptionCode"],
        21003
    );
    assert!(envelope["exception"]["timestamp"].is_string());
    assert!(envelope["exception"]["serviceName"].is_string());
}

#[tokio::test]
async fn test_mock_health_tracks_counts() {
    let (simulator, _) = simulator_with_store();
    assert_eq!(simulator.health().sessions, 0);
    assert_eq!(simulator.health().invoices, 0);

    let token = simulator.init_token().session_token.token;
    simulator.send_invoice(&token, b"<Faktura/>").unwrap();

    let health = simulator.health();
    assert_eq!(health.sessions, 1);
    assert_eq!(health.invoices, 1);
}

// ---------------------------------------------------------------------------
// Real gateway wire behavior, against the capturing fake upstream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_gateway_challenge_round_trip() {
    let (base, captured) = spawn_fake_upstream(String::new()).await;
    let gateway = test_gateway();

    let challenge = gateway
        .request_challenge("onip", "1111111111", &base)
        .await
        .expect("challenge succeeds");

    assert_eq!(challenge.challenge, "20250805-CR-1234567890-ABCDEF1234-00");
    assert_eq!(challenge.timestamp, "2025-08-05T10:00:00.000Z");

    let log = captured.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].method, "POST");
    assert_eq!(log[0].path, "/online/Session/AuthorisationChallenge");
    let sent: serde_json::Value = serde_json::from_slice(&log[0].body).unwrap();
    assert_eq!(sent["contextIdentifier"]["type"], "onip");
    assert_eq!(sent["contextIdentifier"]["identifier"], "1111111111");
}

#[tokio::test]
async fn test_gateway_upstream_error_preserves_status_and_body() {
    let (base, _) = spawn_fake_upstream(String::new()).await;
    let gateway = test_gateway();

    // The fake answers unknown paths with a 404 envelope
    let err = gateway
        .invoice_status("some-token", "unknown-ref", &base)
        .await
        .expect_err("must surface upstream failure");

    match err {
        KsefProxyError::UpstreamError { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("21002"));
        }
        other => panic!("expected UpstreamError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_gateway_missing_session_token_never_reaches_network() {
    let gateway = test_gateway();
    // Unroutable base: a validation failure must trigger before any dial
    let err = gateway
        .invoice_status("", "ref", "http://192.0.2.1:1")
        .await
        .expect_err("must fail validation");
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_signed_init_forwards_bytes_verbatim() {
    let (base, captured) = spawn_fake_upstream(String::new()).await;
    let gateway = test_gateway();

    // Arbitrary bytes, the full octet range, as they come out of the
    // caller's base64 decode
    let original: Vec<u8> = (0u8..=255).collect();
    let decoded = BASE64.decode(BASE64.encode(&original)).unwrap();
    assert_eq!(decoded, original); // round-trip preserves the payload

    let summary = gateway
        .init_session_signed(decoded, false, &base)
        .await
        .expect("init succeeds");
    assert_eq!(summary.session_token, "upstream-session-token");

    let log = captured.lock().unwrap();
    assert_eq!(log[0].path, "/online/Session/InitSigned");
    assert_eq!(log[0].content_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(log[0].body, original);
}

#[tokio::test]
async fn test_signed_init_decompresses_flagged_payloads() {
    let (base, captured) = spawn_fake_upstream(String::new()).await;
    let gateway = test_gateway();

    let document = b"<ns3:InitSessionSignedRequest>signed</ns3:InitSessionSignedRequest>";
    gateway
        .init_session_signed(gzip_bytes(document), true, &base)
        .await
        .expect("init succeeds");

    let log = captured.lock().unwrap();
    assert_eq!(log[0].body, document);
}

#[tokio::test]
async fn test_send_invoice_content_kinds_on_the_wire() {
    let (base, captured) = spawn_fake_upstream(String::new()).await;
    let gateway = test_gateway();
    let xml = b"<Faktura><P_2>FV/2025/08/05/0001</P_2></Faktura>".to_vec();
    let zip_payload = vec![0x50, 0x4B, 0x03, 0x04, 0x00, 0xFF, 0xAB, 0xCD];

    // xml: decoded bytes as text
    gateway
        .send_invoice("session-token", xml.clone(), ContentKind::Xml, &base)
        .await
        .expect("xml send succeeds");

    // gzip: decompressed XML text
    gateway
        .send_invoice(
            "session-token",
            gzip_bytes(&xml),
            ContentKind::Gzip,
            &base,
        )
        .await
        .expect("gzip send succeeds");

    // zip: raw binary unmodified
    gateway
        .send_invoice(
            "session-token",
            zip_payload.clone(),
            ContentKind::Zip,
            &base,
        )
        .await
        .expect("zip send succeeds");

    let log = captured.lock().unwrap();
    assert_eq!(log.len(), 3);
    for entry in log.iter() {
        assert_eq!(entry.method, "PUT");
        assert_eq!(entry.path, "/online/Invoice/Send");
        assert_eq!(entry.session_token.as_deref(), Some("session-token"));
    }
    assert_eq!(log[0].body, xml);
    assert_eq!(log[0].content_type.as_deref(), Some("application/xml"));
    assert_eq!(log[1].body, xml);
    assert_eq!(log[1].content_type.as_deref(), Some("application/xml"));
    assert_eq!(log[2].body, zip_payload);
    assert_eq!(log[2].content_type.as_deref(), Some("application/zip"));
}

#[tokio::test]
async fn test_invalid_content_kind_fails_before_network() {
    let err = ContentKind::parse("7z").expect_err("must reject");
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_init_session_token_full_flow() {
    // Real RSA keypair so the fake upstream's public key is usable and the
    // captured ciphertext can be opened again
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("generate key");
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .expect("encode public key");

    let (base, captured) = spawn_fake_upstream(public_pem).await;
    let gateway = test_gateway();

    let summary = gateway
        .init_session_token("1111111111", "my-ksef-auth-token", &base)
        .await
        .expect("token init succeeds");
    assert_eq!(summary.session_token, "upstream-session-token");
    assert_eq!(
        summary.reference_number,
        "20250805-SE-1234567890-ABCDEF1234-00"
    );

    let log = captured.lock().unwrap();
    let paths: Vec<&str> = log.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/online/Session/AuthorisationChallenge",
            "/online/Session/PublicKey",
            "/online/Session/InitToken",
        ]
    );

    // The final request carries the token-flow XML with the encrypted token
    let document = String::from_utf8(log[2].body.clone()).expect("XML is UTF-8");
    assert!(document.contains("<ns3:InitSessionTokenRequest"));
    assert!(document.contains("<Challenge>20250805-CR-1234567890-ABCDEF1234-00</Challenge>"));
    assert!(document.contains("<ns2:Identifier>1111111111</ns2:Identifier>"));

    let token_start = document.find("<ns3:Token>").expect("token element") + "<ns3:Token>".len();
    let token_end = document.find("</ns3:Token>").expect("token close");
    let ciphertext = BASE64
        .decode(&document[token_start..token_end])
        .expect("token is base64");

    let plaintext = private_key
        .decrypt(Pkcs1v15Encrypt, &ciphertext)
        .expect("ciphertext opens with the paired private key");
    let expected_millis = chrono::DateTime::parse_from_rfc3339("2025-08-05T10:00:00.000Z")
        .unwrap()
        .timestamp_millis();
    assert_eq!(
        String::from_utf8(plaintext).unwrap(),
        format!("{expected_millis}|my-ksef-auth-token")
    );
}

#[tokio::test]
async fn test_token_init_aborts_on_first_failing_step() {
    // Upstream serves garbage instead of a PEM: the crypto step must abort
    // the whole operation after the challenge was already consumed.
    let (base, captured) = spawn_fake_upstream("this is not a pem".to_string()).await;
    let gateway = test_gateway();

    let err = gateway
        .init_session_token("1111111111", "token", &base)
        .await
        .expect_err("must abort");
    assert!(matches!(err, KsefProxyError::CryptoError { .. }));

    // Challenge and public key were fetched; InitToken was never called
    let log = captured.lock().unwrap();
    let paths: Vec<&str> = log.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/online/Session/AuthorisationChallenge",
            "/online/Session/PublicKey",
        ]
    );
}
