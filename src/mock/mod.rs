//! # Mock KSeF Simulator Module
//!
//! A deterministic, in-memory stand-in for the real KSeF service exposing the
//! identical operation surface, used interchangeably with the real gateway
//! behind the mode switch. No network calls; the only artificial latency is a
//! fixed delay on signed-session initialisation.
//!
//! The one genuine temporal behavior is the invoice state machine:
//! `processing` flips to `accepted` once two minutes have elapsed since
//! creation, evaluated lazily on each status read. There is no timer or
//! background process; two reads straddling the threshold simply return
//! different statuses.
//!
//! Error responses reproduce the KSeF exception envelope bit-for-bit so the
//! mock is a drop-in replacement for clients that parse the official schema.

pub mod refnum;
pub mod store;

// Re-export commonly used types
pub use store::{MockInvoice, MockSession, MockStore};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Subject identifier attached to mock sessions
///
/// The mock does not parse signed documents, so every session carries this
/// placeholder NIP; it shows up in the KSeF reference numbers derived for
/// submitted invoices.
pub const PLACEHOLDER_NIP: &str = "5555555555";

/// Service context echoed in every exception envelope
const SERVICE_CTX: &str = "srvTESTMF";

/// Exception code: required context-identifier fields missing
pub const CODE_MISSING_CONTEXT: u32 = 21001;

/// Exception code: unknown invoice or reference number
pub const CODE_UNKNOWN_INVOICE: u32 = 21002;

/// Exception code: unknown or invalid session token
pub const CODE_UNKNOWN_SESSION: u32 = 21003;

/// Context identifier supplied with an authorisation-challenge request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextIdentifier {
    /// Subject type, e.g. `onip`
    #[serde(rename = "type")]
    pub subject_type: Option<String>,
    /// Subject identifier (NIP)
    pub identifier: Option<String>,
}

/// A modeled simulator failure, rendered as a KSeF exception envelope
#[derive(Debug, Clone)]
pub struct SimulatorError {
    /// KSeF exception code (21001/21002/21003)
    pub exception_code: u32,
    /// Human-readable description
    pub description: String,
    /// Dotted name of the failing operation
    pub service_name: String,
}

impl SimulatorError {
    fn new(exception_code: u32, description: &str, service_name: &str) -> Self {
        Self {
            exception_code,
            description: description.to_string(),
            service_name: service_name.to_string(),
        }
    }

    /// Missing context-identifier fields (HTTP 400-class).
    #[must_use]
    pub fn missing_context(service_name: &str) -> Self {
        Self::new(
            CODE_MISSING_CONTEXT,
            "Brak wymaganych pól identyfikatora kontekstu",
            service_name,
        )
    }

    /// Unknown or invalid session token (HTTP 401-class).
    #[must_use]
    pub fn unknown_session(service_name: &str) -> Self {
        Self::new(
            CODE_UNKNOWN_SESSION,
            "Brak aktywnej sesji dla podanego tokenu",
            service_name,
        )
    }

    /// Unknown invoice or reference number (HTTP 404-class).
    #[must_use]
    pub fn unknown_invoice(service_name: &str) -> Self {
        Self::new(
            CODE_UNKNOWN_INVOICE,
            "Nieznany numer referencyjny faktury",
            service_name,
        )
    }

    /// HTTP status the envelope should be returned with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.exception_code {
            CODE_UNKNOWN_SESSION => 401,
            CODE_UNKNOWN_INVOICE => 404,
            _ => 400,
        }
    }

    /// Renders the KSeF-shaped exception envelope for this error.
    #[must_use]
    pub fn envelope(&self) -> ExceptionEnvelope {
        ExceptionEnvelope {
            exception: ExceptionBody {
                service_ctx: SERVICE_CTX.to_string(),
                service_code: refnum::reference_number(refnum::TAG_SERVICE_CODE),
                service_name: self.service_name.clone(),
                timestamp: now_iso(),
                reference_number: refnum::reference_number(refnum::TAG_SERVICE_CODE),
                exception_detail_list: vec![ExceptionDetail {
                    exception_code: self.exception_code,
                    exception_description: self.description.clone(),
                }],
            },
        }
    }
}

/// KSeF exception envelope (bit-exact contract with the official schema)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionEnvelope {
    /// The exception body
    pub exception: ExceptionBody,
}

/// Body of the exception envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionBody {
    /// Service context tag
    pub service_ctx: String,
    /// Generated service code
    pub service_code: String,
    /// Dotted name of the failing operation
    pub service_name: String,
    /// Envelope timestamp (ISO 8601)
    pub timestamp: String,
    /// Generated reference number
    pub reference_number: String,
    /// Individual exception entries
    pub exception_detail_list: Vec<ExceptionDetail>,
}

/// One entry of the exception detail list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetail {
    /// KSeF exception code
    pub exception_code: u32,
    /// Human-readable description
    pub exception_description: String,
}

/// Challenge issued by the mock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeIssued {
    /// Issuance timestamp (ISO 8601)
    pub timestamp: String,
    /// Formatted challenge string
    pub challenge: String,
}

/// Token wrapper inside a session-init response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Opaque session token
    pub token: String,
}

/// Session-init response mirroring the real service's shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpened {
    /// Creation timestamp (ISO 8601)
    pub timestamp: String,
    /// Session reference number
    pub reference_number: String,
    /// The issued session token
    pub session_token: TokenInfo,
}

/// Session status response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Session start timestamp (ISO 8601)
    pub timestamp: String,
    /// Session reference number
    pub reference_number: String,
    /// Elements currently processing (always zero in the mock)
    pub processing_elements_count: u32,
}

/// Session termination acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateAck {
    /// Termination timestamp (ISO 8601)
    pub timestamp: String,
    /// Generated reference number for the termination
    pub reference_number: String,
}

/// Receipt for a submitted invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceReceipt {
    /// Submission timestamp (ISO 8601)
    pub timestamp: String,
    /// Element reference number of the stored invoice
    pub element_reference_number: String,
    /// Processing code (100 = accepted for processing)
    pub processing_code: i64,
    /// Human-readable processing description
    pub processing_description: String,
}

/// Detail block present once an invoice is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatusDetail {
    /// Invoice number
    pub invoice_number: String,
    /// KSeF reference number
    pub ksef_reference_number: String,
    /// Acquisition timestamp (ISO 8601)
    pub acquisition_timestamp: String,
}

/// Invoice status response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatus {
    /// Read timestamp (ISO 8601)
    pub timestamp: String,
    /// Element reference number queried
    pub element_reference_number: String,
    /// Processing code (100 = processing, 200 = accepted)
    pub processing_code: i64,
    /// Human-readable processing description
    pub processing_description: String,
    /// Present only once the invoice is accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_status: Option<InvoiceStatusDetail>,
}

/// One synthesized invoice header returned by the query operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceHeader {
    /// KSeF reference number
    pub ksef_reference_number: String,
    /// Invoice number
    pub invoice_number: String,
    /// Acquisition timestamp (ISO 8601)
    pub acquisition_timestamp: String,
}

/// Result of the synchronous invoice query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Synthesized invoice headers, newest first
    pub invoice_header_list: Vec<InvoiceHeader>,
    /// Number of returned headers
    pub number_of_elements: usize,
    /// Requested page size
    pub page_size: usize,
    /// Requested page offset
    pub page_offset: usize,
    /// Always false; the mock never pages
    pub has_more_elements: bool,
}

/// Freshly generated credential token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialToken {
    /// Generation timestamp (ISO 8601)
    pub timestamp: String,
    /// Opaque authorisation token
    pub authorisation_token: String,
}

/// Mock health snapshot: live entity counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockHealth {
    /// Live session count
    pub sessions: usize,
    /// Stored invoice count
    pub invoices: usize,
}

/// The in-memory KSeF simulator
///
/// All state lives in the injected [`MockStore`]; the simulator itself is a
/// cheap handle that can be cloned across handlers.
#[derive(Debug, Clone)]
pub struct KsefSimulator {
    store: Arc<MockStore>,
}

impl KsefSimulator {
    /// Creates a simulator over the given store.
    #[must_use]
    pub fn new(store: Arc<MockStore>) -> Self {
        Self { store }
    }

    /// Issues an authorisation challenge.
    ///
    /// Requires both `type` and `identifier`; issued challenges are not
    /// tracked, so any later signed body referencing any challenge is
    /// accepted.
    ///
    /// ## Errors
    /// - exception 21001 when either context field is missing or empty
    pub fn authorisation_challenge(
        &self,
        context: Option<&ContextIdentifier>,
    ) -> std::result::Result<ChallengeIssued, SimulatorError> {
        let service = "online.session.authorisationChallenge";
        let Some(context) = context else {
            return Err(SimulatorError::missing_context(service));
        };
        let has_type = context
            .subject_type
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let has_identifier = context
            .identifier
            .as_deref()
            .is_some_and(|i| !i.trim().is_empty());
        if !has_type || !has_identifier {
            return Err(SimulatorError::missing_context(service));
        }

        Ok(ChallengeIssued {
            timestamp: now_iso(),
            challenge: refnum::reference_number(refnum::TAG_CHALLENGE),
        })
    }

    /// Initialises a session from a signed document.
    ///
    /// Always succeeds after a fixed simulated delay; the body is not parsed.
    pub async fn init_signed(&self, _body: &[u8]) -> SessionOpened {
        tokio::time::sleep(std::time::Duration::from_millis(
            crate::MOCK_INIT_SIGNED_DELAY_MS,
        ))
        .await;
        self.create_session()
    }

    /// Initialises a session for the token flow.
    ///
    /// Identical session creation to the signed flow, without the delay.
    #[must_use]
    pub fn init_token(&self) -> SessionOpened {
        self.create_session()
    }

    fn create_session(&self) -> SessionOpened {
        let token = refnum::session_token();
        let reference_number = refnum::reference_number(refnum::TAG_SESSION);
        let timestamp = now_iso();

        self.store.insert_session(MockSession {
            token: token.clone(),
            reference_number: reference_number.clone(),
            nip: PLACEHOLDER_NIP.to_string(),
            created_at: SystemTime::now(),
            timestamp: timestamp.clone(),
        });

        SessionOpened {
            timestamp,
            reference_number,
            session_token: TokenInfo { token },
        }
    }

    /// Reports the status of an active session.
    ///
    /// ## Errors
    /// - exception 21003 for an unknown token
    pub fn session_status(
        &self,
        token: &str,
    ) -> std::result::Result<SessionStatus, SimulatorError> {
        let session = self
            .store
            .session(token)
            .ok_or_else(|| SimulatorError::unknown_session("online.session.status"))?;

        Ok(SessionStatus {
            timestamp: session.timestamp,
            reference_number: session.reference_number,
            // The mock has no concurrent processing
            processing_elements_count: 0,
        })
    }

    /// Terminates a session, removing it from the store.
    ///
    /// Idempotent: terminating an unknown (or already terminated) token also
    /// returns success.
    #[must_use]
    pub fn terminate_session(&self, token: &str) -> TerminateAck {
        self.store.remove_session(token);
        TerminateAck {
            timestamp: now_iso(),
            reference_number: refnum::reference_number(refnum::TAG_SESSION),
        }
    }

    /// Accepts an invoice for processing.
    ///
    /// ## Errors
    /// - exception 21003 for an unknown token
    pub fn send_invoice(
        &self,
        token: &str,
        _payload: &[u8],
    ) -> std::result::Result<InvoiceReceipt, SimulatorError> {
        let session = self
            .store
            .session(token)
            .ok_or_else(|| SimulatorError::unknown_session("online.invoice.send"))?;

        let element_reference_number = refnum::reference_number(refnum::TAG_ELEMENT);
        let timestamp = now_iso();

        self.store.insert_invoice(MockInvoice {
            element_reference_number: element_reference_number.clone(),
            ksef_reference_number: refnum::ksef_invoice_reference(&session.nip),
            session_token: token.to_string(),
            invoice_number: refnum::invoice_number(),
            created_at: SystemTime::now(),
            timestamp: timestamp.clone(),
        });

        Ok(InvoiceReceipt {
            timestamp,
            element_reference_number,
            processing_code: 100,
            processing_description: "Processing".to_string(),
        })
    }

    /// Reports the processing status of a submitted invoice.
    ///
    /// The processing→accepted transition is computed here, on read, from the
    /// elapsed time since creation; once accepted, the response additionally
    /// carries the invoice number, KSeF reference and acquisition timestamp.
    ///
    /// ## Errors
    /// - exception 21003 for an unknown token
    /// - exception 21002 for an unknown element reference
    pub fn invoice_status(
        &self,
        token: &str,
        element_reference_number: &str,
    ) -> std::result::Result<InvoiceStatus, SimulatorError> {
        let service = "online.invoice.status";
        if self.store.session(token).is_none() {
            return Err(SimulatorError::unknown_session(service));
        }
        let invoice = self
            .store
            .invoice(element_reference_number)
            .ok_or_else(|| SimulatorError::unknown_invoice(service))?;

        let accepted = invoice.is_accepted_at(SystemTime::now());
        Ok(InvoiceStatus {
            timestamp: now_iso(),
            element_reference_number: invoice.element_reference_number.clone(),
            processing_code: if accepted { 200 } else { 100 },
            processing_description: if accepted { "Accepted" } else { "Processing" }.to_string(),
            invoice_status: accepted.then(|| InvoiceStatusDetail {
                invoice_number: invoice.invoice_number.clone(),
                ksef_reference_number: invoice.ksef_reference_number.clone(),
                acquisition_timestamp: now_iso(),
            }),
        })
    }

    /// Returns a synthesized invoice document by KSeF reference number.
    ///
    /// Looks the invoice up with a linear scan; existence is the only gate,
    /// acceptance status is not checked.
    ///
    /// ## Errors
    /// - exception 21003 for an unknown token
    /// - exception 21002 for an unknown KSeF reference
    pub fn get_invoice(
        &self,
        token: &str,
        ksef_reference_number: &str,
    ) -> std::result::Result<Vec<u8>, SimulatorError> {
        let service = "online.invoice.get";
        if self.store.session(token).is_none() {
            return Err(SimulatorError::unknown_session(service));
        }
        let invoice = self
            .store
            .invoice_by_ksef_reference(ksef_reference_number)
            .ok_or_else(|| SimulatorError::unknown_invoice(service))?;

        Ok(synthesize_invoice_xml(&invoice).into_bytes())
    }

    /// Synthesizes a page of invoice headers.
    ///
    /// Returns at most `min(page_size, 5)` entries with descending
    /// timestamps; the mock never reports more pages.
    ///
    /// ## Errors
    /// - exception 21003 for an unknown token
    pub fn query_invoice_sync(
        &self,
        token: &str,
        page_size: usize,
        page_offset: usize,
    ) -> std::result::Result<QueryResult, SimulatorError> {
        let session = self
            .store
            .session(token)
            .ok_or_else(|| SimulatorError::unknown_session("online.query.invoice.sync"))?;

        let count = page_size.min(crate::QUERY_SYNC_PAGE_CAP);
        let now = Utc::now();
        let invoice_header_list: Vec<InvoiceHeader> = (0..count)
            .map(|i| InvoiceHeader {
                ksef_reference_number: refnum::ksef_invoice_reference(&session.nip),
                invoice_number: refnum::invoice_number(),
                acquisition_timestamp: (now - chrono::Duration::minutes(i as i64))
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            })
            .collect();

        Ok(QueryResult {
            number_of_elements: invoice_header_list.len(),
            invoice_header_list,
            page_size,
            page_offset,
            has_more_elements: false,
        })
    }

    /// Generates a fresh opaque credential token.
    ///
    /// ## Errors
    /// - exception 21003 for an unknown token
    pub fn generate_credential_token(
        &self,
        token: &str,
    ) -> std::result::Result<CredentialToken, SimulatorError> {
        if self.store.session(token).is_none() {
            return Err(SimulatorError::unknown_session(
                "online.credentials.generateToken",
            ));
        }
        Ok(CredentialToken {
            timestamp: now_iso(),
            authorisation_token: refnum::session_token(),
        })
    }

    /// Live entity counts for the outer health surface.
    #[must_use]
    pub fn health(&self) -> MockHealth {
        MockHealth {
            sessions: self.store.session_count(),
            invoices: self.store.invoice_count(),
        }
    }
}

/// Current time as an ISO 8601 string with millisecond precision.
fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Renders the synthesized invoice document served by the get operation.
fn synthesize_invoice_xml(invoice: &MockInvoice) -> String {
    let issue_date = Utc::now().format("%Y-%m-%d");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Faktura xmlns="http://crd.gov.pl/wzor/2023/06/29/12648/">
    <Naglowek>
        <KodFormularza kodSystemowy="FA (2)" wersjaSchemy="1-0E">FA</KodFormularza>
        <WariantFormularza>2</WariantFormularza>
        <DataWytworzeniaFa>{timestamp}</DataWytworzeniaFa>
        <SystemInfo>{ksef_reference}</SystemInfo>
    </Naglowek>
    <Podmiot1>
        <DaneIdentyfikacyjne>
            <NIP>{seller_nip}</NIP>
            <Nazwa>Sprzedawca Sp. z o.o.</Nazwa>
        </DaneIdentyfikacyjne>
    </Podmiot1>
    <Podmiot2>
        <DaneIdentyfikacyjne>
            <NIP>7777777777</NIP>
            <Nazwa>Nabywca S.A.</Nazwa>
        </DaneIdentyfikacyjne>
    </Podmiot2>
    <Fa>
        <P_1>{issue_date}</P_1>
        <P_2>{invoice_number}</P_2>
        <FaWiersz>
            <NrWierszaFa>1</NrWierszaFa>
            <P_7>Usluga</P_7>
            <P_9A>100.00</P_9A>
            <P_11>100.00</P_11>
        </FaWiersz>
    </Fa>
</Faktura>
"#,
        timestamp = invoice.timestamp,
        ksef_reference = invoice.ksef_reference_number,
        seller_nip = PLACEHOLDER_NIP,
        issue_date = issue_date,
        invoice_number = invoice.invoice_number,
    )
}
