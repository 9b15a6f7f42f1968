//! # Reference Number Generation
//!
//! KSeF-style formatted identifiers: reference numbers
//! (`YYYYMMDD-XX-<10 hex>-<10 hex>-<2 hex>`, uppercase hex), invoice
//! reference numbers derived from the subject NIP, session tokens and
//! synthesized invoice numbers. Every identifier is generated fresh per
//! operation.

use chrono::Utc;
use rand::Rng;

/// Category tag for authorisation challenges
pub const TAG_CHALLENGE: &str = "CR";

/// Category tag for sessions
pub const TAG_SESSION: &str = "SE";

/// Category tag for submitted invoice elements
pub const TAG_ELEMENT: &str = "EV";

/// Category tag for service codes in error envelopes
pub const TAG_SERVICE_CODE: &str = "SC";

/// Generates a reference number with the given category tag.
///
/// Format: `YYYYMMDD-<TAG>-<10 hex>-<10 hex>-<2 hex>`, hex uppercase.
#[must_use]
pub fn reference_number(tag: &str) -> String {
    let date = Utc::now().format("%Y%m%d");
    format!(
        "{date}-{tag}-{}-{}-{}",
        random_hex_upper(5),
        random_hex_upper(5),
        random_hex_upper(1)
    )
}

/// Generates a KSeF invoice reference number derived from the subject NIP.
///
/// Format: `<nip>-<YYYYMMDD>-<10 hex>-<2 hex>`.
#[must_use]
pub fn ksef_invoice_reference(nip: &str) -> String {
    let date = Utc::now().format("%Y%m%d");
    format!("{nip}-{date}-{}-{}", random_hex_upper(5), random_hex_upper(1))
}

/// Generates an opaque high-entropy session token (64 lowercase hex chars).
#[must_use]
pub fn session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Synthesizes an invoice number for mock invoices.
#[must_use]
pub fn invoice_number() -> String {
    let date = Utc::now().format("%Y/%m/%d");
    let sequence: u16 = rand::thread_rng().gen_range(1..10_000);
    format!("FV/{date}/{sequence:04}")
}

/// Random uppercase hex string of `bytes * 2` characters.
fn random_hex_upper(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    rand::thread_rng().fill(buffer.as_mut_slice());
    buffer.iter().map(|b| format!("{b:02X}")).collect()
}
