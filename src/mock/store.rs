//! # Mock State Store
//!
//! In-memory backing store for the KSeF simulator: sessions keyed by token
//! and invoices keyed by element reference number. The store is injected into
//! the simulator rather than held as a process-wide singleton, which keeps
//! tests isolated and leaves room for swapping in a TTL cache later.
//!
//! Each map sits behind its own mutex because the tokio runtime executes
//! handlers on multiple threads. Lock scopes are short and never held across
//! an await point. Entries accumulate until process restart; there is no
//! eviction.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// An authenticated mock session
///
/// Presence in the store means the session is active; termination removes the
/// record and its token is never reused.
#[derive(Debug, Clone)]
pub struct MockSession {
    /// Opaque high-entropy session token (also the store key)
    pub token: String,
    /// Formatted session reference number
    pub reference_number: String,
    /// Subject identifier (NIP) the session is bound to
    pub nip: String,
    /// Creation instant, for elapsed-time computations
    pub created_at: SystemTime,
    /// Creation timestamp as surfaced in responses (ISO 8601)
    pub timestamp: String,
}

/// An invoice submitted to the mock
#[derive(Debug, Clone)]
pub struct MockInvoice {
    /// Element reference number (also the store key)
    pub element_reference_number: String,
    /// KSeF-style reference derived from the owning session's NIP
    pub ksef_reference_number: String,
    /// Token of the session that submitted the invoice
    pub session_token: String,
    /// Synthesized invoice number
    pub invoice_number: String,
    /// Creation instant driving the lazy status transition
    pub created_at: SystemTime,
    /// Creation timestamp as surfaced in responses (ISO 8601)
    pub timestamp: String,
}

impl MockInvoice {
    /// Whether the invoice counts as accepted at `now`.
    ///
    /// Computed from elapsed wall-clock time since creation; the transition
    /// is monotonic because `created_at` never changes after insertion.
    #[must_use]
    pub fn is_accepted_at(&self, now: SystemTime) -> bool {
        now.duration_since(self.created_at)
            .map(|elapsed| elapsed >= Duration::from_secs(crate::INVOICE_ACCEPTANCE_AFTER_SECS))
            .unwrap_or(false)
    }
}

/// Injected store holding the simulator's two maps
#[derive(Debug, Default)]
pub struct MockStore {
    sessions: Mutex<HashMap<String, MockSession>>,
    invoices: Mutex<HashMap<String, MockInvoice>>,
}

impl MockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session, keyed by its token.
    pub fn insert_session(&self, session: MockSession) {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.insert(session.token.clone(), session);
    }

    /// Looks up a session by token.
    #[must_use]
    pub fn session(&self, token: &str) -> Option<MockSession> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        sessions.get(token).cloned()
    }

    /// Removes a session; returns whether it existed.
    pub fn remove_session(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.remove(token).is_some()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("session map poisoned").len()
    }

    /// Inserts an invoice, keyed by its element reference number.
    pub fn insert_invoice(&self, invoice: MockInvoice) {
        let mut invoices = self.invoices.lock().expect("invoice map poisoned");
        invoices.insert(invoice.element_reference_number.clone(), invoice);
    }

    /// Looks up an invoice by element reference number.
    #[must_use]
    pub fn invoice(&self, element_reference_number: &str) -> Option<MockInvoice> {
        let invoices = self.invoices.lock().expect("invoice map poisoned");
        invoices.get(element_reference_number).cloned()
    }

    /// Looks up an invoice by its KSeF reference number (linear scan).
    #[must_use]
    pub fn invoice_by_ksef_reference(&self, ksef_reference_number: &str) -> Option<MockInvoice> {
        let invoices = self.invoices.lock().expect("invoice map poisoned");
        invoices
            .values()
            .find(|invoice| invoice.ksef_reference_number == ksef_reference_number)
            .cloned()
    }

    /// Number of stored invoices.
    #[must_use]
    pub fn invoice_count(&self) -> usize {
        self.invoices.lock().expect("invoice map poisoned").len()
    }
}
