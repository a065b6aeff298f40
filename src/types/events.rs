//! Event types for session lifecycle notifications.
//!
//! These events are emitted to every registered event handler as the login
//! handshake and the sync loop make progress. Messages themselves are not
//! events; they go to the message handler passed to the sync loop.

use crate::state::LoginTicket;
use crate::transport::SyncCheckResponse;
use crate::types::Contact;

/// A login ticket was issued and can be rendered as a QR code.
#[derive(Debug, Clone)]
pub struct TicketIssued {
    pub ticket: LoginTicket,
    /// URL to encode in the QR code
    pub qr_url: String,
}

/// The QR code was scanned but the login is not confirmed yet.
#[derive(Debug, Clone)]
pub struct Scanned {
    /// Raw login check body, carries the scanning user's avatar
    pub payload: String,
}

/// The login handshake completed.
#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub self_user: Contact,
}

/// The session ended, either on request or because of a fatal error.
#[derive(Debug, Clone)]
pub struct SessionEnded {
    /// Human-readable reason, if any
    pub reason: Option<String>,
}

/// All possible events that can be received
#[derive(Debug, Clone)]
pub enum Event {
    TicketIssued(TicketIssued),
    Scanned(Scanned),
    LoggedIn(LoggedIn),
    SyncCheck(SyncCheckResponse),
    SessionEnded(SessionEnded),
}
