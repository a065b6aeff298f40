//! Transport port for the web protocol.
//!
//! The engine never builds HTTP requests itself. Everything that touches the
//! network goes through a [`Transport`] supplied by the caller, which also
//! owns the cookie jar and follows redirects.

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::message::{
    FriendVerification, MediaUpload, OutgoingMessage, RevokeRequest, SendReceipt,
};
use crate::state::{Credentials, LoginTicket, TransportState};
use crate::types::{Contact, ContactDelta, RawEvent, SyncCursor};

/// Sync check `retcode` values.
pub mod retcodes {
    pub const OK: i64 = 0;
    /// Logged out from the phone.
    pub const LOGGED_OUT: i64 = 1100;
    /// Another web session took over.
    pub const REPLACED: i64 = 1101;
    /// Cookies or credentials expired.
    pub const EXPIRED: i64 = 1102;
}

/// Errors raised by a transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection reset, refused, DNS failure and similar.
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("request rejected (ret={ret}): {message}")]
    Rejected { ret: i64, message: String },
}

impl TransportError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout(_))
    }
}

/// Why the server considers the session dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    LoggedOut,
    Replaced,
    Expired,
}

impl InvalidationReason {
    pub fn from_retcode(retcode: i64) -> Option<Self> {
        match retcode {
            retcodes::LOGGED_OUT => Some(InvalidationReason::LoggedOut),
            retcodes::REPLACED => Some(InvalidationReason::Replaced),
            retcodes::EXPIRED => Some(InvalidationReason::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::LoggedOut => write!(f, "logged out from another device"),
            InvalidationReason::Replaced => write!(f, "replaced by another session"),
            InvalidationReason::Expired => write!(f, "session expired"),
        }
    }
}

/// Result of one blocking login check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCheck {
    /// Status code reported by the server (`window.code`).
    pub code: u16,
    /// Body of the response. On success this is the identity document
    /// obtained by following the login redirect.
    pub payload: String,
}

/// Data returned by the init exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInit {
    pub user: Contact,
    pub contacts: Vec<Contact>,
    pub cursor: SyncCursor,
}

/// Result of one blocking sync check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCheckResponse {
    pub retcode: i64,
    pub selector: i64,
    /// Updated cursor, when the server piggybacks one.
    pub cursor: Option<SyncCursor>,
}

impl SyncCheckResponse {
    pub fn is_success(&self) -> bool {
        self.retcode == retcodes::OK
    }

    /// A zero selector means nothing new is waiting.
    pub fn has_new_data(&self) -> bool {
        self.selector != 0
    }

    pub fn invalidation(&self) -> Option<InvalidationReason> {
        InvalidationReason::from_retcode(self.retcode)
    }
}

/// New events fetched after a positive sync check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    pub events: Vec<RawEvent>,
    pub contact_deltas: Vec<ContactDelta>,
    pub cursor: SyncCursor,
}

/// Which download endpoint a media payload lives behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Voice,
    Video,
    Attachment,
}

/// Media download request derived from a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub kind: MediaKind,
    pub msg_id: String,
    pub from_user_name: String,
    pub media_id: String,
    pub file_name: String,
    pub encry_file_name: String,
}

/// The network capability consumed by the engine.
///
/// Implementations keep their own cookie jar; the engine mirrors it through
/// [`Transport::export_state`] and [`Transport::restore_state`] so it can be
/// persisted for hot resume.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask the login server for a new QR ticket.
    async fn request_login_ticket(&self) -> Result<LoginTicket, TransportError>;

    /// Long-poll the login server for the ticket's scan status.
    async fn poll_login_ticket(&self, ticket: &LoginTicket) -> Result<LoginCheck, TransportError>;

    /// Fetch the account's identity, contacts and initial cursor.
    async fn init_session(&self, credentials: &Credentials) -> Result<SessionInit, TransportError>;

    /// Tell the phone that the web session is live.
    async fn notify_presence(
        &self,
        credentials: &Credentials,
        init: &SessionInit,
    ) -> Result<(), TransportError>;

    /// Long-poll for change notifications.
    async fn poll_sync(
        &self,
        credentials: &Credentials,
        cursor: &SyncCursor,
    ) -> Result<SyncCheckResponse, TransportError>;

    /// Fetch the events the last sync check announced.
    async fn fetch_sync_batch(
        &self,
        credentials: &Credentials,
        cursor: &SyncCursor,
    ) -> Result<SyncBatch, TransportError>;

    /// Look up full records (group members included) for the given ids.
    async fn fetch_contacts(
        &self,
        credentials: &Credentials,
        user_names: &[String],
    ) -> Result<Vec<Contact>, TransportError>;

    async fn send_message(
        &self,
        credentials: &Credentials,
        message: &OutgoingMessage,
    ) -> Result<SendReceipt, TransportError>;

    /// Upload a file and return the media id the server assigned to it.
    async fn upload_media(
        &self,
        credentials: &Credentials,
        upload: &MediaUpload,
    ) -> Result<String, TransportError>;

    async fn fetch_media(
        &self,
        credentials: &Credentials,
        request: &MediaRequest,
    ) -> Result<Vec<u8>, TransportError>;

    async fn mark_read(
        &self,
        credentials: &Credentials,
        chat_user_name: &str,
    ) -> Result<(), TransportError>;

    async fn revoke_message(
        &self,
        credentials: &Credentials,
        request: &RevokeRequest,
    ) -> Result<(), TransportError>;

    /// Accept a pending friend request.
    async fn accept_friend(
        &self,
        credentials: &Credentials,
        verification: &FriendVerification,
    ) -> Result<(), TransportError>;

    async fn logout(&self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Current cookies and host, for persistence.
    fn export_state(&self) -> TransportState;

    /// Install cookies and host restored from a snapshot.
    fn restore_state(&self, state: &TransportState);
}
