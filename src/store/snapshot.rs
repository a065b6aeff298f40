//! Hot-resume snapshot format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{Credentials, LoginTicket, Session, TransportState};
use crate::store::{StoreError, StoreResult};
use crate::types::SyncCursor;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// What a previously authenticated session needs to be resumed without a
/// fresh QR scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotResumeSnapshot {
    pub version: u32,
    pub credentials: Credentials,
    pub transport: TransportState,
    pub cursor: SyncCursor,
    #[serde(default)]
    pub ticket: Option<LoginTicket>,
    pub written_at: DateTime<Utc>,
}

impl HotResumeSnapshot {
    /// Capture the resumable parts of `session`. `None` when it holds no
    /// credentials.
    pub fn capture(session: &Session) -> Option<Self> {
        Some(Self {
            version: SNAPSHOT_VERSION,
            credentials: session.credentials.clone()?,
            transport: session.transport.clone(),
            cursor: session.cursor.clone(),
            ticket: session.ticket.clone(),
            written_at: Utc::now(),
        })
    }

    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    /// Decode a stored blob, rejecting unknown format versions.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let snapshot: Self =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Malformed(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Malformed(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Install credentials, cookies and cursor into `session`.
    ///
    /// Identity and contacts are left empty; they come from the init
    /// exchange that validates the snapshot.
    pub fn install(self, session: &mut Session) {
        session.clear();
        session.credentials = Some(self.credentials);
        session.transport = self.transport;
        session.cursor = self.cursor;
        session.ticket = self.ticket;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Cookie;
    use crate::types::{Contact, SyncKeyEntry};

    fn session() -> Session {
        let mut session = Session::new();
        session.credentials = Some(Credentials::new(7, "sid", "skey", "pt"));
        session.transport.domain = Some("wx2.qq.com".into());
        session
            .transport
            .cookies
            .set("https://wx2.qq.com", Cookie::new("wxuin", "7"));
        session.cursor = SyncCursor::new(vec![SyncKeyEntry { key: 1, val: 42 }]);
        session.self_user = Some(Contact::new("@me", "Me"));
        session
    }

    #[test]
    fn test_capture_and_install() {
        let original = session();
        let snapshot = HotResumeSnapshot::capture(&original).unwrap();
        let bytes = snapshot.to_bytes().unwrap();
        let decoded = HotResumeSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        let mut restored = Session::new();
        decoded.install(&mut restored);
        assert_eq!(restored.credentials, original.credentials);
        assert_eq!(restored.transport, original.transport);
        assert_eq!(restored.cursor, original.cursor);
        assert!(!restored.is_authenticated());
    }

    #[test]
    fn test_capture_requires_credentials() {
        assert!(HotResumeSnapshot::capture(&Session::new()).is_none());
    }

    #[test]
    fn test_rejects_malformed_and_future_versions() {
        assert!(matches!(
            HotResumeSnapshot::from_bytes(b"not json"),
            Err(StoreError::Malformed(_))
        ));

        let mut value = serde_json::to_value(HotResumeSnapshot::capture(&session()).unwrap()).unwrap();
        value["version"] = 2.into();
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            HotResumeSnapshot::from_bytes(&bytes),
            Err(StoreError::Malformed(_))
        ));
    }
}
