use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{Contact, ContactIndex, SyncCursor};

/// Identity tokens required on every authenticated request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uin: i64,
    pub sid: String,
    pub skey: String,
    pub pass_ticket: String,
    pub device_id: String,
}

impl Credentials {
    /// Build credentials for a fresh login with a newly generated device id.
    pub fn new(
        uin: i64,
        sid: impl Into<String>,
        skey: impl Into<String>,
        pass_ticket: impl Into<String>,
    ) -> Self {
        Self {
            uin,
            sid: sid.into(),
            skey: skey.into(),
            pass_ticket: pass_ticket.into(),
            device_id: random_device_id(),
        }
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("uin", &self.uin)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// `e` followed by 15 random digits, the shape the web client sends.
pub fn random_device_id() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..15)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    format!("e{digits}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Cookies grouped by the URL they were set for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    domains: BTreeMap<String, Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cookie, replacing any cookie of the same name for `domain`.
    pub fn set(&mut self, domain: impl Into<String>, cookie: Cookie) {
        let cookies = self.domains.entry(domain.into()).or_default();
        match cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => existing.value = cookie.value,
            None => cookies.push(cookie),
        }
    }

    pub fn get(&self, domain: &str, name: &str) -> Option<&str> {
        self.domains
            .get(domain)?
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    pub fn cookies(&self, domain: &str) -> &[Cookie] {
        self.domains.get(domain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.values().all(Vec::is_empty)
    }
}

/// Cookie and host state owned by the transport, mirrored into the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportState {
    pub cookies: CookieJar,
    /// Web host the account was redirected to at login, if any.
    pub domain: Option<String>,
}

/// Identifier of a QR login handshake, valid for a bounded time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginTicket {
    pub uuid: String,
    pub issued_at: DateTime<Utc>,
}

impl LoginTicket {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            issued_at: Utc::now(),
        }
    }

    /// URL to encode in the QR code shown to the user.
    pub fn qr_url(&self, base: &str) -> String {
        format!("{base}{}", self.uuid)
    }
}

/// Everything needed to resume or advance the protocol for one account.
///
/// Exclusively owned by one engine. Login and resume populate it, the sync
/// loop is its only mutator afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub credentials: Option<Credentials>,
    pub transport: TransportState,
    pub cursor: SyncCursor,
    pub contacts: ContactIndex,
    pub self_user: Option<Contact>,
    pub ticket: Option<LoginTicket>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials installed and confirmed by an init exchange.
    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some() && self.self_user.is_some()
    }

    pub fn self_user_name(&self) -> Option<&str> {
        self.self_user.as_ref().map(|u| u.user_name.as_str())
    }

    /// Drop credentials and identity, keeping nothing that could be replayed.
    pub fn clear(&mut self) {
        *self = Session::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_shape() {
        let id = random_device_id();
        assert_eq!(id.len(), 16);
        assert!(id.starts_with('e'));
        assert!(id[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_credentials_debug_hides_tokens() {
        let creds = Credentials::new(42, "sid-secret", "skey-secret", "ticket-secret");
        let printed = format!("{creds:?}");
        assert!(printed.contains("42"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_cookie_jar_replaces_by_name() {
        let mut jar = CookieJar::new();
        assert!(jar.is_empty());
        jar.set("https://wx.qq.com", Cookie::new("wxsid", "a"));
        jar.set("https://wx.qq.com", Cookie::new("wxsid", "b"));
        jar.set("https://file.wx.qq.com", Cookie::new("webwx_data_ticket", "t"));

        assert_eq!(jar.get("https://wx.qq.com", "wxsid"), Some("b"));
        assert_eq!(jar.cookies("https://wx.qq.com").len(), 1);
        assert_eq!(jar.domains().count(), 2);
    }

    #[test]
    fn test_session_authentication_requires_identity() {
        let mut session = Session::new();
        session.credentials = Some(Credentials::new(1, "s", "k", "p"));
        assert!(!session.is_authenticated());
        session.self_user = Some(Contact::new("@me", "Me"));
        assert!(session.is_authenticated());
        session.clear();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_qr_url() {
        let ticket = LoginTicket::new("abc==");
        assert_eq!(
            ticket.qr_url("https://login.weixin.qq.com/l/"),
            "https://login.weixin.qq.com/l/abc=="
        );
    }
}
