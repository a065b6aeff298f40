use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::protocol::qr::DEFAULT_QR_BASE;

/// Base configuration used by the session engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of the URL encoded in the login QR code.
    pub qr_login_base: String,
    /// Fetch unknown senders, receivers and member-less groups before
    /// classifying a message.
    pub fetch_missing_contacts: bool,
    /// Maximum number of ids per on-demand contact fetch.
    pub contact_batch_size: usize,
    /// Write a hot-resume snapshot after every successful login.
    pub persist_on_login: bool,
    /// Fall back to a fresh QR login when a resumed snapshot is rejected.
    pub fallback_to_fresh_login: bool,
    /// How long a sent message stays revocable, in seconds.
    pub revoke_window_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            qr_login_base: DEFAULT_QR_BASE.into(),
            fetch_missing_contacts: true,
            contact_batch_size: 50,
            persist_on_login: true,
            fallback_to_fresh_login: false,
            revoke_window_secs: 120,
        }
    }
}

impl EngineConfig {
    /// Override the QR login URL prefix.
    pub fn with_qr_login_base(mut self, base: impl Into<String>) -> Self {
        self.qr_login_base = base.into();
        self
    }

    /// Enable or disable on-demand contact fetching.
    pub fn with_fetch_missing_contacts(mut self, enabled: bool) -> Self {
        self.fetch_missing_contacts = enabled;
        self
    }

    /// Override the on-demand contact fetch batch size. Zero is treated as one.
    pub fn with_contact_batch_size(mut self, size: usize) -> Self {
        self.contact_batch_size = size.max(1);
        self
    }

    pub fn with_persist_on_login(mut self, enabled: bool) -> Self {
        self.persist_on_login = enabled;
        self
    }

    /// Fall back to a fresh login when hot resume fails validation.
    pub fn with_fallback_to_fresh_login(mut self, enabled: bool) -> Self {
        self.fallback_to_fresh_login = enabled;
        self
    }

    pub fn with_revoke_window_secs(mut self, secs: u64) -> Self {
        self.revoke_window_secs = secs;
        self
    }

    pub fn revoke_window(&self) -> Duration {
        let secs = i64::try_from(self.revoke_window_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }

    /// URL to encode in the QR code for `uuid`.
    pub fn qr_login_url(&self, uuid: &str) -> String {
        format!("{}{}", self.qr_login_base, uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.fetch_missing_contacts);
        assert!(config.persist_on_login);
        assert!(!config.fallback_to_fresh_login);
        assert_eq!(config.revoke_window(), Duration::seconds(120));
        assert_eq!(config.qr_login_url("abc"), "https://login.weixin.qq.com/l/abc");
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::default()
            .with_qr_login_base("https://example.test/l/")
            .with_contact_batch_size(0)
            .with_fallback_to_fresh_login(true)
            .with_revoke_window_secs(30);
        assert_eq!(config.contact_batch_size, 1);
        assert!(config.fallback_to_fresh_login);
        assert_eq!(config.revoke_window(), Duration::seconds(30));
        assert_eq!(config.qr_login_url("x"), "https://example.test/l/x");
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"persist_on_login": false}"#).unwrap();
        assert!(!config.persist_on_login);
        assert_eq!(config.contact_batch_size, 50);
    }
}
