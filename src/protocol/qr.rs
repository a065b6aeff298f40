//! QR code login for the web protocol.
//!
//! Status codes returned by the login long-poll and the identity document
//! handed back once the scan is confirmed.

use serde::Deserialize;
use thiserror::Error;

use crate::state::Credentials;

/// Default prefix of the URL encoded in the login QR code.
pub const DEFAULT_QR_BASE: &str = "https://login.weixin.qq.com/l/";

/// Login check status codes (`window.code=...`).
pub mod status_codes {
    pub const SUCCESS: u16 = 200;
    pub const SCANNED: u16 = 201;
    pub const TIMEOUT: u16 = 400;
    pub const WAIT: u16 = 408;
}

/// Outcome of one login check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// Login confirmed on the phone
    Success,
    /// Code scanned, waiting for confirmation
    Scanned,
    /// Ticket expired
    Timeout,
    /// Nothing happened yet, poll again
    Waiting,
}

impl LoginStatus {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            status_codes::SUCCESS => Some(LoginStatus::Success),
            status_codes::SCANNED => Some(LoginStatus::Scanned),
            status_codes::TIMEOUT => Some(LoginStatus::Timeout),
            status_codes::WAIT => Some(LoginStatus::Waiting),
            _ => None,
        }
    }
}

/// Identity document errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoginInfoError {
    #[error("invalid login info: {0}")]
    Xml(String),
    #[error("login rejected (ret={ret}): {message}")]
    Rejected { ret: i64, message: String },
    #[error("login info is missing {0}")]
    MissingField(&'static str),
}

/// `<error><ret>0</ret><skey>...</skey>...</error>` returned after the
/// login redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoginInfo {
    pub ret: i64,
    pub message: String,
    pub skey: String,
    pub wxsid: String,
    pub wxuin: i64,
    pub pass_ticket: String,
    #[serde(rename = "isgrayscale")]
    pub is_grayscale: i32,
}

impl LoginInfo {
    pub fn parse(payload: &str) -> Result<Self, LoginInfoError> {
        let info: LoginInfo = quick_xml::de::from_str(payload.trim())
            .map_err(|e| LoginInfoError::Xml(e.to_string()))?;
        if info.ret != 0 {
            return Err(LoginInfoError::Rejected {
                ret: info.ret,
                message: info.message,
            });
        }
        if info.wxsid.is_empty() {
            return Err(LoginInfoError::MissingField("wxsid"));
        }
        if info.skey.is_empty() {
            return Err(LoginInfoError::MissingField("skey"));
        }
        if info.wxuin == 0 {
            return Err(LoginInfoError::MissingField("wxuin"));
        }
        Ok(info)
    }

    /// Build credentials for this identity with a fresh device id.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.wxuin, &self.wxsid, &self.skey, &self.pass_ticket)
    }
}
