//! Outgoing message building.
//!
//! Provides the payloads handed to the transport for sending, revoking and
//! uploading, plus the record kept for a sent message.

use chrono::{DateTime, Duration, TimeZone, Utc};
use quick_xml::escape::escape;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{app_msg_types, msg_types};

/// App id the web client stamps on file messages.
pub const FILE_APP_ID: &str = "wxeb7ec651dd0aefa9";

/// Generate a client-side message id.
///
/// The id is the send time in units of 100ns, so the send time can be
/// recovered from it later.
pub fn generate_local_id() -> String {
    let now = Utc::now();
    let ticks = now.timestamp() * 10_000_000 + i64::from(now.timestamp_subsec_nanos() / 100);
    // low digits jittered: two sends in one tick must differ
    let jitter: i64 = rand::thread_rng().gen_range(0..100);
    (ticks - ticks % 100 + jitter).to_string()
}

/// Recover the send time encoded in a local id.
pub fn local_id_time(local_id: &str) -> Option<DateTime<Utc>> {
    let ticks: i64 = local_id.parse().ok()?;
    Utc.timestamp_opt(ticks / 10_000_000, 0).single()
}

/// Message body posted by the send endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutgoingMessage {
    #[serde(rename = "Type")]
    pub msg_type: i32,
    pub content: String,
    pub from_user_name: String,
    pub to_user_name: String,
    #[serde(rename = "LocalID")]
    pub local_id: String,
    pub client_msg_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
}

impl OutgoingMessage {
    pub fn new(
        msg_type: i32,
        content: impl Into<String>,
        from_user_name: impl Into<String>,
        to_user_name: impl Into<String>,
        media_id: Option<String>,
    ) -> Self {
        let id = generate_local_id();
        Self {
            msg_type,
            content: content.into(),
            from_user_name: from_user_name.into(),
            to_user_name: to_user_name.into(),
            local_id: id.clone(),
            client_msg_id: id,
            media_id,
        }
    }

    /// Build a text message.
    pub fn text(
        content: impl Into<String>,
        from_user_name: impl Into<String>,
        to_user_name: impl Into<String>,
    ) -> Self {
        Self::new(msg_types::TEXT, content, from_user_name, to_user_name, None)
    }

    /// Build a message pointing at an already uploaded media id.
    pub fn media(
        msg_type: i32,
        from_user_name: impl Into<String>,
        to_user_name: impl Into<String>,
        media_id: impl Into<String>,
    ) -> Self {
        Self::new(msg_type, "", from_user_name, to_user_name, Some(media_id.into()))
    }
}

/// What an upload will be sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaUploadKind {
    Image,
    Video,
    File,
}

impl MediaUploadKind {
    pub fn msg_type(&self) -> i32 {
        match self {
            MediaUploadKind::Image => msg_types::IMAGE,
            MediaUploadKind::Video => msg_types::VIDEO,
            MediaUploadKind::File => msg_types::APP,
        }
    }
}

/// A file to upload, then send as a media message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub kind: MediaUploadKind,
    pub from_user_name: String,
    pub to_user_name: String,
    pub file_name: String,
    pub data: Vec<u8>,
    pub local_id: String,
}

impl MediaUpload {
    pub fn new(
        kind: MediaUploadKind,
        from_user_name: impl Into<String>,
        to_user_name: impl Into<String>,
        file_name: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            from_user_name: from_user_name.into(),
            to_user_name: to_user_name.into(),
            file_name: file_name.into(),
            data,
            local_id: generate_local_id(),
        }
    }

    /// The message that delivers this upload once the server has assigned
    /// it `media_id`.
    ///
    /// Files travel as an app message whose body points at the attachment.
    pub fn message(&self, media_id: impl Into<String>) -> OutgoingMessage {
        let media_id = media_id.into();
        let mut msg = match self.kind {
            MediaUploadKind::File => OutgoingMessage::new(
                msg_types::APP,
                self.attachment_xml(&media_id),
                self.from_user_name.as_str(),
                self.to_user_name.as_str(),
                None,
            ),
            kind => OutgoingMessage::media(
                kind.msg_type(),
                self.from_user_name.as_str(),
                self.to_user_name.as_str(),
                media_id,
            ),
        };
        msg.local_id = self.local_id.clone();
        msg.client_msg_id = self.local_id.clone();
        msg
    }

    fn attachment_xml(&self, attach_id: &str) -> String {
        let ext = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default();
        format!(
            "<appmsg appid=\"{}\" sdkver=\"\"><title>{}</title><des></des><action></action>\
             <type>{}</type><content></content><url></url><lowurl></lowurl>\
             <appattach><totallen>{}</totallen><attachid>{}</attachid><fileext>{}</fileext>\
             </appattach><extinfo></extinfo></appmsg>",
            FILE_APP_ID,
            escape(self.file_name.as_str()),
            app_msg_types::ATTACH,
            self.data.len(),
            escape(attach_id),
            escape(ext),
        )
    }
}

/// Body posted to accept a friend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendVerification {
    pub user_name: String,
    /// Ticket carried by the request's recommend info.
    pub ticket: String,
    pub verify_content: String,
}

/// Server acknowledgement of a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendReceipt {
    #[serde(rename = "MsgID")]
    pub msg_id: String,
    #[serde(rename = "LocalID")]
    pub local_id: String,
}

/// Body posted to revoke a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RevokeRequest {
    pub client_msg_id: String,
    pub svr_msg_id: String,
    pub to_user_name: String,
}

/// A message the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to_user_name: String,
    pub client_msg_id: String,
    /// Server-assigned id.
    pub msg_id: String,
    pub sent_at: DateTime<Utc>,
}

impl SentMessage {
    pub fn new(to_user_name: impl Into<String>, client_msg_id: impl Into<String>, receipt: SendReceipt) -> Self {
        let client_msg_id = client_msg_id.into();
        let sent_at = local_id_time(&client_msg_id).unwrap_or_else(Utc::now);
        Self {
            to_user_name: to_user_name.into(),
            client_msg_id,
            msg_id: receipt.msg_id,
            sent_at,
        }
    }

    /// Whether the message is still inside the revoke window at `now`.
    pub fn can_revoke(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.sent_at < window
    }

    pub fn revoke_request(&self) -> RevokeRequest {
        RevokeRequest {
            client_msg_id: self.client_msg_id.clone(),
            svr_msg_id: self.msg_id.clone(),
            to_user_name: self.to_user_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_encodes_send_time() {
        let before = Utc::now().timestamp();
        let id = generate_local_id();
        let at = local_id_time(&id).unwrap().timestamp();
        assert!(at >= before - 1 && at <= Utc::now().timestamp());
    }

    #[test]
    fn test_build_text_message() {
        let msg = OutgoingMessage::text("hello", "@me", "@friend");
        assert_eq!(msg.msg_type, msg_types::TEXT);
        assert_eq!(msg.local_id, msg.client_msg_id);
        assert!(msg.media_id.is_none());

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["Type"], 1);
        assert_eq!(json["ToUserName"], "@friend");
        assert!(json.get("MediaId").is_none());
    }

    #[test]
    fn test_upload_becomes_media_message() {
        let upload = MediaUpload::new(MediaUploadKind::Image, "@me", "@friend", "cat.png", vec![1, 2]);
        let msg = upload.message("media-1");
        assert_eq!(msg.msg_type, msg_types::IMAGE);
        assert_eq!(msg.media_id.as_deref(), Some("media-1"));
        assert_eq!(msg.local_id, upload.local_id);
        assert!(msg.content.is_empty());

        let video = MediaUpload::new(MediaUploadKind::Video, "@me", "@friend", "clip.mp4", vec![]);
        assert_eq!(video.message("media-2").msg_type, msg_types::VIDEO);
    }

    #[test]
    fn test_file_upload_becomes_app_message() {
        let upload = MediaUpload::new(MediaUploadKind::File, "@me", "@friend", "a&b.pdf", vec![0; 42]);
        let msg = upload.message("@attach_1");
        assert_eq!(msg.msg_type, msg_types::APP);
        assert!(msg.media_id.is_none());
        assert!(msg.content.contains("<title>a&amp;b.pdf</title>"));
        assert!(msg.content.contains("<type>6</type>"));
        assert!(msg.content.contains("<totallen>42</totallen>"));
        assert!(msg.content.contains("<attachid>@attach_1</attachid>"));
        assert!(msg.content.contains("<fileext>pdf</fileext>"));
        assert!(msg.content.contains(FILE_APP_ID));
    }

    #[test]
    fn test_revoke_window() {
        let receipt = SendReceipt {
            msg_id: "svr-1".into(),
            local_id: String::new(),
        };
        let sent = SentMessage::new("@friend", generate_local_id(), receipt);
        let window = Duration::seconds(120);
        assert!(sent.can_revoke(window, Utc::now()));
        assert!(!sent.can_revoke(window, Utc::now() + Duration::seconds(121)));

        let request = sent.revoke_request();
        assert_eq!(request.svr_msg_id, "svr-1");
        assert_eq!(request.to_user_name, "@friend");
    }
}
