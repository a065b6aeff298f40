//! Inbound message model.
//!
//! A [`RawEvent`] is the untyped item taken from a sync batch. The classifier
//! turns it into a [`Message`], which is immutable apart from its
//! [`Annotations`] store.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Numeric message type codes used on the wire.
pub mod msg_types {
    pub const TEXT: i32 = 1;
    pub const IMAGE: i32 = 3;
    pub const VOICE: i32 = 34;
    pub const VERIFY: i32 = 37;
    pub const POSSIBLE_FRIEND: i32 = 40;
    pub const SHARE_CARD: i32 = 42;
    pub const VIDEO: i32 = 43;
    pub const STICKER: i32 = 47;
    pub const LOCATION: i32 = 48;
    pub const APP: i32 = 49;
    pub const VOIP: i32 = 50;
    pub const STATUS_NOTIFY: i32 = 51;
    pub const VOIP_NOTIFY: i32 = 52;
    pub const VOIP_INVITE: i32 = 53;
    pub const MICRO_VIDEO: i32 = 62;
    pub const SYS_NOTICE: i32 = 9999;
    pub const SYSTEM: i32 = 10000;
    pub const RECALLED: i32 = 10002;
}

/// Sub-type codes carried by app messages (`AppMsgType`).
pub mod app_msg_types {
    pub const TEXT: i32 = 1;
    pub const IMAGE: i32 = 2;
    pub const AUDIO: i32 = 3;
    pub const VIDEO: i32 = 4;
    pub const URL: i32 = 5;
    pub const ATTACH: i32 = 6;
    pub const OPEN: i32 = 7;
    pub const EMOJI: i32 = 8;
    pub const VOICE_REMIND: i32 = 9;
    pub const SCAN_GOOD: i32 = 10;
    pub const GOOD: i32 = 13;
    pub const EMOTION: i32 = 15;
    pub const CARD_TICKET: i32 = 16;
    pub const REALTIME_SHARE_LOCATION: i32 = 17;
    pub const TRANSFERS: i32 = 2000;
    pub const RED_ENVELOPES: i32 = 2001;
    pub const READER_TYPE: i32 = 100001;
}

/// Sender id the server uses for friend requests.
pub const FRIEND_REQUEST_SENDER: &str = "fmessage";

const TRANSFER_FILE_NAME: &str = "微信转账";
const SENT_RED_PACKET_TEXT: &str = "发出红包，请在手机上查看";
const RECEIVED_RED_PACKET_TEXT: &str = "收到红包，请在手机上查看";

/// One inbound item exactly as it arrived in a sync batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(pub Value);

impl RawEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Extra data attached to friend requests and shared cards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RecommendInfo {
    pub op_code: i32,
    pub scene: i32,
    pub sex: i32,
    pub verify_flag: i32,
    pub attr_status: i64,
    #[serde(rename = "QQNum")]
    pub qq_num: i64,
    pub alias: String,
    pub city: String,
    pub content: String,
    pub nick_name: String,
    pub province: String,
    pub signature: String,
    pub ticket: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    #[serde(rename = "Type")]
    pub kind: i32,
    #[serde(rename = "AppID")]
    pub app_id: String,
}

/// Fixed fields decoded from a raw event, content left exactly as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MessageFields {
    pub msg_id: String,
    pub new_msg_id: i64,
    pub msg_type: i32,
    pub app_msg_type: i32,
    pub sub_msg_type: i32,
    pub from_user_name: String,
    pub to_user_name: String,
    pub content: String,
    pub create_time: i64,
    pub status: i32,
    pub status_notify_code: i32,
    pub status_notify_user_name: String,
    pub img_status: i32,
    pub img_width: i32,
    pub img_height: i32,
    pub voice_length: i32,
    pub play_length: i64,
    pub forward_flag: i32,
    pub has_product_id: i32,
    pub media_id: String,
    pub file_name: String,
    pub file_size: String,
    pub encry_file_name: String,
    pub url: String,
    pub ticket: String,
    pub ori_content: String,
    pub recommend_info: RecommendInfo,
    pub app_info: AppInfo,
}

/// Who a message is between, decided at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    Unknown,
    System,
    Friend,
    Group,
    OfficialAccount,
}

impl MessageCategory {
    /// One-letter tag used when rendering a message line.
    pub fn tag(&self) -> &'static str {
        match self {
            MessageCategory::Unknown => "U",
            MessageCategory::System => "S",
            MessageCategory::Friend => "F",
            MessageCategory::Group => "G",
            MessageCategory::OfficialAccount => "P",
        }
    }
}

/// Coarse kind derived from the message type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Location,
    Image,
    Voice,
    FriendRequest,
    PossibleFriend,
    Card,
    Video,
    Sticker,
    App,
    Voip,
    StatusNotify,
    System,
    SysNotice,
    Recalled,
    Other(i32),
}

/// Why the sender or receiver of a message could not be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("sender {0} not found in contacts")]
    SenderNotFound(String),
    #[error("receiver {0} not found in contacts")]
    ReceiverNotFound(String),
    #[error("can not find sender from system message")]
    SenderIsSystem,
    #[error("member {member} not found in group {group}")]
    SenderNotInGroup { group: String, member: String },
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Failure to decode one of the structured-text substructures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{0} message required")]
    WrongKind(&'static str),
    #[error("invalid xml content: {0}")]
    Xml(String),
}

/// Caller-writable key/value store attached to a message.
///
/// Safe to read and write from several threads at once.
#[derive(Default)]
pub struct Annotations {
    items: RwLock<HashMap<String, Value>>,
}

impl Annotations {
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        items.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.remove(key)
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> HashMap<String, Value> {
        self.items.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Clone for Annotations {
    fn clone(&self) -> Self {
        Self {
            items: RwLock::new(self.snapshot()),
        }
    }
}

impl fmt::Debug for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

/// A classified message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Wire fields; `fields.content` is the content before normalization.
    pub fields: MessageFields,
    /// Normalized content (group sender prefix removed, entities decoded).
    pub content: String,
    pub category: MessageCategory,
    /// In-group sender id, set for group messages not sent by the session user.
    pub sender_in_group: Option<String>,
    pub from_uin: Option<i64>,
    pub to_uin: Option<i64>,
    pub(crate) self_user_name: String,
    pub(crate) is_at: bool,
    pub(crate) resolution_error: Option<ResolutionError>,
    annotations: Annotations,
}

impl Message {
    pub(crate) fn new(fields: MessageFields, self_user_name: impl Into<String>) -> Self {
        Self {
            content: fields.content.clone(),
            fields,
            category: MessageCategory::Unknown,
            sender_in_group: None,
            from_uin: None,
            to_uin: None,
            self_user_name: self_user_name.into(),
            is_at: false,
            resolution_error: None,
            annotations: Annotations::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.fields.msg_id
    }

    pub fn from_user_name(&self) -> &str {
        &self.fields.from_user_name
    }

    pub fn to_user_name(&self) -> &str {
        &self.fields.to_user_name
    }

    /// Content exactly as received, before any normalization.
    pub fn raw_content(&self) -> &str {
        &self.fields.content
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.fields.create_time, 0).single()
    }

    pub fn is_at(&self) -> bool {
        self.is_at
    }

    pub fn is_sent_by_self(&self) -> bool {
        !self.self_user_name.is_empty() && self.fields.from_user_name == self.self_user_name
    }

    /// Why sender/receiver resolution failed, if it did.
    pub fn resolution_error(&self) -> Option<&ResolutionError> {
        self.resolution_error.as_ref()
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.annotations.set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.annotations.get(key)
    }

    pub fn kind(&self) -> MessageKind {
        use msg_types::*;
        match self.fields.msg_type {
            TEXT if self.fields.url.is_empty() => MessageKind::Text,
            TEXT | LOCATION => MessageKind::Location,
            IMAGE => MessageKind::Image,
            VOICE => MessageKind::Voice,
            VERIFY => MessageKind::FriendRequest,
            POSSIBLE_FRIEND => MessageKind::PossibleFriend,
            SHARE_CARD => MessageKind::Card,
            VIDEO | MICRO_VIDEO => MessageKind::Video,
            STICKER => MessageKind::Sticker,
            APP => MessageKind::App,
            VOIP | VOIP_NOTIFY | VOIP_INVITE => MessageKind::Voip,
            STATUS_NOTIFY => MessageKind::StatusNotify,
            SYSTEM => MessageKind::System,
            SYS_NOTICE => MessageKind::SysNotice,
            RECALLED => MessageKind::Recalled,
            other => MessageKind::Other(other),
        }
    }

    pub fn is_text(&self) -> bool {
        self.fields.msg_type == msg_types::TEXT && self.fields.url.is_empty()
    }

    pub fn is_map(&self) -> bool {
        self.fields.msg_type == msg_types::TEXT && !self.fields.url.is_empty()
    }

    pub fn is_picture(&self) -> bool {
        self.fields.msg_type == msg_types::IMAGE
    }

    pub fn is_sticker(&self) -> bool {
        self.fields.msg_type == msg_types::STICKER
    }

    pub fn is_voice(&self) -> bool {
        self.fields.msg_type == msg_types::VOICE
    }

    pub fn is_friend_add(&self) -> bool {
        self.fields.msg_type == msg_types::VERIFY
            && self.fields.from_user_name == FRIEND_REQUEST_SENDER
    }

    pub fn is_card(&self) -> bool {
        self.fields.msg_type == msg_types::SHARE_CARD
    }

    pub fn is_video(&self) -> bool {
        matches!(self.fields.msg_type, msg_types::VIDEO | msg_types::MICRO_VIDEO)
    }

    /// App messages: shared links, files, mini programs and the like.
    pub fn is_media(&self) -> bool {
        self.fields.msg_type == msg_types::APP
    }

    pub fn is_recalled(&self) -> bool {
        self.fields.msg_type == msg_types::RECALLED
    }

    pub fn is_system(&self) -> bool {
        self.fields.msg_type == msg_types::SYSTEM
    }

    pub fn is_notify(&self) -> bool {
        self.fields.msg_type == msg_types::STATUS_NOTIFY && self.fields.status_notify_code != 0
    }

    pub fn is_status_notify(&self) -> bool {
        self.fields.msg_type == msg_types::STATUS_NOTIFY
    }

    pub fn is_sys_notice(&self) -> bool {
        self.fields.msg_type == msg_types::SYS_NOTICE
    }

    pub fn is_article(&self) -> bool {
        self.fields.app_msg_type == app_msg_types::URL
    }

    pub fn is_transfer_accounts(&self) -> bool {
        self.is_media() && self.fields.file_name == TRANSFER_FILE_NAME
    }

    pub fn is_send_red_packet(&self) -> bool {
        self.is_system() && self.content == SENT_RED_PACKET_TEXT
    }

    pub fn is_receive_red_packet(&self) -> bool {
        self.is_system() && self.content == RECEIVED_RED_PACKET_TEXT
    }

    /// Whether the message carries a downloadable payload.
    pub fn has_file(&self) -> bool {
        self.is_picture()
            || self.is_voice()
            || self.is_video()
            || self.is_sticker()
            || (self.is_media() && self.fields.app_msg_type == app_msg_types::ATTACH)
    }

    pub fn card(&self) -> Result<Card, DecodeError> {
        if !self.is_card() {
            return Err(DecodeError::WrongKind("card"));
        }
        decode_xml(&self.content)
    }

    pub fn friend_add(&self) -> Result<FriendAddMessage, DecodeError> {
        if !self.is_friend_add() {
            return Err(DecodeError::WrongKind("friend add"));
        }
        decode_xml(&self.content)
    }

    pub fn revoke_notice(&self) -> Result<RevokeNotice, DecodeError> {
        if !self.is_recalled() {
            return Err(DecodeError::WrongKind("recalled"));
        }
        decode_xml(&self.content)
    }

    pub fn app_data(&self) -> Result<AppMessageData, DecodeError> {
        if !self.is_media() {
            return Err(DecodeError::WrongKind("media"));
        }
        decode_xml(&self.content)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:?}:{}>", self.kind(), self.fields.msg_id)
    }
}

fn decode_xml<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, DecodeError> {
    quick_xml::de::from_str(content.trim()).map_err(|e| DecodeError::Xml(e.to_string()))
}

/// Shared contact card (`<msg username=... />`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Card {
    #[serde(rename = "@username")]
    pub user_name: String,
    #[serde(rename = "@nickname")]
    pub nick_name: String,
    /// Account alias of the carded user.
    #[serde(rename = "@alias")]
    pub alias: String,
    #[serde(rename = "@province")]
    pub province: String,
    #[serde(rename = "@city")]
    pub city: String,
    #[serde(rename = "@sign")]
    pub sign: String,
    #[serde(rename = "@sex")]
    pub sex: i32,
    #[serde(rename = "@certflag")]
    pub cert_flag: i32,
    #[serde(rename = "@certinfo")]
    pub cert_info: String,
    #[serde(rename = "@bigheadimgurl")]
    pub big_head_img_url: String,
    #[serde(rename = "@smallheadimgurl")]
    pub small_head_img_url: String,
    #[serde(rename = "@brandIconUrl")]
    pub brand_icon_url: String,
    #[serde(rename = "@regionCode")]
    pub region_code: String,
}

/// Friend request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FriendAddMessage {
    #[serde(rename = "@fromusername")]
    pub from_user_name: String,
    #[serde(rename = "@encryptusername")]
    pub encrypt_user_name: String,
    #[serde(rename = "@fromnickname")]
    pub from_nick_name: String,
    #[serde(rename = "@content")]
    pub content: String,
    #[serde(rename = "@alias")]
    pub alias: String,
    #[serde(rename = "@ticket")]
    pub ticket: String,
    #[serde(rename = "@scene")]
    pub scene: i32,
    #[serde(rename = "@sex")]
    pub sex: i32,
    #[serde(rename = "@opcode")]
    pub op_code: i32,
    #[serde(rename = "@country")]
    pub country: String,
    #[serde(rename = "@province")]
    pub province: String,
    #[serde(rename = "@city")]
    pub city: String,
    #[serde(rename = "@sign")]
    pub sign: String,
    #[serde(rename = "@chatroomusername")]
    pub chat_room_user_name: String,
    #[serde(rename = "@sourceusername")]
    pub source_user_name: String,
    #[serde(rename = "@bigheadimgurl")]
    pub big_head_img_url: String,
    #[serde(rename = "@smallheadimgurl")]
    pub small_head_img_url: String,
}

/// `<sysmsg type="revokemsg">` notice sent when a message is recalled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RevokeNotice {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "revokemsg")]
    pub revoke: RevokedMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RevokedMessage {
    #[serde(rename = "oldmsgid")]
    pub old_msg_id: i64,
    #[serde(rename = "msgid")]
    pub msg_id: i64,
    pub session: String,
    #[serde(rename = "replacemsg")]
    pub replace_msg: String,
}

/// Body of an app message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppMessageData {
    #[serde(rename = "appmsg")]
    pub app_msg: AppMessage,
    #[serde(rename = "fromusername")]
    pub from_user_name: String,
    pub scene: String,
    #[serde(rename = "appinfo")]
    pub app_info: AppSourceInfo,
    #[serde(rename = "commenturl")]
    pub comment_url: String,
}

impl AppMessageData {
    pub fn is_from_applet(&self) -> bool {
        !self.app_msg.app_id.is_empty()
    }

    pub fn is_article(&self) -> bool {
        self.app_msg.kind == app_msg_types::URL
    }

    pub fn is_file(&self) -> bool {
        self.app_msg.kind == app_msg_types::ATTACH
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppMessage {
    #[serde(rename = "@appid")]
    pub app_id: String,
    #[serde(rename = "@sdkver")]
    pub sdk_ver: String,
    pub title: String,
    pub des: String,
    pub action: String,
    #[serde(rename = "type")]
    pub kind: i32,
    pub content: String,
    pub url: String,
    #[serde(rename = "lowurl")]
    pub low_url: String,
    #[serde(rename = "thumburl")]
    pub thumb_url: String,
    pub md5: String,
    #[serde(rename = "sourceusername")]
    pub source_user_name: String,
    #[serde(rename = "sourcedisplayname")]
    pub source_display_name: String,
    #[serde(rename = "appattach")]
    pub attach: AppAttach,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppAttach {
    #[serde(rename = "totallen")]
    pub total_len: String,
    #[serde(rename = "attachid")]
    pub attach_id: String,
    #[serde(rename = "fileext")]
    pub file_ext: String,
    #[serde(rename = "cdnattachurl")]
    pub cdn_attach_url: String,
    #[serde(rename = "aeskey")]
    pub aes_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppSourceInfo {
    pub version: String,
    #[serde(rename = "appname")]
    pub app_name: String,
}
