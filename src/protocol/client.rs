//! Session engine.
//!
//! [`Engine`] owns exactly one session. Login, hot resume and the sync loop
//! are implemented in sibling modules as further `impl Engine` blocks; this
//! module holds the shared state, the lifetime signal and the outbound
//! operations.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock as StdRwLock};

use chrono::Utc;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::classify;
use super::login::LoginState;
use super::message::{
    FriendVerification, MediaUpload, MediaUploadKind, OutgoingMessage, SentMessage,
};
use super::sync::SyncTask;
use crate::config::EngineConfig;
use crate::state::{Credentials, Session};
use crate::store::{SnapshotStore, StoreError};
use crate::transport::{InvalidationReason, MediaKind, MediaRequest, Transport, TransportError};
use crate::types::{
    app_msg_types, Contact, ContactIndex, Event, Message, RawEvent, SessionEnded,
};

/// Event handler type.
pub type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("session invalidated: {0}")]
    SessionInvalidated(InvalidationReason),
    #[error("login ticket expired")]
    LoginTimeout,
    #[error("login cancelled")]
    LoginCancelled,
    #[error("hot resume rejected: {0}")]
    ResumeRejected(Box<EngineError>),
    #[error("snapshot store error: {0}")]
    Persistence(#[from] StoreError),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("session has ended")]
    SessionEnded,
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl EngineError {
    /// Connection-level failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transport(e) if e.is_transient())
    }
}

pub(crate) struct Inner {
    pub(crate) config: EngineConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) snapshots: Option<Arc<dyn SnapshotStore>>,
    pub(crate) session: RwLock<Session>,
    pub(crate) login: Mutex<LoginState>,
    pub(crate) login_cancel: Mutex<Option<CancellationToken>>,
    pub(crate) lifetime: Mutex<CancellationToken>,
    pub(crate) crash_reason: Mutex<Option<EngineError>>,
    pub(crate) event_handlers: StdRwLock<Vec<EventHandler>>,
    pub(crate) sync_task: Mutex<Option<SyncTask>>,
}

/// Session engine for one account.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    /// Create an engine with the default configuration and no snapshot store.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(EngineConfig::default(), transport)
    }

    /// Create an engine with custom configuration.
    pub fn with_config(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        Self::build(config, transport, None)
    }

    /// Create an engine that persists hot-resume snapshots to `store`.
    pub fn with_store(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self::build(config, transport, Some(store))
    }

    fn build(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                snapshots,
                session: RwLock::new(Session::new()),
                login: Mutex::new(LoginState::Unauthenticated),
                login_cancel: Mutex::new(None),
                lifetime: Mutex::new(CancellationToken::new()),
                crash_reason: Mutex::new(None),
                event_handlers: StdRwLock::new(Vec::new()),
                sync_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Add an event handler.
    ///
    /// Handlers run synchronously on the emitting task and must not
    /// register further handlers.
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut handlers = self.inner.event_handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.push(Box::new(handler));
    }

    /// Emit an event to all handlers.
    pub(crate) fn emit(&self, event: Event) {
        let handlers = self.inner.event_handlers.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler(&event);
        }
    }

    /// Cancellation token released when the session ends.
    pub fn lifetime(&self) -> CancellationToken {
        lock(&self.inner.lifetime).clone()
    }

    /// Whether an authenticated session is running.
    pub async fn is_alive(&self) -> bool {
        if self.lifetime().is_cancelled() {
            return false;
        }
        self.inner.session.read().await.is_authenticated()
    }

    /// Wait until the session ends.
    pub async fn block(&self) -> Result<(), EngineError> {
        let lifetime = self.lifetime();
        if lifetime.is_cancelled() {
            return Err(EngineError::SessionEnded);
        }
        if !self.inner.session.read().await.is_authenticated() {
            return Err(EngineError::NotLoggedIn);
        }
        lifetime.cancelled().await;
        Ok(())
    }

    /// The fatal error that ended the last session, if any.
    pub fn crash_reason(&self) -> Option<EngineError> {
        lock(&self.inner.crash_reason).clone()
    }

    pub async fn current_user(&self) -> Option<Contact> {
        self.inner.session.read().await.self_user.clone()
    }

    /// Copy of the contact index.
    pub async fn contacts(&self) -> ContactIndex {
        self.inner.session.read().await.contacts.clone()
    }

    /// Copy of the whole session state.
    pub async fn session(&self) -> Session {
        self.inner.session.read().await.clone()
    }

    /// End the session without contacting the server.
    pub async fn exit(&self) {
        self.shutdown(None, None).await;
    }

    /// Log out on the server, then end the session.
    pub async fn logout(&self) -> Result<(), EngineError> {
        let (credentials, _) = self.authenticated().await?;
        self.inner.transport.logout(&credentials).await?;
        if let Some(store) = &self.inner.snapshots {
            if let Err(e) = store.clear_snapshot() {
                warn!("Failed to clear hot-resume snapshot: {}", e);
            }
        }
        self.shutdown(None, Some("logout".to_string())).await;
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Records `crash` as the crash reason, notifies handlers, then releases
    /// the lifetime signal.
    pub(crate) async fn shutdown(&self, crash: Option<EngineError>, reason: Option<String>) {
        let reason = reason.or_else(|| crash.as_ref().map(ToString::to_string));
        if let Some(err) = crash {
            *lock(&self.inner.crash_reason) = Some(err);
        }
        *lock(&self.inner.login) = LoginState::Unauthenticated;
        self.inner.session.write().await.clear();
        self.emit(Event::SessionEnded(SessionEnded { reason }));
        self.lifetime().cancel();
        info!("Session ended");
    }

    /// Give the session a live lifetime signal again after a new login.
    pub(crate) fn renew_lifetime(&self) {
        let mut lifetime = lock(&self.inner.lifetime);
        if lifetime.is_cancelled() {
            *lifetime = CancellationToken::new();
            *lock(&self.inner.crash_reason) = None;
        }
    }

    /// Credentials and session user id of a live session.
    pub(crate) async fn authenticated(&self) -> Result<(Credentials, String), EngineError> {
        if self.lifetime().is_cancelled() {
            return Err(EngineError::SessionEnded);
        }
        let session = self.inner.session.read().await;
        match (&session.credentials, &session.self_user) {
            (Some(credentials), Some(user)) => Ok((credentials.clone(), user.user_name.clone())),
            _ => Err(EngineError::NotLoggedIn),
        }
    }

    /// Classify a raw event against the current contact index.
    ///
    /// Unknown contacts are fetched first when the configuration allows it;
    /// a failed fetch only degrades the result.
    pub async fn classify(&self, raw: &RawEvent) -> Message {
        if self.inner.config.fetch_missing_contacts {
            self.fetch_missing_contacts(raw).await;
        }
        let session = self.inner.session.read().await;
        let self_user = session.self_user.clone().unwrap_or_default();
        classify::classify(raw, &session.contacts, &self_user)
    }

    async fn fetch_missing_contacts(&self, raw: &RawEvent) {
        let Ok(fields) = classify::decode_fields(raw) else {
            return;
        };
        let (missing, credentials) = {
            let session = self.inner.session.read().await;
            let self_user = session.self_user.clone().unwrap_or_default();
            (
                classify::unresolved_ids(&fields, &session.contacts, &self_user),
                session.credentials.clone(),
            )
        };
        let Some(credentials) = credentials else {
            return;
        };
        for chunk in missing.chunks(self.inner.config.contact_batch_size.max(1)) {
            match self.inner.transport.fetch_contacts(&credentials, chunk).await {
                Ok(found) => {
                    debug!("Fetched {} of {} missing contacts", found.len(), chunk.len());
                    let mut session = self.inner.session.write().await;
                    for contact in found {
                        session.contacts.upsert(contact);
                    }
                }
                Err(e) => warn!("Failed to fetch contacts {:?}: {}", chunk, e),
            }
        }
    }

    /// Send a text message.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, EngineError> {
        let (credentials, self_name) = self.authenticated().await?;
        let message = OutgoingMessage::text(text, self_name, to);
        let receipt = self.inner.transport.send_message(&credentials, &message).await?;
        Ok(SentMessage::new(to, message.client_msg_id, receipt))
    }

    /// Upload a file and send it.
    pub async fn send_media(
        &self,
        to: &str,
        kind: MediaUploadKind,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<SentMessage, EngineError> {
        let (credentials, self_name) = self.authenticated().await?;
        let upload = MediaUpload::new(kind, self_name, to, file_name, data);
        let media_id = self.inner.transport.upload_media(&credentials, &upload).await?;
        debug!("Uploaded {} as {}", upload.file_name, media_id);
        let message = upload.message(media_id);
        let receipt = self.inner.transport.send_message(&credentials, &message).await?;
        Ok(SentMessage::new(to, message.client_msg_id, receipt))
    }

    /// Answer a received message in the same chat.
    pub async fn reply_text(&self, message: &Message, text: &str) -> Result<SentMessage, EngineError> {
        self.send_text(reply_target(message)?, text).await
    }

    /// Answer a received message with an image, video or file.
    pub async fn reply_media(
        &self,
        message: &Message,
        kind: MediaUploadKind,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<SentMessage, EngineError> {
        self.send_media(reply_target(message)?, kind, file_name, data)
            .await
    }

    /// Accept the friend request carried by `message`.
    pub async fn accept_friend(&self, message: &Message, verify_content: &str) -> Result<(), EngineError> {
        if !message.is_friend_add() {
            return Err(EngineError::InvalidMessage(format!(
                "{} is not a friend request",
                message
            )));
        }
        let (credentials, _) = self.authenticated().await?;
        let info = &message.fields.recommend_info;
        let verification = FriendVerification {
            user_name: info.user_name.clone(),
            ticket: info.ticket.clone(),
            verify_content: verify_content.to_string(),
        };
        self.inner.transport.accept_friend(&credentials, &verification).await?;
        info!("Accepted friend request from {}", info.user_name);
        Ok(())
    }

    /// Download the payload of a picture, voice, video, sticker or file message.
    pub async fn fetch_media(&self, message: &Message) -> Result<Vec<u8>, EngineError> {
        let kind = if message.is_picture() || message.is_sticker() {
            MediaKind::Image
        } else if message.is_voice() {
            MediaKind::Voice
        } else if message.is_video() {
            MediaKind::Video
        } else if message.is_media() && message.fields.app_msg_type == app_msg_types::ATTACH {
            MediaKind::Attachment
        } else {
            return Err(EngineError::InvalidMessage(format!("{} carries no file", message)));
        };
        let (credentials, _) = self.authenticated().await?;
        let request = MediaRequest {
            kind,
            msg_id: message.id().to_string(),
            from_user_name: message.from_user_name().to_string(),
            media_id: message.fields.media_id.clone(),
            file_name: message.fields.file_name.clone(),
            encry_file_name: message.fields.encry_file_name.clone(),
        };
        Ok(self.inner.transport.fetch_media(&credentials, &request).await?)
    }

    /// Mark a chat as read.
    pub async fn mark_read(&self, chat_user_name: &str) -> Result<(), EngineError> {
        let (credentials, _) = self.authenticated().await?;
        Ok(self.inner.transport.mark_read(&credentials, chat_user_name).await?)
    }

    /// Revoke a sent message while it is still inside the revoke window.
    pub async fn revoke(&self, sent: &SentMessage) -> Result<(), EngineError> {
        if !sent.can_revoke(self.inner.config.revoke_window(), Utc::now()) {
            return Err(EngineError::InvalidMessage(format!(
                "message {} can no longer be revoked",
                sent.msg_id
            )));
        }
        let (credentials, _) = self.authenticated().await?;
        Ok(self
            .inner
            .transport
            .revoke_message(&credentials, &sent.revoke_request())
            .await?)
    }
}

// The peer of a received message; for our own messages, whoever they went to.
fn reply_target(message: &Message) -> Result<&str, EngineError> {
    let to = if message.is_sent_by_self() {
        message.to_user_name()
    } else {
        message.from_user_name()
    };
    if to.is_empty() {
        return Err(EngineError::InvalidMessage(format!("{} has no peer", message)));
    }
    Ok(to)
}
