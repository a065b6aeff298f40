//! Scripted transport for engine tests.
//!
//! Each endpoint replays a queue of canned results. Empty queues fall back
//! to a benign default: a fresh ticket, a "wait" login check, a default init,
//! an idle sync check after a short sleep, an empty batch.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::protocol::qr::status_codes;
use crate::state::Cookie;
use crate::types::SyncKeyEntry;

pub(crate) const LOGIN_INFO: &str = "<error><ret>0</ret><message></message><skey>@crypt_1</skey>\
    <wxsid>sid-1</wxsid><wxuin>1001</wxuin><pass_ticket>pt-1</pass_ticket>\
    <isgrayscale>1</isgrayscale></error>";

pub(crate) fn cursor(val: u64) -> SyncCursor {
    SyncCursor::new(vec![
        SyncKeyEntry { key: 1, val },
        SyncKeyEntry { key: 2, val },
    ])
}

pub(crate) fn login_check(code: u16) -> LoginCheck {
    let payload = if code == status_codes::SUCCESS {
        LOGIN_INFO.to_string()
    } else {
        format!("window.code={code};")
    };
    LoginCheck { code, payload }
}

pub(crate) fn self_user() -> Contact {
    Contact {
        uin: 1001,
        ..Contact::new("@me", "Alice")
    }
}

pub(crate) fn session_init() -> SessionInit {
    SessionInit {
        user: self_user(),
        contacts: vec![Contact::new("@bob", "Bob")],
        cursor: cursor(10),
    }
}

pub(crate) fn sync_check(selector: i64) -> SyncCheckResponse {
    SyncCheckResponse {
        retcode: retcodes::OK,
        selector,
        cursor: None,
    }
}

#[derive(Default)]
pub(crate) struct CallCounts {
    pub tickets: AtomicUsize,
    pub login_checks: AtomicUsize,
    pub inits: AtomicUsize,
    pub notifies: AtomicUsize,
    pub sync_checks: AtomicUsize,
    pub batches: AtomicUsize,
    pub contact_fetches: AtomicUsize,
    pub logouts: AtomicUsize,
}

pub(crate) fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    pub login_checks: Mutex<VecDeque<Result<LoginCheck, TransportError>>>,
    pub inits: Mutex<VecDeque<Result<SessionInit, TransportError>>>,
    /// Each check is served after its delay.
    pub sync_checks: Mutex<VecDeque<(Duration, Result<SyncCheckResponse, TransportError>)>>,
    pub batches: Mutex<VecDeque<Result<SyncBatch, TransportError>>>,
    /// Records served by `fetch_contacts`.
    pub directory: Mutex<HashMap<String, Contact>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub revoked: Mutex<Vec<RevokeRequest>>,
    pub uploads: Mutex<Vec<MediaUpload>>,
    pub media_requests: Mutex<Vec<MediaRequest>>,
    pub read_chats: Mutex<Vec<String>>,
    pub verifications: Mutex<Vec<FriendVerification>>,
    pub polled_cursors: Mutex<Vec<SyncCursor>>,
    pub state: Mutex<TransportState>,
    pub calls: CallCounts,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login_checks(&self, checks: impl IntoIterator<Item = LoginCheck>) {
        self.login_checks.lock().unwrap().extend(checks.into_iter().map(Ok));
    }

    pub fn push_init(&self, init: Result<SessionInit, TransportError>) {
        self.inits.lock().unwrap().push_back(init);
    }

    pub fn push_sync_check(&self, check: Result<SyncCheckResponse, TransportError>) {
        self.push_delayed_sync_check(Duration::ZERO, check);
    }

    pub fn push_delayed_sync_check(
        &self,
        delay: Duration,
        check: Result<SyncCheckResponse, TransportError>,
    ) {
        self.sync_checks.lock().unwrap().push_back((delay, check));
    }

    pub fn push_batch(&self, batch: SyncBatch) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn add_directory_contact(&self, contact: Contact) {
        self.directory
            .lock()
            .unwrap()
            .insert(contact.user_name.clone(), contact);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request_login_ticket(&self) -> Result<LoginTicket, TransportError> {
        let n = self.calls.tickets.fetch_add(1, Ordering::SeqCst);
        Ok(LoginTicket::new(format!("uuid-{}", n + 1)))
    }

    async fn poll_login_ticket(&self, _ticket: &LoginTicket) -> Result<LoginCheck, TransportError> {
        self.calls.login_checks.fetch_add(1, Ordering::SeqCst);
        let next = self.login_checks.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(login_check(status_codes::WAIT))
            }
        }
    }

    async fn init_session(&self, _credentials: &Credentials) -> Result<SessionInit, TransportError> {
        self.calls.inits.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .cookies
            .set("https://wx.qq.com", Cookie::new("webwx_data_ticket", "t-1"));
        let next = self.inits.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(session_init()))
    }

    async fn notify_presence(
        &self,
        _credentials: &Credentials,
        _init: &SessionInit,
    ) -> Result<(), TransportError> {
        self.calls.notifies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_sync(
        &self,
        _credentials: &Credentials,
        cursor: &SyncCursor,
    ) -> Result<SyncCheckResponse, TransportError> {
        self.calls.sync_checks.fetch_add(1, Ordering::SeqCst);
        self.polled_cursors.lock().unwrap().push(cursor.clone());
        let next = self.sync_checks.lock().unwrap().pop_front();
        match next {
            Some((delay, result)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(sync_check(0))
            }
        }
    }

    async fn fetch_sync_batch(
        &self,
        _credentials: &Credentials,
        _cursor: &SyncCursor,
    ) -> Result<SyncBatch, TransportError> {
        self.calls.batches.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(SyncBatch::default()))
    }

    async fn fetch_contacts(
        &self,
        _credentials: &Credentials,
        user_names: &[String],
    ) -> Result<Vec<Contact>, TransportError> {
        self.calls.contact_fetches.fetch_add(1, Ordering::SeqCst);
        let directory = self.directory.lock().unwrap();
        Ok(user_names
            .iter()
            .filter_map(|id| directory.get(id).cloned())
            .collect())
    }

    async fn send_message(
        &self,
        _credentials: &Credentials,
        message: &OutgoingMessage,
    ) -> Result<SendReceipt, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(SendReceipt {
            msg_id: format!("svr-{}", sent.len()),
            local_id: message.local_id.clone(),
        })
    }

    async fn upload_media(
        &self,
        _credentials: &Credentials,
        upload: &MediaUpload,
    ) -> Result<String, TransportError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(upload.clone());
        Ok(format!("@media_{}", uploads.len()))
    }

    async fn fetch_media(
        &self,
        _credentials: &Credentials,
        request: &MediaRequest,
    ) -> Result<Vec<u8>, TransportError> {
        self.media_requests.lock().unwrap().push(request.clone());
        Ok(request.msg_id.as_bytes().to_vec())
    }

    async fn mark_read(
        &self,
        _credentials: &Credentials,
        chat_user_name: &str,
    ) -> Result<(), TransportError> {
        self.read_chats.lock().unwrap().push(chat_user_name.to_string());
        Ok(())
    }

    async fn revoke_message(
        &self,
        _credentials: &Credentials,
        request: &RevokeRequest,
    ) -> Result<(), TransportError> {
        self.revoked.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn accept_friend(
        &self,
        _credentials: &Credentials,
        verification: &FriendVerification,
    ) -> Result<(), TransportError> {
        self.verifications.lock().unwrap().push(verification.clone());
        Ok(())
    }

    async fn logout(&self, _credentials: &Credentials) -> Result<(), TransportError> {
        self.calls.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn export_state(&self) -> TransportState {
        self.state.lock().unwrap().clone()
    }

    fn restore_state(&self, state: &TransportState) {
        *self.state.lock().unwrap() = state.clone();
    }
}
