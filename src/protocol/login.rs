//! QR login state machine.
//!
//! `Unauthenticated -> TicketIssued -> (scanned) -> Authenticated`, ending in
//! `Expired` when the ticket times out or `Cancelled` when the caller gives up.

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::client::{lock, Engine, EngineError};
use super::qr::{LoginInfo, LoginStatus};
use crate::state::{Credentials, LoginTicket};
use crate::store::{HotResumeSnapshot, SnapshotStore, StoreError};
use crate::types::{Contact, CursorUpdate, Event, LoggedIn, Scanned, TicketIssued};

/// Where the login handshake stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    TicketIssued { ticket: LoginTicket, scanned: bool },
    Authenticated,
    /// The ticket timed out; start over with a new one.
    Expired,
    Cancelled,
}

/// Result of a successful login or resume.
#[derive(Debug, Clone)]
pub struct LoginReport {
    pub self_user: Contact,
    /// Set when the hot-resume snapshot could not be written. The login
    /// itself still succeeded.
    pub snapshot_error: Option<StoreError>,
    /// Set when a stored snapshot could not be read and a fresh login was
    /// done instead.
    pub resume_error: Option<StoreError>,
}

impl Engine {
    pub fn login_state(&self) -> LoginState {
        lock(&self.inner.login).clone()
    }

    /// Request a new login ticket and announce it to event handlers.
    pub async fn begin_login(&self) -> Result<LoginTicket, EngineError> {
        *lock(&self.inner.login_cancel) = Some(CancellationToken::new());
        let ticket = self.inner.transport.request_login_ticket().await?;
        info!("Login ticket issued: {}", ticket.uuid);

        *lock(&self.inner.login) = LoginState::TicketIssued {
            ticket: ticket.clone(),
            scanned: false,
        };
        self.inner.session.write().await.ticket = Some(ticket.clone());
        self.emit(Event::TicketIssued(TicketIssued {
            qr_url: self.inner.config.qr_login_url(&ticket.uuid),
            ticket: ticket.clone(),
        }));
        Ok(ticket)
    }

    /// Poll the ticket until the login succeeds, expires or is cancelled.
    pub async fn poll_login(&self, ticket: &LoginTicket) -> Result<LoginReport, EngineError> {
        let cancel = lock(&self.inner.login_cancel)
            .get_or_insert_with(CancellationToken::new)
            .clone();
        loop {
            let check = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Login cancelled");
                    self.abandon_ticket(LoginState::Cancelled).await;
                    return Err(EngineError::LoginCancelled);
                }
                check = self.inner.transport.poll_login_ticket(ticket) => check?,
            };

            match LoginStatus::from_code(check.code) {
                Some(LoginStatus::Success) => {
                    lock(&self.inner.login_cancel).take();
                    return self.complete_login(&check.payload).await;
                }
                Some(LoginStatus::Scanned) => {
                    debug!("Login ticket scanned");
                    if let LoginState::TicketIssued { scanned, .. } = &mut *lock(&self.inner.login) {
                        *scanned = true;
                    }
                    self.emit(Event::Scanned(Scanned {
                        payload: check.payload,
                    }));
                }
                Some(LoginStatus::Timeout) => {
                    info!("Login ticket expired");
                    self.abandon_ticket(LoginState::Expired).await;
                    return Err(EngineError::LoginTimeout);
                }
                Some(LoginStatus::Waiting) => {}
                None => {
                    self.abandon_ticket(LoginState::Unauthenticated).await;
                    return Err(EngineError::Protocol(format!(
                        "unexpected login status code {}",
                        check.code
                    )));
                }
            }
        }
    }

    /// Issue a ticket and wait for it to be confirmed.
    pub async fn login(&self) -> Result<LoginReport, EngineError> {
        let ticket = self.begin_login().await?;
        self.poll_login(&ticket).await
    }

    /// Abort a login in progress. Returns whether one was waiting.
    pub fn cancel_login(&self) -> bool {
        match lock(&self.inner.login_cancel).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Turn a confirmed login payload into an authenticated session.
    ///
    /// The session is only touched once the init exchange and the presence
    /// notification have both succeeded.
    pub async fn complete_login(&self, payload: &str) -> Result<LoginReport, EngineError> {
        let established = match LoginInfo::parse(payload) {
            Ok(info) => self.establish(info.credentials(), true).await,
            Err(e) => Err(EngineError::Protocol(e.to_string())),
        };
        match established {
            Ok(self_user) => {
                info!("Logged in as {}", self_user.name());
                Ok(self.finish_login(self_user).await)
            }
            Err(e) => {
                self.abandon_ticket(LoginState::Unauthenticated).await;
                Err(e)
            }
        }
    }

    async fn abandon_ticket(&self, state: LoginState) {
        lock(&self.inner.login_cancel).take();
        *lock(&self.inner.login) = state;
        self.inner.session.write().await.ticket = None;
    }

    /// Run the init exchange for `credentials` and install the result.
    ///
    /// A fresh login takes the server's cursor as is; a resumed session only
    /// lets it move the stored cursor forward.
    pub(crate) async fn establish(
        &self,
        credentials: Credentials,
        fresh: bool,
    ) -> Result<Contact, EngineError> {
        let init = self.inner.transport.init_session(&credentials).await?;
        self.inner.transport.notify_presence(&credentials, &init).await?;

        let transport_state = self.inner.transport.export_state();
        let self_user = init.user.clone();
        {
            let mut session = self.inner.session.write().await;
            session.credentials = Some(credentials);
            session.self_user = Some(init.user);
            session.contacts = init.contacts.into_iter().collect();
            if fresh {
                session.cursor = init.cursor;
            } else if session.cursor.advance(init.cursor) == CursorUpdate::Stale {
                warn!("Init returned a cursor older than the stored one; keeping the stored one");
            }
            session.transport = transport_state;
        }
        self.renew_lifetime();
        *lock(&self.inner.login) = LoginState::Authenticated;
        Ok(self_user)
    }

    /// Persist a snapshot if configured and announce the login.
    pub(crate) async fn finish_login(&self, self_user: Contact) -> LoginReport {
        let mut snapshot_error = None;
        if self.inner.config.persist_on_login {
            if let Some(store) = &self.inner.snapshots {
                if let Err(e) = self.persist_snapshot(store.as_ref()).await {
                    warn!("Failed to persist hot-resume snapshot: {}", e);
                    snapshot_error = Some(e);
                }
            }
        }
        self.emit(Event::LoggedIn(LoggedIn {
            self_user: self_user.clone(),
        }));
        LoginReport {
            self_user,
            snapshot_error,
            resume_error: None,
        }
    }

    /// Serialize the session's resumable state into `sink`.
    pub async fn persist_snapshot(
        &self,
        sink: &dyn SnapshotStore,
    ) -> Result<(), StoreError> {
        let snapshot = {
            let session = self.inner.session.read().await;
            HotResumeSnapshot::capture(&session)
        };
        let snapshot = snapshot.ok_or(StoreError::NotFound)?;
        sink.write_snapshot(&snapshot.to_bytes()?)
    }
}
