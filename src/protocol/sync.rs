//! Long-poll sync loop.
//!
//! One background task per session polls for change notifications, fetches
//! announced batches, applies contact deltas and hands every classified
//! message to the caller's handler in arrival order.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{lock, Engine, EngineError};
use crate::transport::SyncBatch;
use crate::types::{CursorUpdate, Event, Message, RawEvent, SyncCursor};

/// Message handler type.
pub type MessageHandler = Arc<dyn Fn(Arc<Message>) + Send + Sync>;

/// Error policy type. Decides whether the loop survives an error.
pub type ErrorPolicy = Arc<dyn Fn(&EngineError) -> PolicyDecision + Send + Sync>;

/// What to do after a failed sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Restart the cycle.
    Continue,
    /// End the session and record the error as the crash reason.
    Stop,
}

/// Restart after transient network failures, stop on anything else.
pub fn default_error_policy(err: &EngineError) -> PolicyDecision {
    if err.is_transient() {
        PolicyDecision::Continue
    } else {
        PolicyDecision::Stop
    }
}

pub(crate) struct SyncTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncTask {
    fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

impl Engine {
    /// Start the sync loop.
    ///
    /// Returns `Ok(false)` without starting anything when a loop is already
    /// running for this session. A loop that was stopped but is still inside
    /// its last poll is waited for first.
    pub async fn start_sync_loop<H, P>(&self, handler: H, policy: P) -> Result<bool, EngineError>
    where
        H: Fn(Arc<Message>) + Send + Sync + 'static,
        P: Fn(&EngineError) -> PolicyDecision + Send + Sync + 'static,
    {
        if !self.is_alive().await {
            return Err(EngineError::NotLoggedIn);
        }
        let handler: MessageHandler = Arc::new(handler);
        let policy: ErrorPolicy = Arc::new(policy);
        loop {
            // A stopped loop may still be inside its last poll; wait for it to
            // drain so two pollers never share the session.
            let stopping = {
                let mut task = lock(&self.inner.sync_task);
                match task.as_ref().map(|t| (t.is_running(), t.handle.is_finished())) {
                    Some((true, _)) => {
                        debug!("Sync loop already running");
                        return Ok(false);
                    }
                    Some((false, false)) => task.take(),
                    _ => {
                        let token = self.lifetime().child_token();
                        let engine = self.clone();
                        let handle = tokio::spawn(engine.run_sync_loop(
                            token.clone(),
                            handler.clone(),
                            policy.clone(),
                        ));
                        *task = Some(SyncTask { token, handle });
                        info!("Sync loop started");
                        return Ok(true);
                    }
                }
            };
            if let Some(previous) = stopping {
                debug!("Waiting for the stopped sync loop to exit");
                if let Err(e) = previous.handle.await {
                    warn!("Stopped sync loop ended abnormally: {}", e);
                }
            }
        }
    }

    /// Ask the sync loop to stop after the poll in flight returns.
    ///
    /// Whatever that poll brings back is discarded. Returns whether a loop
    /// was running.
    pub fn stop_sync_loop(&self) -> bool {
        match lock(&self.inner.sync_task).as_ref() {
            Some(task) => {
                let running = task.is_running();
                task.token.cancel();
                running
            }
            None => false,
        }
    }

    pub fn is_syncing(&self) -> bool {
        lock(&self.inner.sync_task)
            .as_ref()
            .is_some_and(SyncTask::is_running)
    }

    async fn run_sync_loop(self, token: CancellationToken, handler: MessageHandler, policy: ErrorPolicy) {
        loop {
            match self.sync_cycle(&token, &handler).await {
                Ok(()) => break,
                Err(err) if token.is_cancelled() => {
                    debug!("Sync loop stopped, dropping error: {}", err);
                    break;
                }
                Err(err) => match policy(&err) {
                    PolicyDecision::Continue => {
                        warn!("Sync cycle failed, restarting: {}", err);
                    }
                    PolicyDecision::Stop => {
                        error!("Sync loop stopped: {}", err);
                        self.shutdown(Some(err), None).await;
                        break;
                    }
                },
            }
        }
        info!("Sync loop exited");
    }

    // Runs until the loop is cancelled (Ok) or a cycle fails (Err).
    async fn sync_cycle(
        &self,
        token: &CancellationToken,
        handler: &MessageHandler,
    ) -> Result<(), EngineError> {
        loop {
            if token.is_cancelled() || !self.is_alive().await {
                return Ok(());
            }
            let (credentials, cursor) = {
                let session = self.inner.session.read().await;
                let credentials = session.credentials.clone().ok_or(EngineError::NotLoggedIn)?;
                (credentials, session.cursor.clone())
            };

            let check = self.inner.transport.poll_sync(&credentials, &cursor).await;
            if token.is_cancelled() {
                return Ok(());
            }
            let check = check?;
            debug!("Sync check retcode={} selector={}", check.retcode, check.selector);
            self.emit(Event::SyncCheck(check.clone()));
            if let Some(reason) = check.invalidation() {
                return Err(EngineError::SessionInvalidated(reason));
            }
            if !check.is_success() {
                return Err(EngineError::Protocol(format!(
                    "unexpected sync check retcode {}",
                    check.retcode
                )));
            }
            let has_new_data = check.has_new_data();
            if let Some(update) = check.cursor {
                self.advance_cursor(update).await;
            }
            if !has_new_data {
                continue;
            }

            let cursor = self.inner.session.read().await.cursor.clone();
            let batch = self.inner.transport.fetch_sync_batch(&credentials, &cursor).await;
            if token.is_cancelled() {
                return Ok(());
            }
            let events = self.apply_batch(batch?).await;
            debug!("Sync batch carried {} events", events.len());
            for (delivered, raw) in events.iter().enumerate() {
                let message = self.classify(raw).await;
                if token.is_cancelled() {
                    debug!("Sync loop stopped, {} events undelivered", events.len() - delivered);
                    return Ok(());
                }
                handler(Arc::new(message));
            }
        }
    }

    async fn advance_cursor(&self, update: SyncCursor) {
        let outcome = self.inner.session.write().await.cursor.advance(update);
        if outcome == CursorUpdate::Stale {
            warn!("Ignoring stale sync cursor");
        }
    }

    // Cursor first, then contact deltas; events are returned for delivery.
    async fn apply_batch(&self, batch: SyncBatch) -> Vec<RawEvent> {
        let SyncBatch {
            events,
            contact_deltas,
            cursor,
        } = batch;
        self.advance_cursor(cursor).await;
        let transport_state = self.inner.transport.export_state();
        let mut session = self.inner.session.write().await;
        session.contacts.apply_all(contact_deltas);
        session.transport = transport_state;
        events
    }
}
