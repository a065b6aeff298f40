//! Hot resume: restore a previously authenticated session from a snapshot
//! instead of scanning a new QR code.

use log::{debug, info, warn};

use super::client::{lock, Engine, EngineError};
use super::login::{LoginReport, LoginState};
use crate::store::{HotResumeSnapshot, SnapshotStore, StoreError};

/// What [`Engine::try_resume`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// A snapshot was installed and still has to be validated.
    Resumed,
    /// Nothing usable was stored; log in from scratch.
    NoSnapshot,
}

impl Engine {
    /// Install the snapshot held by `source` into the session.
    ///
    /// An absent or unreadable snapshot yields [`ResumeOutcome::NoSnapshot`].
    /// Only a failing store backend is an error.
    pub async fn try_resume(&self, source: &dyn SnapshotStore) -> Result<ResumeOutcome, EngineError> {
        let bytes = match source.read_snapshot() {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound) => {
                debug!("No hot-resume snapshot stored");
                return Ok(ResumeOutcome::NoSnapshot);
            }
            Err(e) => return Err(EngineError::Persistence(e)),
        };
        let snapshot = match HotResumeSnapshot::from_bytes(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring unusable hot-resume snapshot: {}", e);
                return Ok(ResumeOutcome::NoSnapshot);
            }
        };

        self.inner.transport.restore_state(&snapshot.transport);
        let uin = snapshot.credentials.uin;
        snapshot.install(&mut *self.inner.session.write().await);
        info!("Installed hot-resume snapshot for uin {}", uin);
        Ok(ResumeOutcome::Resumed)
    }

    /// Confirm an installed snapshot with one init exchange.
    ///
    /// On failure the snapshot is presumed stale and the session is cleared.
    pub async fn validate_resume(&self) -> Result<LoginReport, EngineError> {
        let credentials = self
            .inner
            .session
            .read()
            .await
            .credentials
            .clone()
            .ok_or(EngineError::NotLoggedIn)?;
        match self.establish(credentials, false).await {
            Ok(self_user) => {
                info!("Resumed session for {}", self_user.name());
                Ok(self.finish_login(self_user).await)
            }
            Err(e) => {
                self.inner.session.write().await.clear();
                *lock(&self.inner.login) = LoginState::Unauthenticated;
                Err(e)
            }
        }
    }

    /// Resume from the configured store, or log in with a QR code.
    ///
    /// A missing snapshot falls back to a fresh login silently. A store that
    /// fails to read also falls back, and the failure is returned in
    /// [`LoginReport::resume_error`]. A snapshot that fails validation falls
    /// back only when `fallback_to_fresh_login` is set; otherwise the failure
    /// is returned as [`EngineError::ResumeRejected`].
    pub async fn hot_login(&self) -> Result<LoginReport, EngineError> {
        let Some(store) = self.inner.snapshots.clone() else {
            debug!("No snapshot store configured");
            return self.login().await;
        };
        match self.try_resume(store.as_ref()).await {
            Ok(ResumeOutcome::Resumed) => {}
            Ok(ResumeOutcome::NoSnapshot) => {
                info!("No hot-resume snapshot, starting a fresh login");
                return self.login().await;
            }
            Err(e) => {
                warn!("Failed to read hot-resume snapshot, starting a fresh login: {}", e);
                let mut report = self.login().await?;
                if let EngineError::Persistence(store_error) = e {
                    report.resume_error = Some(store_error);
                }
                return Ok(report);
            }
        }

        match self.validate_resume().await {
            Ok(report) => Ok(report),
            Err(e) if self.inner.config.fallback_to_fresh_login => {
                warn!("Hot-resume snapshot rejected, starting a fresh login: {}", e);
                self.login().await
            }
            Err(e) => Err(EngineError::ResumeRejected(Box::new(e))),
        }
    }
}
