//! Session Holder
//!
//! Wraps the backend session and exposes the current user, session and
//! profile. A looked-up session is reused for a short window so hot paths do
//! not hit the backend for every call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{Result, SyncError};
use crate::models::{Profile, Session, User};

/// Whether the app is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Foreground,
    Background,
}

#[derive(Debug, Default)]
struct HeldSession {
    session: Option<Session>,
    checked_at: Option<Instant>,
    profile: Option<Profile>,
}

// == Session Holder ==
pub struct SessionHolder {
    backend: Arc<dyn Backend>,
    held: RwLock<HeldSession>,
    reuse_window: Duration,
}

impl SessionHolder {
    pub fn new(backend: Arc<dyn Backend>, reuse_window: Duration) -> Self {
        Self {
            backend,
            held: RwLock::new(HeldSession::default()),
            reuse_window,
        }
    }

    /// Returns the current session, asking the backend once the reuse window lapsed.
    pub async fn current_session(&self) -> Result<Option<Session>> {
        {
            let held = self.held.read().await;
            if let Some(checked_at) = held.checked_at {
                if checked_at.elapsed() < self.reuse_window {
                    debug!("Using cached session");
                    return Ok(held.session.clone());
                }
            }
        }

        let session = self.backend.get_session().await?;
        let mut held = self.held.write().await;
        if session.as_ref().map(|s| &s.user.id) != held.session.as_ref().map(|s| &s.user.id) {
            held.profile = None;
        }
        held.session = session.clone();
        held.checked_at = Some(Instant::now());
        Ok(session)
    }

    /// Returns the signed-in user or an authentication error.
    pub async fn require_user(&self) -> Result<User> {
        self.current_session()
            .await?
            .map(|session| session.user)
            .ok_or(SyncError::NotAuthenticated)
    }

    pub async fn user(&self) -> Option<User> {
        self.held.read().await.session.as_ref().map(|s| s.user.clone())
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.held.read().await.profile.clone()
    }

    pub async fn set_profile(&self, profile: Option<Profile>) {
        self.held.write().await.profile = profile;
    }

    /// Foreground keeps the backend token refreshing; background stops it.
    pub async fn set_lifecycle(&self, lifecycle: Lifecycle) {
        let enabled = lifecycle == Lifecycle::Foreground;
        debug!("Lifecycle {:?}, auto refresh {}", lifecycle, enabled);
        self.backend.set_auto_refresh(enabled).await;
    }

    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Session> {
        let session = self.backend.sign_up(email, password, name).await?;
        info!("User signed up: {}", session.user.id);
        self.hold(Some(session.clone())).await;
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.backend.sign_in_with_email(email, password).await?;
        info!("User signed in: {}", session.user.id);
        self.hold(Some(session.clone())).await;
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.backend.sign_out().await?;
        self.hold(None).await;
        info!("User signed out");
        Ok(())
    }

    async fn hold(&self, session: Option<Session>) {
        let mut held = self.held.write().await;
        held.session = session;
        held.checked_at = Some(Instant::now());
        held.profile = None;
    }
}
