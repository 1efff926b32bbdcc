//! UI-facing facade over call sessions.
//!
//! The UI only ever calls `open`, `open_muted`, `close` and `toggle_mute` and
//! renders the snapshot. Errors never cross this boundary; they show up as an `Ended`
//! snapshot carrying an error.

use crate::capture::AudioBackend;
use crate::config::VoiceConfig;
use crate::session::{CallSession, CallSnapshot};
use crate::transport::Connector;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Owns at most one live call at a time.
pub struct CallController {
    config: VoiceConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    current: Mutex<Option<CallSession>>,
    opening: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController").field("current", &*self.current.lock()).finish()
    }
}

impl CallController {
    /// Create a controller with no call.
    pub fn new(
        config: VoiceConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            backend,
            connector,
            current: Mutex::new(None),
            opening: tokio::sync::Mutex::new(()),
        }
    }

    /// Start a new call, fully tearing down any previous one first.
    pub async fn open(&self) {
        self.open_with(false).await;
    }

    /// Like [`CallController::open`], with the microphone muted before capture starts.
    pub async fn open_muted(&self) {
        self.open_with(true).await;
    }

    async fn open_with(&self, muted: bool) {
        let _opening = self.opening.lock().await;

        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let session = CallSession::new(
            self.config.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.connector),
        );
        if muted {
            session.set_muted(true);
        }
        *self.current.lock() = Some(session.clone());

        if let Err(e) = session.start().await {
            tracing::warn!(call_id = %session.call_id(), error = %e, "call failed to start");
        }
    }

    /// End the current call, if any.
    pub async fn close(&self) {
        let current = self.current.lock().clone();
        if let Some(session) = current {
            session.stop().await;
        }
    }

    /// Flip the mute flag on the current call. Returns the new value.
    pub fn toggle_mute(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(session) => {
                let muted = !session.is_muted();
                session.set_muted(muted);
                muted
            }
            None => false,
        }
    }

    /// State of the current call, or an idle snapshot when there is none.
    pub fn snapshot(&self) -> CallSnapshot {
        self.current.lock().as_ref().map(CallSession::snapshot).unwrap_or_default()
    }

    /// Watch the current call. `None` when no call was ever opened.
    pub fn subscribe(&self) -> Option<watch::Receiver<CallSnapshot>> {
        self.current.lock().as_ref().map(CallSession::subscribe)
    }

    /// The current session.
    pub fn session(&self) -> Option<CallSession> {
        self.current.lock().clone()
    }
}
