use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::SessionStore;
use crate::telemetry::refresh::emit_terminated;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// A login or refresh-token call was itself rejected.
    ExemptEndpointRejected,
    NoRefreshCredential,
    RefreshFailed,
    Logout,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::ExemptEndpointRejected => write!(f, "auth_endpoint_rejected"),
            TerminationReason::NoRefreshCredential => write!(f, "no_refresh_credential"),
            TerminationReason::RefreshFailed => write!(f, "refresh_failed"),
            TerminationReason::Logout => write!(f, "logout"),
        }
    }
}

/// Signal handed to the host when the session ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignOut {
    pub reason: TerminationReason,
    /// Unauthenticated entry point the host should navigate to.
    pub redirect_to: String,
}

pub trait SessionNotifier: Send + Sync {
    fn session_ended(&self, signal: &SignOut);
}

impl<F> SessionNotifier for F
where
    F: Fn(&SignOut) + Send + Sync,
{
    fn session_ended(&self, signal: &SignOut) {
        self(signal)
    }
}

/// Only records the sign-out in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl SessionNotifier for LogNotifier {
    fn session_ended(&self, signal: &SignOut) {
        info!(reason = %signal.reason, redirect_to = %signal.redirect_to, "session ended");
    }
}

/// Publishes the latest sign-out on a watch channel hosts can subscribe to.
#[derive(Debug)]
pub struct WatchNotifier {
    tx: watch::Sender<Option<SignOut>>,
}

impl WatchNotifier {
    pub fn channel() -> (Self, watch::Receiver<Option<SignOut>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl SessionNotifier for WatchNotifier {
    fn session_ended(&self, signal: &SignOut) {
        self.tx.send_replace(Some(signal.clone()));
    }
}

/// Clears the stored session and tells the host to leave the authenticated area.
#[derive(Clone)]
pub struct SessionTerminator {
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn SessionNotifier>,
    redirect_to: String,
}

impl SessionTerminator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn SessionNotifier>,
        redirect_to: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            redirect_to: redirect_to.into(),
        }
    }

    /// Clearing an already empty store is harmless.
    pub fn clear_session(&self) {
        self.store.clear();
    }

    /// Sent on every call, even when there was no session to end.
    pub fn signal(&self, reason: TerminationReason) {
        emit_terminated(&reason.to_string());
        self.notifier.session_ended(&SignOut {
            reason,
            redirect_to: self.redirect_to.clone(),
        });
    }
}
