mod store;
mod terminator;

pub use store::{FileSessionStore, MemorySessionStore};
pub use terminator::{
    LogNotifier, SessionNotifier, SessionTerminator, SignOut, TerminationReason, WatchNotifier,
};

use serde_json::Value;

/// Credentials and profile of the signed-in user.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_profile: Option<Value>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user_profile.is_none()
    }

    fn apply(&mut self, patch: SessionPatch) {
        if let Some(token) = patch.access_token {
            self.access_token = Some(token);
        }
        if let Some(token) = patch.refresh_token {
            self.refresh_token = Some(token);
        }
        if let Some(profile) = patch.user_profile {
            self.user_profile = Some(profile);
        }
    }
}

/// Partial update; `None` fields are left as they are.
#[derive(Clone, Debug, Default)]
pub struct SessionPatch {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_profile: Option<Value>,
}

impl SessionPatch {
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Self::default()
        }
    }
}

/// Durable home of the session. Operations never fail; backends log and
/// carry on when the medium misbehaves.
///
/// The refresh coordinator calls `get`, `set` and `clear` while holding its
/// own lock, so every request that hits a 401 meanwhile waits on them.
/// Implementations must return promptly (a small local file write at most),
/// must not block on the network and must never call back into the client.
/// A backend slower than that should update memory here and persist from
/// its own worker.
pub trait SessionStore: Send + Sync {
    fn get(&self) -> Session;
    fn set(&self, patch: SessionPatch);
    fn clear(&self);
}
