use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{Session, SessionPatch, SessionStore};
use crate::errors::Error;

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const USER_KEY: &str = "user";

fn lock(cell: &Mutex<Session>) -> MutexGuard<'_, Session> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local store; gone when the process exits.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Session {
        lock(&self.session).clone()
    }

    fn set(&self, patch: SessionPatch) {
        lock(&self.session).apply(patch);
    }

    fn clear(&self) {
        *lock(&self.session) = Session::default();
    }
}

/// Keeps the three session keys in a JSON file so they survive restarts.
/// Reads are served from memory; every mutation rewrites the file before
/// returning.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    session: Mutex<Session>,
}

impl FileSessionStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = match load(&path) {
            Ok(session) => session,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "session file unreadable; starting signed out");
                Session::default()
            }
        };
        Self {
            path,
            session: Mutex::new(session),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, session: &Session) {
        if let Err(err) = write_atomic(&self.path, session) {
            warn!(path = %self.path.display(), error = %err, "failed to persist session");
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Session {
        lock(&self.session).clone()
    }

    fn set(&self, patch: SessionPatch) {
        let mut session = lock(&self.session);
        session.apply(patch);
        self.persist(&session);
    }

    fn clear(&self) {
        let mut session = lock(&self.session);
        *session = Session::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "session file removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove session file")
            }
        }
    }
}

fn load(path: &Path) -> Result<Session, Error> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Session::default()),
        Err(err) => return Err(err.into()),
    };
    let mut keys: BTreeMap<String, String> = serde_json::from_str(&contents)?;
    let user_profile = match keys.remove(USER_KEY) {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(Session {
        access_token: keys.remove(ACCESS_TOKEN_KEY),
        refresh_token: keys.remove(REFRESH_TOKEN_KEY),
        user_profile,
    })
}

fn write_atomic(path: &Path, session: &Session) -> Result<(), Error> {
    let mut keys = BTreeMap::new();
    if let Some(token) = &session.access_token {
        keys.insert(ACCESS_TOKEN_KEY, token.clone());
    }
    if let Some(token) = &session.refresh_token {
        keys.insert(REFRESH_TOKEN_KEY, token.clone());
    }
    if let Some(profile) = &session.user_profile {
        keys.insert(USER_KEY, serde_json::to_string(profile)?);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(&keys)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
