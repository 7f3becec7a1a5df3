use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::Error;
use crate::request::RequestDescriptor;
use crate::session::{SessionPatch, SessionStore, SessionTerminator, TerminationReason};
use crate::telemetry::refresh::{RefreshOutcome, RefreshTelemetry, emit_queued};

use super::queue::{Parked, Settlement, WaitGroup, WaitQueue};

/// Convenience result alias for coordinator operations.
pub type RefreshResult<T> = Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Paths whose own 401s must never start a refresh.
#[derive(Clone, Debug)]
pub struct ExemptPaths {
    segments: Vec<String>,
}

impl ExemptPaths {
    pub fn new(login_path: &str, refresh_path: &str) -> Self {
        Self {
            segments: [login_path, refresh_path]
                .iter()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.segments.iter().any(|segment| path.contains(segment.as_str()))
    }
}

struct Shared {
    state: RefreshState,
    queue: WaitQueue,
    /// Bumped whenever a refresh starts, the session is torn down or a new
    /// session begins, so a refresh that settles afterwards cannot write
    /// into the store.
    generation: u64,
}

enum Admission {
    Leader { refresh_token: String, generation: u64 },
    Parked(Parked),
    NoCredential,
}

/// Single-flight refresh of the access credential.
///
/// `handle_auth_failure` is the only way in. The first caller to see a 401
/// while idle becomes the leader and runs the refresh; everyone arriving while
/// it is in flight is parked on the wait queue and receives the leader's
/// outcome. The state check and transition happen under one lock with no
/// await in between.
pub struct RefreshCoordinator {
    shared: Mutex<Shared>,
    store: Arc<dyn SessionStore>,
    terminator: SessionTerminator,
    exemptions: ExemptPaths,
    refresh_timeout: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        terminator: SessionTerminator,
        exemptions: ExemptPaths,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            shared: Mutex::new(Shared {
                state: RefreshState::Idle,
                queue: WaitQueue::default(),
                generation: 0,
            }),
            store,
            terminator,
            exemptions,
            refresh_timeout,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.lock().state
    }

    pub fn waiting(&self) -> usize {
        self.lock().queue.len()
    }

    /// Resolves a 401 for `request` to either a fresh access credential to
    /// replay it with, or a terminal error.
    ///
    /// `refresh` exchanges the stored refresh credential for a new access
    /// credential; it runs at most once per wait-group.
    pub async fn handle_auth_failure<F, Fut>(
        &self,
        request: &RequestDescriptor,
        refresh: F,
    ) -> RefreshResult<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = RefreshResult<String>>,
    {
        if self.exemptions.is_exempt(request.path()) {
            warn!(path = request.path(), "auth endpoint rejected; not refreshing");
            self.terminate(TerminationReason::ExemptEndpointRejected);
            return Err(Error::SessionEnded(format!(
                "{} {} was rejected",
                request.method(),
                request.path()
            )));
        }
        if request.is_retried() {
            warn!(path = request.path(), "401 after refresh; giving up on request");
            return Err(Error::Unauthorized(format!(
                "{} {} rejected again after refresh",
                request.method(),
                request.path()
            )));
        }

        let (refresh_token, generation) = match self.admit(request) {
            Admission::Leader {
                refresh_token,
                generation,
            } => (refresh_token, generation),
            Admission::Parked(parked) => return parked.wait().await,
            Admission::NoCredential => {
                self.terminate(TerminationReason::NoRefreshCredential);
                return Err(Error::SessionEnded(
                    "no refresh credential available".into(),
                ));
            }
        };

        let telemetry = RefreshTelemetry::new(format!("{} {}", request.method(), request.path()));
        let flight = InFlight {
            coordinator: self,
            generation,
            telemetry: &telemetry,
            armed: true,
        };
        telemetry.emit_start();
        let result = match tokio::time::timeout(self.refresh_timeout, refresh(refresh_token)).await
        {
            Ok(Ok(token)) if token.trim().is_empty() => Err(Error::RefreshFailed(
                "refresh endpoint returned an empty access token".into(),
            )),
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.refresh_timeout)),
        };
        flight.settle(result)
    }

    /// Ends the session: clears the store, fails anyone still parked and
    /// signals the host. Safe to call with nothing to end.
    pub fn end_session(&self, reason: TerminationReason) {
        self.terminate(reason);
    }

    /// Replaces the stored session with `patch`. A refresh still in flight
    /// for the previous session is invalidated: its parked callers fail now
    /// and its token is discarded when it settles.
    pub fn begin_session(&self, patch: SessionPatch) {
        let group = {
            let mut shared = self.lock();
            shared.generation += 1;
            shared.state = RefreshState::Idle;
            self.store.clear();
            self.store.set(patch);
            shared.queue.take()
        };
        let failed = group.drain(&Settlement::Fail {
            reason: "a new session replaced the one being refreshed".into(),
        });
        if failed > 0 {
            info!(waiters = failed, "failed parked requests of the previous session");
        }
    }

    fn admit(&self, request: &RequestDescriptor) -> Admission {
        let mut shared = self.lock();
        let Some(refresh_token) = self.store.get().refresh_token else {
            return Admission::NoCredential;
        };
        match shared.state {
            RefreshState::Refreshing => {
                let parked = shared.queue.enqueue(request.clone());
                emit_queued(request.path(), shared.queue.len());
                Admission::Parked(parked)
            }
            RefreshState::Idle => {
                shared.state = RefreshState::Refreshing;
                shared.generation += 1;
                Admission::Leader {
                    refresh_token,
                    generation: shared.generation,
                }
            }
        }
    }

    fn terminate(&self, reason: TerminationReason) {
        self.teardown(None, reason, format!("session ended: {}", reason));
    }

    /// Clears the store, resets to idle and fails the current wait group, then
    /// signals the host. With `generation` set, only acts if that flight is
    /// still the current one. Returns how many parked callers were failed.
    fn teardown(
        &self,
        generation: Option<u64>,
        reason: TerminationReason,
        message: String,
    ) -> Option<usize> {
        let group = {
            let mut shared = self.lock();
            if generation.is_some_and(|g| g != shared.generation) {
                return None;
            }
            self.terminator.clear_session();
            shared.generation += 1;
            shared.state = RefreshState::Idle;
            shared.queue.take()
        };
        let failed = group.drain(&Settlement::Fail { reason: message });
        if failed > 0 {
            info!(reason = %reason, waiters = failed, "failed parked requests on teardown");
        }
        self.terminator.signal(reason);
        Some(failed)
    }

    /// Returns the wait group of the flight identified by `generation`, or
    /// `None` when a teardown already took it over.
    fn close_flight(&self, generation: u64, access_token: Option<&str>) -> Option<WaitGroup> {
        let mut shared = self.lock();
        if shared.generation != generation {
            return None;
        }
        if let Some(token) = access_token {
            self.store.set(SessionPatch::access_token(token));
        }
        shared.state = RefreshState::Idle;
        Some(shared.queue.take())
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owned by the leader while its refresh runs. Dropping it unsettled (the
/// leader's future was cancelled) releases the parked callers with a failure.
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    generation: u64,
    telemetry: &'a RefreshTelemetry,
    armed: bool,
}

impl InFlight<'_> {
    fn settle(mut self, result: RefreshResult<String>) -> RefreshResult<String> {
        self.armed = false;
        match result {
            Ok(access_token) => {
                let Some(group) = self
                    .coordinator
                    .close_flight(self.generation, Some(&access_token))
                else {
                    warn!("refresh succeeded after the session ended; discarding token");
                    return Err(Error::SessionEnded(
                        "session ended while refreshing".into(),
                    ));
                };
                self.telemetry.emit_success();
                let resumed = group.drain(&Settlement::Resume {
                    access_token: access_token.clone(),
                });
                self.telemetry
                    .emit_drained(RefreshOutcome::Success, resumed);
                Ok(access_token)
            }
            Err(err) => {
                self.telemetry.emit_failure(&err);
                let reason = err.to_string();
                if let Some(failed) = self.coordinator.teardown(
                    Some(self.generation),
                    TerminationReason::RefreshFailed,
                    reason.clone(),
                ) {
                    self.telemetry.emit_drained(RefreshOutcome::Failed, failed);
                }
                Err(Error::RefreshFailed(reason))
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(group) = self.coordinator.close_flight(self.generation, None) {
            let released = group.drain(&Settlement::Fail {
                reason: "refresh abandoned before it settled".into(),
            });
            self.telemetry
                .emit_drained(RefreshOutcome::Abandoned, released);
        }
    }
}

#[cfg(test)]
mod tests;
