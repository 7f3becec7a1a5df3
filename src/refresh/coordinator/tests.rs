use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::*;
use crate::session::{FileSessionStore, LogNotifier, MemorySessionStore, Session, SignOut};

struct Harness {
    coordinator: Arc<RefreshCoordinator>,
    store: Arc<MemorySessionStore>,
    signals: Arc<Mutex<Vec<SignOut>>>,
}

impl Harness {
    fn new(session: Session, refresh_timeout: Duration) -> Self {
        let store = Arc::new(MemorySessionStore::with_session(session));
        let signals: Arc<Mutex<Vec<SignOut>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = signals.clone();
        let terminator = SessionTerminator::new(
            store.clone(),
            Arc::new(move |signal: &SignOut| sink.lock().unwrap().push(signal.clone())),
            "/",
        );
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            terminator,
            ExemptPaths::new("accounts/login", "accounts/refresh-token"),
            refresh_timeout,
        ));
        Self {
            coordinator,
            store,
            signals,
        }
    }

    fn stale() -> Self {
        Self::new(stale_session(), Duration::from_secs(30))
    }

    fn signal_reasons(&self) -> Vec<TerminationReason> {
        self.signals.lock().unwrap().iter().map(|s| s.reason).collect()
    }

    async fn wait_for_parked(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.coordinator.waiting() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("callers never parked");
    }
}

fn stale_session() -> Session {
    Session {
        access_token: Some("stale".into()),
        refresh_token: Some("refresh-1".into()),
        user_profile: Some(json!({ "id": 1, "name": "Ada" })),
    }
}

/// Spawns a caller whose refresh (if it ends up leading) blocks on `gate`.
fn spawn_caller(
    coordinator: &Arc<RefreshCoordinator>,
    path: &str,
    calls: &Arc<AtomicUsize>,
    gate: &Arc<Notify>,
    outcome: RefreshResult<String>,
) -> JoinHandle<RefreshResult<String>> {
    let coordinator = coordinator.clone();
    let request = RequestDescriptor::get(path);
    let calls = calls.clone();
    let gate = gate.clone();
    tokio::spawn(async move {
        coordinator
            .handle_auth_failure(&request, move |refresh_token| async move {
                assert_eq!(refresh_token, "refresh-1");
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                outcome
            })
            .await
    })
}

async fn must_not_refresh(_: String) -> RefreshResult<String> {
    panic!("refresh must not be attempted")
}

fn refresh_rejected() -> RefreshResult<String> {
    Err(Error::Http(
        StatusCode::UNAUTHORIZED,
        "invalid refresh token".into(),
    ))
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_failures_share_one_refresh() {
    let harness = Harness::stale();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    let handles: Vec<_> = (0..5)
        .map(|i| {
            spawn_caller(
                &harness.coordinator,
                &format!("books/{i}"),
                &calls,
                &gate,
                Ok("newToken".to_string()),
            )
        })
        .collect();

    harness.wait_for_parked(4).await;
    assert_eq!(harness.coordinator.state(), RefreshState::Refreshing);
    gate.notify_one();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "newToken");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.coordinator.state(), RefreshState::Idle);
    assert_eq!(harness.coordinator.waiting(), 0);

    let session = harness.store.get();
    assert_eq!(session.access_token.as_deref(), Some("newToken"));
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
    assert!(harness.signal_reasons().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn failed_refresh_fails_whole_wait_group_and_clears_session() {
    let harness = Harness::stale();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    let handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|p| spawn_caller(&harness.coordinator, p, &calls, &gate, refresh_rejected()))
        .collect();

    harness.wait_for_parked(2).await;
    gate.notify_one();

    for handle in handles {
        match handle.await.unwrap() {
            Err(Error::RefreshFailed(reason)) => assert!(reason.contains("401")),
            other => panic!("expected refresh failure, got {:?}", other),
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(harness.store.get().is_empty());
    assert_eq!(harness.coordinator.state(), RefreshState::Idle);
    assert_eq!(
        harness.signal_reasons(),
        vec![TerminationReason::RefreshFailed]
    );

    // a straggler after the teardown finds no refresh credential
    let late = harness
        .coordinator
        .handle_auth_failure(&RequestDescriptor::get("d"), must_not_refresh)
        .await;
    assert!(matches!(late, Err(Error::SessionEnded(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn refresh_endpoint_401_tears_down_without_refreshing() {
    let harness = Harness::stale();
    let result = harness
        .coordinator
        .handle_auth_failure(
            &RequestDescriptor::post("/accounts/refresh-token"),
            must_not_refresh,
        )
        .await;

    assert!(matches!(result, Err(Error::SessionEnded(_))));
    assert!(harness.store.get().is_empty());
    assert_eq!(
        harness.signal_reasons(),
        vec![TerminationReason::ExemptEndpointRejected]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn login_401_is_exempt_too() {
    let harness = Harness::stale();
    let result = harness
        .coordinator
        .handle_auth_failure(&RequestDescriptor::post("accounts/login"), must_not_refresh)
        .await;
    assert!(matches!(result, Err(Error::SessionEnded(_))));
}

#[tokio::test(flavor = "current_thread")]
async fn retried_request_is_surfaced_not_refreshed_again() {
    let harness = Harness::stale();
    let request = RequestDescriptor::get("books").mark_retried();
    let result = harness
        .coordinator
        .handle_auth_failure(&request, must_not_refresh)
        .await;

    assert!(matches!(result, Err(Error::Unauthorized(_))));
    assert_eq!(harness.store.get(), stale_session());
    assert!(harness.signal_reasons().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn missing_refresh_credential_ends_session() {
    let harness = Harness::new(
        Session {
            access_token: Some("stale".into()),
            ..Session::default()
        },
        Duration::from_secs(30),
    );
    let result = harness
        .coordinator
        .handle_auth_failure(&RequestDescriptor::get("books"), must_not_refresh)
        .await;

    assert!(matches!(result, Err(Error::SessionEnded(_))));
    assert!(harness.store.get().is_empty());
    assert_eq!(
        harness.signal_reasons(),
        vec![TerminationReason::NoRefreshCredential]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timed_out_refresh_is_a_failure() {
    let harness = Harness::new(stale_session(), Duration::from_secs(5));
    let result = harness
        .coordinator
        .handle_auth_failure(&RequestDescriptor::get("books"), |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Error>("too-late".to_string())
        })
        .await;

    match result {
        Err(Error::RefreshFailed(reason)) => assert!(reason.contains("timed out")),
        other => panic!("expected timeout failure, got {:?}", other),
    }
    assert!(harness.store.get().is_empty());
    assert_eq!(harness.coordinator.state(), RefreshState::Idle);
}

#[tokio::test(flavor = "current_thread")]
async fn empty_access_token_is_malformed() {
    let harness = Harness::stale();
    let result = harness
        .coordinator
        .handle_auth_failure(&RequestDescriptor::get("books"), |_| async { Ok::<_, Error>(String::new()) })
        .await;
    assert!(matches!(result, Err(Error::RefreshFailed(_))));
    assert!(harness.store.get().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn abandoned_leader_releases_waiters() {
    let harness = Harness::stale();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    let leader = spawn_caller(
        &harness.coordinator,
        "leader",
        &calls,
        &gate,
        Ok("never".into()),
    );
    let waiter = spawn_caller(
        &harness.coordinator,
        "waiter",
        &calls,
        &gate,
        Ok("never".into()),
    );
    harness.wait_for_parked(1).await;

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    match waiter.await.unwrap() {
        Err(Error::RefreshFailed(reason)) => assert!(reason.contains("abandoned")),
        other => panic!("expected abandoned refresh, got {:?}", other),
    }
    assert_eq!(harness.coordinator.state(), RefreshState::Idle);
    assert_eq!(harness.store.get(), stale_session());
}

#[tokio::test(flavor = "current_thread")]
async fn logout_during_refresh_discards_late_token() {
    let harness = Harness::stale();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    let leader = spawn_caller(
        &harness.coordinator,
        "leader",
        &calls,
        &gate,
        Ok("late".into()),
    );
    let waiter = spawn_caller(
        &harness.coordinator,
        "waiter",
        &calls,
        &gate,
        Ok("late".into()),
    );
    harness.wait_for_parked(1).await;

    harness.coordinator.end_session(TerminationReason::Logout);
    assert!(matches!(
        waiter.await.unwrap(),
        Err(Error::RefreshFailed(_))
    ));

    gate.notify_one();
    assert!(matches!(
        leader.await.unwrap(),
        Err(Error::SessionEnded(_))
    ));
    assert!(harness.store.get().is_empty());
    assert_eq!(harness.signal_reasons(), vec![TerminationReason::Logout]);
}

#[tokio::test(flavor = "current_thread")]
async fn login_during_refresh_keeps_old_token_out_of_new_session() {
    let harness = Harness::stale();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    let leader = spawn_caller(
        &harness.coordinator,
        "leader",
        &calls,
        &gate,
        Ok("old-session-token".into()),
    );
    let waiter = spawn_caller(
        &harness.coordinator,
        "waiter",
        &calls,
        &gate,
        Ok("old-session-token".into()),
    );
    harness.wait_for_parked(1).await;

    harness.coordinator.begin_session(SessionPatch {
        access_token: Some("access-2".into()),
        refresh_token: Some("refresh-2".into()),
        user_profile: Some(json!({ "id": 2 })),
    });
    assert!(matches!(
        waiter.await.unwrap(),
        Err(Error::RefreshFailed(_))
    ));
    assert_eq!(harness.coordinator.state(), RefreshState::Idle);

    // the new session refreshes on its own while the old flight is still out
    let renewed = harness
        .coordinator
        .handle_auth_failure(&RequestDescriptor::get("books"), |refresh_token| async move {
            assert_eq!(refresh_token, "refresh-2");
            Ok::<_, Error>("access-3".to_string())
        })
        .await;
    assert_eq!(renewed.unwrap(), "access-3");

    gate.notify_one();
    assert!(matches!(
        leader.await.unwrap(),
        Err(Error::SessionEnded(_))
    ));

    let session = harness.store.get();
    assert_eq!(session.access_token.as_deref(), Some("access-3"));
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-2"));
    assert_eq!(session.user_profile, Some(json!({ "id": 2 })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(harness.signal_reasons().is_empty());
}

#[test]
fn begin_session_replaces_previous_session_entirely() {
    let harness = Harness::stale();
    harness.coordinator.begin_session(SessionPatch {
        access_token: Some("access-2".into()),
        refresh_token: Some("refresh-2".into()),
        user_profile: None,
    });
    let session = harness.store.get();
    assert_eq!(session.access_token.as_deref(), Some("access-2"));
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-2"));
    assert_eq!(session.user_profile, None);
    assert!(harness.signal_reasons().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn file_store_writes_land_before_the_lock_is_released() {
    let mut path = std::env::temp_dir();
    path.push(format!("authed-http-coordinator-{}.json", uuid::Uuid::new_v4()));
    let store = Arc::new(FileSessionStore::open(&path));
    let terminator = SessionTerminator::new(store.clone(), Arc::new(LogNotifier), "/");
    let coordinator = RefreshCoordinator::new(
        store.clone(),
        terminator,
        ExemptPaths::new("accounts/login", "accounts/refresh-token"),
        Duration::from_secs(5),
    );

    coordinator.begin_session(SessionPatch {
        access_token: Some("access-1".into()),
        refresh_token: Some("refresh-1".into()),
        user_profile: None,
    });
    assert_eq!(
        FileSessionStore::open(&path).get().access_token.as_deref(),
        Some("access-1")
    );

    let token = coordinator
        .handle_auth_failure(&RequestDescriptor::get("books"), |_| async {
            Ok::<_, Error>("access-2".to_string())
        })
        .await
        .unwrap();
    assert_eq!(token, "access-2");
    assert_eq!(
        FileSessionStore::open(&path).get().access_token.as_deref(),
        Some("access-2")
    );

    coordinator.end_session(TerminationReason::Logout);
    assert!(!path.exists());
}

#[test]
fn exempt_paths_match_segments() {
    let exempt = ExemptPaths::new("/accounts/login", "accounts/refresh-token/");
    assert!(exempt.is_exempt("/api/accounts/login"));
    assert!(exempt.is_exempt("accounts/refresh-token"));
    assert!(!exempt.is_exempt("accounts/profile"));
}
