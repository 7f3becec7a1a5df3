#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use authed_http::{Config, MemorySessionStore, Session, SessionNotifier, SignOut};
use serde_json::{Value, json};
use tracing::subscriber::{DefaultGuard, set_default};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Registry, fmt};

struct VecWriter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl std::io::Write for VecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.lines.lock().unwrap();
        guard.push(String::from_utf8_lossy(buf).into_owned());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn capture_logs() -> (Arc<Mutex<Vec<String>>>, DefaultGuard) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let writer_lines = lines.clone();
    let subscriber = Registry::default().with(
        fmt::Layer::default()
            .with_writer(move || VecWriter {
                lines: writer_lines.clone(),
            })
            .with_target(false)
            .with_level(true)
            .with_ansi(false),
    );
    let guard = set_default(subscriber);
    (lines, guard)
}

pub fn config(server_uri: &str) -> Config {
    Config::from_values(server_uri, Some(5), None)
}

pub fn stale_store() -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::with_session(Session {
        access_token: Some("staleToken".into()),
        refresh_token: Some("refresh-abc".into()),
        user_profile: Some(json!({ "id": 42, "email": "ada@example.com" })),
    }))
}

pub fn recording_notifier() -> (Arc<dyn SessionNotifier>, Arc<Mutex<Vec<SignOut>>>) {
    let seen: Arc<Mutex<Vec<SignOut>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let notifier: Arc<dyn SessionNotifier> =
        Arc::new(move |signal: &SignOut| sink.lock().unwrap().push(signal.clone()));
    (notifier, seen)
}

pub fn envelope(data: Value) -> Value {
    json!({
        "success": true,
        "message": "ok",
        "data": data,
        "timestamp": "2024-05-01T10:00:00Z"
    })
}

pub fn failure(message: &str, code: &str) -> Value {
    json!({
        "success": false,
        "message": message,
        "data": null,
        "timestamp": "2024-05-01T10:00:00Z",
        "errorCode": code
    })
}

pub fn temp_session_path() -> PathBuf {
    let mut path = PathBuf::from("target");
    path.push(format!("session-{}.json", uuid::Uuid::new_v4()));
    path
}
