use tracing::{Level, event};
use uuid::Uuid;

use crate::errors::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success,
    Failed,
    Abandoned,
}

/// Structured events for one refresh attempt and its wait-group.
#[derive(Clone, Debug)]
pub struct RefreshTelemetry {
    attempt_id: Uuid,
    context: String,
}

impl RefreshTelemetry {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            context: context.into(),
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn emit_start(&self) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            context = %self.context,
            timestamp = %jiff::Timestamp::now(),
            "refresh.start"
        );
    }

    pub fn emit_success(&self) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            context = %self.context,
            outcome = ?RefreshOutcome::Success,
            "refresh.success"
        );
    }

    pub fn emit_failure(&self, error: &Error) {
        event!(
            Level::ERROR,
            attempt_id = %self.attempt_id,
            context = %self.context,
            outcome = ?RefreshOutcome::Failed,
            error = %error,
            "refresh.failure"
        );
    }

    pub fn emit_drained(&self, outcome: RefreshOutcome, waiters: usize) {
        event!(
            Level::DEBUG,
            attempt_id = %self.attempt_id,
            context = %self.context,
            outcome = ?outcome,
            waiters,
            "refresh.drained"
        );
    }
}

pub fn emit_queued(path: &str, position: usize) {
    event!(Level::DEBUG, path, position, "refresh.queued");
}

pub fn emit_terminated(reason: &str) {
    event!(Level::WARN, reason, "session.terminated");
}
