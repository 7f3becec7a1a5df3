use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    Reqwest(reqwest::Error),
    Http(StatusCode, String),
    Api {
        message: String,
        error_code: Option<String>,
    },
    Config(String),
    Timeout(Duration),
    Unauthorized(String),
    RefreshFailed(String),
    SessionEnded(String),
}

impl Error {
    /// True for failures that tore down (or found no) session.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, Error::RefreshFailed(_) | Error::SessionEnded(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Json(err) => write!(f, "json error: {}", err),
            Error::Reqwest(err) => write!(f, "http transport error: {}", err),
            Error::Http(status, body) => write!(f, "http {}: {}", status, body),
            Error::Api {
                message,
                error_code: Some(code),
            } => write!(f, "api error [{}]: {}", code, message),
            Error::Api {
                message,
                error_code: None,
            } => write!(f, "api error: {}", message),
            Error::Config(msg) => write!(f, "config error: {}", msg),
            Error::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            Error::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            Error::RefreshFailed(msg) => write!(f, "token refresh failed: {}", msg),
            Error::SessionEnded(msg) => write!(f, "session ended: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Reqwest(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Reqwest(err)
    }
}
