//! Bearer-authenticated HTTP client with single-flight token refresh.
//!
//! Every request carries the stored access credential. When the API answers
//! 401, one refresh call is made no matter how many requests failed together;
//! the requests that were waiting on it are replayed with the new credential,
//! or all fail and the session is cleared if the refresh does not succeed.

mod client;
pub mod config;
pub mod errors;
pub mod refresh;
pub mod request;
pub mod session;
pub mod telemetry;
pub mod transport;
mod types;


pub use client::AuthClient;
pub use config::{Config, ConfigLocation};
pub use errors::Error;
pub use refresh::RefreshState;
pub use request::{RequestAuthenticator, RequestDescriptor};
pub use session::{
    FileSessionStore, LogNotifier, MemorySessionStore, Session, SessionNotifier, SessionPatch,
    SessionStore, SignOut, TerminationReason, WatchNotifier,
};
pub use transport::RawResponse;
pub use types::ApiResponse;
