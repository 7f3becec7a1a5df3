use std::sync::Arc;

use crate::config::Config;
use crate::refresh::{RefreshCoordinator, RetryDispatcher};
use crate::request::RequestAuthenticator;
use crate::session::SessionStore;
use crate::transport::HttpTransport;

mod impls;

/// HTTP client that keeps a bearer session alive across access-token expiry.
#[derive(Clone)]
pub struct AuthClient {
    config: Config,
    transport: HttpTransport,
    authenticator: RequestAuthenticator,
    coordinator: Arc<RefreshCoordinator>,
    dispatcher: RetryDispatcher,
    store: Arc<dyn SessionStore>,
}
