use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    AuthClient,
    config::{Config, ConfigLocation, read_config},
    errors::Error,
    refresh::{ExemptPaths, RefreshCoordinator, RetryDispatcher},
    request::{RequestAuthenticator, RequestDescriptor},
    session::{
        FileSessionStore, LogNotifier, MemorySessionStore, Session, SessionNotifier, SessionPatch,
        SessionStore, SessionTerminator, TerminationReason,
    },
    transport::{HttpTransport, RawResponse},
    types::{ApiResponse, LoginData, LoginRequest, RefreshTokenData, RefreshTokenRequest},
};

impl AuthClient {
    /// Create a new AuthClient
    /// # Arguments
    /// * `config` - Explicit configuration, typically loaded via `Config::from_file` or `Config::from_env`
    /// * `store` - Where the session lives between calls (and restarts, for durable stores)
    /// * `notifier` - Told whenever the session ends so the host can leave the authenticated area
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let transport = HttpTransport::from_config(&config)?;
        let authenticator = RequestAuthenticator;
        let terminator =
            SessionTerminator::new(store.clone(), notifier, config.sign_in_redirect.clone());
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            terminator,
            ExemptPaths::new(&config.login_path, &config.refresh_path),
            config.timeout(),
        ));
        let dispatcher = RetryDispatcher::new(transport.clone(), authenticator);
        Ok(AuthClient {
            config,
            transport,
            authenticator,
            coordinator,
            dispatcher,
            store,
        })
    }

    /// Reads configuration from `loc` and uses a file-backed store when
    /// `session_file` is set, an in-memory one otherwise.
    pub async fn from_location(loc: ConfigLocation) -> Result<Self, Error> {
        let config = read_config(loc).await?;
        let store: Arc<dyn SessionStore> = match &config.session_file {
            Some(path) => Arc::new(FileSessionStore::open(path)),
            None => Arc::new(MemorySessionStore::new()),
        };
        Self::new(config, store, Arc::new(LogNotifier))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> Session {
        self.store.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_authenticated()
    }

    pub fn current_user(&self) -> Option<Value> {
        self.store.get().user_profile
    }

    /// Signs in and replaces the stored session. Sent without a bearer
    /// header; a refresh still running for the previous session is
    /// invalidated so its token never lands in the new one.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, Error> {
        let request = RequestDescriptor::post(self.config.login_path.clone())
            .json(&LoginRequest { email, password })?;
        let resp = self.transport.send(&request).await?;
        if resp.is_unauthorized() {
            warn!(path = request.path(), "login rejected with 401");
            self.coordinator
                .end_session(TerminationReason::ExemptEndpointRejected);
            return Err(Error::SessionEnded(format!(
                "{} {} was rejected",
                request.method(),
                request.path()
            )));
        }
        let resp: ApiResponse<LoginData> = resp.into_envelope()?;
        let data = resp.data.ok_or_else(|| Error::Api {
            message: "login response carried no data".to_string(),
            error_code: None,
        })?;
        self.coordinator.begin_session(SessionPatch {
            access_token: Some(data.access_token),
            refresh_token: Some(data.refresh_token),
            user_profile: data.user,
        });
        info!("login ok");
        Ok(self.store.get())
    }

    pub fn logout(&self) {
        self.coordinator.end_session(TerminationReason::Logout);
    }

    /// Sends `request` with the current access credential. A 401 goes through
    /// the refresh coordinator and, if a new credential comes back, the
    /// request is replayed once with it.
    pub async fn send(&self, request: RequestDescriptor) -> Result<RawResponse, Error> {
        let session = self.store.get();
        let authed = self.authenticator.authorize(request.clone(), &session);
        let resp = self.transport.send(&authed).await?;
        if !resp.is_unauthorized() {
            return Ok(resp);
        }
        warn!(
            method = %request.method(),
            path = request.path(),
            status = resp.status.as_u16(),
            "request rejected with 401; consulting refresh coordinator"
        );
        let access_token = self
            .coordinator
            .handle_auth_failure(&request, |refresh_token| {
                self.request_refresh(refresh_token)
            })
            .await?;
        self.dispatcher.replay(request, &access_token).await
    }

    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<ApiResponse<T>, Error> {
        self.send(request).await?.into_envelope()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, Error> {
        self.execute(RequestDescriptor::get(path)).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, Error> {
        self.execute(RequestDescriptor::post(path).json(body)?).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, Error> {
        self.execute(RequestDescriptor::put(path).json(body)?).await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, Error> {
        self.execute(RequestDescriptor::patch(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, Error> {
        self.execute(RequestDescriptor::delete(path)).await
    }

    /// Exchanges the refresh credential for a new access credential. Sent
    /// without a bearer header and never routed back through `send`.
    async fn request_refresh(&self, refresh_token: String) -> Result<String, Error> {
        let request = RequestDescriptor::post(self.config.refresh_path.clone()).json(
            &RefreshTokenRequest {
                refresh_token: &refresh_token,
            },
        )?;
        let resp = self.transport.send(&request).await?;
        if !resp.status.is_success() {
            error!(
                "refresh token call failed: status={} body='{}'",
                resp.status, resp.body
            );
            return Err(Error::Http(resp.status, resp.body));
        }
        let envelope: ApiResponse<RefreshTokenData> = serde_json::from_str(&resp.body)?;
        let data = envelope.into_result()?.data.ok_or_else(|| {
            Error::RefreshFailed("refresh response carried no access token".to_string())
        })?;
        info!("access token refreshed (len={})", data.access_token.len());
        Ok(data.access_token)
    }
}
