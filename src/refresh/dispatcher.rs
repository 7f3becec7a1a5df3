use tracing::{info, warn};

use crate::errors::Error;
use crate::request::{RequestAuthenticator, RequestDescriptor};
use crate::transport::{HttpTransport, RawResponse};

/// Replays a request once with a freshly issued access credential.
#[derive(Clone, Debug)]
pub struct RetryDispatcher {
    transport: HttpTransport,
    authenticator: RequestAuthenticator,
}

impl RetryDispatcher {
    pub fn new(transport: HttpTransport, authenticator: RequestAuthenticator) -> Self {
        Self {
            transport,
            authenticator,
        }
    }

    /// The replay is marked as retried; a 401 on it is surfaced as
    /// `Error::Unauthorized` instead of going back to the coordinator.
    pub async fn replay(
        &self,
        original: RequestDescriptor,
        access_token: &str,
    ) -> Result<RawResponse, Error> {
        let request = self
            .authenticator
            .authorize_with(original.mark_retried(), access_token);
        info!(
            method = %request.method(),
            path = request.path(),
            "replaying request with refreshed credential"
        );
        let resp = self.transport.send(&request).await?;
        if resp.is_unauthorized() {
            warn!(
                method = %request.method(),
                path = request.path(),
                status = resp.status.as_u16(),
                "replayed request rejected with 401"
            );
            return Err(Error::Unauthorized(format!(
                "{} {} returned 401 after refresh: {}",
                request.method(),
                request.path(),
                resp.body
            )));
        }
        Ok(resp)
    }
}
