use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::errors::Error;
use crate::request::RequestDescriptor;
use crate::types::ApiResponse;

/// Response as it came off the wire.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Decodes the API envelope, turning non-2xx statuses and `success: false`
    /// into errors.
    pub fn into_envelope<T: DeserializeOwned>(self) -> Result<ApiResponse<T>, Error> {
        if self.is_unauthorized() {
            return Err(Error::Unauthorized(self.body));
        }
        if !self.status.is_success() {
            return Err(Error::Http(self.status, self.body));
        }
        let envelope: ApiResponse<T> = serde_json::from_str(&self.body)?;
        envelope.into_result()
    }
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    http_client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let timeout = config.timeout();
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent())
            .build()?;
        Ok(Self {
            http_client,
            base: config.api_base()?,
            timeout,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid request path '{}': {}", path, e)))
    }

    pub async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, Error> {
        let url = self.endpoint(request.path())?;
        let mut builder = self
            .http_client
            .request(request.method().clone(), url)
            .headers(request.headers().clone());
        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(|e| self.classify(e))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(|e| self.classify(e))?;
        debug!(
            method = %request.method(),
            path = request.path(),
            status = status.as_u16(),
            retried = request.is_retried(),
            "http.response"
        );
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn classify(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Reqwest(err)
        }
    }
}
