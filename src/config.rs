//! read client configuration from a file, the environment or a secret

use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_config::BehaviorVersion;
use reqwest::Url;

use crate::errors::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub enum ConfigLocation {
    File(String),
    Env,
    Secret,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    pub base_url: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_sign_in_redirect")]
    pub sign_in_redirect: String,
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_login_path() -> String {
    "accounts/login".to_string()
}

fn default_refresh_path() -> String {
    "accounts/refresh-token".to_string()
}

fn default_sign_in_redirect() -> String {
    "/".to_string()
}

impl Config {
    /// Build a config programmatically; unspecified fields take their defaults.
    pub fn from_values(
        base_url: impl Into<String>,
        timeout_secs: Option<u64>,
        session_file: Option<PathBuf>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs,
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            sign_in_redirect: default_sign_in_redirect(),
            session_file,
            user_agent: None,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// # ENV Vars
    /// * `AUTHED_HTTP_BASE_URL` - API base URL (required)
    /// * `AUTHED_HTTP_TIMEOUT_SECS` - per-request timeout
    /// * `AUTHED_HTTP_LOGIN_PATH` / `AUTHED_HTTP_REFRESH_PATH` - auth endpoint paths
    /// * `AUTHED_HTTP_SIGN_IN_REDIRECT` - where hosts send users on sign-out
    /// * `AUTHED_HTTP_SESSION_FILE` - durable session location
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("AUTHED_HTTP_BASE_URL")
            .map_err(|_| Error::Config("Missing AUTHED_HTTP_BASE_URL env var".to_string()))?;
        let timeout_secs = match std::env::var("AUTHED_HTTP_TIMEOUT_SECS") {
            Ok(raw) => Some(raw.parse::<u64>().map_err(|e| {
                Error::Config(format!("Invalid AUTHED_HTTP_TIMEOUT_SECS '{}': {}", raw, e))
            })?),
            Err(_) => None,
        };
        let config = Config {
            base_url,
            timeout_secs,
            login_path: std::env::var("AUTHED_HTTP_LOGIN_PATH")
                .unwrap_or_else(|_| default_login_path()),
            refresh_path: std::env::var("AUTHED_HTTP_REFRESH_PATH")
                .unwrap_or_else(|_| default_refresh_path()),
            sign_in_redirect: std::env::var("AUTHED_HTTP_SIGN_IN_REDIRECT")
                .unwrap_or_else(|_| default_sign_in_redirect()),
            session_file: std::env::var("AUTHED_HTTP_SESSION_FILE").ok().map(PathBuf::from),
            user_agent: std::env::var("AUTHED_HTTP_USER_AGENT").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn from_secret() -> Result<Self, Error> {
        let secret_arn = std::env::var("AUTHED_HTTP_CONFIG_SECRET_ARN").map_err(|_| {
            Error::Config("Missing AUTHED_HTTP_CONFIG_SECRET_ARN env var".to_string())
        })?;
        let client = aws_sdk_secretsmanager::Client::new(
            &aws_config::load_defaults(BehaviorVersion::latest()).await,
        );
        let resp = client
            .get_secret_value()
            .secret_id(secret_arn)
            .send()
            .await
            .map_err(|e| Error::Config(format!("Failed to get secret: {}", e)))?;
        let secret = resp.secret_string().ok_or_else(|| {
            Error::Config("Failed to get secret string, returned None".to_string())
        })?;
        let config: Config = serde_json::from_str(secret)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_auth_paths(
        mut self,
        login_path: impl Into<String>,
        refresh_path: impl Into<String>,
    ) -> Self {
        self.login_path = login_path.into();
        self.refresh_path = refresh_path.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("authed-http/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Base URL with a scheme and a trailing slash, ready for `Url::join`.
    pub fn api_base(&self) -> Result<Url, Error> {
        let raw = if self.base_url.starts_with("http") {
            self.base_url.clone()
        } else {
            format!("https://{}", self.base_url)
        };
        let normalized = if raw.ends_with('/') {
            raw
        } else {
            format!("{}/", raw)
        };
        Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.api_base()?;
        if self.timeout_secs == Some(0) {
            return Err(Error::Config("timeout_secs must be > 0".into()));
        }
        if self.login_path.trim_matches('/').is_empty()
            || self.refresh_path.trim_matches('/').is_empty()
        {
            return Err(Error::Config(
                "login_path and refresh_path must not be empty".into(),
            ));
        }
        Ok(())
    }
}

pub async fn read_config(loc: ConfigLocation) -> Result<Config, Error> {
    match loc {
        ConfigLocation::File(path) => Config::from_file(path),
        ConfigLocation::Env => Config::from_env(),
        ConfigLocation::Secret => Config::from_secret().await,
    }
}
