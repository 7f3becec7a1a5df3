use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Envelope every endpoint of the API answers with.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Parsed envelope timestamp, when the server sent RFC 3339.
    pub fn timestamp(&self) -> Option<jiff::Timestamp> {
        self.timestamp.parse().ok()
    }

    /// Converts `success: false` into `Error::Api`.
    pub fn into_result(self) -> Result<Self, Error> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::Api {
                message: self.message,
                error_code: self.error_code,
            })
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshTokenData {
    pub access_token: String,
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginData {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}
