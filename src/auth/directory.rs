//! Client for the users API (`GET {address}/users/{username}`).

use crate::auth::{
    identity::Identity,
    token::{TokenError, TokenSigner},
};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const SERVICE_TOKEN_SCOPE: &str = "read";
/// Service tokens only need to outlive a single users API call.
pub const SERVICE_TOKEN_TTL_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid users API address: {0}")]
    InvalidAddress(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to mint users API token: {0}")]
    Token(#[from] TokenError),
    #[error("failed to call users API: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    #[error("users API returned error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to unmarshal user data: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Claims of the token presented to the users API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceTokenClaims {
    pub username: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: Client,
    address: Url,
    signer: TokenSigner,
    timeout: Duration,
}

impl DirectoryClient {
    /// # Errors
    /// Returns an error if the address is not an absolute http(s) URL or the HTTP
    /// client cannot be built.
    pub fn new(address: &str, signer: TokenSigner) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .map_err(DirectoryError::Client)?;
        Self::with_client(client, address, signer)
    }

    /// # Errors
    /// Returns an error if the address is not an absolute http(s) URL.
    pub fn with_client(
        client: Client,
        address: &str,
        signer: TokenSigner,
    ) -> Result<Self, DirectoryError> {
        let address = Url::parse(address)
            .map_err(|err| DirectoryError::InvalidAddress(format!("{address}: {err}")))?;
        if !matches!(address.scheme(), "http" | "https") || address.cannot_be_a_base() {
            return Err(DirectoryError::InvalidAddress(address.to_string()));
        }

        Ok(Self {
            client,
            address,
            signer,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn address(&self) -> &Url {
        &self.address
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URL of the profile of `username`; the username is encoded as one path segment.
    ///
    /// # Errors
    /// Returns an error if the configured address cannot carry a path.
    pub fn user_url(&self, username: &str) -> Result<Url, DirectoryError> {
        let mut url = self.address.clone();
        url.path_segments_mut()
            .map_err(|()| DirectoryError::InvalidAddress(self.address.to_string()))?
            .pop_if_empty()
            .extend(["users", username]);
        Ok(url)
    }

    /// Mint the bearer token for a lookup of `username`.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn service_token(&self, username: &str) -> Result<String, DirectoryError> {
        let iat = Utc::now().timestamp();
        let claims = ServiceTokenClaims {
            username: username.to_string(),
            scope: SERVICE_TOKEN_SCOPE.to_string(),
            iat,
            exp: iat + SERVICE_TOKEN_TTL_SECONDS,
        };
        Ok(self.signer.sign(&claims)?)
    }

    /// Fetch the profile of `username`.
    ///
    /// The call is bounded by the client timeout and aborted when the returned
    /// future is dropped.
    ///
    /// # Errors
    /// Returns an error on transport failures, non-2xx answers, or bodies that do not
    /// decode into an [`Identity`].
    #[instrument(skip(self), fields(users_api = %self.address))]
    pub async fn fetch_user(&self, username: &str) -> Result<Identity, DirectoryError> {
        let token = self.service_token(username)?;
        let url = self.user_url(username)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(DirectoryError::Transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(DirectoryError::Body)?;

        if !status.is_success() {
            return Err(DirectoryError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let identity: Identity = serde_json::from_slice(&body)?;
        debug!(role = identity.role(), "users API returned profile");

        Ok(identity)
    }
}
