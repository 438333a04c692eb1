//! HS256 token signing.
//!
//! One process-wide secret signs both the access tokens handed to clients and
//! the service tokens presented to the users API.

use crate::auth::identity::Identity;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Access tokens are valid for 72 hours unless configured otherwise.
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(72 * 60 * 60);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("invalid token ttl")]
    InvalidTtl,
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigner {
    #[must_use]
    pub fn from_secret(secret: &SecretString) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// # Errors
    /// Returns an error if the claims cannot be encoded or signed.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(TokenError::Sign)
    }

    /// Verify the signature and the `exp` claim, then decode the claims.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, expired, or signed with another key.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(TokenError::Invalid)
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("algorithm", &Algorithm::HS256)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub role: String,
    pub exp: i64,
}

impl AccessTokenClaims {
    #[must_use]
    pub fn matches(&self, identity: &Identity) -> bool {
        self.username == identity.username()
            && self.firstname == identity.first_name()
            && self.lastname == identity.last_name()
            && self.role == identity.role()
    }
}

#[derive(Debug, Clone)]
pub struct TokenIssuer {
    signer: TokenSigner,
    ttl: Duration,
}

impl TokenIssuer {
    #[must_use]
    pub const fn new(signer: TokenSigner) -> Self {
        Self {
            signer,
            ttl: DEFAULT_ACCESS_TOKEN_TTL,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign an access token for `identity`, expiring `ttl` from now.
    ///
    /// # Errors
    /// Returns an error if the expiry overflows or signing fails.
    pub fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, Utc::now().timestamp())
    }

    fn issue_at(&self, identity: &Identity, now: i64) -> Result<String, TokenError> {
        let ttl = i64::try_from(self.ttl.as_secs()).map_err(|_| TokenError::InvalidTtl)?;
        let exp = now.checked_add(ttl).ok_or(TokenError::InvalidTtl)?;

        let claims = AccessTokenClaims {
            username: identity.username().to_string(),
            firstname: identity.first_name().to_string(),
            lastname: identity.last_name().to_string(),
            role: identity.role().to_string(),
            exp,
        };
        self.signer.sign(&claims)
    }

    /// # Errors
    /// Returns an error if the token is not a valid, unexpired access token.
    pub fn decode(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.signer.verify(token)
    }
}
