pub mod breaker;
pub mod credentials;
pub mod directory;
pub mod identity;
pub mod token;

use self::{
    breaker::{BreakerError, CircuitBreaker},
    credentials::CredentialValidator,
    directory::{DirectoryClient, DirectoryError},
    identity::Identity,
};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

pub const BREAKER_NAME: &str = "UserAPI-CircuitBreaker";

/// The only failures a login reports to its caller. Causes are logged, never returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoginError {
    #[error("username or password is invalid")]
    WrongCredentials,
    #[error("something went wrong, please try again later")]
    Internal,
}

/// Resolves a username/password pair into an [`Identity`].
#[derive(Debug)]
pub struct UserService {
    directory: DirectoryClient,
    breaker: CircuitBreaker,
    credentials: CredentialValidator,
    fail_open: bool,
}

impl UserService {
    #[must_use]
    pub fn new(
        directory: DirectoryClient,
        breaker: CircuitBreaker,
        credentials: CredentialValidator,
    ) -> Self {
        Self {
            directory,
            breaker,
            credentials,
            fail_open: true,
        }
    }

    /// When disabled, a login while the breaker is open fails instead of falling
    /// back to the degraded identity.
    #[must_use]
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub const fn fail_open(&self) -> bool {
        self.fail_open
    }

    /// Authenticate `username` with `password`.
    ///
    /// The profile lookup always goes through the breaker. The password is checked
    /// on every path, so the fallback identity is only handed out for allowed pairs.
    ///
    /// # Errors
    /// [`LoginError::WrongCredentials`] when the pair is not allowed, whatever the
    /// state of the users API; [`LoginError::Internal`] when the lookup fails.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, LoginError> {
        let lookup = self
            .breaker
            .execute(|| self.directory.fetch_user(username))
            .await;

        if !self.credentials.validate(username, password) {
            if let Err(err) = &lookup {
                debug!(error = %err, "users API lookup failed for rejected credentials");
            }
            return Err(LoginError::WrongCredentials);
        }

        match lookup {
            Ok(identity) => Ok(identity),
            Err(err) => self.recover(username, &err),
        }
    }

    fn recover(
        &self,
        username: &str,
        err: &BreakerError<DirectoryError>,
    ) -> Result<Identity, LoginError> {
        // Only an open breaker falls back; an exhausted half-open trial budget is
        // an ordinary failure.
        if matches!(err, BreakerError::Open) && self.fail_open {
            warn!(
                breaker = self.breaker.name(),
                "users API short-circuited, using fallback identity"
            );
            return Ok(Identity::fallback(username));
        }

        error!(error = %err, "failed to fetch user profile");
        Err(LoginError::Internal)
    }
}
