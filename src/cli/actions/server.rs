use crate::{
    api,
    auth::{
        breaker::{failure_ratio_trip, CircuitBreaker, Settings},
        credentials::CredentialValidator,
        directory::DirectoryClient,
        token::{TokenIssuer, TokenSigner},
        UserService, BREAKER_NAME,
    },
    cli::commands::{breaker, token::DEFAULT_JWT_SECRET},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt::Write, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub users_api_address: Url,
    pub directory_timeout: Duration,
    pub jwt_secret: SecretString,
    pub token_ttl: Duration,
    pub credentials: CredentialValidator,
    pub breaker: breaker::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the users API client cannot be built or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    if args.jwt_secret.expose_secret() == DEFAULT_JWT_SECRET {
        warn!("JWT_SECRET is not set, signing tokens with the built-in default secret");
    }

    let signer = TokenSigner::from_secret(&args.jwt_secret);

    let directory = DirectoryClient::new(args.users_api_address.as_str(), signer.clone())
        .context("Failed to build users API client")?
        .with_timeout(args.directory_timeout);

    let breaker = CircuitBreaker::new(breaker_settings(&args.breaker));

    let users = UserService::new(directory, breaker, args.credentials)
        .with_fail_open(args.breaker.fail_open);

    let issuer = TokenIssuer::new(signer).with_ttl(args.token_ttl);

    api::new(args.port, Arc::new(users), Arc::new(issuer)).await
}

fn breaker_settings(options: &breaker::Options) -> Settings {
    Settings::new(BREAKER_NAME)
        .with_max_requests(options.max_requests)
        .with_interval(options.interval)
        .with_timeout(options.timeout)
        .with_ready_to_trip(failure_ratio_trip(
            options.min_requests,
            options.failure_ratio,
        ))
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("users_api_address", args.users_api_address.to_string()),
        (
            "directory_timeout",
            format!("{}s", args.directory_timeout.as_secs()),
        ),
        ("jwt_secret", "REDACTED".to_string()),
        ("token_ttl", format!("{}s", args.token_ttl.as_secs())),
        ("allowed_users", args.credentials.len().to_string()),
        ("fail_open", args.breaker.fail_open.to_string()),
        (
            "breaker",
            format!(
                "max_requests={} interval={}s timeout={}s trip={}/{}",
                args.breaker.max_requests,
                args.breaker.interval.as_secs(),
                args.breaker.timeout.as_secs(),
                args.breaker.min_requests,
                args.breaker.failure_ratio
            ),
        ),
    ];
    info!("{}", startup_message(&entries));
}

fn startup_message(entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ = write!(message, "\n  {key}:{padding} {value}");
    }
    message
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> anyhow::Result<Args> {
        Ok(Args {
            port: 8080,
            users_api_address: Url::parse("http://users-api:8080")?,
            directory_timeout: Duration::from_secs(5),
            jwt_secret: SecretString::from("super-secret-value".to_string()),
            token_ttl: Duration::from_secs(259_200),
            credentials: CredentialValidator::new([("admin", "admin")]),
            breaker: breaker::Options {
                max_requests: 3,
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(60),
                min_requests: 5,
                failure_ratio: 0.6,
                fail_open: true,
            },
        })
    }

    #[test]
    fn args_debug_hides_secrets() -> anyhow::Result<()> {
        let debug = format!("{:?}", args()?);
        assert!(!debug.contains("super-secret-value"));
        assert!(!debug.contains("admin"));
        Ok(())
    }

    #[test]
    fn startup_message_aligns_keys() {
        let message = startup_message(&[
            ("listen", "tcp:8080".to_string()),
            ("jwt_secret", "REDACTED".to_string()),
        ]);
        assert!(message.contains("\n  listen:     tcp:8080"));
        assert!(message.contains("\n  jwt_secret: REDACTED"));
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[test]
    fn breaker_settings_follow_options() -> anyhow::Result<()> {
        let settings = breaker_settings(&args()?.breaker);
        assert_eq!(settings.name(), BREAKER_NAME);
        assert_eq!(settings.max_requests(), 3);
        assert_eq!(settings.interval(), Duration::from_secs(30));
        assert_eq!(settings.timeout(), Duration::from_secs(60));
        Ok(())
    }
}
