use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";

pub const DEFAULT_JWT_SECRET: &str = "myfancysecret";

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: SecretString,
    pub ttl: Duration,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is empty or the TTL is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        let ttl = matches
            .get_one::<u64>(ARG_TOKEN_TTL_SECONDS)
            .copied()
            .unwrap_or(72 * 60 * 60);
        if ttl == 0 {
            anyhow::bail!("--{ARG_TOKEN_TTL_SECONDS} must be greater than zero");
        }

        Ok(Self {
            secret,
            ttl: Duration::from_secs(ttl),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 secret for access tokens and users API service tokens")
                .env("JWT_SECRET")
                .hide_env_values(true)
                .hide_default_value(true)
                .default_value(DEFAULT_JWT_SECRET),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("AUTH_API_TOKEN_TTL_SECONDS")
                .default_value("259200")
                .value_parser(clap::value_parser!(u64)),
        )
}
