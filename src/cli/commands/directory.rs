use clap::{Arg, ArgMatches, Command};
use std::time::Duration;
use url::Url;

pub const ARG_USERS_API_ADDRESS: &str = "users-api-address";
pub const ARG_DIRECTORY_TIMEOUT_SECONDS: &str = "directory-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub address: Url,
    pub timeout: Duration,
}

impl Options {
    /// Parse users API arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the address is missing or not an absolute http(s) URL, or
    /// the timeout is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let address = match matches.get_one::<String>(ARG_USERS_API_ADDRESS) {
            Some(value) if !value.trim().is_empty() => value.trim(),
            _ => anyhow::bail!("missing required argument: --{ARG_USERS_API_ADDRESS}"),
        };
        let address = Url::parse(address)
            .map_err(|err| anyhow::anyhow!("invalid --{ARG_USERS_API_ADDRESS} {address}: {err}"))?;
        if !matches!(address.scheme(), "http" | "https") {
            anyhow::bail!("--{ARG_USERS_API_ADDRESS} must be an http(s) URL, got {address}");
        }

        let timeout = matches
            .get_one::<u64>(ARG_DIRECTORY_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(5);
        if timeout == 0 {
            anyhow::bail!("--{ARG_DIRECTORY_TIMEOUT_SECONDS} must be greater than zero");
        }

        Ok(Self {
            address,
            timeout: Duration::from_secs(timeout),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_USERS_API_ADDRESS)
                .long(ARG_USERS_API_ADDRESS)
                .help("Base URL of the users API, profiles are read from {address}/users/{username}")
                .env("USERS_API_ADDRESS")
                .default_value("http://users-api:8080"),
        )
        .arg(
            Arg::new(ARG_DIRECTORY_TIMEOUT_SECONDS)
                .long(ARG_DIRECTORY_TIMEOUT_SECONDS)
                .help("Timeout for a users API call in seconds")
                .env("AUTH_API_DIRECTORY_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}
