use crate::auth::breaker::{
    DEFAULT_FAILURE_RATIO, DEFAULT_INTERVAL, DEFAULT_MAX_REQUESTS, DEFAULT_MIN_REQUESTS,
    DEFAULT_TIMEOUT,
};
use clap::{builder::BoolishValueParser, Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_BREAKER_MAX_REQUESTS: &str = "breaker-max-requests";
pub const ARG_BREAKER_INTERVAL_SECONDS: &str = "breaker-interval-seconds";
pub const ARG_BREAKER_TIMEOUT_SECONDS: &str = "breaker-timeout-seconds";
pub const ARG_BREAKER_MIN_REQUESTS: &str = "breaker-min-requests";
pub const ARG_BREAKER_FAILURE_RATIO: &str = "breaker-failure-ratio";
pub const ARG_FAIL_OPEN: &str = "fail-open";

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub max_requests: u32,
    /// Zero keeps the closed counts for the whole closed period.
    pub interval: Duration,
    pub timeout: Duration,
    pub min_requests: u32,
    pub failure_ratio: f64,
    pub fail_open: bool,
}

impl Options {
    /// Parse circuit breaker arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a value is out of range.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let max_requests = matches
            .get_one::<u32>(ARG_BREAKER_MAX_REQUESTS)
            .copied()
            .unwrap_or(DEFAULT_MAX_REQUESTS);
        if max_requests == 0 {
            anyhow::bail!("--{ARG_BREAKER_MAX_REQUESTS} must be greater than zero");
        }

        let timeout = matches
            .get_one::<u64>(ARG_BREAKER_TIMEOUT_SECONDS)
            .copied()
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        if timeout.is_zero() {
            anyhow::bail!("--{ARG_BREAKER_TIMEOUT_SECONDS} must be greater than zero");
        }

        let failure_ratio = matches
            .get_one::<f64>(ARG_BREAKER_FAILURE_RATIO)
            .copied()
            .unwrap_or(DEFAULT_FAILURE_RATIO);
        if !(0.0..=1.0).contains(&failure_ratio) {
            anyhow::bail!("--{ARG_BREAKER_FAILURE_RATIO} must be between 0 and 1");
        }

        Ok(Self {
            max_requests,
            interval: matches
                .get_one::<u64>(ARG_BREAKER_INTERVAL_SECONDS)
                .copied()
                .map_or(DEFAULT_INTERVAL, Duration::from_secs),
            timeout,
            min_requests: matches
                .get_one::<u32>(ARG_BREAKER_MIN_REQUESTS)
                .copied()
                .unwrap_or(DEFAULT_MIN_REQUESTS),
            failure_ratio,
            fail_open: matches.get_one::<bool>(ARG_FAIL_OPEN).copied().unwrap_or(true),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BREAKER_MAX_REQUESTS)
                .long(ARG_BREAKER_MAX_REQUESTS)
                .help("Trial calls admitted while half-open, also the successes needed to close")
                .env("AUTH_API_BREAKER_MAX_REQUESTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_BREAKER_INTERVAL_SECONDS)
                .long(ARG_BREAKER_INTERVAL_SECONDS)
                .help("Period after which closed-state counts are reset, 0 disables")
                .env("AUTH_API_BREAKER_INTERVAL_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_BREAKER_TIMEOUT_SECONDS)
                .long(ARG_BREAKER_TIMEOUT_SECONDS)
                .help("Time the breaker stays open before admitting trial calls")
                .env("AUTH_API_BREAKER_TIMEOUT_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_BREAKER_MIN_REQUESTS)
                .long(ARG_BREAKER_MIN_REQUESTS)
                .help("Requests in the current window before the failure ratio is considered")
                .env("AUTH_API_BREAKER_MIN_REQUESTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_BREAKER_FAILURE_RATIO)
                .long(ARG_BREAKER_FAILURE_RATIO)
                .help("Failure ratio (0-1) that opens the breaker")
                .env("AUTH_API_BREAKER_FAILURE_RATIO")
                .default_value("0.6")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_FAIL_OPEN)
                .long(ARG_FAIL_OPEN)
                .help("Log in with a basic fallback identity while the users API is short-circuited")
                .env("AUTH_API_FAIL_OPEN")
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
}
