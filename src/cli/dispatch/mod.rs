//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{breaker, credentials, directory, token, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if an argument group fails validation.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let directory_opts = directory::Options::parse(matches)?;
    let token_opts = token::Options::parse(matches)?;
    let credentials_opts = credentials::Options::parse(matches)?;
    let breaker_opts = breaker::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        users_api_address: directory_opts.address,
        directory_timeout: directory_opts.timeout,
        jwt_secret: token_opts.secret,
        token_ttl: token_opts.ttl,
        credentials: credentials_opts.credentials,
        breaker: breaker_opts,
    }))
}
