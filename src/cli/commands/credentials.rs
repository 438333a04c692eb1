use crate::auth::credentials::CredentialValidator;
use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_ALLOWED_USERS: &str = "allowed-users";

const DEFAULT_ALLOWED_USERS: [&str; 3] = ["admin:admin", "johnd:foo", "janed:ddd"];

#[derive(Debug, Clone)]
pub struct Options {
    pub credentials: CredentialValidator,
}

impl Options {
    /// Parse the login allow-list from matches.
    ///
    /// # Errors
    /// Returns an error if an entry is not `username:password`.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let entries: Vec<&String> = matches
            .get_many::<String>(ARG_ALLOWED_USERS)
            .map(Iterator::collect)
            .unwrap_or_default();

        let credentials = CredentialValidator::from_entries(&entries)
            .with_context(|| format!("invalid --{ARG_ALLOWED_USERS}"))?;

        Ok(Self { credentials })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_ALLOWED_USERS)
            .long(ARG_ALLOWED_USERS)
            .help("Comma separated username:password pairs allowed to log in")
            .env("AUTH_API_ALLOWED_USERS")
            .hide_env_values(true)
            .hide_default_value(true)
            .value_delimiter(',')
            .action(ArgAction::Append)
            .default_values(DEFAULT_ALLOWED_USERS),
    )
}
