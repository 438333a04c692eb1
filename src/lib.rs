//! # Auth API (Login Gateway)
//!
//! `auth-api` accepts username/password credentials over HTTP and answers with a
//! signed, time-limited access token (HS256 JWT).
//!
//! ## Login flow
//!
//! 1. The user profile is fetched from the users API (`GET /users/{username}`),
//!    authenticated with a short-lived service token.
//! 2. That call goes through a circuit breaker. While the breaker is open the
//!    users API is not called at all and a degraded `basic` identity is used instead.
//! 3. The username/password pair is checked against the allow-list loaded at startup.
//!    The fallback path never skips this check.
//! 4. The identity is signed into an access token valid for 72 hours.
//!
//! Only two failures reach the client: `401` for wrong credentials and a generic `500`
//! for everything else. Internal causes are logged.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
