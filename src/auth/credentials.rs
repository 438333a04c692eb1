//! Static username/password allow-list.
//!
//! Each allowed pair is stored as a credential key (`{username}_{password}`) and
//! checked by exact set membership. The list is built once at startup and never
//! changes afterwards.

use std::{collections::HashSet, fmt};
use thiserror::Error;

const KEY_DELIMITER: char = '_';
const ENTRY_SEPARATOR: char = ':';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("allowed user entry {0} must look like username:password")]
    MissingSeparator(usize),
    #[error("allowed user entry {0} has an empty username")]
    EmptyUsername(usize),
}

#[derive(Clone, Default)]
pub struct CredentialValidator {
    allowed: HashSet<String>,
}

impl CredentialValidator {
    #[must_use]
    pub fn new<I, U, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: AsRef<str>,
        P: AsRef<str>,
    {
        let allowed = pairs
            .into_iter()
            .map(|(username, password)| credential_key(username.as_ref(), password.as_ref()))
            .collect();
        Self { allowed }
    }

    /// Build the allow-list from `username:password` entries.
    ///
    /// The password is everything after the first `:`.
    ///
    /// # Errors
    /// Returns an error naming the (zero-based) entry that is malformed.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, CredentialsError> {
        let mut pairs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let (username, password) = entry
                .as_ref()
                .split_once(ENTRY_SEPARATOR)
                .ok_or(CredentialsError::MissingSeparator(index))?;
            let username = username.trim();
            if username.is_empty() {
                return Err(CredentialsError::EmptyUsername(index));
            }
            pairs.push((username, password));
        }
        Ok(Self::new(pairs))
    }

    #[must_use]
    pub fn validate(&self, username: &str, password: &str) -> bool {
        self.allowed.contains(&credential_key(username, password))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl fmt::Debug for CredentialValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialValidator")
            .field("allowed", &self.allowed.len())
            .finish()
    }
}

fn credential_key(username: &str, password: &str) -> String {
    format!("{username}{KEY_DELIMITER}{password}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CredentialValidator {
        CredentialValidator::new([("admin", "admin"), ("johnd", "foo"), ("janed", "ddd")])
    }

    #[test]
    fn accepts_allowed_pairs() {
        let validator = validator();
        assert!(validator.validate("admin", "admin"));
        assert!(validator.validate("johnd", "foo"));
        assert!(validator.validate("janed", "ddd"));
        assert_eq!(validator.len(), 3);
    }

    #[test]
    fn rejects_unknown_pairs() {
        let validator = validator();
        assert!(!validator.validate("admin", "wrong"));
        assert!(!validator.validate("johnd", "ddd"));
        assert!(!validator.validate("nobody", "admin"));
        assert!(!validator.validate("", ""));
        assert!(!validator.validate("Admin", "admin"));
    }

    #[test]
    fn empty_validator_rejects_everything() {
        let validator = CredentialValidator::default();
        assert!(validator.is_empty());
        assert!(!validator.validate("admin", "admin"));
    }

    #[test]
    fn parses_entries() -> Result<(), CredentialsError> {
        let validator = CredentialValidator::from_entries(&["admin:admin", "johnd:f:oo"])?;
        assert!(validator.validate("admin", "admin"));
        assert!(validator.validate("johnd", "f:oo"));
        Ok(())
    }

    #[test]
    fn rejects_malformed_entries() {
        assert_eq!(
            CredentialValidator::from_entries(&["admin:admin", "johnd"]).err(),
            Some(CredentialsError::MissingSeparator(1))
        );
        assert_eq!(
            CredentialValidator::from_entries(&[":secret"]).err(),
            Some(CredentialsError::EmptyUsername(0))
        );
    }

    #[test]
    fn debug_hides_keys() {
        let debug = format!("{:?}", validator());
        assert!(!debug.contains("admin"));
    }
}
