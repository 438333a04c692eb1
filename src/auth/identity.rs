use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const FALLBACK_FIRST_NAME: &str = "Unknown";
pub const FALLBACK_LAST_NAME: &str = "User";
pub const FALLBACK_ROLE: &str = "basic";

/// Profile of the user being logged in, as returned by the users API.
///
/// Missing profile fields decode as empty strings; a body that is not a JSON
/// object is rejected.
// `default` fills absent fields only; a JSON `null` body is still a decode error.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Identity {
    username: String,
    #[serde(rename = "firstname")]
    first_name: String,
    #[serde(rename = "lastname")]
    last_name: String,
    role: String,
}

impl Identity {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            role: role.into(),
        }
    }

    /// Degraded identity used when the users API is short-circuited.
    #[must_use]
    pub fn fallback(username: &str) -> Self {
        Self::new(
            username,
            FALLBACK_FIRST_NAME,
            FALLBACK_LAST_NAME,
            FALLBACK_ROLE,
        )
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    #[must_use]
    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn decodes_users_api_payload() -> Result<()> {
        let identity: Identity = serde_json::from_value(json!({
            "username": "admin",
            "firstname": "Admin",
            "lastname": "User",
            "role": "admin",
        }))?;
        assert_eq!(identity, Identity::new("admin", "Admin", "User", "admin"));
        Ok(())
    }

    #[test]
    fn missing_fields_decode_empty() -> Result<()> {
        let identity: Identity = serde_json::from_value(json!({ "username": "johnd" }))?;
        assert_eq!(identity.username(), "johnd");
        assert!(identity.role().is_empty());
        Ok(())
    }

    #[test]
    fn null_body_is_rejected() {
        assert!(serde_json::from_str::<Identity>("null").is_err());
    }

    #[test]
    fn fallback_identity() {
        let identity = Identity::fallback("janed");
        assert_eq!(identity.username(), "janed");
        assert_eq!(identity.first_name(), "Unknown");
        assert_eq!(identity.last_name(), "User");
        assert_eq!(identity.role(), "basic");
    }
}
