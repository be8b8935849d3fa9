//! Identity and role model.

use crate::errors::SecurityResult;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Role of an authenticated principal.
///
/// Role names from the simpler account model are accepted as aliases: `superAdmin`,
/// `admin` and `user` map to [`Role::SuperAdmin`], [`Role::Admin`] and
/// [`Role::Customer1`]. Anything else is kept as [`Role::Unknown`], which holds no
/// permissions and satisfies no role requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    SuperAdmin,
    Admin,
    Customer1,
    Customer2,
    Unknown(String),
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value {
            "SUPER_ADMIN" | "superAdmin" => Role::SuperAdmin,
            "ADMIN" | "admin" => Role::Admin,
            "CUSTOMER1" | "user" => Role::Customer1,
            "CUSTOMER2" => Role::Customer2,
            other => Role::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::Customer1 => "CUSTOMER1",
            Role::Customer2 => "CUSTOMER2",
            Role::Unknown(name) => name,
        }
    }

    pub fn is_admin_or_higher(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Admin)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Role::Unknown(_))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::parse(value)
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Role::parse(&value))
    }
}

/// The authenticated principal of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
        }
    }
}

/// Which credential established the identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthChannel {
    Session { session_id: String },
    Bearer,
}

impl AuthChannel {
    pub fn name(&self) -> &'static str {
        match self {
            AuthChannel::Session { .. } => "session",
            AuthChannel::Bearer => "bearer",
        }
    }
}

/// Resolves the current role of a subject. Consulted for every bearer token,
/// since tokens carry no role.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// `Ok(None)` when the subject does not exist
    async fn resolve_role(&self, subject_id: &str) -> SecurityResult<Option<Role>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SUPER_ADMIN", Role::SuperAdmin)]
    #[case("superAdmin", Role::SuperAdmin)]
    #[case("ADMIN", Role::Admin)]
    #[case("admin", Role::Admin)]
    #[case("CUSTOMER1", Role::Customer1)]
    #[case("user", Role::Customer1)]
    #[case("CUSTOMER2", Role::Customer2)]
    #[case("root", Role::Unknown("root".to_string()))]
    fn test_role_parsing(#[case] input: &str, #[case] expected: Role) {
        assert_eq!(Role::parse(input), expected);
    }

    #[test]
    fn test_role_serializes_canonically() {
        let identity = Identity::new("u-1", Role::parse("superAdmin"));
        let json = serde_json::to_value(&identity).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "subjectId": "u-1", "role": "SUPER_ADMIN" })
        );
        let back: Identity = serde_json::from_value(json).unwrap();
        assert_eq!(back, identity);
    }

    #[test]
    fn test_admin_or_higher() {
        assert!(Role::SuperAdmin.is_admin_or_higher());
        assert!(Role::Admin.is_admin_or_higher());
        assert!(!Role::Customer2.is_admin_or_higher());
        assert!(!Role::Unknown("ADMINISTRATOR".into()).is_admin_or_higher());
    }
}
