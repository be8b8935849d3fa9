//! Role-Based Access Control
//!
//! A static role → permission table and the pure authorization evaluator.

use crate::errors::SecurityError;
use crate::identity::{Identity, Role};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Permission names understood by the default table
pub mod permissions {
    pub const MANAGE_USERS: &str = "manage_users";
    pub const MANAGE_ROLES: &str = "manage_roles";
    pub const VIEW_LOGS: &str = "view_logs";
    pub const MANAGE_SETTINGS: &str = "manage_settings";
    pub const VIEW_OWN_DATA: &str = "view_own_data";
    pub const VIEW_REPORTS: &str = "view_reports";
}

/// Static mapping from role to permission names. A role without an entry has no
/// permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTable {
    roles: HashMap<Role, BTreeSet<String>>,
}

impl PermissionTable {
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    /// Replace the permission set of `role`
    pub fn with_role<I, S>(mut self, role: Role, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .insert(role, permissions.into_iter().map(Into::into).collect());
        self
    }

    pub fn has_permission(&self, role: &Role, permission: &str) -> bool {
        if !role.is_known() {
            return false;
        }
        self.roles
            .get(role)
            .map(|granted| granted.contains(permission))
            .unwrap_or(false)
    }

    /// Sorted permission names of `role`; empty for an unknown role
    pub fn permissions(&self, role: &Role) -> Vec<&str> {
        if !role.is_known() {
            return Vec::new();
        }
        self.roles
            .get(role)
            .map(|granted| granted.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl Default for PermissionTable {
    fn default() -> Self {
        use permissions::*;

        Self::empty()
            .with_role(
                Role::SuperAdmin,
                [MANAGE_USERS, MANAGE_ROLES, VIEW_LOGS, MANAGE_SETTINGS],
            )
            .with_role(Role::Admin, [MANAGE_USERS, VIEW_LOGS])
            .with_role(Role::Customer1, [VIEW_OWN_DATA])
            .with_role(Role::Customer2, [VIEW_OWN_DATA, VIEW_REPORTS])
    }
}

/// What a route demands of the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// No identity needed; authentication is skipped
    Public,
    /// Any authenticated identity
    Authenticated,
    /// Exactly this role
    Role(Role),
    /// ADMIN or SUPER_ADMIN
    AdminOrHigher,
    SuperAdmin,
    /// A named permission from the permission table
    Permission(String),
}

impl Requirement {
    pub fn permission(name: impl Into<String>) -> Self {
        Requirement::Permission(name.into())
    }

    pub fn needs_identity(&self) -> bool {
        !matches!(self, Requirement::Public)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Public => f.write_str("public"),
            Requirement::Authenticated => f.write_str("authenticated"),
            Requirement::Role(role) => write!(f, "role:{}", role),
            Requirement::AdminOrHigher => f.write_str("admin_or_higher"),
            Requirement::SuperAdmin => f.write_str("super_admin"),
            Requirement::Permission(name) => write!(f, "permission:{}", name),
        }
    }
}

/// Result of evaluating a requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allowed,
    /// No identity was established
    Unauthenticated,
    /// Identity present but insufficient
    Forbidden { required: String, found: String },
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthorizationDecision::Allowed)
    }

    pub fn into_result(self) -> Result<(), SecurityError> {
        match self {
            AuthorizationDecision::Allowed => Ok(()),
            AuthorizationDecision::Unauthenticated => Err(SecurityError::MissingCredentials),
            AuthorizationDecision::Forbidden { required, found } => {
                Err(SecurityError::InsufficientPermissions { required, found })
            }
        }
    }
}

/// Evaluate `requirement` for `identity`. Pure: no lookups, no side effects.
pub fn authorize(
    identity: Option<&Identity>,
    requirement: &Requirement,
    table: &PermissionTable,
) -> AuthorizationDecision {
    if !requirement.needs_identity() {
        return AuthorizationDecision::Allowed;
    }

    let Some(identity) = identity else {
        return AuthorizationDecision::Unauthenticated;
    };

    let role = &identity.role;
    let allowed = match requirement {
        Requirement::Public | Requirement::Authenticated => true,
        Requirement::Role(required) => role.is_known() && role == required,
        Requirement::AdminOrHigher => role.is_admin_or_higher(),
        Requirement::SuperAdmin => *role == Role::SuperAdmin,
        Requirement::Permission(name) => table.has_permission(role, name),
    };

    if allowed {
        AuthorizationDecision::Allowed
    } else {
        AuthorizationDecision::Forbidden {
            required: requirement.to_string(),
            found: role.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::permissions::*;
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn identity(role: Role) -> Identity {
        Identity::new("subject-1", role)
    }

    #[test]
    fn test_default_table() {
        let table = PermissionTable::default();

        assert_eq!(
            table.permissions(&Role::SuperAdmin),
            vec![MANAGE_ROLES, MANAGE_SETTINGS, MANAGE_USERS, VIEW_LOGS]
        );
        assert_eq!(table.permissions(&Role::Admin), vec![MANAGE_USERS, VIEW_LOGS]);
        assert_eq!(table.permissions(&Role::Customer1), vec![VIEW_OWN_DATA]);
        assert_eq!(
            table.permissions(&Role::Customer2),
            vec![VIEW_OWN_DATA, VIEW_REPORTS]
        );
    }

    #[test]
    fn test_unknown_role_has_no_permissions() {
        let table = PermissionTable::default();
        let role = Role::Unknown("auditor".to_string());

        assert!(table.permissions(&role).is_empty());
        assert!(!table.has_permission(&role, VIEW_OWN_DATA));
    }

    #[rstest]
    #[case(Role::Customer1, Requirement::permission(MANAGE_USERS), false)]
    #[case(Role::Admin, Requirement::permission(MANAGE_USERS), true)]
    #[case(Role::SuperAdmin, Requirement::permission(MANAGE_SETTINGS), true)]
    #[case(Role::Admin, Requirement::permission(MANAGE_SETTINGS), false)]
    #[case(Role::Customer2, Requirement::permission(VIEW_REPORTS), true)]
    #[case(Role::Customer1, Requirement::permission(VIEW_REPORTS), false)]
    #[case(Role::Admin, Requirement::AdminOrHigher, true)]
    #[case(Role::SuperAdmin, Requirement::AdminOrHigher, true)]
    #[case(Role::Customer2, Requirement::AdminOrHigher, false)]
    #[case(Role::Admin, Requirement::SuperAdmin, false)]
    #[case(Role::SuperAdmin, Requirement::SuperAdmin, true)]
    #[case(Role::Customer2, Requirement::Role(Role::Customer2), true)]
    #[case(Role::SuperAdmin, Requirement::Role(Role::Customer2), false)]
    #[case(Role::Customer1, Requirement::Authenticated, true)]
    #[case(
        Role::Unknown("x".into()),
        Requirement::Role(Role::Unknown("x".into())),
        false
    )]
    fn test_authorize(#[case] role: Role, #[case] requirement: Requirement, #[case] allowed: bool) {
        let table = PermissionTable::default();
        let decision = authorize(Some(&identity(role)), &requirement, &table);
        assert_eq!(decision.is_allowed(), allowed);
    }

    #[test]
    fn test_missing_identity_is_unauthenticated_not_forbidden() {
        let table = PermissionTable::default();

        let decision = authorize(None, &Requirement::permission(MANAGE_USERS), &table);
        assert_eq!(decision, AuthorizationDecision::Unauthenticated);
        assert!(matches!(
            decision.into_result(),
            Err(SecurityError::MissingCredentials)
        ));

        assert!(authorize(None, &Requirement::Public, &table).is_allowed());
    }

    #[test]
    fn test_forbidden_carries_detail_for_logs() {
        let decision = authorize(
            Some(&identity(Role::Customer1)),
            &Requirement::permission(MANAGE_USERS),
            &PermissionTable::default(),
        );

        assert_eq!(
            decision,
            AuthorizationDecision::Forbidden {
                required: "permission:manage_users".to_string(),
                found: "CUSTOMER1".to_string(),
            }
        );
    }
}
