//! In-memory user directory
//!
//! Holds accounts keyed by id with a secondary email index. It is also the
//! gate's [`IdentityLookup`], so role changes and deletions are seen by the very next
//! bearer-authenticated request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gatekeeper_security::{IdentityLookup, Role, SecurityResult};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// A stored account
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Public view of an account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserProfile {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: DashMap<String, UserRecord>,
    /// normalized email → user id
    emails: DashMap<String, String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account. Fails with a conflict when the email is taken.
    pub fn create(&self, new_user: NewUser) -> Result<UserRecord> {
        let email = normalize_email(&new_user.email);

        // The email index entry is the uniqueness lock
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => Err(ApiError::conflict("Email is already registered")),
            Entry::Vacant(slot) => {
                let user = UserRecord {
                    id: Uuid::new_v4().to_string(),
                    email,
                    name: new_user.name.trim().to_string(),
                    role: new_user.role,
                    password_hash: new_user.password_hash,
                    created_at: Utc::now(),
                };
                self.users.insert(user.id.clone(), user.clone());
                slot.insert(user.id.clone());
                Ok(user)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<UserRecord> {
        self.users.get(id).map(|user| user.clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        let id = self.emails.get(&normalize_email(email))?.clone();
        self.get(&id)
    }

    /// All accounts, oldest first
    pub fn list(&self) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self.users.iter().map(|user| user.clone()).collect();
        users.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.email.cmp(&b.email))
        });
        users
    }

    pub fn set_role(&self, id: &str, role: Role) -> Option<UserRecord> {
        let mut user = self.users.get_mut(id)?;
        user.role = role;
        Some(user.clone())
    }

    /// Remove an account unless it is a super admin. The role is checked under the
    /// same shard lock as the removal, so a concurrent promotion cannot slip through.
    pub fn remove_unless_super_admin(&self, id: &str) -> Result<UserRecord> {
        match self.users.remove_if(id, |_, user| user.role != Role::SuperAdmin) {
            Some((_, user)) => {
                self.emails.remove(&user.email);
                Ok(user)
            }
            None if self.users.contains_key(id) => Err(ApiError::forbidden(
                "Super admin accounts cannot be deleted",
            )),
            None => Err(ApiError::not_found("User")),
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.users.iter().any(|user| &user.role == role)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityLookup for UserDirectory {
    async fn resolve_role(&self, subject_id: &str) -> SecurityResult<Option<Role>> {
        Ok(self.users.get(subject_id).map(|user| user.role.clone()))
    }
}
