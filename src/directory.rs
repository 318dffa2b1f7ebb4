//! User directory collaborator.
//!
//! The engine never authenticates or authorizes users; the directory only
//! decorates views with user records. A user missing from the directory is
//! rendered as `None` rather than failing the read.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{User, UserId};
use crate::error::BackendError;

/// Lookup of user records.
#[async_trait]
pub trait UserDirectory: Send + Sync + std::fmt::Debug {
    /// Returns one user, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the directory cannot be reached.
    async fn get(&self, user_id: &UserId) -> Result<Option<User>, BackendError>;

    /// Returns every known user keyed by id.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the directory cannot be reached.
    async fn list(&self) -> Result<HashMap<UserId, User>, BackendError>;
}

/// Directory kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory holding `users`.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.id.clone(), u)).collect()),
        }
    }

    /// Adds or replaces a user record.
    pub fn insert(&self, user: User) {
        self.users.write().insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn get(&self, user_id: &UserId) -> Result<Option<User>, BackendError> {
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn list(&self) -> Result<HashMap<UserId, User>, BackendError> {
        Ok(self.users.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookups_return_inserted_users() {
        let directory = InMemoryDirectory::with_users([User::new("u1", "Ada")]);
        directory.insert(User::new("u2", "Grace"));

        let found = directory.get(&UserId::from("u2")).await.ok().flatten();
        assert_eq!(found.map(|u| u.name), Some("Grace".to_string()));
        assert!(matches!(directory.get(&UserId::from("u3")).await, Ok(None)));
        assert_eq!(directory.list().await.map(|all| all.len()).ok(), Some(2));
    }
}
