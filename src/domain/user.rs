//! User records provided by the external directory.

use serde::{Deserialize, Serialize};

use super::UserId;

/// A user as known to the [`crate::directory::UserDirectory`].
///
/// Only used to decorate views, never to authorize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Directory identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
}

impl User {
    /// Creates a user record.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
        }
    }
}
