//! User lookups for the authorization gate.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use brain_core::error::Result;

use crate::types::UserProfile;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// `None` when the user is unknown; the engine then treats them as a guest.
    async fn by_id(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

pub struct InMemoryUsers {
    users: HashMap<String, UserProfile>,
}

impl InMemoryUsers {
    pub fn new(users: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.user_id.clone(), u)).collect(),
        }
    }

    /// Load a JSON array of profiles.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let users: Vec<UserProfile> = serde_json::from_str(&content)?;
        Ok(Self::new(users))
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn by_id(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.users.get(user_id).cloned())
    }
}
