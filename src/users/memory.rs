use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::users::{
    repo::{StoreError, UserStore},
    repo_types::{NewUser, User, UserChanges, UserField},
};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    last_id: i64,
}

/// In-process store. Uniqueness is checked under the write lock, so it holds
/// the same backstop guarantee as the database constraint.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflicts(users: &[User], skip_id: Option<i64>, username: &str, email: &str) -> bool {
    users
        .iter()
        .filter(|u| Some(u.id) != skip_id)
        .any(|u| u.username == username || u.email == email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.inner.read().await.users.clone())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn find_by_field(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .iter()
            .find(|u| field.value_of(u) == value)
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if conflicts(&inner.users, None, &new_user.username, &new_user.email) {
            return Err(StoreError::UniqueViolation);
        }
        inner.last_id += 1;
        let user = User {
            id: inner.last_id,
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(pos) = inner.users.iter().position(|u| u.id == id) else {
            return Ok(None);
        };

        let current = &inner.users[pos];
        let username = changes.username.unwrap_or_else(|| current.username.clone());
        let email = changes.email.unwrap_or_else(|| current.email.clone());
        if conflicts(&inner.users, Some(id), &username, &email) {
            return Err(StoreError::UniqueViolation);
        }

        let user = &mut inner.users[pos];
        user.username = username;
        user.email = email;
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        Ok(Some(user.clone()))
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.users.len();
        inner.users.retain(|u| u.id != id);
        Ok(inner.users.len() < before)
    }
}
