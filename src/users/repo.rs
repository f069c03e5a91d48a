use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::users::repo_types::{NewUser, User, UserChanges, UserField};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique column (username or email) already holds the value.
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for user records.
///
/// Implementations must enforce username and email uniqueness themselves;
/// callers may pre-check, but two concurrent creates can both pass a pre-check.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<User>, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn find_by_field(&self, field: UserField, value: &str)
        -> Result<Option<User>, StoreError>;
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;
    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError>;
    /// Returns `false` when no record had that id.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique(e: sqlx::Error) -> StoreError {
    let unique = e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        StoreError::UniqueViolation
    } else {
        StoreError::Database(e)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash
            FROM users
            ORDER BY id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_field(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        // column name comes from a closed enum, never from input
        let sql = format!(
            "SELECT id, username, email, password_hash FROM users WHERE {} = $1",
            field.column()
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash
            "#,
        )
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique)
    }

    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash)
            WHERE id = $1
            RETURNING id, username, email, password_hash
            "#,
        )
        .bind(id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.password_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
