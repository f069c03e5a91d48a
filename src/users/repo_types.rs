use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,               // assigned by the store, never reused
    pub username: String,      // unique
    pub email: String,         // unique, stored lowercased
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, not exposed in JSON
}

/// Fields for a new record. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

/// Columns that can be used for single-record lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Username,
    Email,
}

impl UserField {
    pub fn column(self) -> &'static str {
        match self {
            UserField::Username => "username",
            UserField::Email => "email",
        }
    }

    pub(crate) fn value_of(self, user: &User) -> &str {
        match self {
            UserField::Username => &user.username,
            UserField::Email => &user.email,
        }
    }
}
