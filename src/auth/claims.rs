use serde::{Deserialize, Serialize};

/// JWT payload issued at login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub id: i64,          // user ID
    pub username: String, // username at issuance
    pub iat: usize,       // issued at (unix timestamp)
    pub exp: usize,       // expires at (unix timestamp)
}
