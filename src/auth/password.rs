use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::ServiceError;

/// Hashes with a fresh salt and Argon2's default (fixed) parameters.
pub fn hash_password(plain: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            ServiceError::Hashing(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Checks `plain` against a stored PHC string. The digest comparison inside the
/// Argon2 verifier is constant time. A hash that does not parse is an error.
pub fn verify_password(plain: &str, hash: &str) -> Result<bool, ServiceError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        ServiceError::Hashing(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(plain: String) -> Result<String, ServiceError> {
    tokio::task::spawn_blocking(move || hash_password(&plain)).await?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_blocking(plain: String, hash: String) -> Result<bool, ServiceError> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash)).await?
}
